//! 尝试记录
//!
//! 重试预算按 (工具名, 归一化参数) 计数：同一个失败调用反复出现时计数只增不减，
//! 不会因为推理循环换了一种措辞再发起相同调用而重置。
//! 另外保留按工具名累计的失败次数，仅用于升级判断（例如连续失败触发计划修正）。

use std::collections::{HashMap, HashSet};

use serde_json::Value;

/// 参数归一化：对象键排序后序列化，字符串首尾空白去除
pub fn normalize_args(args: &Value) -> String {
    fn normalize(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = serde_json::Map::new();
                for k in keys {
                    out.insert(k.clone(), normalize(&map[k]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other.clone(),
        }
    }
    normalize(args).to_string()
}

#[derive(Debug, Default)]
pub struct AttemptTracker {
    attempts: HashMap<(String, String), u32>,
    tool_failures: HashMap<String, u32>,
    attempted_commands: HashSet<String>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次失败，返回该 (tool, args) 的累计失败次数
    pub fn record_failure(&mut self, tool: &str, args: &Value) -> u32 {
        *self.tool_failures.entry(tool.to_string()).or_insert(0) += 1;
        let count = self
            .attempts
            .entry((tool.to_string(), normalize_args(args)))
            .or_insert(0);
        *count += 1;
        *count
    }

    /// 该 (tool, args) 已失败次数
    pub fn failures_for(&self, tool: &str, args: &Value) -> u32 {
        self.attempts
            .get(&(tool.to_string(), normalize_args(args)))
            .copied()
            .unwrap_or(0)
    }

    /// 按工具名累计的失败次数
    pub fn tool_failures(&self, tool: &str) -> u32 {
        self.tool_failures.get(tool).copied().unwrap_or(0)
    }

    pub fn mark_command_attempted(&mut self, command: &str) {
        self.attempted_commands.insert(command.to_string());
    }

    pub fn attempted_commands(&self) -> Vec<String> {
        let mut v: Vec<String> = self.attempted_commands.iter().cloned().collect();
        v.sort();
        v
    }

    pub fn clear(&mut self) {
        self.attempts.clear();
        self.tool_failures.clear();
        self.attempted_commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_ignores_key_order_and_whitespace() {
        assert_eq!(
            normalize_args(&json!({"b": 1, "a": " x "})),
            normalize_args(&json!({"a": "x", "b": 1}))
        );
    }

    #[test]
    fn test_budget_keyed_by_tool_and_args() {
        let mut t = AttemptTracker::new();
        assert_eq!(t.record_failure("run_command", &json!({"command": "python3 a.py"})), 1);
        assert_eq!(t.record_failure("run_command", &json!({"command": "python3 a.py "})), 2);
        assert_eq!(t.record_failure("run_command", &json!({"command": "python a.py"})), 1);
        assert_eq!(t.failures_for("run_command", &json!({"command": "python3 a.py"})), 2);
        assert_eq!(t.tool_failures("run_command"), 3);
    }

    #[test]
    fn test_attempted_commands() {
        let mut t = AttemptTracker::new();
        t.mark_command_attempted("python3");
        t.mark_command_attempted("python3");
        assert_eq!(t.attempted_commands(), vec!["python3".to_string()]);
        t.clear();
        assert!(t.attempted_commands().is_empty());
    }
}
