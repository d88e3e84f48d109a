//! 推理循环的数据类型：ToolCall、ReActStep、循环结果

use serde::{Deserialize, Serialize};

/// 一次工具调用（{"tool": "run_command", "args": {...}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }

    /// 卡死检测用的动作签名：工具名 + 参数前 100 个字符
    pub fn signature(&self) -> String {
        let args: String = self.args.to_string().chars().take(100).collect();
        format!("{}:{}", self.tool, args)
    }
}

/// 推理循环中的一步；每个任务只追加不修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReActStep {
    pub step_number: usize,
    pub thought: String,
    pub action: Option<ToolCall>,
    pub observation: Option<String>,
    pub is_final: bool,
}

/// 循环结束时的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactResult {
    pub answer: String,
    pub steps: Vec<ReActStep>,
    /// 是否因步数上限结束
    pub timed_out: bool,
}

/// step() 的返回值
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// 完成一步，循环可继续
    Step(ReActStep),
    Finished(ReactResult),
    /// 需要用户操作，循环已停止；恢复后调用 resume_with 继续
    Suspended {
        task_id: String,
        reason: String,
        user_message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signature_truncates_args() {
        let long = "x".repeat(300);
        let call = ToolCall::new("echo", json!({ "text": long }));
        let sig = call.signature();
        assert!(sig.starts_with("echo:"));
        assert_eq!(sig.chars().count(), "echo:".len() + 100);
    }

    #[test]
    fn test_tool_call_args_default() {
        let call: ToolCall = serde_json::from_str(r#"{"tool": "echo"}"#).unwrap();
        assert!(call.args.is_null());
    }
}
