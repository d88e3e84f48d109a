//! LLM 输出解析
//!
//! 模型常把 JSON 包在 ```json 代码块或说明文字里；这里先截出 JSON 片段，再按需要的类型反序列化。

use serde::de::DeserializeOwned;

use crate::core::AgentError;
use crate::react::ToolCall;

/// 截取 JSON 片段：优先 ```json 代码块，其次第一个 '{' 到最后一个 '}'
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析为指定结构
pub fn parse_json<T: DeserializeOwned>(output: &str) -> Result<T, AgentError> {
    let json_str = extract_json(output)
        .ok_or_else(|| AgentError::JsonParseError(format!("no JSON object in: {}", truncate(output, 200))))?;
    serde_json::from_str(json_str).map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))
}

/// 解析动作：含有效 JSON 且 tool 非空则为 ToolCall；否则（纯文本 / tool 为空）为 None，表示给出最终答案
pub fn parse_action(output: &str) -> Result<Option<ToolCall>, AgentError> {
    let Some(json_str) = extract_json(output) else {
        return Ok(None);
    };
    let value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;
    let tool = value.get("tool").and_then(|t| t.as_str()).unwrap_or("").trim();
    if tool.is_empty() {
        return Ok(None);
    }
    let args = value.get("args").cloned().unwrap_or_else(|| serde_json::json!({}));
    Ok(Some(ToolCall::new(tool, args)))
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_parse_action_from_code_block() {
        let out = "I will list files.\n```json\n{\"tool\": \"run_command\", \"args\": {\"command\": \"ls\"}}\n```";
        let call = parse_action(out).unwrap().unwrap();
        assert_eq!(call.tool, "run_command");
        assert_eq!(call.args["command"], "ls");
    }

    #[test]
    fn test_plain_text_is_final() {
        assert!(parse_action("The answer is 42.").unwrap().is_none());
        assert!(parse_action(r#"{"tool": "", "answer": "x"}"#).unwrap().is_none());
    }

    #[test]
    fn test_missing_args_defaults_to_empty_object() {
        let call = parse_action(r#"{"tool": "echo"}"#).unwrap().unwrap();
        assert!(call.args.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_parse_json_error_keeps_fragment() {
        #[derive(Deserialize)]
        struct Need {
            #[allow(dead_code)]
            x: u32,
        }
        let err = parse_json::<Need>(r#"{"y": 1}"#).err().unwrap();
        assert!(matches!(err, AgentError::JsonParseError(ref m) if m.contains("\"y\"")));
        assert!(parse_json::<Need>("no json").is_err());
    }
}
