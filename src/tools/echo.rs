//! echo 工具（演示与测试用）：回显 text；带 fail 参数时把它作为错误返回

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back. Args: {\"text\": \"message\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "fail": { "type": "string", "description": "Return this text as an error instead" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        if let Some(err) = args.get("fail").and_then(|v| v.as_str()) {
            return Err(err.to_string());
        }
        Ok(args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)")
            .to_string())
    }
}
