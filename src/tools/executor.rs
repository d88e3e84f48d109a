//! 工具执行器
//!
//! ToolRunner 是自适应执行器与推理循环看到的最底层执行接口；ToolExecutor 是它的默认实现：
//! 持有 ToolRegistry 与默认超时，在超时内调用工具，超时或失败时转为 AgentError，
//! 每次调用输出结构化审计日志（JSON）。参数中的 `timeout_ms` 会覆盖默认超时（重试规划器加大超时时使用）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolRegistry};

/// 单次工具调用
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn execute(&self, tool: &str, args: serde_json::Value) -> Result<String, AgentError>;

    /// 当前可用的工具名
    fn tool_names(&self) -> Vec<String>;
}

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    fn timeout_for(&self, args: &serde_json::Value) -> Duration {
        args.get("timeout_ms")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(self.timeout)
    }
}

#[async_trait]
impl ToolRunner for ToolExecutor {
    /// 执行指定工具；未注册返回 UnknownTool，超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed
    async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, AgentError> {
        if !self.registry.contains(tool_name) {
            return Err(AgentError::UnknownTool(tool_name.to_string()));
        }
        let limit = self.timeout_for(&args);
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(limit, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "timeout_ms": limit.as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(format!(
                "{} timed out after {} ms",
                tool_name,
                limit.as_millis()
            ))),
        }
    }

    fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
