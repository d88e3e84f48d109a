//! 内核错误类型
//!
//! 工具层失败大多在 Adaptive Executor / ReAct 循环内部被折叠为 Observation，
//! 只有编排层无法继续时才以 AgentError 向上传播（参见 autonomous::controller 的 task_failed）。

use thiserror::Error;

/// 运行过程中可能出现的错误（工具、推理接口、状态机、存储等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Network timeout")]
    NetworkTimeout,

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    /// 推理接口返回了无法使用的结果（空分解、缺字段等）
    #[error("Reasoning failed: {0}")]
    ReasoningFailed(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// 状态机非法迁移（如对已完成任务调用 resume）
    #[error("Invalid task state: {0}")]
    InvalidState(String),

    #[error("Knowledge store error: {0}")]
    StoreError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    /// ReAct 循环达到步数上限仍未给出最终答案
    #[error("Step limit reached: {0}")]
    StepLimitReached(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 是否为工具层错误（会被折叠进 Observation 而不是终止循环）
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            AgentError::ToolExecutionFailed(_)
                | AgentError::ToolTimeout(_)
                | AgentError::UnknownTool(_)
                | AgentError::NetworkTimeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_detection() {
        assert!(AgentError::ToolTimeout("shell".into()).is_tool_error());
        assert!(AgentError::UnknownTool("x".into()).is_tool_error());
        assert!(!AgentError::Cancelled.is_tool_error());
        assert!(!AgentError::ReasoningFailed("empty".into()).is_tool_error());
    }

    #[test]
    fn test_error_display() {
        let err = AgentError::TaskNotFound("task_1".into());
        assert_eq!(err.to_string(), "Task not found: task_1");
    }
}
