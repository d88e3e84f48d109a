//! 推理接口
//!
//! 内核只通过这两个 trait 使用 LLM：
//! - Reasoner：ReAct 单步（想 → 决定动作 → 给最终答案）
//! - TaskReasoner：任务级（分解、执行子任务、复审、目标验证、记忆提取、摘要）

use async_trait::async_trait;
use serde_json::Value;

use crate::autonomous::{
    AutonomousTask, Decomposition, GoalVerification, MemoryFact, ReviewOutcome, ReviewStage, SubTask,
};
use crate::core::AgentError;
use crate::react::{ReActStep, ToolCall};

/// 单步推理的输入
#[derive(Debug, Clone, Copy)]
pub struct ReasoningContext<'a> {
    pub query: &'a str,
    pub history: &'a [ReActStep],
    /// 检索到的长期记忆
    pub memory: &'a [String],
    pub tools: &'a [String],
    /// 工具描述（name: description），可为空
    pub tool_descriptions: &'a str,
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn generate_thought(&self, ctx: &ReasoningContext<'_>) -> Result<String, AgentError>;

    /// None 表示不再调用工具，进入最终答案
    async fn decide_action(
        &self,
        ctx: &ReasoningContext<'_>,
        thought: &str,
    ) -> Result<Option<ToolCall>, AgentError>;

    async fn generate_final_answer(&self, ctx: &ReasoningContext<'_>) -> Result<String, AgentError>;
}

/// 执行一个子任务所需的全部上下文（不含其他子任务的完整历史）
#[derive(Debug, Clone)]
pub struct SubtaskRequest<'a> {
    pub task_id: &'a str,
    pub goal: &'a str,
    pub subtask: &'a SubTask,
    /// 已完成子任务的摘要
    pub completed: &'a [String],
    pub user_answers: &'a [String],
    /// 上一次执行被复审打回时的问题
    pub feedback: &'a [String],
    /// 上次挂起时保存的上下文，恢复执行时传入
    pub resume: Option<Value>,
}

/// 子任务执行结果
#[derive(Debug, Clone)]
pub enum SubtaskExecution {
    Completed { result: String },
    /// 执行中需要用户介入；挂起记录已交给 SuspendCoordinator
    Suspended { reason: String, user_message: String },
}

#[async_trait]
pub trait TaskReasoner: Send + Sync {
    /// `answers` 为恢复时用户对 requires_user_input 问题的回答
    async fn decompose_task(&self, query: &str, answers: &[String]) -> Result<Decomposition, AgentError>;

    async fn execute_subtask(&self, req: SubtaskRequest<'_>) -> Result<SubtaskExecution, AgentError>;

    async fn verify_goal_completion(&self, task: &AutonomousTask) -> Result<GoalVerification, AgentError>;

    async fn extract_memories(&self, task: &AutonomousTask) -> Result<Vec<MemoryFact>, AgentError>;

    async fn summarize_task(&self, task: &AutonomousTask) -> Result<String, AgentError>;

    /// 子任务复审；默认直接通过
    async fn review_subtask(
        &self,
        _subtask: &SubTask,
        _result: &str,
        _stage: ReviewStage,
    ) -> Result<ReviewOutcome, AgentError> {
        Ok(ReviewOutcome::approved())
    }
}
