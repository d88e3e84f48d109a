//! 自主任务：任务模型、子任务复审、ReAct 子任务执行、任务控制器

pub mod controller;
pub mod review;
pub mod runner;
pub mod task;

pub use controller::{AutonomousController, SubmitOptions};
pub use review::{two_stage_review, ReviewVerdict};
pub use runner::ReactTaskReasoner;
pub use task::{
    AutonomousTask, Decomposition, GoalVerification, IssueSeverity, MemoryFact, ReviewIssue, ReviewOutcome,
    ReviewStage, SubTask, SubTaskStatus, TaskStatus,
};
