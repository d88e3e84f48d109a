//! 推理层：ReAct 循环控制器、意图识别、工具结果校验

pub mod critic;
pub mod intent;
pub mod loop_;
pub mod step;

pub use critic::{Critic, CriticResult};
pub use intent::{IntentClassifier, IntentDescriptor, RiskLevel};
pub use loop_::ReactController;
pub use step::{ReActStep, ReactResult, StepOutcome, ToolCall};
