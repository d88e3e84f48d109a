//! 工具层：Tool trait 与注册表、带超时与审计的执行器、自适应执行器（重试 / 替代 / 反馈）

pub mod adaptive;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod shell;

pub use adaptive::{
    analyze_result, builtin_alternatives, ActionExecutor, AdaptiveExecutor, ExecutionOutcome, ExecutionStep,
    ResultAnalysis,
};
pub use echo::EchoTool;
pub use executor::{ToolExecutor, ToolRunner};
pub use registry::{Tool, ToolRegistry};
pub use shell::ShellTool;
