//! 错误恢复：分类（classifier）、重试规划（planner）、替代表（alternatives）、尝试记录（tracker）

pub mod alternatives;
pub mod classifier;
pub mod planner;
pub mod tracker;

pub use classifier::{ClassifiedError, ErrorClassifier, ErrorType, ExtractedInfo, ToolCategory};
pub use planner::{enrich_observation, BrowserAction, RetryContext, RetryPlan, RetryPlanner, RetryStrategy};
pub use tracker::{normalize_args, AttemptTracker};
