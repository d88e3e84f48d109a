//! 核心层：错误类型、任务事件、内核构建器

pub mod builder;
pub mod error;
pub mod events;

pub use builder::{Core, CoreBuilder};
pub use error::AgentError;
pub use events::{EventSink, TaskEvent, TaskEventType};
