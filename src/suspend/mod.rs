//! 挂起 / 恢复：需要用户登录或确认时暂停任务，心跳检测条件满足后自动恢复

mod coordinator;
mod decision;

pub use coordinator::{FnCheck, ResumeCheck, ResumeCondition, SuspendCoordinator, SuspendNotice, SuspendedTask};
pub use decision::{should_suspend, SuspendDecision, SuspendPhase};
