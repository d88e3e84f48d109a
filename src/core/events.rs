//! 生命周期事件：任务 / 子任务 / 验证 / 记忆 / 挂起恢复 / 计划修正
//!
//! 每个事件是一条带类型的扁平记录 {type, task_id, timestamp, data}，通过构造时注入的
//! EventSink（无界 mpsc）发出；订阅方（UI、日志）慢或已断开都不会阻塞内核。

use serde::Serialize;
use tokio::sync::mpsc;

/// 事件类型（序列化为 snake_case，如 "subtask_completed"）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventType {
    TaskStarted,
    TaskDecomposed,
    TaskCompleted,
    TaskFailed,
    TaskPaused,
    UserInputRequired,
    SubtaskStarted,
    SubtaskCompleted,
    SubtaskFailed,
    SubtaskReviewRetry,
    VerificationStarted,
    VerificationCompleted,
    VerificationFailed,
    RecoveryPlanned,
    MemoryExtracted,
    MemorySaved,
    TaskSuspended,
    TaskResumed,
    SuspendCancelled,
    PlanRefinementTriggered,
    ToolRetry,
    KnowledgePrecipitated,
}

/// 单条生命周期事件
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub event_type: TaskEventType,
    pub task_id: String,
    /// 毫秒时间戳（UTC）
    pub timestamp: i64,
    pub data: serde_json::Value,
}

impl TaskEvent {
    pub fn new(event_type: TaskEventType, task_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type,
            task_id: task_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }
}

/// 事件出口：可为空（不订阅时所有 emit 都是 no-op）
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TaskEvent>>,
}

impl EventSink {
    /// 创建一对 sink / receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn from_sender(tx: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// 不订阅任何事件
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event_type: TaskEventType, task_id: &str, data: serde_json::Value) {
        tracing::debug!(event = ?event_type, task_id, "task event");
        if let Some(tx) = &self.tx {
            // 接收端已关闭时直接丢弃
            let _ = tx.send(TaskEvent::new(event_type, task_id, data));
        }
    }
}
