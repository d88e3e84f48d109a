//! 挂起 / 恢复协调器
//!
//! 每个任务的状态机：active → suspended → {resumed | cancelled}。
//! AutoDetect 条件会启动一个心跳任务（tokio interval + CancellationToken），周期性调用调用方提供的检查；
//! 第一次返回 true 即自动恢复，超过最长等待则自动取消。同一任务同一时刻最多一个心跳，
//! 重复挂起会先停掉旧心跳。心跳是内核中唯一独立于主执行流的后台并发。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::events::{EventSink, TaskEventType};

/// 自动恢复检查（例如：浏览器里是否已登录）
#[async_trait]
pub trait ResumeCheck: Send + Sync {
    async fn check(&self, task_id: &str) -> bool;
}

/// 用同步闭包实现 ResumeCheck
pub struct FnCheck<F>(pub F);

#[async_trait]
impl<F> ResumeCheck for FnCheck<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn check(&self, task_id: &str) -> bool {
        (self.0)(task_id)
    }
}

/// 恢复条件
#[derive(Clone)]
pub enum ResumeCondition {
    /// 只能由调用方 resume
    Manual,
    AutoDetect {
        check: Arc<dyn ResumeCheck>,
        interval: Duration,
        max_wait: Duration,
    },
}

impl std::fmt::Debug for ResumeCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResumeCondition::Manual => f.write_str("Manual"),
            ResumeCondition::AutoDetect { interval, max_wait, .. } => f
                .debug_struct("AutoDetect")
                .field("interval", interval)
                .field("max_wait", max_wait)
                .finish(),
        }
    }
}

impl ResumeCondition {
    fn kind(&self) -> &'static str {
        match self {
            ResumeCondition::Manual => "manual",
            ResumeCondition::AutoDetect { .. } => "auto_detect",
        }
    }
}

/// 已挂起任务
#[derive(Debug, Clone)]
pub struct SuspendedTask {
    pub task_id: String,
    pub suspended_at: DateTime<Utc>,
    pub reason: String,
    pub user_message: String,
    pub resume_condition: ResumeCondition,
    /// 恢复时原样交还给调用方
    pub context: Value,
    heartbeat: Option<CancellationToken>,
    generation: u64,
}

impl SuspendedTask {
    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat.is_some()
    }
}

/// 挂起状态变化通知
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuspendNotice {
    Suspended {
        task_id: String,
        reason: String,
        user_message: String,
    },
    Resumed {
        task_id: String,
        /// true 表示由心跳检查自动恢复
        auto: bool,
        context: Value,
    },
    Cancelled {
        task_id: String,
        reason: String,
    },
}

struct Inner {
    tasks: Mutex<HashMap<String, SuspendedTask>>,
    next_generation: Mutex<u64>,
    notices: Option<mpsc::UnboundedSender<SuspendNotice>>,
    events: EventSink,
    shutdown: CancellationToken,
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<String, SuspendedTask>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn notify(&self, notice: SuspendNotice) {
        if let Some(tx) = &self.notices {
            let _ = tx.send(notice);
        }
    }

    /// 取出条目并停掉心跳；generation 不匹配时（旧心跳）不做任何事
    fn take(&self, task_id: &str, generation: Option<u64>) -> Option<SuspendedTask> {
        let mut tasks = self.tasks();
        if let Some(g) = generation {
            if tasks.get(task_id).map(|t| t.generation) != Some(g) {
                return None;
            }
        }
        let entry = tasks.remove(task_id)?;
        if let Some(token) = &entry.heartbeat {
            token.cancel();
        }
        Some(entry)
    }

    fn resume(&self, task_id: &str, generation: Option<u64>, auto: bool) -> Option<Value> {
        let entry = self.take(task_id, generation)?;
        tracing::info!(task_id, auto, "task resumed");
        self.events.emit(
            TaskEventType::TaskResumed,
            task_id,
            json!({ "auto": auto, "reason": entry.reason }),
        );
        self.notify(SuspendNotice::Resumed {
            task_id: task_id.to_string(),
            auto,
            context: entry.context.clone(),
        });
        Some(entry.context)
    }

    fn cancel(&self, task_id: &str, generation: Option<u64>, reason: &str) -> bool {
        if self.take(task_id, generation).is_none() {
            return false;
        }
        tracing::info!(task_id, reason, "suspended task cancelled");
        self.events
            .emit(TaskEventType::SuspendCancelled, task_id, json!({ "reason": reason }));
        self.notify(SuspendNotice::Cancelled {
            task_id: task_id.to_string(),
            reason: reason.to_string(),
        });
        true
    }
}

/// 挂起 / 恢复协调器；Clone 共享同一份注册表
#[derive(Clone)]
pub struct SuspendCoordinator {
    inner: Arc<Inner>,
    heartbeat_interval: Duration,
    max_wait: Duration,
}

impl SuspendCoordinator {
    pub fn new(heartbeat_interval: Duration, max_wait: Duration) -> Self {
        Self::build(heartbeat_interval, max_wait, None, EventSink::disabled())
    }

    /// 带通知通道与事件出口
    pub fn with_channels(
        heartbeat_interval: Duration,
        max_wait: Duration,
        notices: Option<mpsc::UnboundedSender<SuspendNotice>>,
        events: EventSink,
    ) -> Self {
        Self::build(heartbeat_interval, max_wait, notices, events)
    }

    fn build(
        heartbeat_interval: Duration,
        max_wait: Duration,
        notices: Option<mpsc::UnboundedSender<SuspendNotice>>,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                next_generation: Mutex::new(0),
                notices,
                events,
                shutdown: CancellationToken::new(),
            }),
            heartbeat_interval,
            max_wait,
        }
    }

    /// 使用默认心跳间隔与最长等待的 AutoDetect 条件
    pub fn auto_detect(&self, check: Arc<dyn ResumeCheck>) -> ResumeCondition {
        ResumeCondition::AutoDetect {
            check,
            interval: self.heartbeat_interval,
            max_wait: self.max_wait,
        }
    }

    /// 挂起任务；AutoDetect 需要在 tokio 运行时内调用
    pub fn suspend(
        &self,
        task_id: &str,
        reason: &str,
        user_message: &str,
        condition: ResumeCondition,
        context: Value,
    ) {
        let generation = {
            let mut g = self.inner.next_generation.lock().unwrap_or_else(|p| p.into_inner());
            *g += 1;
            *g
        };

        // 同一任务重复挂起：先停掉旧心跳
        if let Some(prev) = self.inner.tasks().remove(task_id) {
            if let Some(token) = prev.heartbeat {
                token.cancel();
            }
            tracing::debug!(task_id, "re-suspend replaced previous entry");
        }

        let heartbeat = match &condition {
            ResumeCondition::Manual => None,
            ResumeCondition::AutoDetect {
                check,
                interval,
                max_wait,
            } => Some(self.spawn_heartbeat(task_id, generation, check.clone(), *interval, *max_wait)),
        };

        let entry = SuspendedTask {
            task_id: task_id.to_string(),
            suspended_at: Utc::now(),
            reason: reason.to_string(),
            user_message: user_message.to_string(),
            resume_condition: condition.clone(),
            context,
            heartbeat,
            generation,
        };
        self.inner.tasks().insert(task_id.to_string(), entry);

        tracing::info!(task_id, reason, condition = condition.kind(), "task suspended");
        self.inner.events.emit(
            TaskEventType::TaskSuspended,
            task_id,
            json!({
                "reason": reason,
                "user_message": user_message,
                "resume_condition": condition.kind(),
            }),
        );
        self.inner.notify(SuspendNotice::Suspended {
            task_id: task_id.to_string(),
            reason: reason.to_string(),
            user_message: user_message.to_string(),
        });
    }

    fn spawn_heartbeat(
        &self,
        task_id: &str,
        generation: u64,
        check: Arc<dyn ResumeCheck>,
        interval: Duration,
        max_wait: Duration,
    ) -> CancellationToken {
        let token = self.inner.shutdown.child_token();
        let stop = token.clone();
        let inner = Arc::clone(&self.inner);
        let task_id = task_id.to_string();
        let period = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = interval_at(started + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if started.elapsed() >= max_wait {
                    let reason = format!("auto-resume condition not met within {}s", max_wait.as_secs());
                    inner.cancel(&task_id, Some(generation), &reason);
                    return;
                }
                let ready = check.check(&task_id).await;
                if stop.is_cancelled() {
                    return;
                }
                if ready {
                    inner.resume(&task_id, Some(generation), true);
                    return;
                }
                tracing::debug!(task_id = %task_id, "heartbeat: condition not met yet");
            }
        });
        token
    }

    /// 恢复：停掉心跳、移出注册表、返回挂起时保存的 context
    pub fn resume(&self, task_id: &str) -> Option<Value> {
        self.inner.resume(task_id, None, false)
    }

    /// 取消：与 resume 相同的清理，但丢弃 context
    pub fn cancel(&self, task_id: &str, reason: &str) -> bool {
        self.inner.cancel(task_id, None, reason)
    }

    pub fn is_suspended(&self, task_id: &str) -> bool {
        self.inner.tasks().contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<SuspendedTask> {
        self.inner.tasks().get(task_id).cloned()
    }

    pub fn list(&self) -> Vec<SuspendedTask> {
        let mut v: Vec<SuspendedTask> = self.inner.tasks().values().cloned().collect();
        v.sort_by(|a, b| a.suspended_at.cmp(&b.suspended_at));
        v
    }

    /// 停掉所有心跳并清空注册表
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let drained: Vec<SuspendedTask> = self.inner.tasks().drain().map(|(_, t)| t).collect();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "suspend coordinator shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn coordinator() -> (SuspendCoordinator, mpsc::UnboundedReceiver<SuspendNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let c = SuspendCoordinator::with_channels(
            Duration::from_secs(5),
            Duration::from_secs(300),
            Some(tx),
            EventSink::disabled(),
        );
        (c, rx)
    }

    #[tokio::test]
    async fn test_round_trip_returns_exact_context() {
        let (c, _rx) = coordinator();
        let ctx = json!({"step": 3, "history": ["a", "b"]});
        c.suspend("t1", "login", "waiting for login", ResumeCondition::Manual, ctx.clone());
        assert!(c.is_suspended("t1"));
        assert_eq!(c.resume("t1"), Some(ctx));
        assert!(!c.is_suspended("t1"));
        assert_eq!(c.resume("t1"), None);
    }

    #[tokio::test]
    async fn test_cancel_discards_context() {
        let (c, mut rx) = coordinator();
        c.suspend("t1", "r", "m", ResumeCondition::Manual, json!(1));
        assert!(c.cancel("t1", "user gave up"));
        assert!(!c.is_suspended("t1"));
        assert!(!c.cancel("t1", "again"));
        assert!(matches!(rx.recv().await, Some(SuspendNotice::Suspended { .. })));
        assert!(matches!(rx.recv().await, Some(SuspendNotice::Cancelled { reason, .. }) if reason == "user gave up"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ceiling_auto_cancels() {
        let (c, mut rx) = coordinator();
        let never = Arc::new(FnCheck(|_: &str| false));
        c.suspend("t1", "login", "waiting for login", c.auto_detect(never), json!({}));
        assert!(c.get("t1").unwrap().has_heartbeat());

        let _ = rx.recv().await; // Suspended
        let start = Instant::now();
        let notice = rx.recv().await.unwrap();
        assert!(matches!(notice, SuspendNotice::Cancelled { .. }));
        assert!(start.elapsed() <= Duration::from_secs(300 + 5));
        assert!(!c.is_suspended("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_resume_delivers_context() {
        let (c, mut rx) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let check = Arc::new(FnCheck(move |_: &str| calls2.fetch_add(1, Ordering::SeqCst) >= 2));
        c.suspend("t1", "login", "m", c.auto_detect(check), json!({"resume": "here"}));

        let _ = rx.recv().await;
        match rx.recv().await.unwrap() {
            SuspendNotice::Resumed { auto, context, .. } => {
                assert!(auto);
                assert_eq!(context, json!({"resume": "here"}));
            }
            other => panic!("unexpected notice {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!c.is_suspended("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resuspend_stops_previous_timer() {
        let (c, _rx) = coordinator();
        let first_ready = Arc::new(AtomicBool::new(false));
        let flag = first_ready.clone();
        let first = Arc::new(FnCheck(move |_: &str| flag.load(Ordering::SeqCst)));
        c.suspend("t1", "a", "m", c.auto_detect(first), json!("old"));
        c.suspend("t1", "b", "m", ResumeCondition::Manual, json!("new"));

        // 旧心跳即使条件满足也不能恢复新的挂起
        first_ready.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(c.is_suspended("t1"));
        assert_eq!(c.get("t1").unwrap().reason, "b");
        assert_eq!(c.resume("t1"), Some(json!("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all() {
        let (c, _rx) = coordinator();
        let never = Arc::new(FnCheck(|_: &str| false));
        c.suspend("a", "r", "m", c.auto_detect(never.clone()), json!(null));
        c.suspend("b", "r", "m", c.auto_detect(never), json!(null));
        assert_eq!(c.list().len(), 2);
        c.shutdown();
        assert!(c.list().is_empty());
    }
}
