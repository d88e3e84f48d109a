//! 自主任务控制器
//!
//! 一个目标对应一个 AutonomousTask：分解 → 逐个执行子任务（每个子任务只带已完成子任务的摘要，
//! 结果经两阶段复审，最多执行 max_review_retries + 1 次）→ 目标验证 → 摘要 → 记忆提取 → 沉淀。
//!
//! 任务按提交顺序排队（FIFO），同时运行的任务数由 max_concurrent_tasks 限制。
//! 任务表放在 std Mutex 里，锁不跨 await：驱动流程在任务副本上工作，在检查点提交回表；
//! 被取消的任务提交时返回 Cancelled，正在进行的调用结果被丢弃。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::autonomous::review::{two_stage_review, ReviewVerdict};
use crate::autonomous::{AutonomousTask, SubTask, TaskStatus};
use crate::config::AutonomousSection;
use crate::core::{AgentError, EventSink, TaskEventType};
use crate::llm::{SubtaskExecution, SubtaskRequest, TaskReasoner};
use crate::memory::KnowledgeStore;
use crate::precipitation::{PrecipitationEngine, TraceOutcome};
use crate::suspend::{ResumeCondition, SuspendCoordinator};

const USER_INPUT_REASON: &str = "user_input_required";

/// 提交选项
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// 覆盖配置中的 auto_save_memory
    pub auto_save_memory: Option<bool>,
}

/// 单个子任务的执行结果
enum SubtaskRun {
    Done,
    Suspended { reason: String, user_message: String },
}

pub struct AutonomousController {
    reasoner: Arc<dyn TaskReasoner>,
    suspend: SuspendCoordinator,
    settings: AutonomousSection,
    events: EventSink,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    precipitation: Option<Arc<PrecipitationEngine>>,
    tasks: Mutex<HashMap<String, AutonomousTask>>,
    queue: Mutex<VecDeque<String>>,
    cancelled: Mutex<HashSet<String>>,
    slots: Semaphore,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AutonomousController {
    pub fn new(reasoner: Arc<dyn TaskReasoner>, suspend: SuspendCoordinator, settings: AutonomousSection) -> Self {
        let permits = settings.max_concurrent_tasks.max(1);
        Self {
            reasoner,
            suspend,
            settings,
            events: EventSink::disabled(),
            knowledge: None,
            precipitation: None,
            tasks: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            cancelled: Mutex::new(HashSet::new()),
            slots: Semaphore::new(permits),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// 记忆保存与失败教训写入的目标
    pub fn with_knowledge(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    pub fn with_precipitation(mut self, engine: Arc<PrecipitationEngine>) -> Self {
        self.precipitation = Some(engine);
        self
    }

    /// 提交目标，返回任务 id；任务进入队尾
    pub fn submit(&self, query: impl Into<String>, options: SubmitOptions) -> String {
        let auto_save = options.auto_save_memory.unwrap_or(self.settings.auto_save_memory);
        let task = AutonomousTask::new(query, auto_save);
        let id = task.id.clone();
        tracing::info!(task_id = %id, query = %task.original_query, "task submitted");
        guard(&self.tasks).insert(id.clone(), task);
        guard(&self.queue).push_back(id.clone());
        id
    }

    pub fn get_task(&self, task_id: &str) -> Option<AutonomousTask> {
        guard(&self.tasks).get(task_id).cloned()
    }

    /// 按创建时间排序
    pub fn list_tasks(&self) -> Vec<AutonomousTask> {
        let mut v: Vec<AutonomousTask> = guard(&self.tasks).values().cloned().collect();
        v.sort_by_key(|t| t.created_at);
        v
    }

    pub fn queued(&self) -> Vec<String> {
        guard(&self.queue).iter().cloned().collect()
    }

    /// 取出队首任务并执行；队列为空返回 None
    pub async fn run_next(&self) -> Option<Result<AutonomousTask, AgentError>> {
        loop {
            let id = guard(&self.queue).pop_front()?;
            // 已取消的任务直接跳过
            if self.get_task(&id).map(|t| t.status == TaskStatus::Analyzing).unwrap_or(false) {
                return Some(self.execute_task(&id).await);
            }
        }
    }

    /// 依次执行队列中的全部任务
    pub async fn run_all(&self) -> Vec<AutonomousTask> {
        let mut done = Vec::new();
        while let Some(result) = self.run_next().await {
            match result {
                Ok(task) => done.push(task),
                Err(e) => tracing::warn!(error = %e, "task could not be started"),
            }
        }
        done
    }

    /// 执行一个尚未开始的任务；任务内部的失败体现在返回任务的 status / error 上
    pub async fn execute_task(&self, task_id: &str) -> Result<AutonomousTask, AgentError> {
        let task = self
            .get_task(task_id)
            .ok_or_else(|| AgentError::TaskNotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Analyzing {
            return Err(AgentError::InvalidState(format!("task {} already started ({:?})", task_id, task.status)));
        }
        guard(&self.queue).retain(|id| id != task_id);
        self.events.emit(
            TaskEventType::TaskStarted,
            task_id,
            json!({ "query": task.original_query }),
        );
        self.guarded(task, None).await
    }

    /// 恢复暂停的任务：取回挂起时保存的上下文后继续执行
    pub async fn resume_task(&self, task_id: &str, answers: Vec<String>) -> Result<AutonomousTask, AgentError> {
        let task = self.claim_paused(task_id)?;
        let context = self.suspend.resume(task_id);
        self.continue_task(task, answers, context).await
    }

    /// 心跳自动恢复后由调用方转交 SuspendNotice::Resumed 中的上下文
    pub async fn resume_with_context(&self, task_id: &str, context: Value) -> Result<AutonomousTask, AgentError> {
        let task = self.claim_paused(task_id)?;
        let context = (!context.is_null()).then_some(context);
        self.continue_task(task, Vec::new(), context).await
    }

    /// 取消任务：未开始 / 暂停的任务立即失败；执行中的任务标记失败，进行中的调用结果被丢弃
    pub fn cancel_task(&self, task_id: &str) -> Result<(), AgentError> {
        let was_paused = {
            let mut tasks = guard(&self.tasks);
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| AgentError::TaskNotFound(task_id.to_string()))?;
            let was_paused = task.status == TaskStatus::Paused;
            task.transition(TaskStatus::Failed)?;
            task.error = Some("cancelled by user".to_string());
            was_paused
        };
        guard(&self.cancelled).insert(task_id.to_string());
        guard(&self.queue).retain(|id| id != task_id);
        if was_paused || self.suspend.is_suspended(task_id) {
            self.suspend.cancel(task_id, "task cancelled by user");
        }
        tracing::info!(task_id, "task cancelled");
        self.events.emit(
            TaskEventType::TaskFailed,
            task_id,
            json!({ "error": "cancelled by user", "cancelled": true }),
        );
        Ok(())
    }

    /// 原子地认领暂停的任务（paused → executing），同一任务只有一个恢复方能继续
    fn claim_paused(&self, task_id: &str) -> Result<AutonomousTask, AgentError> {
        let mut tasks = guard(&self.tasks);
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| AgentError::TaskNotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Paused {
            return Err(AgentError::InvalidState(format!("task {} is not paused ({:?})", task_id, task.status)));
        }
        task.transition(TaskStatus::Executing)?;
        Ok(task.clone())
    }

    async fn continue_task(
        &self,
        mut task: AutonomousTask,
        answers: Vec<String>,
        context: Option<Value>,
    ) -> Result<AutonomousTask, AgentError> {
        task.user_answers.extend(answers);
        // 分解阶段等用户回答：没有子任务开始过，带着回答重新分解
        let waiting_for_input = !task.required_user_input.is_empty()
            && task.subtasks.iter().all(|s| s.started_at.is_none());
        let resume = if waiting_for_input {
            task.subtasks.clear();
            None
        } else {
            context.filter(|c| c.get("kind").and_then(|k| k.as_str()) == Some("react"))
        };
        self.commit(&task)?;
        tracing::info!(task_id = %task.id, answers = task.user_answers.len(), "task resumed");
        self.guarded(task, resume).await
    }

    /// 驱动任务并把未捕获的错误落为 failed
    async fn guarded(&self, task: AutonomousTask, resume: Option<Value>) -> Result<AutonomousTask, AgentError> {
        let _permit = self.slots.acquire().await.map_err(|_| AgentError::Cancelled)?;
        let task_id = task.id.clone();
        match self.drive(task, resume).await {
            Ok(task) => return Ok(task),
            Err(AgentError::Cancelled) => {
                tracing::info!(task_id = %task_id, "discarding results of cancelled task");
            }
            Err(e) => self.fail_task(&task_id, &e),
        }
        self.get_task(&task_id)
            .ok_or_else(|| AgentError::TaskNotFound(task_id.clone()))
    }

    fn fail_task(&self, task_id: &str, error: &AgentError) {
        tracing::error!(task_id, error = %error, "task failed");
        {
            let mut tasks = guard(&self.tasks);
            if let Some(task) = tasks.get_mut(task_id) {
                if task.transition(TaskStatus::Failed).is_ok() {
                    task.error = Some(error.to_string());
                }
            }
        }
        if self.suspend.is_suspended(task_id) {
            self.suspend.cancel(task_id, "task failed");
        }
        self.events.emit(
            TaskEventType::TaskFailed,
            task_id,
            json!({ "error": error.to_string() }),
        );
    }

    fn is_cancelled(&self, task_id: &str) -> bool {
        guard(&self.cancelled).contains(task_id)
    }

    fn check_cancelled(&self, task_id: &str) -> Result<(), AgentError> {
        if self.is_cancelled(task_id) {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 把副本写回任务表；任务已被取消时返回 Cancelled
    fn commit(&self, task: &AutonomousTask) -> Result<(), AgentError> {
        self.check_cancelled(&task.id)?;
        guard(&self.tasks).insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn drive(&self, mut task: AutonomousTask, resume: Option<Value>) -> Result<AutonomousTask, AgentError> {
        if task.status == TaskStatus::Analyzing || task.subtasks.is_empty() {
            if self.decompose(&mut task).await? {
                return Ok(task);
            }
        }

        let mut resume = resume;
        loop {
            while let Some(idx) = task.subtasks.iter().position(|s| !s.status.is_terminal()) {
                self.check_cancelled(&task.id)?;
                let run = self.run_subtask(&mut task, idx, resume.take()).await?;
                if let SubtaskRun::Suspended { reason, user_message } = run {
                    task.subtasks[idx].requeue();
                    task.transition(TaskStatus::Paused)?;
                    self.commit(&task)?;
                    self.events.emit(
                        TaskEventType::TaskPaused,
                        &task.id,
                        json!({
                            "reason": reason,
                            "user_message": user_message,
                            "subtask_id": task.subtasks[idx].id,
                        }),
                    );
                    return Ok(task);
                }
                self.commit(&task)?;
            }

            task.transition(TaskStatus::Verifying)?;
            self.commit(&task)?;

            if task.recovery_planned {
                // 补救子任务跑完：摘要只重新生成这一次
                task.summary = Some(self.summarize(&task).await);
                break;
            }

            self.verify(&mut task).await;
            self.check_cancelled(&task.id)?;
            task.summary = Some(self.summarize(&task).await);

            let actions: Vec<String> = task
                .verification_result
                .as_ref()
                .filter(|v| !v.goal_met)
                .map(|v| v.suggested_next_actions.clone())
                .unwrap_or_default();
            if actions.is_empty() {
                break;
            }
            task.recovery_planned = true;
            self.events.emit(
                TaskEventType::RecoveryPlanned,
                &task.id,
                json!({ "actions": actions }),
            );
            task.subtasks.extend(actions.into_iter().map(SubTask::recovery));
            task.transition(TaskStatus::Executing)?;
            self.commit(&task)?;
        }

        task.transition(TaskStatus::Completed)?;
        self.commit(&task)?;
        tracing::info!(task_id = %task.id, goal_met = ?task.goal_met(), "task completed");
        self.events.emit(
            TaskEventType::TaskCompleted,
            &task.id,
            json!({
                "goal_met": task.goal_met(),
                "summary": task.summary,
                "subtasks": task.subtasks.len(),
            }),
        );

        self.save_memories(&mut task).await;
        self.commit(&task)?;
        self.precipitate(&task).await;
        Ok(task)
    }

    /// 分解；需要用户回答时暂停任务并返回 true
    async fn decompose(&self, task: &mut AutonomousTask) -> Result<bool, AgentError> {
        let d = self
            .reasoner
            .decompose_task(&task.original_query, &task.user_answers)
            .await?;
        self.check_cancelled(&task.id)?;
        if d.subtasks.is_empty() {
            return Err(AgentError::ReasoningFailed("decomposition produced no subtasks".to_string()));
        }
        task.strategy = d.strategy.clone();
        task.can_run_autonomously = d.can_run_autonomously;
        task.subtasks = d.subtasks.iter().map(SubTask::new).collect();
        self.events.emit(
            TaskEventType::TaskDecomposed,
            &task.id,
            json!({ "subtasks": d.subtasks, "strategy": d.strategy }),
        );

        if !d.requires_user_input.is_empty() && task.user_answers.is_empty() {
            task.required_user_input = d.requires_user_input.clone();
            if task.status == TaskStatus::Analyzing {
                task.transition(TaskStatus::Executing)?;
            }
            task.transition(TaskStatus::Paused)?;
            self.commit(task)?;
            let user_message = format!("Please answer before the task continues: {}", d.requires_user_input.join(" / "));
            self.suspend.suspend(
                &task.id,
                USER_INPUT_REASON,
                &user_message,
                ResumeCondition::Manual,
                json!({ "kind": "user_input", "questions": d.requires_user_input }),
            );
            self.events.emit(
                TaskEventType::UserInputRequired,
                &task.id,
                json!({ "questions": d.requires_user_input }),
            );
            self.events.emit(
                TaskEventType::TaskPaused,
                &task.id,
                json!({ "reason": USER_INPUT_REASON, "user_message": user_message }),
            );
            return Ok(true);
        }

        if task.status == TaskStatus::Analyzing {
            task.transition(TaskStatus::Executing)?;
        }
        self.commit(task)?;
        Ok(false)
    }

    async fn run_subtask(
        &self,
        task: &mut AutonomousTask,
        idx: usize,
        resume: Option<Value>,
    ) -> Result<SubtaskRun, AgentError> {
        let completed = task.completed_summaries();
        task.subtasks[idx].start()?;
        self.events.emit(
            TaskEventType::SubtaskStarted,
            &task.id,
            json!({
                "subtask_id": task.subtasks[idx].id,
                "description": task.subtasks[idx].description,
                "index": idx,
            }),
        );

        let max_executions = if task.subtasks[idx].is_recovery {
            1
        } else {
            self.settings.max_review_retries + 1
        };
        let mut resume = resume;
        let mut accepted: Option<String> = None;

        // 执行次数与复审反馈保存在子任务上，挂起恢复后沿用同一预算
        while task.subtasks[idx].attempts < max_executions {
            let subtask = task.subtasks[idx].clone();
            let req = SubtaskRequest {
                task_id: &task.id,
                goal: &task.original_query,
                subtask: &subtask,
                completed: &completed,
                user_answers: &task.user_answers,
                feedback: &subtask.review_feedback,
                resume: resume.take(),
            };
            let execution = match self.reasoner.execute_subtask(req).await {
                Ok(e) => e,
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    self.check_cancelled(&task.id)?;
                    tracing::warn!(task_id = %task.id, subtask = %subtask.id, error = %e, "subtask failed");
                    task.subtasks[idx].attempts += 1;
                    task.subtasks[idx].fail(e.to_string())?;
                    self.events.emit(
                        TaskEventType::SubtaskFailed,
                        &task.id,
                        json!({ "subtask_id": subtask.id, "error": e.to_string() }),
                    );
                    return Ok(SubtaskRun::Done);
                }
            };
            self.check_cancelled(&task.id)?;

            // 挂起的执行在恢复后继续，不单独计数
            let result = match execution {
                SubtaskExecution::Completed { result } => result,
                SubtaskExecution::Suspended { reason, user_message } => {
                    return Ok(SubtaskRun::Suspended { reason, user_message });
                }
            };
            task.subtasks[idx].attempts += 1;
            let attempt = task.subtasks[idx].attempts;
            if subtask.is_recovery {
                accepted = Some(result);
                break;
            }

            match two_stage_review(self.reasoner.as_ref(), &subtask, &result).await {
                ReviewVerdict::Approved => {
                    accepted = Some(result);
                    break;
                }
                verdict @ ReviewVerdict::Rework { .. } => {
                    let feedback = verdict.feedback();
                    if attempt < max_executions {
                        self.events.emit(
                            TaskEventType::SubtaskReviewRetry,
                            &task.id,
                            json!({
                                "subtask_id": subtask.id,
                                "attempt": attempt,
                                "issues": feedback,
                            }),
                        );
                    } else {
                        tracing::warn!(task_id = %task.id, subtask = %subtask.id, "review retries exhausted, accepting result");
                    }
                    task.subtasks[idx].review_feedback = feedback;
                    accepted = Some(result);
                }
            }
            self.check_cancelled(&task.id)?;
        }

        let sub = &mut task.subtasks[idx];
        sub.complete(accepted.unwrap_or_default())?;
        self.events.emit(
            TaskEventType::SubtaskCompleted,
            &task.id,
            json!({
                "subtask_id": sub.id,
                "attempts": sub.attempts,
                "is_recovery": sub.is_recovery,
            }),
        );
        Ok(SubtaskRun::Done)
    }

    async fn verify(&self, task: &mut AutonomousTask) {
        self.events.emit(TaskEventType::VerificationStarted, &task.id, json!({}));
        match self.reasoner.verify_goal_completion(task).await {
            Ok(v) => {
                self.events.emit(
                    TaskEventType::VerificationCompleted,
                    &task.id,
                    json!({
                        "goal_met": v.goal_met,
                        "confidence": v.confidence,
                        "evidence": v.evidence,
                        "missing_steps": v.missing_steps,
                    }),
                );
                task.verification_result = Some(v);
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "goal verification failed");
                self.events.emit(
                    TaskEventType::VerificationFailed,
                    &task.id,
                    json!({ "error": e.to_string() }),
                );
            }
        }
    }

    /// 摘要；推理失败时退回到子任务结果拼接
    async fn summarize(&self, task: &AutonomousTask) -> String {
        match self.reasoner.summarize_task(task).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "summary generation failed");
                task.completed_summaries().join("\n")
            }
        }
    }

    async fn save_memories(&self, task: &mut AutonomousTask) {
        let Some(store) = self.knowledge.clone() else {
            return;
        };
        if !task.auto_save_memory {
            return;
        }
        let facts = match self.reasoner.extract_memories(task).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "memory extraction failed");
                return;
            }
        };
        let total = facts.len();
        let threshold = self.settings.memory_confidence_threshold;
        let kept: Vec<_> = facts.into_iter().filter(|f| f.confidence >= threshold).collect();
        self.events.emit(
            TaskEventType::MemoryExtracted,
            &task.id,
            json!({ "extracted": total, "kept": kept.len() }),
        );

        let mut saved = Vec::new();
        for fact in kept {
            let title: String = fact.content.chars().take(60).collect();
            match store.save_memory(&title, &fact.content, &fact.category).await {
                Ok(()) => saved.push(fact),
                Err(e) => tracing::warn!(task_id = %task.id, error = %e, "failed to save memory"),
            }
        }
        if !saved.is_empty() {
            self.events.emit(
                TaskEventType::MemorySaved,
                &task.id,
                json!({ "count": saved.len() }),
            );
        }
        task.memory_extracted = Some(saved);
    }

    async fn precipitate(&self, task: &AutonomousTask) {
        if !self.settings.precipitate_on_complete {
            return;
        }
        let Some(engine) = &self.precipitation else {
            return;
        };
        match engine.precipitate_trace(task).await {
            Ok(TraceOutcome::Skipped(reason)) => {
                tracing::debug!(task_id = %task.id, reason = %reason, "nothing to precipitate");
            }
            Ok(outcome) => {
                self.events.emit(TaskEventType::KnowledgePrecipitated, &task.id, outcome.to_event_data());
            }
            Err(e) => tracing::warn!(task_id = %task.id, error = %e, "precipitation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::autonomous::{
        Decomposition, GoalVerification, IssueSeverity, MemoryFact, ReviewIssue, ReviewOutcome, ReviewStage,
    };
    use crate::core::TaskEvent;

    #[derive(Default)]
    struct Scripted {
        subtasks: Vec<String>,
        questions: Vec<String>,
        reject_reviews: bool,
        facts: Vec<MemoryFact>,
        suspend_first: bool,
        /// 第 N 次（从 0 计）执行时挂起
        suspend_on: Option<usize>,
        executions: AtomicUsize,
        seen_feedback: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl TaskReasoner for Scripted {
        async fn decompose_task(&self, _q: &str, answers: &[String]) -> Result<Decomposition, AgentError> {
            Ok(Decomposition {
                subtasks: self.subtasks.clone(),
                strategy: "sequential".into(),
                can_run_autonomously: true,
                requires_user_input: if answers.is_empty() { self.questions.clone() } else { Vec::new() },
            })
        }

        async fn execute_subtask(&self, req: SubtaskRequest<'_>) -> Result<SubtaskExecution, AgentError> {
            let n = self.executions.fetch_add(1, Ordering::SeqCst);
            self.seen_feedback.lock().unwrap().push(req.feedback.to_vec());
            if (self.suspend_first && n == 0) || self.suspend_on == Some(n) {
                return Ok(SubtaskExecution::Suspended {
                    reason: "login_required".into(),
                    user_message: "please log in".into(),
                });
            }
            Ok(SubtaskExecution::Completed {
                result: format!("did {}", req.subtask.description),
            })
        }

        async fn verify_goal_completion(&self, _t: &AutonomousTask) -> Result<GoalVerification, AgentError> {
            Ok(GoalVerification {
                goal_met: true,
                confidence: 0.9,
                ..Default::default()
            })
        }

        async fn extract_memories(&self, _t: &AutonomousTask) -> Result<Vec<MemoryFact>, AgentError> {
            Ok(self.facts.clone())
        }

        async fn summarize_task(&self, t: &AutonomousTask) -> Result<String, AgentError> {
            Ok(format!("{} subtasks done", t.subtasks.len()))
        }

        async fn review_subtask(
            &self,
            _s: &SubTask,
            _r: &str,
            _stage: ReviewStage,
        ) -> Result<ReviewOutcome, AgentError> {
            if self.reject_reviews {
                return Ok(ReviewOutcome {
                    approved: false,
                    issues: vec![ReviewIssue {
                        severity: IssueSeverity::Major,
                        description: "too short".into(),
                    }],
                });
            }
            Ok(ReviewOutcome::approved())
        }
    }

    fn controller(reasoner: Arc<Scripted>) -> (AutonomousController, tokio::sync::mpsc::UnboundedReceiver<TaskEvent>) {
        let (events, rx) = EventSink::channel();
        let coordinator = SuspendCoordinator::new(Duration::from_secs(5), Duration::from_secs(300));
        let c = AutonomousController::new(reasoner, coordinator, AutonomousSection::default()).with_events(events);
        (c, rx)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<TaskEvent>) -> Vec<TaskEventType> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e.event_type);
        }
        out
    }

    #[tokio::test]
    async fn test_runs_subtasks_in_order_and_completes() {
        let r = Arc::new(Scripted {
            subtasks: vec!["load".into(), "plot".into()],
            ..Default::default()
        });
        let (c, mut rx) = controller(r.clone());
        let id = c.submit("make a report", SubmitOptions::default());
        let task = c.execute_task(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.goal_met(), Some(true));
        assert_eq!(task.summary.as_deref(), Some("2 subtasks done"));
        assert!(task.subtasks.iter().all(|s| s.status == crate::autonomous::SubTaskStatus::Completed));
        assert_eq!(r.executions.load(Ordering::SeqCst), 2);

        let events = drain(&mut rx);
        assert_eq!(events.first(), Some(&TaskEventType::TaskStarted));
        assert!(events.contains(&TaskEventType::TaskDecomposed));
        assert!(events.contains(&TaskEventType::TaskCompleted));
        assert!(c.queued().is_empty());
    }

    #[tokio::test]
    async fn test_review_bounds_executions() {
        let r = Arc::new(Scripted {
            subtasks: vec!["write intro".into()],
            reject_reviews: true,
            ..Default::default()
        });
        let (c, mut rx) = controller(r.clone());
        let id = c.submit("essay", SubmitOptions::default());
        let task = c.execute_task(&id).await.unwrap();

        // max_review_retries = 2 → 最多执行 3 次，最后一次结果被接受
        assert_eq!(r.executions.load(Ordering::SeqCst), 3);
        assert_eq!(task.subtasks[0].attempts, 3);
        assert_eq!(task.subtasks[0].result.as_deref(), Some("did write intro"));
        let feedback = r.seen_feedback.lock().unwrap().clone();
        assert!(feedback[0].is_empty());
        assert_eq!(feedback[1], vec!["[Major] too short".to_string()]);

        let retries = drain(&mut rx)
            .into_iter()
            .filter(|e| *e == TaskEventType::SubtaskReviewRetry)
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_review_budget_survives_suspension() {
        let r = Arc::new(Scripted {
            subtasks: vec!["write intro".into()],
            reject_reviews: true,
            suspend_on: Some(1),
            ..Default::default()
        });
        let (c, _rx) = controller(r.clone());
        let id = c.submit("essay", SubmitOptions::default());
        let task = c.execute_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Paused);
        assert_eq!(task.subtasks[0].attempts, 1);
        assert_eq!(task.subtasks[0].review_feedback, vec!["[Major] too short".to_string()]);

        let task = c.resume_task(&id, Vec::new()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        // 1 次完成 + 1 次挂起后恢复 + 1 次重做，总计不超过 max_review_retries + 1
        assert_eq!(task.subtasks[0].attempts, 3);
        assert_eq!(r.executions.load(Ordering::SeqCst), 4);
        let feedback = r.seen_feedback.lock().unwrap().clone();
        assert_eq!(feedback[2], vec!["[Major] too short".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_resumes_run_task_once() {
        let r = Arc::new(Scripted {
            subtasks: vec!["open dashboard".into()],
            suspend_first: true,
            ..Default::default()
        });
        let (c, _rx) = controller(r.clone());
        let id = c.submit("check stats", SubmitOptions::default());
        c.execute_task(&id).await.unwrap();

        let (manual, auto) = tokio::join!(
            c.resume_task(&id, Vec::new()),
            c.resume_with_context(&id, Value::Null)
        );
        assert_eq!(manual.is_ok() as u8 + auto.is_ok() as u8, 1);
        assert!(matches!(manual.err().or(auto.err()), Some(AgentError::InvalidState(_))));
        assert_eq!(r.executions.load(Ordering::SeqCst), 2);
        assert_eq!(c.get_task(&id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_pauses_for_user_input_then_redecomposes() {
        let r = Arc::new(Scripted {
            subtasks: vec!["book hotel".into()],
            questions: vec!["Which city?".into()],
            ..Default::default()
        });
        let (c, mut rx) = controller(r.clone());
        let id = c.submit("plan trip", SubmitOptions::default());
        let task = c.execute_task(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Paused);
        assert_eq!(task.required_user_input, vec!["Which city?".to_string()]);
        assert_eq!(r.executions.load(Ordering::SeqCst), 0);
        let events = drain(&mut rx);
        assert!(events.contains(&TaskEventType::UserInputRequired));
        assert!(events.contains(&TaskEventType::TaskPaused));

        let task = c.resume_task(&id, vec!["Paris".into()]).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.user_answers, vec!["Paris".to_string()]);
        assert_eq!(r.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_suspended_subtask_is_requeued_and_resumed() {
        let r = Arc::new(Scripted {
            subtasks: vec!["open dashboard".into()],
            suspend_first: true,
            ..Default::default()
        });
        let (c, _rx) = controller(r.clone());
        let id = c.submit("check stats", SubmitOptions::default());
        let task = c.execute_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Paused);
        assert_eq!(task.subtasks[0].status, crate::autonomous::SubTaskStatus::Pending);

        assert!(c.resume_task("missing", vec![]).await.is_err());
        let task = c.resume_task(&id, vec![]).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(r.executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_paused_and_terminal() {
        let r = Arc::new(Scripted {
            subtasks: vec!["x".into()],
            questions: vec!["q?".into()],
            ..Default::default()
        });
        let (c, _rx) = controller(r);
        let id = c.submit("goal", SubmitOptions::default());
        c.execute_task(&id).await.unwrap();

        c.cancel_task(&id).unwrap();
        let task = c.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("cancelled by user"));
        assert!(matches!(c.cancel_task(&id), Err(AgentError::InvalidState(_))));
        assert!(matches!(c.resume_task(&id, vec![]).await, Err(AgentError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_cancelled_queued_task_is_skipped() {
        let r = Arc::new(Scripted {
            subtasks: vec!["x".into()],
            ..Default::default()
        });
        let (c, _rx) = controller(r.clone());
        let first = c.submit("one", SubmitOptions::default());
        let second = c.submit("two", SubmitOptions::default());
        c.cancel_task(&first).unwrap();

        let done = c.run_all().await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, second);
        assert_eq!(r.executions.load(Ordering::SeqCst), 1);
        assert!(matches!(c.execute_task(&first).await, Err(AgentError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_memory_respects_confidence_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(crate::memory::MarkdownVault::new(dir.path()));
        let r = Arc::new(Scripted {
            subtasks: vec!["x".into()],
            facts: vec![
                MemoryFact {
                    content: "user prefers csv".into(),
                    category: "preference".into(),
                    confidence: 0.9,
                },
                MemoryFact {
                    content: "maybe likes charts".into(),
                    category: "preference".into(),
                    confidence: 0.3,
                },
            ],
            ..Default::default()
        });
        let (c, _rx) = controller(r);
        let c = c.with_knowledge(vault);
        let id = c.submit("export", SubmitOptions::default());
        let task = c.execute_task(&id).await.unwrap();
        let saved = task.memory_extracted.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].content, "user prefers csv");

        let skip = c.submit(
            "export again",
            SubmitOptions {
                auto_save_memory: Some(false),
            },
        );
        let task = c.execute_task(&skip).await.unwrap();
        assert!(task.memory_extracted.is_none());
    }
}
