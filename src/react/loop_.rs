//! ReAct 主循环
//!
//! ReactController 是显式的状态对象：每次 step() 完成「检索记忆 → 想 → 决定动作 → 执行 → 校验 → 观察」一轮，
//! 返回 Step / Finished / Suspended。需要用户介入时（登录、确认、交互式命令）把循环状态序列化进
//! SuspendCoordinator 的 context 后停下；恢复时用 resume_with(context) 接着跑，计数器不清零。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, EventSink, TaskEventType};
use crate::llm::{ReasoningContext, Reasoner};
use crate::memory::{LongTermMemory, NoopLongTerm};
use crate::react::critic::append_hints;
use crate::react::{Critic, IntentClassifier, ReActStep, ReactResult, StepOutcome, ToolCall};
use crate::suspend::{should_suspend, ResumeCheck, ResumeCondition, SuspendCoordinator, SuspendPhase};
use crate::tools::{ActionExecutor, ExecutionOutcome};

const DEFAULT_MAX_STEPS: usize = 15;
const DEFAULT_STUCK_THRESHOLD: u32 = 2;

const BROWSER_REFINEMENT_HINT: &str = "[Plan refinement] The browser approach keeps failing. \
The page is probably client-rendered or the target element does not exist. Re-plan: wait for network idle \
and take a fresh snapshot, target elements by visible text instead of CSS selectors, \
or get the same data through a search or an API instead of the page.";

const GENERIC_REFINEMENT_HINT: &str = "[Plan refinement] You are repeating an approach that does not work. \
Step back: restate the goal, list what is already known from the observations, \
then choose a different tool or substantially different arguments.";

/// 挂起时保存、恢复时还原的循环状态
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LoopState {
    history: Vec<ReActStep>,
    consecutive_errors: u32,
    /// 动作签名 → 出现次数
    signatures: HashMap<String, u32>,
    /// 执行前被挂起的动作，恢复后直接执行
    pending: Option<PendingAction>,
    started: bool,
    finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingAction {
    thought: String,
    call: ToolCall,
}

pub struct ReactController {
    task_id: String,
    query: String,
    reasoner: Arc<dyn Reasoner>,
    executor: Arc<dyn ActionExecutor>,
    critic: Critic,
    intent: IntentClassifier,
    memory: Arc<dyn LongTermMemory>,
    memory_k: usize,
    suspend: Option<SuspendCoordinator>,
    resume_check: Option<Arc<dyn ResumeCheck>>,
    events: EventSink,
    cancel: CancellationToken,
    tools: Vec<String>,
    tool_descriptions: String,
    max_steps: usize,
    stuck_threshold: u32,
    state: LoopState,
}

impl ReactController {
    pub fn new(
        task_id: impl Into<String>,
        query: impl Into<String>,
        reasoner: Arc<dyn Reasoner>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        let tools = executor.tool_names();
        Self {
            task_id: task_id.into(),
            query: query.into(),
            reasoner,
            executor,
            critic: Critic::new(),
            intent: IntentClassifier::new(),
            memory: Arc::new(NoopLongTerm),
            memory_k: 0,
            suspend: None,
            resume_check: None,
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
            tools,
            tool_descriptions: String::new(),
            max_steps: DEFAULT_MAX_STEPS,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
            state: LoopState::default(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn LongTermMemory>, k: usize) -> Self {
        self.memory = memory;
        self.memory_k = k;
        self
    }

    pub fn with_critic(mut self, critic: Critic) -> Self {
        self.critic = critic;
        self
    }

    /// 启用挂起检查；未设置时不会挂起
    pub fn with_suspend(mut self, coordinator: SuspendCoordinator) -> Self {
        self.suspend = Some(coordinator);
        self
    }

    /// 设置后挂起使用 AutoDetect（心跳检测恢复条件），否则 Manual
    pub fn with_resume_check(mut self, check: Arc<dyn ResumeCheck>) -> Self {
        self.resume_check = Some(check);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_tool_descriptions(mut self, descriptions: impl Into<String>) -> Self {
        self.tool_descriptions = descriptions.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_stuck_threshold(mut self, threshold: u32) -> Self {
        self.stuck_threshold = threshold.max(1);
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn history(&self) -> &[ReActStep] {
        &self.state.history
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished
    }

    /// 当前循环状态（挂起时保存到 context 的内容）
    pub fn snapshot(&self) -> Value {
        json!({
            "kind": "react",
            "query": self.query,
            "state": self.state,
        })
    }

    /// 从挂起时保存的 context 还原；context 为 null 时保持当前内存中的状态
    pub fn resume_with(&mut self, context: Value) -> Result<(), AgentError> {
        if context.is_null() {
            return Ok(());
        }
        let state = context
            .get("state")
            .cloned()
            .ok_or_else(|| AgentError::InvalidState("suspend context has no loop state".to_string()))?;
        self.state = serde_json::from_value(state).map_err(|e| AgentError::JsonParseError(e.to_string()))?;
        self.state.finished = false;
        tracing::info!(
            task_id = %self.task_id,
            steps = self.state.history.len(),
            pending = self.state.pending.is_some(),
            "react loop resumed"
        );
        Ok(())
    }

    /// 一直跑到结束或挂起
    pub async fn run(&mut self) -> Result<StepOutcome, AgentError> {
        loop {
            match self.step().await? {
                StepOutcome::Step(_) => continue,
                done => return Ok(done),
            }
        }
    }

    pub async fn step(&mut self) -> Result<StepOutcome, AgentError> {
        if self.state.finished {
            return Err(AgentError::InvalidState(format!("react loop for {} already finished", self.task_id)));
        }
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if !self.state.started {
            // 新任务：清空执行器的尝试记录；恢复的循环不会走到这里
            self.executor.reset();
            self.state.started = true;
        }
        if self.state.history.len() >= self.max_steps {
            return Ok(self.finish_timed_out());
        }

        let step_number = self.state.history.len() + 1;
        let (thought, call, resumed) = match self.state.pending.take() {
            Some(p) => (p.thought, Some(p.call), true),
            None => {
                let memory = if self.memory_k > 0 && self.memory.enabled() {
                    self.memory.search(&self.query, self.memory_k)
                } else {
                    Vec::new()
                };
                let ctx = self.context(&memory);
                let thought = self.reasoner.generate_thought(&ctx).await?;
                let call = self.reasoner.decide_action(&ctx, &thought).await?;
                (thought, call, false)
            }
        };

        let Some(call) = call else {
            return self.finish_with_answer(step_number, thought).await;
        };

        if !resumed {
            let intent = self.intent.classify(&thought, Some(&call));
            if let Some(decision) = should_suspend(&intent, SuspendPhase::PreExecution) {
                if self.suspend.is_some() {
                    self.state.pending = Some(PendingAction { thought, call });
                    return Ok(self.suspend_now(decision.reason, decision.user_message));
                }
                tracing::warn!(task_id = %self.task_id, reason = %decision.reason, "step needs user but suspension is disabled");
            }
        }

        let outcome = self.executor.execute_action(&self.task_id, &call).await;
        let hints = self.critic.review(&self.query, &call, &outcome).await;
        let mut observation = append_hints(&outcome.observation(), &hints);
        if let Some(hint) = self.detect_stuck(&call, &outcome, &observation) {
            observation.push('\n');
            observation.push_str(hint);
        }

        let step = ReActStep {
            step_number,
            thought,
            action: Some(call),
            observation: Some(observation.clone()),
            is_final: false,
        };
        self.state.history.push(step.clone());
        tracing::debug!(task_id = %self.task_id, step = step_number, success = outcome.success, "react step");

        let post = self.intent.classify_observation(&observation);
        if let Some(decision) = should_suspend(&post, SuspendPhase::PostExecution) {
            if self.suspend.is_some() {
                return Ok(self.suspend_now(decision.reason, decision.user_message));
            }
        }

        Ok(StepOutcome::Step(step))
    }

    fn context<'a>(&'a self, memory: &'a [String]) -> ReasoningContext<'a> {
        ReasoningContext {
            query: &self.query,
            history: &self.state.history,
            memory,
            tools: &self.tools,
            tool_descriptions: &self.tool_descriptions,
        }
    }

    async fn finish_with_answer(&mut self, step_number: usize, thought: String) -> Result<StepOutcome, AgentError> {
        let answer = {
            let ctx = self.context(&[]);
            self.reasoner.generate_final_answer(&ctx).await?
        };
        self.state.history.push(ReActStep {
            step_number,
            thought,
            action: None,
            observation: None,
            is_final: true,
        });
        self.state.finished = true;
        tracing::info!(task_id = %self.task_id, steps = step_number, "react loop finished");
        Ok(StepOutcome::Finished(ReactResult {
            answer,
            steps: self.state.history.clone(),
            timed_out: false,
        }))
    }

    fn finish_timed_out(&mut self) -> StepOutcome {
        self.state.finished = true;
        let last = self
            .state
            .history
            .iter()
            .rev()
            .find_map(|s| s.observation.as_deref())
            .unwrap_or("none");
        let last: String = last.chars().take(500).collect();
        tracing::warn!(task_id = %self.task_id, max_steps = self.max_steps, "react loop hit step limit");
        StepOutcome::Finished(ReactResult {
            answer: format!(
                "Stopped after {} steps without reaching a final answer. Last observation: {}",
                self.max_steps, last
            ),
            steps: self.state.history.clone(),
            timed_out: true,
        })
    }

    fn suspend_now(&mut self, reason: String, user_message: String) -> StepOutcome {
        if let Some(coordinator) = &self.suspend {
            let condition = match &self.resume_check {
                Some(check) => coordinator.auto_detect(check.clone()),
                None => ResumeCondition::Manual,
            };
            coordinator.suspend(&self.task_id, &reason, &user_message, condition, self.snapshot());
        }
        StepOutcome::Suspended {
            task_id: self.task_id.clone(),
            reason,
            user_message,
        }
    }

    /// 卡死检测：连续出错或同一动作重复达到阈值时返回计划修正提示
    fn detect_stuck(&mut self, call: &ToolCall, outcome: &ExecutionOutcome, observation: &str) -> Option<&'static str> {
        let is_error = !outcome.success || looks_like_error(observation);
        if !is_error {
            // 有进展：连续错误清零，该动作的重复计数也清零
            self.state.consecutive_errors = 0;
            self.state.signatures.remove(&call.signature());
            return None;
        }
        self.state.consecutive_errors += 1;
        let repeats = {
            let count = self.state.signatures.entry(call.signature()).or_insert(0);
            *count += 1;
            *count
        };

        let stuck_on_errors = self.state.consecutive_errors >= self.stuck_threshold;
        let stuck_on_repeats = repeats >= self.stuck_threshold;
        if !stuck_on_errors && !stuck_on_repeats {
            return None;
        }

        let browser = call.tool.starts_with("browser")
            || outcome.error_type.map(|t| t.is_browser()).unwrap_or(false);
        let hint = if browser {
            BROWSER_REFINEMENT_HINT
        } else {
            GENERIC_REFINEMENT_HINT
        };
        tracing::info!(
            task_id = %self.task_id,
            consecutive_errors = self.state.consecutive_errors,
            repeats,
            "plan refinement triggered"
        );
        self.events.emit(
            TaskEventType::PlanRefinementTriggered,
            &self.task_id,
            json!({
                "tool": call.tool,
                "consecutive_errors": self.state.consecutive_errors,
                "repeats": repeats,
                "variant": if browser { "browser" } else { "generic" },
            }),
        );
        Some(hint)
    }
}

fn looks_like_error(observation: &str) -> bool {
    let head = observation.trim_start();
    head.starts_with("Error") || head.starts_with("error:") || head.starts_with("[error]")
}
