//! 自适应执行器
//!
//! 检测 → 规划 → 执行 → 反馈：每次调用后先分析结果（工具没报错但返回 `{success:false}`、
//! `clicked:false` 这类静默失败也算失败），失败时交给分类器与重试规划器，按
//! 「调用方声明的替代参数 → 内置替代生成 → 规划器修改 → 无其它办法时原样重试」的顺序选出下一次参数。
//! 预算按 (工具, 原始参数) 记在 AttemptTracker 里，推理循环重复发起同一失败调用不会重置预算。
//! execute_step 从不返回 Err，工具错误都折叠进 ExecutionOutcome。

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::events::{EventSink, TaskEventType};
use crate::react::ToolCall;
use crate::recovery::{
    enrich_observation, normalize_args, AttemptTracker, ClassifiedError, ErrorClassifier, ErrorType,
    RetryContext, RetryPlan, RetryPlanner, RetryStrategy,
};
use crate::tools::ToolRunner;

/// 导航等待策略的升级顺序
const WAIT_ESCALATION: &[&str] = &["load", "domcontentloaded", "networkidle"];

/// 常见按钮文案的同义替换
const LABEL_ALTERNATIVES: &[(&str, &[&str])] = &[
    ("submit", &["Send", "Confirm", "OK", "Continue"]),
    ("login", &["Log in", "Sign in", "Sign In"]),
    ("log in", &["Login", "Sign in"]),
    ("sign in", &["Log in", "Login"]),
    ("search", &["Go", "Find", "Search"]),
    ("next", &["Continue", "Next step", ">"]),
    ("ok", &["Confirm", "Yes", "Accept"]),
    ("accept", &["Accept all", "Agree", "OK"]),
    ("close", &["×", "Dismiss", "Cancel"]),
];

/// 推理循环看到的执行接口
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute_action(&self, task_id: &str, call: &ToolCall) -> ExecutionOutcome;

    /// 新任务开始时清空跨调用的尝试记录
    fn reset(&self) {}

    fn tool_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// 一次要执行的步骤
#[derive(Debug, Clone)]
pub struct ExecutionStep {
    pub tool: String,
    pub args: Value,
    /// 调用方声明的替代参数（按顺序尝试）
    pub alternatives: Vec<Value>,
    pub max_retries: Option<u32>,
    pub task_id: String,
}

impl ExecutionStep {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
            alternatives: Vec::new(),
            max_retries: None,
            task_id: String::new(),
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<Value>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }
}

/// 执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: Option<String>,
    /// 失败时为增强后的 Observation（原始错误 + 诊断 + 建议）
    pub error: Option<String>,
    pub should_retry: bool,
    pub attempts: u32,
    pub error_type: Option<ErrorType>,
    pub classified: Option<ClassifiedError>,
    pub plan: Option<RetryPlan>,
}

impl ExecutionOutcome {
    fn success(output: String, attempts: u32) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            should_retry: false,
            attempts,
            error_type: None,
            classified: None,
            plan: None,
        }
    }

    /// 喂回推理循环的 Observation 文本
    pub fn observation(&self) -> String {
        if self.success {
            self.output.clone().unwrap_or_default()
        } else {
            self.error.clone().unwrap_or_else(|| "Error: unknown failure".to_string())
        }
    }
}

/// 结果分析
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultAnalysis {
    Success,
    Failure(String),
}

const EMBEDDED_ERROR_MARKERS: &[&str] = &[
    "Traceback (most recent call last)",
    "ModuleNotFoundError:",
    "command not found",
    "is not recognized as an internal or external command",
];

/// 判断一次工具输出是否真正成功
pub fn analyze_result(output: &str) -> ResultAnalysis {
    let trimmed = output.trim();
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
        let message = || {
            obj.get("error")
                .or_else(|| obj.get("message"))
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| trimmed.to_string())
        };
        if obj.get("success").and_then(|v| v.as_bool()) == Some(false) {
            return ResultAnalysis::Failure(message());
        }
        match obj.get("error") {
            Some(Value::Null) | Some(Value::Bool(false)) | None => {}
            Some(Value::String(s)) if s.trim().is_empty() => {}
            Some(_) => return ResultAnalysis::Failure(message()),
        }
        if obj.get("clicked").and_then(|v| v.as_bool()) == Some(false) {
            return ResultAnalysis::Failure("click had no effect: target element not clickable".to_string());
        }
        if obj.get("filled").and_then(|v| v.as_bool()) == Some(false) {
            return ResultAnalysis::Failure("fill had no effect: target element not found".to_string());
        }
        return ResultAnalysis::Success;
    }
    if trimmed.starts_with("Error:") || trimmed.starts_with("ERROR:") || trimmed.starts_with("error:") {
        return ResultAnalysis::Failure(trimmed.to_string());
    }
    if EMBEDDED_ERROR_MARKERS.iter().any(|m| trimmed.contains(m)) {
        return ResultAnalysis::Failure(trimmed.to_string());
    }
    ResultAnalysis::Success
}

/// 内置替代生成：按工具与错误类型给出候选参数
pub fn builtin_alternatives(tool: &str, args: &Value, error_type: ErrorType) -> Vec<Value> {
    let mut out = Vec::new();
    let Some(obj) = args.as_object() else {
        return out;
    };

    match error_type {
        ErrorType::BrowserElementNotFound => {
            for key in ["text", "label"] {
                if let Some(label) = obj.get(key).and_then(|v| v.as_str()) {
                    let lower = label.trim().to_lowercase();
                    if let Some((_, alts)) = LABEL_ALTERNATIVES.iter().find(|(l, _)| *l == lower) {
                        for alt in alts.iter().filter(|a| !a.eq_ignore_ascii_case(label)) {
                            let mut next = obj.clone();
                            next.insert(key.to_string(), json!(alt));
                            out.push(Value::Object(next));
                        }
                    }
                }
            }
            if let Some(selector) = obj.get("selector").and_then(|v| v.as_str()) {
                for alt in selector_alternatives(selector) {
                    let mut next = obj.clone();
                    next.insert("selector".to_string(), json!(alt));
                    out.push(Value::Object(next));
                }
            }
        }
        ErrorType::BrowserSpaNotRendered | ErrorType::Timeout if is_navigation(tool, args) => {
            let current = obj.get("wait_until").and_then(|v| v.as_str()).unwrap_or("load");
            let start = WAIT_ESCALATION
                .iter()
                .position(|w| *w == current)
                .map(|i| i + 1)
                .unwrap_or(0);
            for wait in &WAIT_ESCALATION[start..] {
                let mut next = obj.clone();
                next.insert("wait_until".to_string(), json!(wait));
                out.push(Value::Object(next));
            }
        }
        _ => {}
    }
    out
}

fn is_navigation(tool: &str, args: &Value) -> bool {
    let t = tool.to_lowercase();
    t.contains("navigate") || t.contains("goto") || (t.contains("browser") && args.get("url").is_some())
}

/// `#id` / `.class` 选择器的宽松写法
fn selector_alternatives(selector: &str) -> Vec<String> {
    let s = selector.trim();
    let mut out = Vec::new();
    if let Some(id) = s.strip_prefix('#') {
        out.push(format!("[id='{}']", id));
        out.push(format!("[name='{}']", id));
        out.push(format!("[id*='{}']", id));
    } else if let Some(class) = s.strip_prefix('.') {
        out.push(format!("[class*='{}']", class));
    } else if !s.starts_with('[') && !s.contains(' ') {
        out.push(format!("[aria-label='{}']", s));
        out.push(format!("text={}", s));
    }
    out
}

/// 自适应执行器
pub struct AdaptiveExecutor {
    runner: Arc<dyn ToolRunner>,
    classifier: Arc<ErrorClassifier>,
    planner: RetryPlanner,
    max_retries: u32,
    retry_delay: Duration,
    tracker: Mutex<AttemptTracker>,
    events: EventSink,
}

impl AdaptiveExecutor {
    pub fn new(runner: Arc<dyn ToolRunner>, classifier: Arc<ErrorClassifier>, planner: RetryPlanner) -> Self {
        Self {
            runner,
            classifier,
            planner,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            tracker: Mutex::new(AttemptTracker::new()),
            events: EventSink::disabled(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    fn tracker(&self) -> MutexGuard<'_, AttemptTracker> {
        self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn reset_attempts(&self) {
        self.tracker().clear();
    }

    pub async fn execute_step(&self, step: ExecutionStep) -> ExecutionOutcome {
        let max_retries = step.max_retries.unwrap_or(self.max_retries);
        let mut caller_alts: VecDeque<Value> = step.alternatives.iter().cloned().collect();
        let mut builtin: Option<VecDeque<Value>> = None;
        let mut tried: HashSet<String> = HashSet::new();
        let mut args = step.args.clone();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            tried.insert(normalize_args(&args));

            let raw = self.runner.execute(&step.tool, args.clone()).await;
            let error = match raw {
                Ok(output) => match analyze_result(&output) {
                    ResultAnalysis::Success => {
                        if attempts > 1 {
                            tracing::info!(tool = %step.tool, attempts, "tool recovered after retry");
                        }
                        return ExecutionOutcome::success(output, attempts);
                    }
                    ResultAnalysis::Failure(e) => e,
                },
                Err(e) => e.to_string(),
            };

            // 此前已重试次数（首次失败为 0）
            let retry_count = self.tracker().record_failure(&step.tool, &step.args).saturating_sub(1);
            let classified = self.classifier.classify(&step.tool, &args, &error);
            let attempted = self.tracker().attempted_commands();
            let plan = self.planner.generate_retry_plan(&RetryContext {
                tool: &step.tool,
                args: &args,
                classified: &classified,
                retry_count,
                max_retries,
                attempted_commands: &attempted,
                current_timeout_ms: args.get("timeout_ms").and_then(|v| v.as_u64()),
            });
            tracing::debug!(
                tool = %step.tool,
                error_type = %classified.error_type,
                strategy = ?plan.strategy,
                retry_count,
                "tool failure classified"
            );

            let budget_left = retry_count < max_retries;
            let next = if budget_left && plan.strategy != RetryStrategy::WebSearch {
                self.next_args(&step.tool, &args, &classified, &plan, &mut caller_alts, &mut builtin, &tried)
            } else {
                None
            };

            let Some(next) = next else {
                let should_retry = budget_left && plan.should_retry;
                tracing::info!(
                    tool = %step.tool,
                    error_type = %classified.error_type,
                    attempts,
                    "tool failed, returning enriched observation"
                );
                return ExecutionOutcome {
                    success: false,
                    output: None,
                    error: Some(enrich_observation(&error, &classified, &plan)),
                    should_retry,
                    attempts,
                    error_type: Some(classified.error_type),
                    classified: Some(classified),
                    plan: Some(plan),
                };
            };

            if plan.strategy == RetryStrategy::AlternativeCommand {
                if let Some(cmd) = classified.extracted.command.as_deref() {
                    self.tracker().mark_command_attempted(cmd);
                }
            }
            self.events.emit(
                TaskEventType::ToolRetry,
                &step.task_id,
                json!({
                    "tool": step.tool,
                    "attempt": attempts + 1,
                    "error_type": classified.error_type,
                    "strategy": plan.strategy,
                    "reason": plan.reason,
                }),
            );
            args = next;
            if !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn next_args(
        &self,
        tool: &str,
        args: &Value,
        classified: &ClassifiedError,
        plan: &RetryPlan,
        caller_alts: &mut VecDeque<Value>,
        builtin: &mut Option<VecDeque<Value>>,
        tried: &HashSet<String>,
    ) -> Option<Value> {
        while let Some(alt) = caller_alts.pop_front() {
            if !tried.contains(&normalize_args(&alt)) {
                return Some(alt);
            }
        }

        let queue = builtin.get_or_insert_with(|| {
            builtin_alternatives(tool, args, classified.error_type).into_iter().collect()
        });
        while let Some(alt) = queue.pop_front() {
            if !tried.contains(&normalize_args(&alt)) {
                return Some(alt);
            }
        }

        if plan.should_retry {
            let modified = plan.apply_to(args);
            if !tried.contains(&normalize_args(&modified)) {
                return Some(modified);
            }
        }

        // 原样重试：仅在可自动重试且没有其它办法时
        if classified.can_auto_retry && plan.should_retry {
            return Some(args.clone());
        }
        None
    }
}

#[async_trait]
impl ActionExecutor for AdaptiveExecutor {
    async fn execute_action(&self, task_id: &str, call: &ToolCall) -> ExecutionOutcome {
        self.execute_step(ExecutionStep::new(call.tool.clone(), call.args.clone()).for_task(task_id))
            .await
    }

    fn reset(&self) {
        self.reset_attempts();
    }

    fn tool_names(&self) -> Vec<String> {
        self.runner.tool_names()
    }
}
