//! 用 ReAct 循环执行子任务
//!
//! ReactTaskReasoner 包一层 TaskReasoner：分解、验证、摘要等仍交给内层（通常是 LlmReasoner），
//! 只把 execute_subtask 换成一个新的 ReactController（只带已完成子任务的摘要作为上下文）。
//! 循环挂起时，挂起记录以任务 id 为键交给 SuspendCoordinator，恢复时通过 SubtaskRequest::resume 还原。

use std::sync::Arc;

use async_trait::async_trait;

use crate::autonomous::{AutonomousTask, Decomposition, GoalVerification, MemoryFact, ReviewOutcome, ReviewStage, SubTask};
use crate::config::ReactSection;
use crate::core::{AgentError, EventSink};
use crate::llm::{LlmClient, Reasoner, SubtaskExecution, SubtaskRequest, TaskReasoner};
use crate::memory::{LongTermMemory, NoopLongTerm};
use crate::react::{Critic, ReactController, StepOutcome};
use crate::suspend::{ResumeCheck, SuspendCoordinator};
use crate::tools::ActionExecutor;

pub struct ReactTaskReasoner {
    inner: Arc<dyn TaskReasoner>,
    reasoner: Arc<dyn Reasoner>,
    executor: Arc<dyn ActionExecutor>,
    suspend: SuspendCoordinator,
    settings: ReactSection,
    memory: Arc<dyn LongTermMemory>,
    quality_llm: Option<Arc<dyn LlmClient>>,
    resume_check: Option<Arc<dyn ResumeCheck>>,
    tool_descriptions: String,
    events: EventSink,
}

impl ReactTaskReasoner {
    pub fn new(
        inner: Arc<dyn TaskReasoner>,
        reasoner: Arc<dyn Reasoner>,
        executor: Arc<dyn ActionExecutor>,
        suspend: SuspendCoordinator,
        settings: ReactSection,
    ) -> Self {
        Self {
            inner,
            reasoner,
            executor,
            suspend,
            settings,
            memory: Arc::new(NoopLongTerm),
            quality_llm: None,
            resume_check: None,
            tool_descriptions: String::new(),
            events: EventSink::disabled(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn LongTermMemory>) -> Self {
        self.memory = memory;
        self
    }

    /// 仅在 settings.enable_quality_check 为 true 时生效
    pub fn with_quality_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.quality_llm = Some(llm);
        self
    }

    pub fn with_resume_check(mut self, check: Arc<dyn ResumeCheck>) -> Self {
        self.resume_check = Some(check);
        self
    }

    pub fn with_tool_descriptions(mut self, descriptions: impl Into<String>) -> Self {
        self.tool_descriptions = descriptions.into();
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    fn controller(&self, task_id: &str, query: String) -> ReactController {
        let mut critic = Critic::new();
        if self.settings.enable_quality_check {
            if let Some(llm) = &self.quality_llm {
                critic = critic.with_quality_check(llm.clone());
            }
        }
        let mut controller = ReactController::new(task_id, query, self.reasoner.clone(), self.executor.clone())
            .with_memory(self.memory.clone(), self.settings.memory_k)
            .with_critic(critic)
            .with_suspend(self.suspend.clone())
            .with_events(self.events.clone())
            .with_tool_descriptions(self.tool_descriptions.clone())
            .with_max_steps(self.settings.max_steps)
            .with_stuck_threshold(self.settings.stuck_threshold);
        if let Some(check) = &self.resume_check {
            controller = controller.with_resume_check(check.clone());
        }
        controller
    }
}

/// 子任务的 ReAct 查询：目标 + 当前子任务 + 已完成摘要 + 用户回答 + 复审反馈
fn subtask_query(req: &SubtaskRequest<'_>) -> String {
    let mut q = format!("Overall goal: {}\nCurrent subtask: {}", req.goal, req.subtask.description);
    if !req.completed.is_empty() {
        q.push_str("\n\nCompleted subtasks:");
        for c in req.completed {
            q.push_str(&format!("\n- {}", c));
        }
    }
    if !req.user_answers.is_empty() {
        q.push_str("\n\nUser answers:");
        for a in req.user_answers {
            q.push_str(&format!("\n- {}", a));
        }
    }
    if !req.feedback.is_empty() {
        q.push_str("\n\nThe previous attempt was rejected by review:");
        for f in req.feedback {
            q.push_str(&format!("\n- {}", f));
        }
    }
    q
}

#[async_trait]
impl TaskReasoner for ReactTaskReasoner {
    async fn decompose_task(&self, query: &str, answers: &[String]) -> Result<Decomposition, AgentError> {
        self.inner.decompose_task(query, answers).await
    }

    async fn execute_subtask(&self, req: SubtaskRequest<'_>) -> Result<SubtaskExecution, AgentError> {
        let mut controller = self.controller(req.task_id, subtask_query(&req));
        if let Some(context) = req.resume.clone() {
            controller.resume_with(context)?;
        }
        match controller.run().await? {
            StepOutcome::Finished(result) if result.timed_out => {
                // 步数耗尽的答案不是真实结果：子任务失败，交给目标验证与补救
                tracing::warn!(subtask = %req.subtask.id, steps = result.steps.len(), "subtask hit react step limit");
                Err(AgentError::StepLimitReached(result.answer))
            }
            StepOutcome::Finished(result) => Ok(SubtaskExecution::Completed { result: result.answer }),
            StepOutcome::Suspended { reason, user_message, .. } => {
                Ok(SubtaskExecution::Suspended { reason, user_message })
            }
            StepOutcome::Step(_) => Err(AgentError::InvalidState("react run returned mid-step".to_string())),
        }
    }

    async fn verify_goal_completion(&self, task: &AutonomousTask) -> Result<GoalVerification, AgentError> {
        self.inner.verify_goal_completion(task).await
    }

    async fn extract_memories(&self, task: &AutonomousTask) -> Result<Vec<MemoryFact>, AgentError> {
        self.inner.extract_memories(task).await
    }

    async fn summarize_task(&self, task: &AutonomousTask) -> Result<String, AgentError> {
        self.inner.summarize_task(task).await
    }

    async fn review_subtask(
        &self,
        subtask: &SubTask,
        result: &str,
        stage: ReviewStage,
    ) -> Result<ReviewOutcome, AgentError> {
        self.inner.review_subtask(subtask, result, stage).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::llm::{LlmReasoner, MockLlmClient};
    use crate::recovery::{ErrorClassifier, RetryPlanner};
    use crate::tools::{AdaptiveExecutor, EchoTool, ToolExecutor, ToolRegistry};

    fn executor() -> Arc<dyn ActionExecutor> {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let runner = Arc::new(ToolExecutor::new(registry, 5));
        Arc::new(
            AdaptiveExecutor::new(runner, Arc::new(ErrorClassifier::new()), RetryPlanner::default())
                .with_retry_delay(Duration::ZERO),
        )
    }

    #[test]
    fn test_subtask_query_has_only_summaries() {
        let sub = SubTask::new("draw chart");
        let completed = vec!["load data: 120 rows".to_string()];
        let feedback = vec!["[Critical] chart missing axis labels".to_string()];
        let req = SubtaskRequest {
            task_id: "t",
            goal: "report",
            subtask: &sub,
            completed: &completed,
            user_answers: &[],
            feedback: &feedback,
            resume: None,
        };
        let q = subtask_query(&req);
        assert!(q.contains("Current subtask: draw chart"));
        assert!(q.contains("- load data: 120 rows"));
        assert!(q.contains("rejected by review"));
        assert!(!q.contains("User answers"));
    }

    #[tokio::test]
    async fn test_execute_subtask_through_react_loop() {
        // thought, action (echo), thought, action (final), final answer
        let llm = Arc::new(MockLlmClient::scripted([
            "I should echo the greeting",
            r#"{"tool": "echo", "args": {"text": "hello"}}"#,
            "done",
            r#"{"tool": ""}"#,
            "Greeting echoed: hello",
        ]));
        let llm_reasoner = Arc::new(LlmReasoner::new(llm));
        let coordinator = SuspendCoordinator::new(Duration::from_secs(5), Duration::from_secs(300));
        let runner = ReactTaskReasoner::new(
            llm_reasoner.clone(),
            llm_reasoner,
            executor(),
            coordinator,
            ReactSection::default(),
        );
        let sub = SubTask::new("say hello");
        let out = runner
            .execute_subtask(SubtaskRequest {
                task_id: "task_1",
                goal: "greet",
                subtask: &sub,
                completed: &[],
                user_answers: &[],
                feedback: &[],
                resume: None,
            })
            .await
            .unwrap();
        match out {
            SubtaskExecution::Completed { result } => assert_eq!(result, "Greeting echoed: hello"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_step_limit_fails_subtask() {
        // 每步都给出新的 echo 动作，永远不收尾
        let llm = Arc::new(MockLlmClient::scripted([
            "echo once",
            r#"{"tool": "echo", "args": {"text": "1"}}"#,
            "echo twice",
            r#"{"tool": "echo", "args": {"text": "2"}}"#,
        ]));
        let llm_reasoner = Arc::new(LlmReasoner::new(llm));
        let coordinator = SuspendCoordinator::new(Duration::from_secs(5), Duration::from_secs(300));
        let settings = ReactSection {
            max_steps: 2,
            ..ReactSection::default()
        };
        let runner = ReactTaskReasoner::new(llm_reasoner.clone(), llm_reasoner, executor(), coordinator, settings);
        let sub = SubTask::new("echo forever");
        let err = runner
            .execute_subtask(SubtaskRequest {
                task_id: "task_2",
                goal: "loop",
                subtask: &sub,
                completed: &[],
                user_answers: &[],
                feedback: &[],
                resume: None,
            })
            .await
            .unwrap_err();
        match err {
            AgentError::StepLimitReached(answer) => assert!(answer.starts_with("Stopped after 2 steps")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
