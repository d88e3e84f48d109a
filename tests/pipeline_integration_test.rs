//! 任务流水线集成测试

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use cowork::autonomous::{
        AutonomousTask, Decomposition, GoalVerification, MemoryFact, SubTask, SubTaskStatus, SubmitOptions,
        TaskStatus,
    };
    use cowork::config::AppConfig;
    use cowork::core::{AgentError, CoreBuilder, EventSink, TaskEvent, TaskEventType};
    use cowork::llm::{MockLlmClient, SubtaskExecution, SubtaskRequest, TaskReasoner};
    use tokio::sync::mpsc::UnboundedReceiver;

    /// 按场景返回固定结果的任务推理
    #[derive(Default)]
    struct ScriptedReasoner {
        subtasks: Vec<String>,
        questions: Vec<String>,
        verification: Option<GoalVerification>,
        executed: Mutex<Vec<String>>,
        running_seen: AtomicUsize,
        summaries: AtomicUsize,
    }

    #[async_trait]
    impl TaskReasoner for ScriptedReasoner {
        async fn decompose_task(&self, _q: &str, answers: &[String]) -> Result<Decomposition, AgentError> {
            Ok(Decomposition {
                subtasks: self.subtasks.clone(),
                strategy: "sequential".into(),
                can_run_autonomously: self.questions.is_empty(),
                requires_user_input: if answers.is_empty() { self.questions.clone() } else { vec![] },
            })
        }

        async fn execute_subtask(&self, req: SubtaskRequest<'_>) -> Result<SubtaskExecution, AgentError> {
            if req.subtask.status == SubTaskStatus::Running {
                self.running_seen.fetch_add(1, Ordering::SeqCst);
            }
            self.executed.lock().unwrap().push(req.subtask.description.clone());
            Ok(SubtaskExecution::Completed {
                result: format!("finished {}", req.subtask.description),
            })
        }

        async fn verify_goal_completion(&self, _t: &AutonomousTask) -> Result<GoalVerification, AgentError> {
            Ok(self.verification.clone().unwrap_or(GoalVerification {
                goal_met: true,
                confidence: 0.9,
                ..Default::default()
            }))
        }

        async fn extract_memories(&self, _t: &AutonomousTask) -> Result<Vec<MemoryFact>, AgentError> {
            Ok(vec![])
        }

        async fn summarize_task(&self, t: &AutonomousTask) -> Result<String, AgentError> {
            let n = self.summaries.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("summary #{} over {} subtasks", n, t.subtasks.len()))
        }
    }

    fn config(root: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.app.workspace_root = Some(root.to_path_buf());
        cfg.llm.provider = "mock".to_string();
        cfg.retry.retry_delay_ms = 0;
        cfg
    }

    fn drain(rx: &mut UnboundedReceiver<TaskEvent>) -> Vec<TaskEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn count(events: &[TaskEvent], ty: TaskEventType) -> usize {
        events.iter().filter(|e| e.event_type == ty).count()
    }

    #[tokio::test]
    async fn test_user_input_pauses_before_any_subtask_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let reasoner = Arc::new(ScriptedReasoner {
            subtasks: vec!["draft itinerary".into(), "book hotel".into()],
            questions: vec!["Which city?".into(), "What budget?".into()],
            ..Default::default()
        });
        let (events, mut rx) = EventSink::channel();
        let core = CoreBuilder::new(config(tmp.path()))
            .with_task_reasoner(reasoner.clone())
            .with_events(events)
            .build()
            .await
            .unwrap();

        let id = core.controller.submit("plan a weekend trip", SubmitOptions::default());
        let task = core.controller.execute_task(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Paused);
        assert!(task.subtasks.iter().all(|s| s.status == SubTaskStatus::Pending));
        assert!(reasoner.executed.lock().unwrap().is_empty());
        assert!(core.coordinator.is_suspended(&id));

        let events = drain(&mut rx);
        let input = events
            .iter()
            .find(|e| e.event_type == TaskEventType::UserInputRequired)
            .unwrap();
        assert_eq!(input.data["questions"][1], "What budget?");
        assert_eq!(count(&events, TaskEventType::SubtaskStarted), 0);

        let task = core
            .controller
            .resume_task(&id, vec!["Lisbon".into(), "500 EUR".into()])
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(!core.coordinator.is_suspended(&id));
        assert_eq!(
            *reasoner.executed.lock().unwrap(),
            vec!["draft itinerary".to_string(), "book hotel".to_string()]
        );
        assert_eq!(reasoner.running_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unmet_goal_appends_recovery_and_regenerates_summary_once() {
        let tmp = tempfile::tempdir().unwrap();
        let reasoner = Arc::new(ScriptedReasoner {
            subtasks: vec!["collect figures".into()],
            verification: Some(GoalVerification {
                goal_met: false,
                evidence: "chart missing".into(),
                confidence: 0.4,
                missing_steps: vec!["chart".into()],
                suggested_next_actions: vec!["draw the chart".into(), "attach chart to report".into()],
            }),
            ..Default::default()
        });
        let (events, mut rx) = EventSink::channel();
        let core = CoreBuilder::new(config(tmp.path()))
            .with_task_reasoner(reasoner.clone())
            .with_events(events)
            .build()
            .await
            .unwrap();

        let id = core.controller.submit("quarterly report", SubmitOptions::default());
        let task = core.controller.execute_task(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.goal_met(), Some(false));
        assert_eq!(task.subtasks.len(), 3);
        let recovery: Vec<&SubTask> = task.subtasks.iter().filter(|s| s.is_recovery).collect();
        assert_eq!(recovery.len(), 2);
        assert!(recovery.iter().all(|s| s.status == SubTaskStatus::Completed));
        // 首次摘要 + 补救后重新生成一次
        assert_eq!(reasoner.summaries.load(Ordering::SeqCst), 2);
        assert_eq!(task.summary.as_deref(), Some("summary #2 over 3 subtasks"));

        let events = drain(&mut rx);
        assert_eq!(count(&events, TaskEventType::RecoveryPlanned), 1);
        assert_eq!(count(&events, TaskEventType::VerificationStarted), 1);
        let lesson = events
            .iter()
            .find(|e| e.event_type == TaskEventType::KnowledgePrecipitated)
            .unwrap();
        assert_eq!(lesson.data["kind"], "lesson");
        let lessons = std::fs::read_to_string(core.vault.lessons_path()).unwrap();
        assert!(lessons.contains("missing: chart"));
    }

    #[tokio::test]
    async fn test_queue_runs_in_submission_order() {
        let tmp = tempfile::tempdir().unwrap();
        let reasoner = Arc::new(ScriptedReasoner {
            subtasks: vec!["step".into()],
            ..Default::default()
        });
        let core = CoreBuilder::new(config(tmp.path()))
            .with_task_reasoner(reasoner)
            .build()
            .await
            .unwrap();

        let a = core.controller.submit("first", SubmitOptions::default());
        let b = core.controller.submit("second", SubmitOptions::default());
        assert_eq!(core.controller.queued(), vec![a.clone(), b.clone()]);

        let done = core.controller.run_all().await;
        let ids: Vec<_> = done.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(core.controller.run_next().await.is_none());
    }

    #[tokio::test]
    async fn test_full_pipeline_with_react_and_mock_llm() {
        let tmp = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"subtasks": ["say hello"], "strategy": "direct", "can_run_autonomously": true, "requires_user_input": []}"#,
            "I should echo the greeting",
            r#"{"tool": "echo", "args": {"text": "hello"}}"#,
            "The greeting was echoed",
            r#"{"tool": ""}"#,
            "hello printed",
            r#"{"approved": true, "issues": []}"#,
            r#"{"approved": true, "issues": []}"#,
            r#"{"goal_met": true, "evidence": "hello printed", "confidence": 0.9, "missing_steps": [], "suggested_next_actions": []}"#,
            "Printed hello.",
            r#"{"memories": [{"content": "User greets in English", "category": "preference", "confidence": 0.9}]}"#,
        ]));
        let (events, mut rx) = EventSink::channel();
        let core = CoreBuilder::new(config(tmp.path()))
            .with_llm(llm)
            .with_events(events)
            .build()
            .await
            .unwrap();

        let id = core.controller.submit("greet the user", SubmitOptions::default());
        let task = core.controller.execute_task(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.subtasks[0].result.as_deref(), Some("hello printed"));
        assert_eq!(task.summary.as_deref(), Some("Printed hello."));
        assert_eq!(task.memory_extracted.as_ref().map(|m| m.len()), Some(1));

        let events = drain(&mut rx);
        assert_eq!(count(&events, TaskEventType::MemorySaved), 1);
        let precipitated = events
            .iter()
            .find(|e| e.event_type == TaskEventType::KnowledgePrecipitated)
            .unwrap();
        assert_eq!(precipitated.data["kind"], "note");
        assert_eq!(precipitated.data["decision"], "procedure");
        assert!(core.vault.root().join("procedure").join("greet-the-user.md").exists());
    }
}
