//! 子任务两阶段复审
//!
//! 先查「是否符合子任务描述」，通过后再查质量；任一阶段需要返工则整体重做。
//! 某一阶段的复审调用出错时记为未复审并继续下一阶段；两阶段都没有给出结论时按通过处理（复审不阻塞任务）。

use crate::autonomous::{ReviewIssue, ReviewStage, SubTask};
use crate::llm::TaskReasoner;

#[derive(Debug, Clone)]
pub enum ReviewVerdict {
    Approved,
    Rework {
        stage: ReviewStage,
        issues: Vec<ReviewIssue>,
    },
}

impl ReviewVerdict {
    /// 传给下一次执行的反馈
    pub fn feedback(&self) -> Vec<String> {
        match self {
            ReviewVerdict::Approved => Vec::new(),
            ReviewVerdict::Rework { stage, issues } if issues.is_empty() => {
                vec![format!("{:?} review rejected the result", stage)]
            }
            ReviewVerdict::Rework { issues, .. } => issues
                .iter()
                .map(|i| format!("[{:?}] {}", i.severity, i.description))
                .collect(),
        }
    }
}

pub async fn two_stage_review(reasoner: &dyn TaskReasoner, subtask: &SubTask, result: &str) -> ReviewVerdict {
    for stage in [ReviewStage::SpecCompliance, ReviewStage::Quality] {
        match reasoner.review_subtask(subtask, result, stage).await {
            Ok(outcome) if outcome.needs_rework() => {
                return ReviewVerdict::Rework {
                    stage,
                    issues: outcome.issues,
                };
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(subtask = %subtask.id, ?stage, error = %e, "review call failed, stage not reviewed");
            }
        }
    }
    ReviewVerdict::Approved
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::autonomous::{
        AutonomousTask, Decomposition, GoalVerification, IssueSeverity, MemoryFact, ReviewOutcome,
    };
    use crate::core::AgentError;
    use crate::llm::{SubtaskExecution, SubtaskRequest};

    struct StageReviewer {
        spec_ok: bool,
        spec_errors: bool,
        quality_ok: bool,
        stages: Mutex<Vec<ReviewStage>>,
    }

    #[async_trait]
    impl TaskReasoner for StageReviewer {
        async fn decompose_task(&self, _q: &str, _a: &[String]) -> Result<Decomposition, AgentError> {
            unreachable!()
        }
        async fn execute_subtask(&self, _req: SubtaskRequest<'_>) -> Result<SubtaskExecution, AgentError> {
            unreachable!()
        }
        async fn verify_goal_completion(&self, _t: &AutonomousTask) -> Result<GoalVerification, AgentError> {
            unreachable!()
        }
        async fn extract_memories(&self, _t: &AutonomousTask) -> Result<Vec<MemoryFact>, AgentError> {
            unreachable!()
        }
        async fn summarize_task(&self, _t: &AutonomousTask) -> Result<String, AgentError> {
            unreachable!()
        }
        async fn review_subtask(
            &self,
            _s: &SubTask,
            _r: &str,
            stage: ReviewStage,
        ) -> Result<ReviewOutcome, AgentError> {
            self.stages.lock().unwrap().push(stage);
            if stage == ReviewStage::SpecCompliance && self.spec_errors {
                return Err(AgentError::LlmError("reviewer unavailable".into()));
            }
            if stage == ReviewStage::Quality && !self.quality_ok {
                return Ok(ReviewOutcome {
                    approved: false,
                    issues: vec![ReviewIssue {
                        severity: IssueSeverity::Major,
                        description: "no error handling".into(),
                    }],
                });
            }
            if stage == ReviewStage::SpecCompliance && !self.spec_ok {
                return Ok(ReviewOutcome {
                    approved: false,
                    issues: vec![ReviewIssue {
                        severity: IssueSeverity::Critical,
                        description: "missing chart".into(),
                    }],
                });
            }
            Ok(ReviewOutcome::approved())
        }
    }

    #[tokio::test]
    async fn test_quality_stage_only_after_spec_passes() {
        let r = StageReviewer {
            spec_ok: false,
            spec_errors: false,
            quality_ok: true,
            stages: Mutex::new(Vec::new()),
        };
        let verdict = two_stage_review(&r, &SubTask::new("x"), "out").await;
        assert!(matches!(verdict, ReviewVerdict::Rework { stage: ReviewStage::SpecCompliance, .. }));
        assert_eq!(verdict.feedback(), vec!["[Critical] missing chart".to_string()]);
        assert_eq!(*r.stages.lock().unwrap(), vec![ReviewStage::SpecCompliance]);

        let r = StageReviewer {
            spec_ok: true,
            spec_errors: false,
            quality_ok: true,
            stages: Mutex::new(Vec::new()),
        };
        assert!(matches!(two_stage_review(&r, &SubTask::new("x"), "out").await, ReviewVerdict::Approved));
        assert_eq!(r.stages.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_spec_review_still_runs_quality_stage() {
        let r = StageReviewer {
            spec_ok: true,
            spec_errors: true,
            quality_ok: false,
            stages: Mutex::new(Vec::new()),
        };
        let verdict = two_stage_review(&r, &SubTask::new("x"), "out").await;
        assert!(matches!(verdict, ReviewVerdict::Rework { stage: ReviewStage::Quality, .. }));
        assert_eq!(verdict.feedback(), vec!["[Major] no error handling".to_string()]);
        assert_eq!(
            *r.stages.lock().unwrap(),
            vec![ReviewStage::SpecCompliance, ReviewStage::Quality]
        );
    }
}
