//! 挂起决策：基于意图描述判断是否需要停下来等用户

use serde::{Deserialize, Serialize};

use crate::react::IntentDescriptor;

/// 检查发生的时机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendPhase {
    /// 工具执行前（根据推理与计划的调用）
    PreExecution,
    /// 工具执行后（根据 Observation）
    PostExecution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendDecision {
    pub reason: String,
    /// 给用户看的提示
    pub user_message: String,
}

pub fn should_suspend(intent: &IntentDescriptor, phase: SuspendPhase) -> Option<SuspendDecision> {
    let (reason, user_message) = if intent.requires_auth {
        (
            "requires_login",
            "Waiting for login: please sign in in the browser, the task resumes once done.",
        )
    } else if intent.requires_confirmation {
        (
            "requires_confirmation",
            "Waiting for your confirmation before continuing.",
        )
    } else if intent.interactive_command && phase == SuspendPhase::PreExecution {
        (
            "interactive_command",
            "This step needs interactive terminal input; please run it yourself and resume.",
        )
    } else {
        return None;
    };

    Some(SuspendDecision {
        reason: if intent.reason.is_empty() {
            reason.to_string()
        } else {
            format!("{}: {}", reason, intent.reason)
        },
        user_message: user_message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::react::{IntentClassifier, ToolCall};
    use serde_json::json;

    #[test]
    fn test_pre_execution_login() {
        let intent = IntentClassifier::new().classify(
            "I need to log in to the portal",
            Some(&ToolCall::new("browser_click", json!({"text": "Sign in"}))),
        );
        let d = should_suspend(&intent, SuspendPhase::PreExecution).unwrap();
        assert!(d.reason.starts_with("requires_login"));
        assert!(d.user_message.contains("login"));
    }

    #[test]
    fn test_normal_step_does_not_suspend() {
        let intent = IntentClassifier::new().classify("count lines", Some(&ToolCall::new("run_command", json!({"command": "wc -l a.txt"}))));
        assert!(should_suspend(&intent, SuspendPhase::PreExecution).is_none());
    }

    #[test]
    fn test_post_execution_login_wall() {
        let intent = IntentClassifier::new().classify_observation("Session expired. Please log in again.");
        assert!(should_suspend(&intent, SuspendPhase::PostExecution).is_some());
    }
}
