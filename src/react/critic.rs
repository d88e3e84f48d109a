//! Critic：工具结果校验
//!
//! 在 Observation 喂回推理之前做两件事：
//! 1. 自动校验（不调用 LLM）：执行失败、空输出、浏览器动作没有可见效果时给出修正提示
//! 2. 可选质量检查：一次轻量 LLM 调用判断结果是否符合目标，不符合时返回 Correction
//!
//! 提示会追加到 Observation 末尾，作为下一轮推理的上下文。

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::ToolCall;
use crate::recovery::RetryStrategy;
use crate::tools::ExecutionOutcome;

const QUALITY_PROMPT: &str = "Goal: {goal}\nTool: {tool}\nResult:\n{observation}\n\n\
Does this result move the goal forward as expected? Reply OK if it does, otherwise reply with one sentence describing what to fix.";

/// Critic 评估结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriticResult {
    Approved,
    /// 需要修正（提示文本）
    Correction(String),
    /// 未做质量检查（未启用或该工具不在评估列表）
    Skipped,
}

pub struct Critic {
    llm: Option<Arc<dyn LlmClient>>,
    /// 为空表示评估所有工具
    evaluate_tools: HashSet<String>,
}

impl Critic {
    /// 只做自动校验
    pub fn new() -> Self {
        Self {
            llm: None,
            evaluate_tools: HashSet::new(),
        }
    }

    /// 启用 LLM 质量检查（可以用与推理不同的模型）
    pub fn with_quality_check(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 仅对这些工具做质量检查
    pub fn with_evaluate_tools(mut self, tools: Vec<String>) -> Self {
        self.evaluate_tools = tools.into_iter().collect();
        self
    }

    fn should_evaluate(&self, tool: &str) -> bool {
        self.evaluate_tools.is_empty() || self.evaluate_tools.contains(tool)
    }

    /// 自动校验
    pub fn verify(&self, call: &ToolCall, outcome: &ExecutionOutcome) -> CriticResult {
        if !outcome.success {
            let hint = match outcome.plan.as_ref().map(|p| p.strategy) {
                Some(RetryStrategy::AskUser) => {
                    "The page needs user interaction; stop and ask the user instead of retrying."
                }
                Some(RetryStrategy::SwitchStrategy) => {
                    "This approach is not working; switch to a different tool or strategy."
                }
                Some(RetryStrategy::FixCode) => "Fix the code or path shown in the error before running it again.",
                Some(RetryStrategy::WebSearch) => "Search the web for this error message before trying again.",
                _ if outcome.attempts > 1 => {
                    "Automatic retries were exhausted; do not repeat the same call with the same arguments."
                }
                _ => return CriticResult::Approved,
            };
            return CriticResult::Correction(hint.to_string());
        }

        let output = outcome.output.as_deref().unwrap_or("").trim();
        if output.is_empty() || output == "null" || output == "{}" || output == "[]" {
            return CriticResult::Correction(format!(
                "{} returned no output; check that it actually had the intended effect.",
                call.tool
            ));
        }
        CriticResult::Approved
    }

    /// LLM 质量检查
    pub async fn evaluate(&self, goal: &str, tool: &str, observation: &str) -> Result<CriticResult, AgentError> {
        let Some(llm) = &self.llm else {
            return Ok(CriticResult::Skipped);
        };
        if !self.should_evaluate(tool) {
            return Ok(CriticResult::Skipped);
        }
        let prompt = QUALITY_PROMPT
            .replace("{goal}", goal)
            .replace("{tool}", tool)
            .replace("{observation}", observation);
        let response = llm.complete(&[Message::user(prompt)]).await?;
        let response = response.trim();
        if response.is_empty() || response.to_uppercase().starts_with("OK") {
            Ok(CriticResult::Approved)
        } else {
            Ok(CriticResult::Correction(response.to_string()))
        }
    }

    /// 自动校验 + 质量检查，返回要追加到 Observation 的提示
    pub async fn review(&self, goal: &str, call: &ToolCall, outcome: &ExecutionOutcome) -> Vec<String> {
        let mut hints = Vec::new();
        if let CriticResult::Correction(h) = self.verify(call, outcome) {
            hints.push(h);
        }
        if outcome.success {
            match self.evaluate(goal, &call.tool, &outcome.observation()).await {
                Ok(CriticResult::Correction(h)) => hints.push(h),
                Ok(_) => {}
                // 质量检查失败不影响循环
                Err(e) => tracing::warn!(error = %e, "quality check failed"),
            }
        }
        hints
    }
}

impl Default for Critic {
    fn default() -> Self {
        Self::new()
    }
}

/// 把提示追加到 Observation
pub fn append_hints(observation: &str, hints: &[String]) -> String {
    if hints.is_empty() {
        return observation.to_string();
    }
    let mut out = observation.to_string();
    for h in hints {
        out.push_str("\n[Critic] ");
        out.push_str(h);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    fn ok(output: &str) -> ExecutionOutcome {
        serde_json::from_value(json!({
            "success": true, "output": output, "error": null, "should_retry": false,
            "attempts": 1, "error_type": null, "classified": null, "plan": null
        }))
        .unwrap()
    }

    #[test]
    fn test_empty_output_gets_hint() {
        let c = Critic::new();
        let call = ToolCall::new("run_command", json!({"command": "true"}));
        assert!(matches!(c.verify(&call, &ok("  ")), CriticResult::Correction(_)));
        assert_eq!(c.verify(&call, &ok("3 files")), CriticResult::Approved);
    }

    #[test]
    fn test_should_evaluate_specific() {
        let c = Critic::new().with_evaluate_tools(vec!["run_command".to_string()]);
        assert!(c.should_evaluate("run_command"));
        assert!(!c.should_evaluate("echo"));
        assert!(Critic::new().should_evaluate("anything"));
    }

    #[tokio::test]
    async fn test_quality_check_correction() {
        let llm = Arc::new(MockLlmClient::scripted(["The file list is missing hidden files."]));
        let c = Critic::new().with_quality_check(llm);
        let call = ToolCall::new("run_command", json!({"command": "ls"}));
        let hints = c.review("list all files", &call, &ok("a.txt")).await;
        assert_eq!(hints, vec!["The file list is missing hidden files.".to_string()]);
    }

    #[tokio::test]
    async fn test_quality_check_skipped_without_llm() {
        let c = Critic::new();
        assert_eq!(c.evaluate("g", "t", "o").await.unwrap(), CriticResult::Skipped);
        let llm = Arc::new(MockLlmClient::scripted(["OK"]));
        let c = Critic::new().with_quality_check(llm);
        assert_eq!(c.evaluate("g", "t", "o").await.unwrap(), CriticResult::Approved);
    }

    #[test]
    fn test_append_hints() {
        assert_eq!(append_hints("obs", &[]), "obs");
        assert_eq!(append_hints("obs", &["fix".to_string()]), "obs\n[Critic] fix");
    }
}
