//! 基于 LlmClient 的推理实现
//!
//! 每个操作一段 system prompt + 一条 user 消息；需要结构化结果的操作要求模型输出 JSON，
//! 用 parse 模块宽松解析（代码块、前后说明文字都可以）。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::autonomous::{
    AutonomousTask, Decomposition, GoalVerification, MemoryFact, ReviewOutcome, ReviewStage, SubTask,
    SubTaskStatus,
};
use crate::core::AgentError;
use crate::llm::parse::{extract_json, parse_action, parse_json, truncate};
use crate::llm::{LlmClient, ReasoningContext, Reasoner, SubtaskExecution, SubtaskRequest, TaskReasoner};
use crate::memory::Message;
use crate::react::{ReActStep, ToolCall};

const THOUGHT_PROMPT: &str = "You are the reasoning step of a tool-using agent. \
Given the goal, the previous steps and their observations, think about what to do next. \
Reply with a short paragraph of reasoning only.";

const ACTION_PROMPT: &str = "Decide the next action. If a tool is needed reply with JSON only: \
{\"tool\": \"<name>\", \"args\": {...}}. If the goal is already achieved reply with \
{\"tool\": \"\", \"answer\": \"<final answer>\"}.";

const FINAL_PROMPT: &str = "Write the final answer for the user based on the steps taken. Be concise and concrete.";

const DECOMPOSE_PROMPT: &str = "Break the goal into 1-8 ordered, independently executable subtasks. Reply with JSON: \
{\"subtasks\": [\"...\"], \"strategy\": \"...\", \"can_run_autonomously\": true, \
\"requires_user_input\": [\"question for the user\", ...]}. Only list questions that block execution.";

const SUBTASK_PROMPT: &str = "Execute the subtask and report the result. You only see summaries of completed subtasks.";

const VERIFY_PROMPT: &str = "Judge whether the goal was achieved by the subtask results. Reply with JSON: \
{\"goal_met\": bool, \"evidence\": \"...\", \"confidence\": 0.0-1.0, \"missing_steps\": [...], \
\"suggested_next_actions\": [...]}.";

const MEMORY_PROMPT: &str = "Extract durable facts worth remembering from this task (user preferences, \
environment facts, working procedures). Reply with JSON: {\"memories\": [{\"content\": \"...\", \
\"category\": \"...\", \"confidence\": 0.0-1.0}]}.";

const SUMMARY_PROMPT: &str = "Summarize what was done for the goal and the outcome in a few sentences.";

const REVIEW_SPEC_PROMPT: &str = "Review whether the result fulfils the subtask description. Reply with JSON: \
{\"approved\": bool, \"issues\": [{\"severity\": \"critical|major|minor\", \"description\": \"...\"}]}.";

const REVIEW_QUALITY_PROMPT: &str = "Review the quality of the result (correctness, completeness, no placeholders). \
Reply with JSON: {\"approved\": bool, \"issues\": [{\"severity\": \"critical|major|minor\", \"description\": \"...\"}]}.";

pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
}

impl LlmReasoner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    async fn ask(&self, system: &str, user: String) -> Result<String, AgentError> {
        self.llm
            .complete(&[Message::system(system), Message::user(user)])
            .await
    }
}

/// 拼接 ReAct 上下文（目标、记忆、工具、历史）
fn render_context(ctx: &ReasoningContext<'_>) -> String {
    let mut out = format!("Goal: {}\n", ctx.query);
    if !ctx.memory.is_empty() {
        out.push_str("\nRelevant memory:\n");
        for m in ctx.memory {
            out.push_str(&format!("- {}\n", m));
        }
    }
    if !ctx.tool_descriptions.is_empty() {
        out.push_str(&format!("\nTools:\n{}\n", ctx.tool_descriptions));
    } else if !ctx.tools.is_empty() {
        out.push_str(&format!("\nTools: {}\n", ctx.tools.join(", ")));
    }
    if !ctx.history.is_empty() {
        out.push_str("\nPrevious steps:\n");
        for step in ctx.history {
            out.push_str(&render_step(step));
        }
    }
    out
}

fn render_step(step: &ReActStep) -> String {
    let mut s = format!("{}. Thought: {}\n", step.step_number, step.thought);
    if let Some(call) = &step.action {
        s.push_str(&format!("   Action: {} {}\n", call.tool, call.args));
    }
    if let Some(obs) = &step.observation {
        s.push_str(&format!("   Observation: {}\n", truncate(obs, 1500)));
    }
    s
}

fn render_task(task: &AutonomousTask) -> String {
    let mut out = format!("Goal: {}\n\nSubtasks:\n", task.original_query);
    for (i, s) in task.subtasks.iter().enumerate() {
        let outcome = match s.status {
            SubTaskStatus::Completed => s.result.as_deref().unwrap_or(""),
            SubTaskStatus::Failed => s.error.as_deref().unwrap_or("failed"),
            _ => "(not run)",
        };
        out.push_str(&format!(
            "{}. [{:?}] {}\n   {}\n",
            i + 1,
            s.status,
            s.description,
            truncate(outcome, 800)
        ));
    }
    out
}

#[derive(Deserialize)]
struct MemoryReply {
    #[serde(default)]
    memories: Vec<MemoryFact>,
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn generate_thought(&self, ctx: &ReasoningContext<'_>) -> Result<String, AgentError> {
        let thought = self.ask(THOUGHT_PROMPT, render_context(ctx)).await?;
        Ok(thought.trim().to_string())
    }

    async fn decide_action(
        &self,
        ctx: &ReasoningContext<'_>,
        thought: &str,
    ) -> Result<Option<ToolCall>, AgentError> {
        let prompt = format!("{}\nCurrent thought: {}", render_context(ctx), thought);
        let reply = self.ask(ACTION_PROMPT, prompt).await?;
        parse_action(&reply)
    }

    async fn generate_final_answer(&self, ctx: &ReasoningContext<'_>) -> Result<String, AgentError> {
        let reply = self.ask(FINAL_PROMPT, render_context(ctx)).await?;
        // 模型有时仍按动作格式回答
        if let Some(json_str) = extract_json(&reply) {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(json_str) {
                if let Some(answer) = v.get("answer").and_then(|a| a.as_str()) {
                    return Ok(answer.to_string());
                }
            }
        }
        Ok(reply.trim().to_string())
    }
}

#[async_trait]
impl TaskReasoner for LlmReasoner {
    async fn decompose_task(&self, query: &str, answers: &[String]) -> Result<Decomposition, AgentError> {
        let mut prompt = format!("Goal: {}", query);
        if !answers.is_empty() {
            prompt.push_str("\n\nUser answers to earlier questions:\n");
            for a in answers {
                prompt.push_str(&format!("- {}\n", a));
            }
        }
        let reply = self.ask(DECOMPOSE_PROMPT, prompt).await?;
        let mut d: Decomposition = match parse_json(&reply) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "decomposition not parseable, running goal as single subtask");
                Decomposition {
                    can_run_autonomously: true,
                    ..Decomposition::default()
                }
            }
        };
        d.subtasks.retain(|s| !s.trim().is_empty());
        if d.subtasks.is_empty() {
            d.subtasks.push(query.to_string());
        }
        Ok(d)
    }

    async fn execute_subtask(&self, req: SubtaskRequest<'_>) -> Result<SubtaskExecution, AgentError> {
        let mut prompt = format!("Overall goal: {}\nSubtask: {}\n", req.goal, req.subtask.description);
        if !req.completed.is_empty() {
            prompt.push_str("\nCompleted so far:\n");
            for c in req.completed {
                prompt.push_str(&format!("- {}\n", c));
            }
        }
        if !req.feedback.is_empty() {
            prompt.push_str("\nA reviewer rejected the previous attempt:\n");
            for f in req.feedback {
                prompt.push_str(&format!("- {}\n", f));
            }
        }
        let result = self.ask(SUBTASK_PROMPT, prompt).await?;
        Ok(SubtaskExecution::Completed { result })
    }

    async fn verify_goal_completion(&self, task: &AutonomousTask) -> Result<GoalVerification, AgentError> {
        let reply = self.ask(VERIFY_PROMPT, render_task(task)).await?;
        Ok(parse_json(&reply).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "verification not parseable");
            GoalVerification {
                goal_met: false,
                evidence: truncate(&reply, 300),
                ..GoalVerification::default()
            }
        }))
    }

    async fn extract_memories(&self, task: &AutonomousTask) -> Result<Vec<MemoryFact>, AgentError> {
        let reply = self.ask(MEMORY_PROMPT, render_task(task)).await?;
        let parsed: MemoryReply = parse_json(&reply)?;
        Ok(parsed.memories)
    }

    async fn summarize_task(&self, task: &AutonomousTask) -> Result<String, AgentError> {
        let mut prompt = render_task(task);
        if let Some(v) = &task.verification_result {
            prompt.push_str(&format!(
                "\nVerification: {}\n",
                json!({"goal_met": v.goal_met, "evidence": v.evidence})
            ));
        }
        Ok(self.ask(SUMMARY_PROMPT, prompt).await?.trim().to_string())
    }

    async fn review_subtask(
        &self,
        subtask: &SubTask,
        result: &str,
        stage: ReviewStage,
    ) -> Result<ReviewOutcome, AgentError> {
        let system = match stage {
            ReviewStage::SpecCompliance => REVIEW_SPEC_PROMPT,
            ReviewStage::Quality => REVIEW_QUALITY_PROMPT,
        };
        let prompt = format!("Subtask: {}\n\nResult:\n{}", subtask.description, truncate(result, 3000));
        let reply = self.ask(system, prompt).await?;
        // 复审回复无法解析时不阻塞流程
        Ok(parse_json(&reply).unwrap_or_else(|_| ReviewOutcome::approved()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn ctx<'a>(history: &'a [ReActStep], tools: &'a [String]) -> ReasoningContext<'a> {
        ReasoningContext {
            query: "count files",
            history,
            memory: &[],
            tools,
            tool_descriptions: "",
        }
    }

    #[tokio::test]
    async fn test_decide_action_parses_tool_call() {
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"tool": "run_command", "args": {"command": "ls"}}"#,
        ]));
        let r = LlmReasoner::new(llm);
        let tools = vec!["run_command".to_string()];
        let call = r.decide_action(&ctx(&[], &tools), "list").await.unwrap().unwrap();
        assert_eq!(call.tool, "run_command");
    }

    #[tokio::test]
    async fn test_final_answer_unwraps_answer_field() {
        let llm = Arc::new(MockLlmClient::scripted([r#"{"tool": "", "answer": "3 files"}"#]));
        let r = LlmReasoner::new(llm);
        assert_eq!(r.generate_final_answer(&ctx(&[], &[])).await.unwrap(), "3 files");
    }

    #[tokio::test]
    async fn test_decompose_falls_back_to_single_subtask() {
        let llm = Arc::new(MockLlmClient::scripted(["I cannot produce JSON"]));
        let r = LlmReasoner::new(llm);
        let d = r.decompose_task("write a poem", &[]).await.unwrap();
        assert_eq!(d.subtasks, vec!["write a poem".to_string()]);
        assert!(d.requires_user_input.is_empty());
    }

    #[tokio::test]
    async fn test_decompose_includes_answers_in_prompt() {
        let llm = Arc::new(MockLlmClient::scripted([r#"{"subtasks": ["a", "b"], "strategy": "seq"}"#]));
        let r = LlmReasoner::new(llm.clone());
        let d = r.decompose_task("deploy", &["use staging".to_string()]).await.unwrap();
        assert_eq!(d.subtasks.len(), 2);
        assert!(llm.last_prompt().unwrap().contains("use staging"));
    }

    #[tokio::test]
    async fn test_verify_parses_actions() {
        let llm = Arc::new(MockLlmClient::scripted([
            r#"```json
{"goal_met": false, "evidence": "no chart", "confidence": 0.4, "suggested_next_actions": ["draw chart"]}
```"#,
        ]));
        let r = LlmReasoner::new(llm);
        let v = r.verify_goal_completion(&AutonomousTask::new("g", false)).await.unwrap();
        assert!(!v.goal_met);
        assert_eq!(v.suggested_next_actions, vec!["draw chart".to_string()]);
    }

    #[tokio::test]
    async fn test_review_parses_critical_issue() {
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"approved": false, "issues": [{"severity": "critical", "description": "empty"}]}"#,
        ]));
        let r = LlmReasoner::new(llm);
        let out = r
            .review_subtask(&SubTask::new("x"), "", ReviewStage::SpecCompliance)
            .await
            .unwrap();
        assert!(out.needs_rework());
    }
}
