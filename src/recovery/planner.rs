//! 重试规划器
//!
//! generate_retry_plan 根据分类结果与重试预算，按错误类型确定性地选出策略。
//! 规划器只给建议，不执行任何动作；应用计划、统计尝试次数由调用方（AdaptiveExecutor / ReAct 循环）负责。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::alternatives;
use super::classifier::{ClassifiedError, ErrorType};

/// 未能从参数中读出当前超时时使用的基准值（毫秒）
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// unknown 错误重复到此次数后改为 Web 搜索
const UNKNOWN_SEARCH_AFTER: u32 = 2;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    InstallPackage,
    AlternativeCommand,
    IncreaseTimeout,
    PlainRetry,
    BrowserRenavigate,
    RefineSelector,
    SwitchStrategy,
    WebSearch,
    FixCode,
    AskUser,
    None,
}

/// 浏览器重新导航参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserAction {
    pub action: String,
    pub wait_until: String,
    pub hydration_delay_ms: u64,
}

/// 单次失败的重试建议；不持久化，调用方立即消费
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPlan {
    pub should_retry: bool,
    pub strategy: RetryStrategy,
    /// 需要合并进下一次调用参数的字段（JSON object）
    pub modifications: Value,
    pub reason: String,
    pub alternative_commands: Option<Vec<String>>,
    pub browser_action: Option<BrowserAction>,
    pub refinement_hints: Option<Vec<String>>,
}

impl RetryPlan {
    fn give_up(strategy: RetryStrategy, reason: impl Into<String>) -> Self {
        Self {
            should_retry: false,
            strategy,
            modifications: json!({}),
            reason: reason.into(),
            alternative_commands: None,
            browser_action: None,
            refinement_hints: None,
        }
    }

    fn retry(strategy: RetryStrategy, modifications: Value, reason: impl Into<String>) -> Self {
        Self {
            should_retry: true,
            strategy,
            modifications,
            reason: reason.into(),
            alternative_commands: None,
            browser_action: None,
            refinement_hints: None,
        }
    }

    fn with_hints(mut self, hints: &[&str]) -> Self {
        self.refinement_hints = Some(hints.iter().map(|h| h.to_string()).collect());
        self
    }

    /// 把 modifications 合并到原参数上，得到下一次调用的参数
    pub fn apply_to(&self, args: &Value) -> Value {
        let mut next = args.clone();
        if let (Some(target), Some(patch)) = (next.as_object_mut(), self.modifications.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        next
    }
}

/// 规划所需的上下文
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    pub tool: &'a str,
    pub args: &'a Value,
    pub classified: &'a ClassifiedError,
    /// 同一 (tool, 参数) 已失败的次数
    pub retry_count: u32,
    pub max_retries: u32,
    /// 已经尝试过替代的命令（每个命令只替代一次）
    pub attempted_commands: &'a [String],
    pub current_timeout_ms: Option<u64>,
}

/// 重试规划器
#[derive(Debug, Clone)]
pub struct RetryPlanner {
    timeout_ceiling_ms: u64,
    hydration_delay_ms: u64,
}

impl Default for RetryPlanner {
    fn default() -> Self {
        Self::new(300_000, 3000)
    }
}

impl RetryPlanner {
    pub fn new(timeout_ceiling_ms: u64, hydration_delay_ms: u64) -> Self {
        Self {
            timeout_ceiling_ms,
            hydration_delay_ms,
        }
    }

    /// 生成重试计划；纯函数，相同输入得到相同计划
    pub fn generate_retry_plan(&self, ctx: &RetryContext<'_>) -> RetryPlan {
        let classified = ctx.classified;

        if ctx.retry_count >= ctx.max_retries {
            let mut plan = RetryPlan::give_up(
                RetryStrategy::None,
                format!(
                    "retry budget exhausted ({}/{}) for {}",
                    ctx.retry_count, ctx.max_retries, classified.error_type
                ),
            );
            plan.refinement_hints = Some(vec![classified.suggestion.clone()]);
            return plan;
        }

        match classified.error_type {
            ErrorType::MissingModule => self.plan_install(ctx),
            ErrorType::MissingCommand => self.plan_alternative_command(ctx),
            ErrorType::Timeout => self.plan_timeout(ctx),
            ErrorType::Network => RetryPlan::retry(
                RetryStrategy::PlainRetry,
                json!({}),
                "transient network/DNS failure, retrying unchanged",
            ),
            ErrorType::BrowserSpaNotRendered => {
                let mut plan = RetryPlan::retry(
                    RetryStrategy::BrowserRenavigate,
                    json!({
                        "wait_until": "networkidle",
                        "wait_after_ms": self.hydration_delay_ms,
                    }),
                    "page not hydrated yet, navigate again and wait for network idle",
                );
                plan.browser_action = Some(BrowserAction {
                    action: "navigate".to_string(),
                    wait_until: "networkidle".to_string(),
                    hydration_delay_ms: self.hydration_delay_ms,
                });
                plan
            }
            ErrorType::BrowserSmartModeUnavailable => RetryPlan::give_up(
                RetryStrategy::SwitchStrategy,
                "AI-vision mode is unavailable; repeating the same action is guaranteed to fail",
            )
            .with_hints(&[
                "Do NOT call the same vision-based action again",
                "Read the page content first, then use selector-based click/fill with explicit CSS selectors",
                "If the page cannot be automated, fetch the data another way (search, API, direct URL)",
            ]),
            ErrorType::BrowserElementNotFound => RetryPlan::retry(
                RetryStrategy::RefineSelector,
                json!({ "wait_for_selector": true }),
                "element not located, retry with a refined selector after waiting for it",
            )
            .with_hints(&[
                "Inspect the page content to find the actual label or selector",
                "Prefer stable attributes (id, name, aria-label) over positional selectors",
            ]),
            ErrorType::WebInteractionRequired => RetryPlan::give_up(
                RetryStrategy::AskUser,
                "the page needs the user to log in or confirm",
            )
            .with_hints(&["Suspend the task and ask the user to complete the step in the browser"]),
            ErrorType::WebSearchFailed => {
                if classified.can_auto_retry {
                    RetryPlan::retry(
                        RetryStrategy::PlainRetry,
                        json!({}),
                        "search backend failed, retrying",
                    )
                    .with_hints(&["If it fails again, rephrase the query"])
                } else {
                    RetryPlan::give_up(RetryStrategy::SwitchStrategy, "search failed")
                }
            }
            ErrorType::PythonSyntax
            | ErrorType::PythonRuntime
            | ErrorType::FileNotFound
            | ErrorType::PermissionDenied => {
                let mut plan = RetryPlan::give_up(RetryStrategy::FixCode, classified.diagnosis.clone());
                plan.refinement_hints = Some(vec![classified.suggestion.clone()]);
                plan
            }
            ErrorType::PlanRefinementNeeded => RetryPlan::give_up(
                RetryStrategy::SwitchStrategy,
                "current approach keeps failing",
            )
            .with_hints(&["Re-plan the remaining steps with a different approach"]),
            ErrorType::Unknown => {
                if ctx.retry_count >= UNKNOWN_SEARCH_AFTER {
                    let first_line = classified.original.lines().next().unwrap_or("").trim();
                    let snippet: String = first_line.chars().take(120).collect();
                    RetryPlan::retry(
                        RetryStrategy::WebSearch,
                        json!({ "search_query": format!("{} error {}", ctx.tool, snippet) }),
                        format!("unknown error repeated {} times, search for a fix", ctx.retry_count),
                    )
                } else {
                    RetryPlan::give_up(RetryStrategy::None, "unclassified error, leave the decision to reasoning")
                }
            }
        }
    }

    fn plan_install(&self, ctx: &RetryContext<'_>) -> RetryPlan {
        let Some(module) = ctx.classified.extracted.module.as_deref() else {
            return RetryPlan::give_up(RetryStrategy::None, "missing module name could not be extracted");
        };
        let package = alternatives::package_for_module(module);
        RetryPlan::retry(
            RetryStrategy::InstallPackage,
            json!({
                "install_packages": [package.clone()],
                "pre_command": format!("pip install {}", package),
            }),
            format!("module '{}' missing, install package '{}'", module, package),
        )
    }

    fn plan_alternative_command(&self, ctx: &RetryContext<'_>) -> RetryPlan {
        let Some(command) = ctx.classified.extracted.command.as_deref() else {
            return RetryPlan::give_up(RetryStrategy::None, "missing command could not be extracted");
        };
        if ctx.attempted_commands.iter().any(|c| c == command) {
            return RetryPlan::give_up(
                RetryStrategy::AlternativeCommand,
                format!("alternative for '{}' was already attempted", command),
            );
        }
        let Some(alts) = alternatives::alternative_commands(command) else {
            return RetryPlan::give_up(
                RetryStrategy::None,
                format!("no known alternative for command '{}'", command),
            );
        };
        let alts: Vec<String> = alts.iter().map(|s| s.to_string()).collect();
        let modifications = ctx
            .args
            .get("command")
            .and_then(|v| v.as_str())
            .and_then(|line| alternatives::substitute_command(line, command, &alts[0]))
            .map(|line| json!({ "command": line }))
            .unwrap_or_else(|| json!({}));
        let mut plan = RetryPlan::retry(
            RetryStrategy::AlternativeCommand,
            modifications,
            format!("'{}' not found, substitute '{}'", command, alts[0]),
        );
        plan.alternative_commands = Some(alts);
        plan
    }

    fn plan_timeout(&self, ctx: &RetryContext<'_>) -> RetryPlan {
        let current = ctx
            .current_timeout_ms
            .or_else(|| ctx.args.get("timeout_ms").and_then(|v| v.as_u64()))
            .or_else(|| ctx.args.get("timeout").and_then(|v| v.as_u64()).map(|s| s * 1000))
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        if current >= self.timeout_ceiling_ms {
            return RetryPlan::give_up(
                RetryStrategy::IncreaseTimeout,
                format!("timeout already at ceiling ({} ms)", self.timeout_ceiling_ms),
            );
        }
        let next = current.saturating_mul(2).min(self.timeout_ceiling_ms);
        RetryPlan::retry(
            RetryStrategy::IncreaseTimeout,
            json!({ "timeout_ms": next }),
            format!("timed out at {} ms, retry with {} ms", current, next),
        )
    }
}

/// 预算用尽后喂回推理循环的增强 Observation：原始错误 + 诊断 + 建议下一步
pub fn enrich_observation(error: &str, classified: &ClassifiedError, plan: &RetryPlan) -> String {
    let mut out = format!(
        "Error: {}\n[Diagnosis] {} (type={}, confidence={:.2})\n[Suggested next step] {}",
        error.trim(),
        classified.diagnosis,
        classified.error_type,
        classified.confidence,
        classified.suggestion
    );
    if let Some(hints) = &plan.refinement_hints {
        for h in hints.iter().filter(|h| **h != classified.suggestion) {
            out.push_str(&format!("\n- {}", h));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::ErrorClassifier;

    fn plan_for(tool: &str, args: Value, error: &str, retry_count: u32) -> RetryPlan {
        let classified = ErrorClassifier::new().classify(tool, &args, error);
        RetryPlanner::default().generate_retry_plan(&RetryContext {
            tool,
            args: &args,
            classified: &classified,
            retry_count,
            max_retries: 3,
            attempted_commands: &[],
            current_timeout_ms: None,
        })
    }

    #[test]
    fn test_cv2_installs_opencv() {
        let plan = plan_for("run_python", json!({"code": "import cv2"}), "ModuleNotFoundError: No module named 'cv2'", 0);
        assert!(plan.should_retry);
        assert_eq!(plan.strategy, RetryStrategy::InstallPackage);
        assert_eq!(plan.modifications["install_packages"][0], "opencv-python");
    }

    #[test]
    fn test_python3_falls_back_to_python() {
        let plan = plan_for(
            "run_command",
            json!({"command": "python3 main.py"}),
            "python3: command not found",
            0,
        );
        assert!(plan.should_retry);
        assert_eq!(plan.strategy, RetryStrategy::AlternativeCommand);
        assert_eq!(plan.alternative_commands.as_ref().unwrap()[0], "python");
        assert_eq!(plan.modifications["command"], "python main.py");
    }

    #[test]
    fn test_unknown_command_not_retried() {
        let plan = plan_for(
            "run_command",
            json!({"command": "foo --x"}),
            "'foo' is not recognized as an internal or external command",
            0,
        );
        assert!(!plan.should_retry);
    }

    #[test]
    fn test_alternative_only_once_per_command() {
        let args = json!({"command": "python3 a.py"});
        let classified = ErrorClassifier::new().classify("run_command", &args, "python3: command not found");
        let attempted = vec!["python3".to_string()];
        let plan = RetryPlanner::default().generate_retry_plan(&RetryContext {
            tool: "run_command",
            args: &args,
            classified: &classified,
            retry_count: 1,
            max_retries: 3,
            attempted_commands: &attempted,
            current_timeout_ms: None,
        });
        assert!(!plan.should_retry);
    }

    #[test]
    fn test_timeout_doubles_up_to_ceiling() {
        let plan = plan_for("web_fetch", json!({"timeout_ms": 200_000}), "operation timed out", 0);
        assert!(plan.should_retry);
        assert_eq!(plan.modifications["timeout_ms"], 300_000);

        let plan = plan_for("web_fetch", json!({"timeout_ms": 300_000}), "operation timed out", 0);
        assert!(!plan.should_retry);
    }

    #[test]
    fn test_spa_renavigates_with_networkidle() {
        let plan = plan_for("browser_navigate", json!({"url": "https://x.dev"}), "empty page after navigation", 0);
        assert_eq!(plan.strategy, RetryStrategy::BrowserRenavigate);
        let action = plan.browser_action.unwrap();
        assert_eq!(action.wait_until, "networkidle");
        assert_eq!(action.hydration_delay_ms, 3000);
    }

    #[test]
    fn test_smart_mode_never_retries() {
        let plan = plan_for("browser_ai_click", json!({}), "AI vision mode not available", 0);
        assert!(!plan.should_retry);
        assert_eq!(plan.strategy, RetryStrategy::SwitchStrategy);
        assert!(plan.refinement_hints.unwrap().len() >= 2);
    }

    #[test]
    fn test_unknown_switches_to_web_search_after_two_attempts() {
        assert!(!plan_for("echo", json!({}), "weird failure", 1).should_retry);
        let plan = plan_for("echo", json!({}), "weird failure", 2);
        assert!(plan.should_retry);
        assert_eq!(plan.strategy, RetryStrategy::WebSearch);
        assert!(plan.modifications["search_query"].as_str().unwrap().contains("weird failure"));
    }

    #[test]
    fn test_exhausted_budget_never_retries() {
        let errors = [
            "ModuleNotFoundError: No module named 'cv2'",
            "python3: command not found",
            "timed out",
            "ECONNRESET",
            "weird failure",
        ];
        for err in errors {
            for count in 3..6 {
                let plan = plan_for("run_command", json!({"command": "python3 x"}), err, count);
                assert!(!plan.should_retry, "{} at {}", err, count);
            }
        }
    }

    #[test]
    fn test_plan_is_idempotent() {
        let a = plan_for("run_python", json!({}), "ModuleNotFoundError: No module named 'bs4'", 1);
        let b = plan_for("run_python", json!({}), "ModuleNotFoundError: No module named 'bs4'", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_apply_modifications() {
        let plan = plan_for("web_fetch", json!({"url": "u", "timeout_ms": 1000}), "timed out", 0);
        let next = plan.apply_to(&json!({"url": "u", "timeout_ms": 1000}));
        assert_eq!(next["url"], "u");
        assert_eq!(next["timeout_ms"], 2000);
    }

    #[test]
    fn test_enriched_observation() {
        let classified = ErrorClassifier::new().classify("browser_click", &json!({}), "smart mode unavailable");
        let plan = RetryPlanner::default().generate_retry_plan(&RetryContext {
            tool: "browser_click",
            args: &json!({}),
            classified: &classified,
            retry_count: 0,
            max_retries: 3,
            attempted_commands: &[],
            current_timeout_ms: None,
        });
        let obs = enrich_observation("smart mode unavailable", &classified, &plan);
        assert!(obs.starts_with("Error: smart mode unavailable"));
        assert!(obs.contains("[Diagnosis]"));
        assert!(obs.contains("browser_smart_mode_unavailable"));
        assert!(obs.contains("Do NOT call"));
    }
}
