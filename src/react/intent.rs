//! 意图识别
//!
//! 纯规则匹配（不调用 LLM）：根据推理文本与计划中的工具调用，判断这一步是否需要用户登录、
//! 是否是会卡住等待输入的交互式命令、是否需要用户确认，并给出风险等级。
//! 执行后还会用同一套规则检查 Observation（登录墙、验证码、确认弹窗）。

use serde::{Deserialize, Serialize};

use crate::react::ToolCall;

/// 风险等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// 意图描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDescriptor {
    pub requires_auth: bool,
    pub interactive_command: bool,
    pub requires_confirmation: bool,
    pub risk: RiskLevel,
    /// 命中的规则（空表示普通步骤）
    pub reason: String,
}

impl IntentDescriptor {
    fn normal() -> Self {
        Self {
            requires_auth: false,
            interactive_command: false,
            requires_confirmation: false,
            risk: RiskLevel::Low,
            reason: String::new(),
        }
    }

    /// 是否需要用户介入
    pub fn needs_user(&self) -> bool {
        self.requires_auth || self.interactive_command || self.requires_confirmation
    }
}

const AUTH_MARKERS: &[&str] = &[
    "log in", "login", "sign in", "signin", "authenticate", "password", "2fa", "two-factor",
    "verification code", "one-time code", "scan the qr", "登录", "扫码", "验证码", "密码",
];

const CONFIRM_MARKERS: &[&str] = &[
    "confirm", "payment", "purchase", "place order", "submit order", "checkout", "pay now",
    "delete account", "transfer money", "确认", "支付", "付款", "下单",
];

/// 观察结果中的登录墙 / 验证码 / 确认弹窗
const OBSERVATION_AUTH_MARKERS: &[&str] = &[
    "please log in", "please login", "please sign in", "sign in to continue", "log in to continue",
    "login required", "authentication required", "session expired", "captcha",
    "verify you are human", "verify that you are human", "scan the qr code", "请登录", "扫码登录",
];

const OBSERVATION_CONFIRM_MARKERS: &[&str] = &[
    "are you sure", "please confirm", "confirm your", "requires confirmation", "请确认",
];

/// 会阻塞等待终端输入的命令（首词）
const INTERACTIVE_PROGRAMS: &[&str] = &[
    "sudo", "su", "ssh", "passwd", "vim", "vi", "nano", "emacs", "less", "more", "top", "htop",
    "ftp", "telnet", "mysql", "psql",
];

/// 需要登录交互的子命令
const INTERACTIVE_SUBCOMMANDS: &[&str] = &["npm login", "gh auth login", "docker login", "az login", "gcloud auth login"];

/// 不可逆的命令片段
const DESTRUCTIVE_MARKERS: &[&str] = &["rm -r", "drop table", "drop database", "git push --force", "git push -f", "mkfs", "format "];

#[derive(Debug, Default, Clone)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 执行前：推理文本 + 计划的调用
    pub fn classify(&self, thought: &str, call: Option<&ToolCall>) -> IntentDescriptor {
        let mut d = IntentDescriptor::normal();
        let thought_lower = thought.to_lowercase();
        let (tool_lower, args_lower) = call
            .map(|c| (c.tool.to_lowercase(), c.args.to_string().to_lowercase()))
            .unwrap_or_default();
        let mut reasons = Vec::new();

        if let Some(m) = first_marker(&thought_lower, AUTH_MARKERS)
            .or_else(|| first_marker(&tool_lower, &["login", "auth"]))
        {
            // 推理里提到 login 但动作只是读页面时不算；必须有动作或明确说需要用户
            if call.is_some() || thought_lower.contains("user") || thought_lower.contains("用户") {
                d.requires_auth = true;
                reasons.push(format!("authentication: '{}'", m));
            }
        }

        if let Some(command) = call.and_then(command_of) {
            let command_lower = command.trim().to_lowercase();
            let first = command_lower.split_whitespace().next().unwrap_or("");
            let bare_repl = matches!(first, "python" | "python3" | "node" | "irb")
                && command_lower.split_whitespace().count() == 1;
            if INTERACTIVE_PROGRAMS.contains(&first)
                || bare_repl
                || INTERACTIVE_SUBCOMMANDS.iter().any(|s| command_lower.starts_with(s))
            {
                d.interactive_command = true;
                reasons.push(format!("interactive command: '{}'", first));
            }
            if let Some(m) = first_marker(&command_lower, DESTRUCTIVE_MARKERS) {
                d.requires_confirmation = true;
                d.risk = RiskLevel::High;
                reasons.push(format!("destructive command: '{}'", m.trim()));
            }
        }

        if call.is_some() {
            if let Some(m) = first_marker(&thought_lower, CONFIRM_MARKERS)
                .or_else(|| first_marker(&args_lower, CONFIRM_MARKERS))
            {
                d.requires_confirmation = true;
                d.risk = RiskLevel::High;
                reasons.push(format!("confirmation: '{}'", m));
            }
        }

        if d.risk < RiskLevel::Medium && (d.requires_auth || d.interactive_command) {
            d.risk = RiskLevel::Medium;
        }
        d.reason = reasons.join("; ");
        d
    }

    /// 执行后：检查 Observation 是否显示登录墙、验证码或确认弹窗
    pub fn classify_observation(&self, observation: &str) -> IntentDescriptor {
        let mut d = IntentDescriptor::normal();
        let lower = observation.to_lowercase();
        if let Some(m) = first_marker(&lower, OBSERVATION_AUTH_MARKERS) {
            d.requires_auth = true;
            d.risk = RiskLevel::Medium;
            d.reason = format!("observation shows login wall: '{}'", m);
        } else if let Some(m) = first_marker(&lower, OBSERVATION_CONFIRM_MARKERS) {
            d.requires_confirmation = true;
            d.risk = RiskLevel::High;
            d.reason = format!("observation asks for confirmation: '{}'", m);
        }
        d
    }
}

fn first_marker<'a>(text: &str, markers: &[&'a str]) -> Option<&'a str> {
    if text.is_empty() {
        return None;
    }
    markers.iter().copied().find(|m| text.contains(m))
}

fn command_of(call: &ToolCall) -> Option<&str> {
    call.args
        .get("command")
        .or_else(|| call.args.get("cmd"))
        .and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_step_is_low_risk() {
        let c = IntentClassifier::new();
        let d = c.classify("List the files", Some(&ToolCall::new("run_command", json!({"command": "ls -la"}))));
        assert!(!d.needs_user());
        assert_eq!(d.risk, RiskLevel::Low);
        assert!(d.reason.is_empty());
    }

    #[test]
    fn test_login_requires_auth() {
        let c = IntentClassifier::new();
        let d = c.classify(
            "The dashboard needs me to log in first",
            Some(&ToolCall::new("browser_click", json!({"text": "Log in"}))),
        );
        assert!(d.requires_auth);
        assert_eq!(d.risk, RiskLevel::Medium);
    }

    #[test]
    fn test_thought_without_action_is_not_suspend_worthy() {
        let c = IntentClassifier::new();
        let d = c.classify("The login page text was extracted", None);
        assert!(!d.requires_auth);
    }

    #[test]
    fn test_interactive_commands() {
        let c = IntentClassifier::new();
        for cmd in ["sudo apt install x", "python3", "gh auth login", "vim notes.txt"] {
            let d = c.classify("run it", Some(&ToolCall::new("run_command", json!({ "command": cmd }))));
            assert!(d.interactive_command, "{}", cmd);
        }
        let d = c.classify("run it", Some(&ToolCall::new("run_command", json!({"command": "python3 a.py"}))));
        assert!(!d.interactive_command);
    }

    #[test]
    fn test_destructive_needs_confirmation() {
        let c = IntentClassifier::new();
        let d = c.classify("clean up", Some(&ToolCall::new("run_command", json!({"command": "rm -r build"}))));
        assert!(d.requires_confirmation);
        assert_eq!(d.risk, RiskLevel::High);
    }

    #[test]
    fn test_observation_login_wall() {
        let c = IntentClassifier::new();
        assert!(c.classify_observation("<h1>Please sign in to continue</h1>").requires_auth);
        assert!(c.classify_observation("Are you sure you want to submit?").requires_confirmation);
        assert!(!c.classify_observation("3 files found").needs_user());
    }
}
