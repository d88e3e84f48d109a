//! 错误分类器
//!
//! 将（工具名, 参数, 原始错误文本）映射为 ClassifiedError。模式表是一张有序的字面量表：
//! (适用工具类别, 正则, 错误类型, 置信度, 是否可自动重试, 提取器)，按顺序匹配，第一个命中者胜出；
//! 全部未命中时返回 Unknown（置信度 0.2，不可自动重试）。分类是纯函数。

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::alternatives;

/// 错误类型（与事件、日志中的字符串一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    MissingModule,
    MissingCommand,
    PythonSyntax,
    PythonRuntime,
    FileNotFound,
    PermissionDenied,
    Network,
    Timeout,
    WebSearchFailed,
    WebInteractionRequired,
    BrowserSpaNotRendered,
    BrowserSmartModeUnavailable,
    BrowserElementNotFound,
    PlanRefinementNeeded,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::MissingModule => "missing_module",
            ErrorType::MissingCommand => "missing_command",
            ErrorType::PythonSyntax => "python_syntax",
            ErrorType::PythonRuntime => "python_runtime",
            ErrorType::FileNotFound => "file_not_found",
            ErrorType::PermissionDenied => "permission_denied",
            ErrorType::Network => "network",
            ErrorType::Timeout => "timeout",
            ErrorType::WebSearchFailed => "web_search_failed",
            ErrorType::WebInteractionRequired => "web_interaction_required",
            ErrorType::BrowserSpaNotRendered => "browser_spa_not_rendered",
            ErrorType::BrowserSmartModeUnavailable => "browser_smart_mode_unavailable",
            ErrorType::BrowserElementNotFound => "browser_element_not_found",
            ErrorType::PlanRefinementNeeded => "plan_refinement_needed",
            ErrorType::Unknown => "unknown",
        }
    }

    /// 浏览器相关错误（卡死时注入浏览器专用的修正提示）
    pub fn is_browser(&self) -> bool {
        matches!(
            self,
            ErrorType::BrowserSpaNotRendered
                | ErrorType::BrowserSmartModeUnavailable
                | ErrorType::BrowserElementNotFound
        )
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 工具类别：由工具名推断，用于限定模式的适用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Shell,
    CodeInterpreter,
    Browser,
    Search,
    Network,
    Other,
}

impl ToolCategory {
    pub fn from_tool_name(tool: &str) -> Self {
        let t = tool.to_lowercase();
        if t.contains("browser") || t.contains("page") || t.contains("click") {
            ToolCategory::Browser
        } else if t.contains("search") {
            ToolCategory::Search
        } else if t.contains("python") || t.contains("code") || t.contains("interpreter") || t.contains("script") {
            ToolCategory::CodeInterpreter
        } else if t.contains("shell") || t.contains("command") || t.contains("bash") || t.contains("terminal") || t.contains("exec") {
            ToolCategory::Shell
        } else if t.contains("fetch") || t.contains("http") || t.contains("request") || t.contains("download") || t.contains("crawl") {
            ToolCategory::Network
        } else {
            ToolCategory::Other
        }
    }
}

/// 模式适用范围
#[derive(Debug, Clone, Copy)]
enum Scope {
    Any,
    Only(&'static [ToolCategory]),
}

impl Scope {
    fn admits(&self, category: ToolCategory) -> bool {
        match self {
            Scope::Any => true,
            Scope::Only(cats) => cats.contains(&category),
        }
    }
}

/// 从匹配中提取什么
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extractor {
    None,
    Module,
    Command,
    Path,
    Url,
}

/// 模式表中的一行
struct ErrorPattern {
    scope: Scope,
    regex: Regex,
    error_type: ErrorType,
    confidence: f64,
    retryable: bool,
    extractor: Extractor,
}

const SHELL_LIKE: &[ToolCategory] = &[ToolCategory::Shell, ToolCategory::CodeInterpreter, ToolCategory::Other];
const BROWSER: &[ToolCategory] = &[ToolCategory::Browser];
const SEARCH: &[ToolCategory] = &[ToolCategory::Search];

/// (scope, pattern, type, confidence, retryable, extractor)；顺序即优先级
const PATTERN_TABLE: &[(Scope, &str, ErrorType, f64, bool, Extractor)] = &[
    (
        Scope::Only(BROWSER),
        r"(?i)(smart mode|ai[- ]vision|vision mode|browser-use service).{0,40}(unavailable|not available|disabled|not configured|not running)",
        ErrorType::BrowserSmartModeUnavailable, 0.95, false, Extractor::None,
    ),
    (
        Scope::Only(BROWSER),
        r#"(?i)(empty (page|body|content)|page (content )?(is )?blank|no (visible )?content (was )?rendered|<div id="(root|app|__next)"></div>|(enable|requires?) javascript)"#,
        ErrorType::BrowserSpaNotRendered, 0.85, true, Extractor::None,
    ),
    (
        Scope::Only(BROWSER),
        r"(?i)((element|selector|button|locator|link)\b.{0,60}(not found|no such|could not (be )?(found|located)|not visible|not clickable)|no element matches|failed to find element|waiting for (selector|locator))",
        ErrorType::BrowserElementNotFound, 0.85, true, Extractor::None,
    ),
    (
        Scope::Any,
        r"(?i)(please (log ?in|sign ?in)|login required|log in to continue|authentication required|captcha|verify (that )?you are (a )?human|two-factor|\b2fa\b|scan the qr code)",
        ErrorType::WebInteractionRequired, 0.9, false, Extractor::None,
    ),
    (
        Scope::Any,
        r"ModuleNotFoundError: No module named '([^'.]+)",
        ErrorType::MissingModule, 0.95, true, Extractor::Module,
    ),
    (
        Scope::Any,
        r"ImportError: No module named '?([A-Za-z0-9_]+)",
        ErrorType::MissingModule, 0.9, true, Extractor::Module,
    ),
    (
        Scope::Any,
        r"Cannot find module '([^']+)'",
        ErrorType::MissingModule, 0.85, true, Extractor::Module,
    ),
    (
        Scope::Only(SHELL_LIKE),
        r"'([^']+)' is not recognized as an internal or external command",
        ErrorType::MissingCommand, 0.95, true, Extractor::Command,
    ),
    (
        Scope::Only(SHELL_LIKE),
        r"The term '([^']+)' is not recognized as (the )?name of a cmdlet",
        ErrorType::MissingCommand, 0.9, true, Extractor::Command,
    ),
    (
        Scope::Only(SHELL_LIKE),
        r"(?:^|[\s:])([A-Za-z0-9_.\-]+): (?:command )?not found",
        ErrorType::MissingCommand, 0.9, true, Extractor::Command,
    ),
    (
        Scope::Any,
        r"(SyntaxError|IndentationError|TabError):",
        ErrorType::PythonSyntax, 0.9, false, Extractor::None,
    ),
    (
        Scope::Any,
        r"(?i)(FileNotFoundError|No such file or directory|ENOENT|cannot find the (path|file) specified)",
        ErrorType::FileNotFound, 0.9, false, Extractor::Path,
    ),
    (
        Scope::Any,
        r"(?i)(PermissionError|permission denied|EACCES|access is denied|operation not permitted)",
        ErrorType::PermissionDenied, 0.9, false, Extractor::Path,
    ),
    (
        Scope::Any,
        r"(?i)(timed? ?out|timeout|ETIMEDOUT|deadline exceeded)",
        ErrorType::Timeout, 0.85, true, Extractor::None,
    ),
    (
        Scope::Any,
        r"(?i)(ECONNREFUSED|ECONNRESET|ENOTFOUND|getaddrinfo|name or service not known|temporary failure in name resolution|connection (refused|reset|aborted)|network (is )?unreachable|dns (lookup|resolution)|certificate verify failed|socket hang up)",
        ErrorType::Network, 0.85, true, Extractor::Url,
    ),
    (
        Scope::Only(SEARCH),
        r"(?i)(no (search )?results|search (failed|error|unavailable)|rate limit|\b429\b|quota exceeded)",
        ErrorType::WebSearchFailed, 0.8, true, Extractor::None,
    ),
    (
        Scope::Any,
        r"(?i)(stuck in a loop|same (error|failure) (again|repeated)|repeated(ly)? fail)",
        ErrorType::PlanRefinementNeeded, 0.6, false, Extractor::None,
    ),
    (
        Scope::Any,
        r"(Traceback \(most recent call last\)|(?m)^[A-Z][A-Za-z]*Error: )",
        ErrorType::PythonRuntime, 0.7, false, Extractor::None,
    ),
];

/// 从错误文本中提取到的实体
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInfo {
    pub module: Option<String>,
    pub command: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,
}

/// 分类结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub error_type: ErrorType,
    pub confidence: f64,
    pub can_auto_retry: bool,
    pub original: String,
    pub extracted: ExtractedInfo,
    /// 人类可读的诊断
    pub diagnosis: String,
    /// 建议的下一步
    pub suggestion: String,
}

/// 错误分类器：持有编译好的模式表
pub struct ErrorClassifier {
    patterns: Vec<ErrorPattern>,
    quoted: Regex,
    url: Regex,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        let patterns = PATTERN_TABLE
            .iter()
            .map(|(scope, pattern, error_type, confidence, retryable, extractor)| ErrorPattern {
                scope: *scope,
                regex: Regex::new(pattern).expect("error pattern table must compile"),
                error_type: *error_type,
                confidence: *confidence,
                retryable: *retryable,
                extractor: *extractor,
            })
            .collect();
        Self {
            patterns,
            quoted: Regex::new(r#"['"]([^'"]+)['"]"#).expect("quoted pattern must compile"),
            url: Regex::new(r#"https?://[^\s'"]+"#).expect("url pattern must compile"),
        }
    }

    /// 分类一次失败；相同输入总是得到相同结果
    pub fn classify(&self, tool: &str, args: &serde_json::Value, error: &str) -> ClassifiedError {
        let category = ToolCategory::from_tool_name(tool);

        for p in &self.patterns {
            if !p.scope.admits(category) {
                continue;
            }
            let Some(caps) = p.regex.captures(error) else {
                continue;
            };
            let extracted = self.extract(p.extractor, &caps, error, args);
            let can_auto_retry = match p.error_type {
                // 只有替代表里有条目的命令才值得自动重试
                ErrorType::MissingCommand => extracted
                    .command
                    .as_deref()
                    .map(alternatives::has_alternative)
                    .unwrap_or(false),
                ErrorType::MissingModule => p.retryable && extracted.module.is_some(),
                _ => p.retryable,
            };
            let (diagnosis, suggestion) = describe(p.error_type, &extracted);
            return ClassifiedError {
                error_type: p.error_type,
                confidence: p.confidence,
                can_auto_retry,
                original: error.to_string(),
                extracted,
                diagnosis,
                suggestion,
            };
        }

        let (diagnosis, suggestion) = describe(ErrorType::Unknown, &ExtractedInfo::default());
        ClassifiedError {
            error_type: ErrorType::Unknown,
            confidence: 0.2,
            can_auto_retry: false,
            original: error.to_string(),
            extracted: ExtractedInfo::default(),
            diagnosis,
            suggestion,
        }
    }

    fn extract(
        &self,
        extractor: Extractor,
        caps: &Captures<'_>,
        error: &str,
        args: &serde_json::Value,
    ) -> ExtractedInfo {
        let group = caps.get(1).map(|m| m.as_str().trim().to_string());
        let mut info = ExtractedInfo::default();
        match extractor {
            Extractor::None => {}
            Extractor::Module => info.module = group,
            Extractor::Command => {
                info.command = group
                    .filter(|c| !c.is_empty())
                    .or_else(|| first_command_word(args));
            }
            Extractor::Path => {
                info.path = self
                    .quoted
                    .captures(error)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
                    .or_else(|| arg_str(args, &["path", "file_path", "file"]));
            }
            Extractor::Url => {
                info.url = self
                    .url
                    .find(error)
                    .map(|m| m.as_str().to_string())
                    .or_else(|| arg_str(args, &["url"]));
            }
        }
        info
    }
}

fn arg_str(args: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(|v| v.as_str()))
        .map(String::from)
}

fn first_command_word(args: &serde_json::Value) -> Option<String> {
    arg_str(args, &["command", "cmd"])
        .and_then(|c| c.split_whitespace().next().map(String::from))
}

fn describe(error_type: ErrorType, info: &ExtractedInfo) -> (String, String) {
    let module = info.module.as_deref().unwrap_or("?");
    let command = info.command.as_deref().unwrap_or("?");
    let path = info.path.as_deref().unwrap_or("the target path");
    match error_type {
        ErrorType::MissingModule => (
            format!("Python/Node module '{}' is not installed", module),
            format!("Install package '{}' and rerun", alternatives::package_for_module(module)),
        ),
        ErrorType::MissingCommand => (
            format!("Command '{}' is not available on this system", command),
            match alternatives::alternative_commands(command) {
                Some(alts) => format!("Try the equivalent command '{}'", alts.join("' or '")),
                None => "Use a different tool or install the command first".to_string(),
            },
        ),
        ErrorType::PythonSyntax => (
            "The generated code has a syntax/indentation error".to_string(),
            "Fix the code at the reported line before running again".to_string(),
        ),
        ErrorType::PythonRuntime => (
            "The code raised an exception at runtime".to_string(),
            "Read the traceback, fix the failing statement, then rerun".to_string(),
        ),
        ErrorType::FileNotFound => (
            format!("File or directory not found: {}", path),
            "List the directory to confirm the correct path".to_string(),
        ),
        ErrorType::PermissionDenied => (
            format!("Permission denied for {}", path),
            "Write to a user-writable location or request elevated access".to_string(),
        ),
        ErrorType::Network => (
            "Network or DNS failure".to_string(),
            "Retry after a short delay; check the URL if it keeps failing".to_string(),
        ),
        ErrorType::Timeout => (
            "The operation timed out".to_string(),
            "Retry with a longer timeout or split the work".to_string(),
        ),
        ErrorType::WebSearchFailed => (
            "Web search returned no usable results".to_string(),
            "Rephrase the query or use a different search source".to_string(),
        ),
        ErrorType::WebInteractionRequired => (
            "The page requires user interaction (login, captcha or confirmation)".to_string(),
            "Ask the user to complete the step in the browser, then continue".to_string(),
        ),
        ErrorType::BrowserSpaNotRendered => (
            "The page is a single-page app that had not rendered yet".to_string(),
            "Navigate again waiting for network idle plus a hydration delay".to_string(),
        ),
        ErrorType::BrowserSmartModeUnavailable => (
            "AI-vision browser mode is unavailable".to_string(),
            "Do not repeat this action; switch to selector-based browser actions".to_string(),
        ),
        ErrorType::BrowserElementNotFound => (
            "The target element could not be located on the page".to_string(),
            "Inspect the page content and use a different selector or label".to_string(),
        ),
        ErrorType::PlanRefinementNeeded => (
            "The current approach keeps failing".to_string(),
            "Change strategy instead of repeating the same action".to_string(),
        ),
        ErrorType::Unknown => (
            "Unclassified error".to_string(),
            "Inspect the error text; search the web for it if it repeats".to_string(),
        ),
    }
}
