//! run_command：白名单命令执行
//!
//! 仅允许配置中的命令名（首词）；禁止 rm -rf、chmod 777 等子串。
//! 非零退出时把 stderr 原样放进错误文本，交给错误分类器识别 `command not found`、缺失模块等。
//! 可选参数 `pre_command`（重试规划器安装依赖时给出，如 `pip install opencv-python`）先于主命令执行。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::Tool;

/// 命令串接、管道与命令替换：允许名单只检查首词，出现这些就无法保证实际执行的命令
const SHELL_METACHARS: &[&str] = &[";", "&", "|", "`", "$(", "\n", "\r"];

const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "curl | sh",
    ":(){ :|:& };:",
];

pub struct ShellTool {
    allowed_commands: HashSet<String>,
    timeout_secs: u64,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            allowed_commands: allowed_commands.into_iter().map(|s| s.to_lowercase()).collect(),
            timeout_secs,
        }
    }

    fn check(&self, raw: &str) -> Result<(), String> {
        let lower = raw.to_lowercase();
        if let Some(f) = FORBIDDEN_SUBSTR.iter().find(|f| lower.contains(*f)) {
            return Err(format!("Forbidden pattern: {}", f));
        }
        if let Some(m) = SHELL_METACHARS.iter().find(|m| raw.contains(*m)) {
            return Err(format!("Shell metacharacter not allowed: {:?}", m));
        }
        let name = lower.split_whitespace().next().unwrap_or("");
        if name.is_empty() {
            return Err("Empty command".to_string());
        }
        if self.allowed_commands.contains(name) {
            Ok(())
        } else {
            Err(format!("Command '{}' not in allowlist", name))
        }
    }

    async fn run(&self, command: &str, limit: Duration) -> Result<String, String> {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        let output = tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| format!("Command timed out after {} ms", limit.as_millis()))?
            .map_err(|e| format!("Execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(if stderr.is_empty() {
                format!("Exit {:?}: {}", output.status.code(), stdout)
            } else {
                stderr
            });
        }
        Ok(if stderr.is_empty() {
            stdout
        } else {
            format!("{}\nstderr: {}", stdout, stderr)
        })
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run an allowlisted shell command and return its output."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line; first word must be allowlisted" },
                "pre_command": { "type": "string", "description": "Optional setup command run first" },
                "timeout_ms": { "type": "integer" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args.get("command").and_then(|v| v.as_str()).unwrap_or("").trim();
        self.check(command)?;
        let limit = args
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_secs(self.timeout_secs));

        if let Some(pre) = args.get("pre_command").and_then(|v| v.as_str()) {
            self.check(pre)?;
            tracing::info!(pre_command = %pre, "run_command setup");
            self.run(pre, limit).await?;
        }

        tracing::info!(command = %command, "run_command execute");
        self.run(command, limit).await
    }
}
