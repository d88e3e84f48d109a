//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COWORK__*` 覆盖（双下划线表示嵌套，如 `COWORK__RETRY__MAX_RETRIES=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub react: ReactSection,
    pub retry: RetrySection,
    pub suspend: SuspendSection,
    pub autonomous: AutonomousSection,
    pub precipitation: PrecipitationSection,
}

/// [app] 段：工作目录、知识库目录、技能目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工作根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 知识笔记目录（Markdown + YAML frontmatter），未设置时为 workspace/vault
    pub vault_dir: Option<PathBuf>,
    /// 生成技能的安装目录，未设置时为 workspace/skills
    pub skills_dir: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: Some("cowork".to_string()),
            workspace_root: None,
            vault_dir: None,
            skills_dir: None,
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；未设置 OPENAI_API_KEY 时总是回落到 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
        }
    }
}

/// [tools] 段：单次工具调用超时、命令白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
    /// run_command 允许的命令名（首词）
    pub allowed_commands: Vec<String>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            allowed_commands: [
                "ls", "dir", "cat", "type", "head", "tail", "wc", "grep", "findstr", "find", "echo",
                "python", "python3", "py", "pip", "pip3", "node", "nodejs", "git",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// [react] 段：推理循环步数上限、卡死阈值、记忆检索条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactSection {
    pub max_steps: usize,
    /// 连续错误次数 / 同一动作重复次数达到此值视为卡死
    pub stuck_threshold: u32,
    /// 每步检索的长期记忆条数（0 表示不检索）
    pub memory_k: usize,
    /// 是否对工具结果额外做一次质量检查（LLM 调用）
    pub enable_quality_check: bool,
}

impl Default for ReactSection {
    fn default() -> Self {
        Self {
            max_steps: 15,
            stuck_threshold: 2,
            memory_k: 3,
            enable_quality_check: false,
        }
    }
}

/// [retry] 段：重试预算与各类延迟
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    /// 两次尝试之间的等待（毫秒）
    pub retry_delay_ms: u64,
    /// timeout 类错误翻倍超时的上限（毫秒）
    pub timeout_ceiling_ms: u64,
    /// SPA 重新导航后等待 hydration 的固定延迟（毫秒）
    pub hydration_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            timeout_ceiling_ms: 300_000,
            hydration_delay_ms: 3000,
        }
    }
}

/// [suspend] 段：心跳间隔与最长等待
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SuspendSection {
    pub heartbeat_interval_secs: u64,
    pub max_wait_secs: u64,
}

impl Default for SuspendSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            max_wait_secs: 300,
        }
    }
}

/// [autonomous] 段：子任务复审重试、记忆提取阈值、并发任务数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutonomousSection {
    pub max_review_retries: u32,
    pub memory_confidence_threshold: f64,
    pub max_concurrent_tasks: usize,
    /// 新任务默认是否自动提取并保存记忆
    pub auto_save_memory: bool,
    /// 任务结束后是否把执行轨迹交给沉淀引擎
    pub precipitate_on_complete: bool,
}

impl Default for AutonomousSection {
    fn default() -> Self {
        Self {
            max_review_retries: 2,
            memory_confidence_threshold: 0.7,
            max_concurrent_tasks: 1,
            auto_save_memory: true,
            precipitate_on_complete: true,
        }
    }
}

/// [precipitation] 段：沉淀决策阈值与质量门槛
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrecipitationSection {
    pub save_threshold: f64,
    pub auto_use_threshold: f64,
    pub min_success_rate: f64,
    pub min_validations: u32,
    /// 低于此分数（满分 10）降级为知识笔记
    pub quality_floor: u32,
    /// 达到此分数不再附带改进建议
    pub quality_clean: u32,
}

impl Default for PrecipitationSection {
    fn default() -> Self {
        Self {
            save_threshold: 0.6,
            auto_use_threshold: 0.85,
            min_success_rate: 0.8,
            min_validations: 3,
            quality_floor: 5,
            quality_clean: 8,
        }
    }
}

impl AppConfig {
    /// 工作根目录：配置 > 当前目录下的 workspace
    pub fn workspace(&self) -> PathBuf {
        self.app
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }

    pub fn vault_dir(&self) -> PathBuf {
        self.app
            .vault_dir
            .clone()
            .unwrap_or_else(|| self.workspace().join("vault"))
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.app
            .skills_dir
            .clone()
            .unwrap_or_else(|| self.workspace().join("skills"))
    }
}

/// 从 config 目录加载配置，环境变量 COWORK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COWORK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COWORK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.react.max_steps, 15);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.suspend.heartbeat_interval_secs, 5);
        assert_eq!(cfg.suspend.max_wait_secs, 300);
        assert_eq!(cfg.autonomous.max_review_retries, 2);
        assert!((cfg.autonomous.memory_confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(cfg.precipitation.quality_floor, 5);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[retry]\nmax_retries = 7\n\n[react]\nmax_steps = 4\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.retry.max_retries, 7);
        assert_eq!(cfg.react.max_steps, 4);
        // 未覆盖的字段保留默认值
        assert_eq!(cfg.retry.hydration_delay_ms, 3000);
    }

    #[test]
    fn test_derived_dirs() {
        let mut cfg = AppConfig::default();
        cfg.app.workspace_root = Some(PathBuf::from("/tmp/ws"));
        assert_eq!(cfg.vault_dir(), PathBuf::from("/tmp/ws/vault"));
        assert_eq!(cfg.skills_dir(), PathBuf::from("/tmp/ws/skills"));
    }
}
