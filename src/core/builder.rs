//! 内核构建器：统一的初始化逻辑
//!
//! 分类器、挂起协调器、执行器、知识库、沉淀引擎、任务控制器各构建一次，通过构造函数传递，不使用全局单例。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::autonomous::{AutonomousController, ReactTaskReasoner, TaskStatus};
use crate::config::AppConfig;
use crate::core::EventSink;
use crate::llm::{create_llm_from_config, LlmClient, LlmReasoner, TaskReasoner};
use crate::memory::MarkdownVault;
use crate::precipitation::{PrecipitationEngine, SkillInstaller};
use crate::recovery::{ErrorClassifier, RetryPlanner};
use crate::skills::SkillLoader;
use crate::suspend::{ResumeCheck, SuspendCoordinator, SuspendNotice};
use crate::tools::{AdaptiveExecutor, EchoTool, ShellTool, ToolExecutor, ToolRegistry};

/// 构建完成的内核
pub struct Core {
    pub controller: Arc<AutonomousController>,
    pub coordinator: SuspendCoordinator,
    pub vault: Arc<MarkdownVault>,
    pub skills: Arc<SkillLoader>,
}

impl Core {
    /// 把心跳自动恢复 / 超时取消的通知转给任务控制器
    pub fn forward_suspend_notices(&self, mut rx: mpsc::UnboundedReceiver<SuspendNotice>) -> JoinHandle<()> {
        let controller = self.controller.clone();
        tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                match notice {
                    SuspendNotice::Resumed {
                        task_id,
                        auto: true,
                        context,
                    } => {
                        if let Err(e) = controller.resume_with_context(&task_id, context).await {
                            tracing::warn!(task_id = %task_id, error = %e, "auto resume failed");
                        }
                    }
                    SuspendNotice::Cancelled { task_id, reason } => {
                        let paused = controller
                            .get_task(&task_id)
                            .map(|t| t.status == TaskStatus::Paused)
                            .unwrap_or(false);
                        if paused {
                            tracing::info!(task_id = %task_id, reason = %reason, "suspension cancelled, failing task");
                            let _ = controller.cancel_task(&task_id);
                        }
                    }
                    _ => {}
                }
            }
        })
    }
}

/// 内核构建器
pub struct CoreBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    task_reasoner: Option<Arc<dyn TaskReasoner>>,
    tools: Option<ToolRegistry>,
    events: EventSink,
    notices: Option<mpsc::UnboundedSender<SuspendNotice>>,
    resume_check: Option<Arc<dyn ResumeCheck>>,
}

impl CoreBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            task_reasoner: None,
            tools: None,
            events: EventSink::disabled(),
            notices: None,
            resume_check: None,
        }
    }

    /// 指定 LLM 客户端；未指定时按配置创建
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 直接指定任务级推理（跳过 ReAct 子任务执行）
    pub fn with_task_reasoner(mut self, reasoner: Arc<dyn TaskReasoner>) -> Self {
        self.task_reasoner = Some(reasoner);
        self
    }

    pub fn with_tool_registry(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_suspend_notices(mut self, tx: mpsc::UnboundedSender<SuspendNotice>) -> Self {
        self.notices = Some(tx);
        self
    }

    /// 登录墙等挂起的自动恢复检查
    pub fn with_resume_check(mut self, check: Arc<dyn ResumeCheck>) -> Self {
        self.resume_check = Some(check);
        self
    }

    /// 默认工具注册表
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools.register(ShellTool::new(
            self.config.tools.allowed_commands.clone(),
            self.config.tools.tool_timeout_secs,
        ));
        tools
    }

    pub async fn build(mut self) -> anyhow::Result<Core> {
        let cfg = &self.config;
        let workspace = cfg.workspace();
        std::fs::create_dir_all(&workspace)
            .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;

        let coordinator = SuspendCoordinator::with_channels(
            Duration::from_secs(cfg.suspend.heartbeat_interval_secs),
            Duration::from_secs(cfg.suspend.max_wait_secs),
            self.notices.clone(),
            self.events.clone(),
        );
        let vault = Arc::new(MarkdownVault::new(cfg.vault_dir()));

        let registry = match self.tools.take() {
            Some(tools) => tools,
            None => self.build_tool_registry(),
        };
        let tool_names = registry.tool_names();
        let descriptions = registry.describe_for_prompt();

        let task_reasoner: Arc<dyn TaskReasoner> = match self.task_reasoner {
            Some(r) => r,
            None => {
                let llm = self.llm.clone().unwrap_or_else(|| create_llm_from_config(cfg));
                let runner = Arc::new(ToolExecutor::new(registry, cfg.tools.tool_timeout_secs));
                let planner = RetryPlanner::new(cfg.retry.timeout_ceiling_ms, cfg.retry.hydration_delay_ms);
                let executor = Arc::new(
                    AdaptiveExecutor::new(runner, Arc::new(ErrorClassifier::new()), planner)
                        .with_max_retries(cfg.retry.max_retries)
                        .with_retry_delay(Duration::from_millis(cfg.retry.retry_delay_ms))
                        .with_events(self.events.clone()),
                );
                let llm_reasoner = Arc::new(LlmReasoner::new(llm.clone()));
                let mut runner = ReactTaskReasoner::new(
                    llm_reasoner.clone(),
                    llm_reasoner,
                    executor,
                    coordinator.clone(),
                    cfg.react.clone(),
                )
                .with_memory(vault.clone())
                .with_quality_llm(llm)
                .with_tool_descriptions(descriptions)
                .with_events(self.events.clone());
                if let Some(check) = &self.resume_check {
                    runner = runner.with_resume_check(check.clone());
                }
                Arc::new(runner)
            }
        };

        let skills = Arc::new(SkillLoader::new(cfg.skills_dir()));
        skills.load_all().await.context("Failed to load installed skills")?;
        let installer = SkillInstaller::new(cfg.skills_dir()).with_registrar(skills.clone());
        let engine = PrecipitationEngine::new(vault.clone(), installer, &cfg.precipitation)
            .with_skill_loader(skills.clone())
            .with_tools(tool_names);

        let controller = AutonomousController::new(task_reasoner, coordinator.clone(), cfg.autonomous.clone())
            .with_events(self.events.clone())
            .with_knowledge(vault.clone())
            .with_precipitation(Arc::new(engine));

        tracing::info!(workspace = %workspace.display(), "core initialised");
        Ok(Core {
            controller: Arc::new(controller),
            coordinator,
            vault,
            skills,
        })
    }
}
