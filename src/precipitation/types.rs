//! 沉淀引擎的数据类型

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PrecipitationSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    /// 可复现的操作步骤
    Procedural,
    /// 参考资料（命令、API 用法）
    Reference,
    Concept,
    Insight,
    /// 失败经验
    Lesson,
}

impl KnowledgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeType::Procedural => "procedural",
            KnowledgeType::Reference => "reference",
            KnowledgeType::Concept => "concept",
            KnowledgeType::Insight => "insight",
            KnowledgeType::Lesson => "lesson",
        }
    }
}

/// 一条待沉淀的知识
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedKnowledge {
    pub title: String,
    pub knowledge_type: KnowledgeType,
    pub confidence: f64,
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub code_template: Option<String>,
    /// 依赖的工具 / 技能名
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 产生这条知识的任务
    #[serde(default)]
    pub source_task: Option<String>,
}

impl ProcessedKnowledge {
    pub fn new(title: impl Into<String>, knowledge_type: KnowledgeType, confidence: f64) -> Self {
        Self {
            title: title.into(),
            knowledge_type,
            confidence,
            summary: String::new(),
            steps: Vec::new(),
            code_template: None,
            dependencies: Vec::new(),
            tags: Vec::new(),
            source_task: None,
        }
    }

    pub fn has_code_template(&self) -> bool {
        self.code_template
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}

/// 验证结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub tests_run: u32,
    pub tests_passed: u32,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl ExperimentResult {
    pub fn success_rate(&self) -> f64 {
        if self.tests_run == 0 {
            0.0
        } else {
            self.tests_passed as f64 / self.tests_run as f64
        }
    }
}

/// 沉淀去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecipitationDecision {
    /// 置信度不足，存草稿等审批
    DraftKnowledge,
    /// 生成技能并允许自动使用
    AutoSkill,
    /// 生成技能但需审批后使用
    DraftSkill,
    Procedure,
    KnowledgeNote,
}

impl PrecipitationDecision {
    pub fn requires_approval(&self) -> bool {
        matches!(self, PrecipitationDecision::DraftKnowledge | PrecipitationDecision::DraftSkill)
    }

    pub fn is_skill(&self) -> bool {
        matches!(self, PrecipitationDecision::AutoSkill | PrecipitationDecision::DraftSkill)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrecipitationDecision::DraftKnowledge => "draft_knowledge",
            PrecipitationDecision::AutoSkill => "auto_skill",
            PrecipitationDecision::DraftSkill => "draft_skill",
            PrecipitationDecision::Procedure => "procedure",
            PrecipitationDecision::KnowledgeNote => "knowledge_note",
        }
    }
}

/// 决策阈值
#[derive(Debug, Clone, Copy)]
pub struct PrecipitationThresholds {
    pub save_threshold: f64,
    pub auto_use_threshold: f64,
    pub min_success_rate: f64,
    pub min_validations: u32,
}

impl Default for PrecipitationThresholds {
    fn default() -> Self {
        Self::from(&PrecipitationSection::default())
    }
}

impl From<&PrecipitationSection> for PrecipitationThresholds {
    fn from(cfg: &PrecipitationSection) -> Self {
        Self {
            save_threshold: cfg.save_threshold,
            auto_use_threshold: cfg.auto_use_threshold,
            min_success_rate: cfg.min_success_rate,
            min_validations: cfg.min_validations,
        }
    }
}

/// skill.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillManifest {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    /// 组合自哪些已有能力（工具或技能）
    #[serde(default)]
    pub composed_from: Vec<String>,
    #[serde(default)]
    pub auto_use: bool,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillScript {
    pub file_name: String,
    pub content: String,
}

/// 生成的技能；写入后不再修改，再次沉淀产生新版本
#[derive(Debug, Clone)]
pub struct GeneratedSkill {
    pub manifest: SkillManifest,
    /// SKILL.md 内容
    pub instructions: String,
    pub scripts: Vec<SkillScript>,
}

/// 质量门评分
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityReport {
    /// 0..=10
    pub score: u32,
    pub passed: Vec<String>,
    pub failed: Vec<String>,
    /// 5..8 分安装时附带的改进建议
    pub suggestions: Vec<String>,
}

/// 知识笔记写入结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecipitateResult {
    pub success: bool,
    pub note_type: String,
    pub path: Option<PathBuf>,
    pub entity_id: String,
}

/// 一次沉淀的最终结果
#[derive(Debug, Clone)]
pub enum PrecipitationOutcome {
    SkillInstalled {
        skill_id: String,
        version: u32,
        path: PathBuf,
        quality: QualityReport,
        auto_use: bool,
        /// 热注册回调是否成功（失败不回滚）
        registered: bool,
    },
    NoteSaved {
        decision: PrecipitationDecision,
        result: PrecipitateResult,
        /// 质量不达标被降级时的评分
        downgraded_from: Option<QualityReport>,
    },
}

#[derive(Debug, Error)]
pub enum PrecipitationError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest serialization failed: {0}")]
    Manifest(#[from] toml::ser::Error),

    #[error("knowledge store: {0}")]
    Store(String),

    #[error("invalid knowledge: {0}")]
    Invalid(String),
}
