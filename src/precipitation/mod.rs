//! 知识沉淀：把验证过的执行轨迹变成可复用的知识笔记或可安装的技能

pub mod decision;
pub mod engine;
pub mod generator;
pub mod installer;
pub mod quality;
pub mod resolver;
pub mod types;

pub use decision::decide_precipitation_type;
pub use engine::{extract_fenced_code, PrecipitationEngine, TraceOutcome};
pub use generator::{generate_skill, skill_id};
pub use installer::{Installed, SkillInstaller};
pub use quality::{evaluate, QualityGate, QualityVerdict};
pub use resolver::{Capability, DependencyResolver, Resolution};
pub use types::{
    ExperimentResult, GeneratedSkill, KnowledgeType, PrecipitateResult, PrecipitationDecision, PrecipitationError,
    PrecipitationOutcome, PrecipitationThresholds, ProcessedKnowledge, QualityReport, SkillManifest, SkillScript,
};
