//! 沉淀引擎
//!
//! 决策 → （技能）依赖解析 + 生成 + 质量门 + 安装；（笔记）写入知识库。
//! 任务完成后 precipitate_trace 把执行轨迹转成一条知识：目标达成 → 正向流程；未达成 → 失败教训。

use std::sync::Arc;

use serde_json::{json, Value};

use super::decision::decide_precipitation_type;
use super::generator::{generate_skill, skill_id};
use super::installer::SkillInstaller;
use super::quality::{evaluate, QualityGate, QualityVerdict};
use super::resolver::DependencyResolver;
use super::types::{
    ExperimentResult, KnowledgeType, PrecipitationDecision, PrecipitationError, PrecipitationOutcome,
    PrecipitationThresholds, ProcessedKnowledge, QualityReport,
};
use crate::autonomous::{AutonomousTask, SubTaskStatus, TaskStatus};
use crate::config::PrecipitationSection;
use crate::memory::long_term::tokenize_lower;
use crate::memory::KnowledgeStore;
use crate::skills::{latest_version, SkillLoader};

const MAX_TITLE_CHARS: usize = 80;

/// precipitate_trace 的结果
#[derive(Debug, Clone)]
pub enum TraceOutcome {
    Precipitated(PrecipitationOutcome),
    LessonRecorded { lesson: String },
    Skipped(String),
}

impl TraceOutcome {
    /// knowledge_precipitated 事件的 data
    pub fn to_event_data(&self) -> Value {
        match self {
            TraceOutcome::Precipitated(PrecipitationOutcome::SkillInstalled {
                skill_id,
                version,
                path,
                quality,
                auto_use,
                registered,
            }) => json!({
                "kind": "skill",
                "skill_id": skill_id,
                "version": version,
                "path": path.display().to_string(),
                "quality_score": quality.score,
                "suggestions": quality.suggestions,
                "auto_use": auto_use,
                "registered": registered,
            }),
            TraceOutcome::Precipitated(PrecipitationOutcome::NoteSaved {
                decision,
                result,
                downgraded_from,
            }) => json!({
                "kind": "note",
                "decision": decision.as_str(),
                "note_type": result.note_type,
                "entity_id": result.entity_id,
                "downgraded_score": downgraded_from.as_ref().map(|q| q.score),
            }),
            TraceOutcome::LessonRecorded { lesson } => json!({ "kind": "lesson", "lesson": lesson }),
            TraceOutcome::Skipped(reason) => json!({ "kind": "skipped", "reason": reason }),
        }
    }
}

pub struct PrecipitationEngine {
    store: Arc<dyn KnowledgeStore>,
    installer: SkillInstaller,
    loader: Option<Arc<SkillLoader>>,
    tools: Vec<String>,
    thresholds: PrecipitationThresholds,
    gate: QualityGate,
}

impl PrecipitationEngine {
    pub fn new(store: Arc<dyn KnowledgeStore>, installer: SkillInstaller, cfg: &PrecipitationSection) -> Self {
        Self {
            store,
            installer,
            loader: None,
            tools: Vec::new(),
            thresholds: PrecipitationThresholds::from(cfg),
            gate: QualityGate::from(cfg),
        }
    }

    /// 已安装技能参与依赖解析
    pub fn with_skill_loader(mut self, loader: Arc<SkillLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// 注册工具名，参与依赖解析
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    async fn resolver(&self) -> DependencyResolver {
        match &self.loader {
            Some(loader) => DependencyResolver::from_loader(self.tools.clone(), loader).await,
            None => DependencyResolver::new(self.tools.clone(), Vec::new()),
        }
    }

    pub async fn precipitate(
        &self,
        knowledge: &ProcessedKnowledge,
        experiment: &ExperimentResult,
    ) -> Result<PrecipitationOutcome, PrecipitationError> {
        if knowledge.title.trim().is_empty() {
            return Err(PrecipitationError::Invalid("knowledge has no title".to_string()));
        }
        let decision = decide_precipitation_type(knowledge, experiment, &self.thresholds);
        tracing::info!(title = %knowledge.title, decision = decision.as_str(), "precipitation decided");
        if !decision.is_skill() {
            return self.save_note(knowledge, decision, None).await;
        }

        let resolution = self.resolver().await.resolve(&knowledge.dependencies);
        let id = skill_id(knowledge);
        let version = latest_version(&self.installer.skills_dir().join(&id))
            .map(|v| v + 1)
            .unwrap_or(1);
        let auto_use = decision == PrecipitationDecision::AutoSkill;
        let skill = generate_skill(knowledge, experiment, &resolution, version, auto_use);

        let mut quality = evaluate(&skill);
        match self.gate.verdict(&quality) {
            QualityVerdict::Downgrade => {
                tracing::info!(skill = %id, score = quality.score, "skill below quality floor, saving as note");
                let note_decision = if decision.requires_approval() {
                    PrecipitationDecision::DraftKnowledge
                } else {
                    PrecipitationDecision::KnowledgeNote
                };
                self.save_note(knowledge, note_decision, Some(quality)).await
            }
            verdict => {
                if verdict == QualityVerdict::Install {
                    quality.suggestions.clear();
                }
                let installed = self.installer.install(&skill, &quality).await?;
                Ok(PrecipitationOutcome::SkillInstalled {
                    skill_id: id,
                    version,
                    path: installed.path,
                    quality,
                    auto_use,
                    registered: installed.registered,
                })
            }
        }
    }

    async fn save_note(
        &self,
        knowledge: &ProcessedKnowledge,
        decision: PrecipitationDecision,
        downgraded_from: Option<QualityReport>,
    ) -> Result<PrecipitationOutcome, PrecipitationError> {
        let result = self
            .store
            .precipitate(knowledge, decision)
            .await
            .map_err(|e| PrecipitationError::Store(e.to_string()))?;
        Ok(PrecipitationOutcome::NoteSaved {
            decision,
            result,
            downgraded_from,
        })
    }

    /// 已完成任务的轨迹沉淀
    pub async fn precipitate_trace(&self, task: &AutonomousTask) -> Result<TraceOutcome, PrecipitationError> {
        if task.status != TaskStatus::Completed {
            return Ok(TraceOutcome::Skipped(format!("task is {:?}", task.status)));
        }
        match task.goal_met() {
            None => Ok(TraceOutcome::Skipped("goal was not verified".to_string())),
            Some(false) => {
                let lesson = failure_lesson(task);
                self.store
                    .append_lesson(&task.id, &lesson)
                    .await
                    .map_err(|e| PrecipitationError::Store(e.to_string()))?;
                tracing::info!(task_id = %task.id, "failure lesson recorded");
                Ok(TraceOutcome::LessonRecorded { lesson })
            }
            Some(true) => {
                let (knowledge, experiment) = self.knowledge_from_trace(task).await;
                if knowledge.steps.is_empty() {
                    return Ok(TraceOutcome::Skipped("no completed subtasks".to_string()));
                }
                let outcome = self.precipitate(&knowledge, &experiment).await?;
                Ok(TraceOutcome::Precipitated(outcome))
            }
        }
    }

    async fn knowledge_from_trace(&self, task: &AutonomousTask) -> (ProcessedKnowledge, ExperimentResult) {
        let confidence = task
            .verification_result
            .as_ref()
            .map(|v| v.confidence)
            .unwrap_or(0.0);
        let title: String = task.original_query.trim().chars().take(MAX_TITLE_CHARS).collect();
        let mut k = ProcessedKnowledge::new(title, KnowledgeType::Procedural, confidence);
        k.source_task = Some(task.id.clone());
        k.summary = task
            .summary
            .clone()
            .or_else(|| task.verification_result.as_ref().map(|v| v.evidence.clone()))
            .unwrap_or_default();

        let done: Vec<_> = task
            .subtasks
            .iter()
            .filter(|s| s.status == SubTaskStatus::Completed)
            .collect();
        k.steps = done.iter().map(|s| s.description.clone()).collect();
        k.code_template = done
            .iter()
            .rev()
            .find_map(|s| s.result.as_deref().and_then(extract_fenced_code));

        // 步骤文本里提到的工具 / 技能名作为依赖
        let mut words = std::collections::HashSet::new();
        for s in &done {
            words.extend(tokenize_lower(&s.description));
            if let Some(r) = &s.result {
                words.extend(tokenize_lower(r));
            }
        }
        let mut known = self.tools.clone();
        if let Some(loader) = &self.loader {
            known.extend(loader.list_ids().await);
        }
        k.dependencies = known.into_iter().filter(|n| words.contains(&n.to_lowercase())).collect();
        k.dependencies.sort();
        k.dependencies.dedup();

        let failed: Vec<String> = task
            .subtasks
            .iter()
            .filter(|s| s.status == SubTaskStatus::Failed)
            .map(|s| format!("{}: {}", s.description, s.error.as_deref().unwrap_or("failed")))
            .collect();
        let experiment = ExperimentResult {
            tests_run: task.subtasks.len() as u32,
            tests_passed: done.len() as u32,
            issues: failed,
        };
        (k, experiment)
    }
}

/// 第一个 ``` 代码块的内容
pub fn extract_fenced_code(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    let code = body[..end].trim_end();
    (!code.trim().is_empty()).then(|| code.to_string())
}

fn failure_lesson(task: &AutonomousTask) -> String {
    let mut lesson = format!("Goal not met: \"{}\"", task.original_query.trim());
    if let Some(v) = &task.verification_result {
        if !v.missing_steps.is_empty() {
            lesson.push_str(&format!("; missing: {}", v.missing_steps.join(", ")));
        }
        if !v.evidence.trim().is_empty() {
            lesson.push_str(&format!("; evidence: {}", v.evidence.trim()));
        }
    }
    let failed: Vec<&str> = task
        .subtasks
        .iter()
        .filter(|s| s.status == SubTaskStatus::Failed)
        .map(|s| s.description.as_str())
        .collect();
    if !failed.is_empty() {
        lesson.push_str(&format!("; failed subtasks: {}", failed.join(", ")));
    }
    lesson
}
