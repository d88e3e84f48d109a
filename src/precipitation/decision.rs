//! 沉淀去向决策（确定性，同样输入总得到同样结果）

use super::types::{ExperimentResult, KnowledgeType, PrecipitationDecision, PrecipitationThresholds, ProcessedKnowledge};

/// 优先级：置信度不足 → 草稿；可复现且带代码模板 → 技能；带步骤的流程 → Procedure；其余 → 知识笔记
pub fn decide_precipitation_type(
    knowledge: &ProcessedKnowledge,
    experiment: &ExperimentResult,
    thresholds: &PrecipitationThresholds,
) -> PrecipitationDecision {
    if knowledge.confidence < thresholds.save_threshold {
        return PrecipitationDecision::DraftKnowledge;
    }

    let skill_type = matches!(
        knowledge.knowledge_type,
        KnowledgeType::Procedural | KnowledgeType::Reference
    );
    if skill_type && knowledge.has_code_template() && experiment.success_rate() >= thresholds.min_success_rate {
        if knowledge.confidence > thresholds.auto_use_threshold && experiment.tests_run >= thresholds.min_validations {
            return PrecipitationDecision::AutoSkill;
        }
        return PrecipitationDecision::DraftSkill;
    }

    if knowledge.knowledge_type == KnowledgeType::Procedural && !knowledge.steps.is_empty() {
        return PrecipitationDecision::Procedure;
    }

    PrecipitationDecision::KnowledgeNote
}
