//! 技能生成
//!
//! 优先组合已有能力（composed_from 记录复用了哪些工具 / 技能，底层升级时技能随之受益），
//! 无法解析的依赖才生成内联脚本。

use chrono::Utc;

use super::resolver::{Capability, Resolution};
use super::types::{ExperimentResult, GeneratedSkill, ProcessedKnowledge, SkillManifest, SkillScript};
use crate::memory::slugify;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "to", "of", "and", "or", "for", "in", "on", "with", "how", "from", "into", "by", "use", "using",
];

const MAX_TRIGGERS: usize = 5;

/// 技能 id：首个标签，否则标题中第一个非停用词
pub fn skill_id(knowledge: &ProcessedKnowledge) -> String {
    if let Some(tag) = knowledge.tags.iter().find(|t| !t.trim().is_empty()) {
        return slugify(tag);
    }
    let keyword = knowledge
        .title
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .find(|w| !w.is_empty() && !STOPWORDS.contains(&w.as_str()));
    slugify(keyword.as_deref().unwrap_or(&knowledge.title))
}

fn triggers(knowledge: &ProcessedKnowledge) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let title = knowledge.title.trim().to_lowercase();
    if !title.is_empty() {
        out.push(title);
    }
    for tag in &knowledge.tags {
        let t = tag.trim().to_lowercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    let keyword = skill_id(knowledge).replace('-', " ");
    if !out.contains(&keyword) {
        out.push(keyword);
    }
    out.truncate(MAX_TRIGGERS);
    out
}

/// 没有摘要时无从说明适用场景，只用标题
fn description(knowledge: &ProcessedKnowledge) -> String {
    let summary = knowledge.summary.trim().trim_end_matches('.');
    if summary.is_empty() {
        knowledge.title.trim().to_string()
    } else {
        format!("Use when {}", summary)
    }
}

fn script_extension(code: &str) -> &'static str {
    let head = code.trim_start();
    if head.starts_with("#!") && head.contains("python") {
        "py"
    } else if head.starts_with("#!") {
        "sh"
    } else if code.contains("import ") || code.contains("def ") || code.contains("print(") {
        "py"
    } else if code.contains("fn main") {
        "rs"
    } else {
        "sh"
    }
}

fn inline_script(dep: &str, knowledge: &ProcessedKnowledge) -> SkillScript {
    let mut content = format!(
        "#!/usr/bin/env bash\n# Inline fallback for `{}`: no registered tool or skill provides it.\nset -euo pipefail\n",
        dep
    );
    let needle = dep.to_lowercase();
    for step in knowledge.steps.iter().filter(|s| s.to_lowercase().contains(&needle)) {
        content.push_str(&format!("# step: {}\n", step));
    }
    content.push_str(&format!("command -v {} >/dev/null 2>&1 || {{ echo \"{} not available\" >&2; exit 1; }}\n", dep, dep));
    SkillScript {
        file_name: format!("{}.sh", slugify(dep)),
        content,
    }
}

fn render_instructions(
    manifest: &SkillManifest,
    knowledge: &ProcessedKnowledge,
    resolution: &Resolution,
    experiment: &ExperimentResult,
) -> String {
    let mut md = String::new();
    md.push_str("---\n");
    md.push_str(&format!("name: {}\n", manifest.name));
    md.push_str(&format!("description: {}\n", manifest.description));
    md.push_str(&format!("version: {}\n", manifest.version));
    md.push_str("---\n\n");
    md.push_str(&format!("# {}\n\n", knowledge.title.trim()));
    md.push_str(&format!("{}.\n\n", manifest.description));
    if !knowledge.summary.trim().is_empty() {
        md.push_str(&format!("{}\n\n", knowledge.summary.trim()));
    }

    if !knowledge.steps.is_empty() {
        md.push_str("## Steps\n\n");
        for (i, step) in knowledge.steps.iter().enumerate() {
            md.push_str(&format!("{}. {}\n", i + 1, step.trim()));
        }
        md.push('\n');
    }

    if let Some(code) = knowledge.code_template.as_deref().filter(|c| !c.trim().is_empty()) {
        md.push_str("## Usage\n\n```\n");
        md.push_str(code.trim_end());
        md.push_str("\n```\n\n");
    }

    if !resolution.resolved.is_empty() || !resolution.unresolved.is_empty() {
        md.push_str("## Composed From\n\n");
        for cap in &resolution.resolved {
            let kind = match cap {
                Capability::Tool(_) => "tool",
                Capability::Skill(_) => "skill",
            };
            md.push_str(&format!("- {} `{}`\n", kind, cap.name()));
        }
        for dep in &resolution.unresolved {
            md.push_str(&format!("- inline script `scripts/{}.sh` for `{}`\n", slugify(dep), dep));
        }
        md.push('\n');
    }

    if experiment.tests_run > 0 {
        md.push_str("## Verification\n\n");
        md.push_str(&format!(
            "- Validated in {}/{} runs.\n- The final step produces output without error markers.\n\n",
            experiment.tests_passed, experiment.tests_run
        ));
    }

    if !experiment.issues.is_empty() || !resolution.unresolved.is_empty() {
        md.push_str("## Red Flags\n\n");
        for issue in &experiment.issues {
            md.push_str(&format!("- {}\n", issue));
        }
        for dep in &resolution.unresolved {
            md.push_str(&format!("- `{}` is not a registered capability; check it is installed first.\n", dep));
        }
        md.push('\n');
    }
    md
}

/// 生成指定版本的技能
pub fn generate_skill(
    knowledge: &ProcessedKnowledge,
    experiment: &ExperimentResult,
    resolution: &Resolution,
    version: u32,
    auto_use: bool,
) -> GeneratedSkill {
    let tools = resolution.tools();
    let manifest = SkillManifest {
        id: skill_id(knowledge),
        name: knowledge.title.trim().to_string(),
        version,
        description: description(knowledge),
        triggers: triggers(knowledge),
        allowed_tools: tools.clone(),
        required_tools: tools,
        required_skills: resolution.skills(),
        composed_from: resolution.composed_from(),
        auto_use,
        created_at: Utc::now().to_rfc3339(),
    };

    let mut scripts: Vec<SkillScript> = resolution
        .unresolved
        .iter()
        .map(|dep| inline_script(dep, knowledge))
        .collect();
    if let Some(code) = knowledge.code_template.as_deref().filter(|c| !c.trim().is_empty()) {
        scripts.push(SkillScript {
            file_name: format!("main.{}", script_extension(code)),
            content: code.to_string(),
        });
    }

    let instructions = render_instructions(&manifest, knowledge, resolution, experiment);
    GeneratedSkill {
        manifest,
        instructions,
        scripts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precipitation::resolver::DependencyResolver;
    use crate::precipitation::types::KnowledgeType;

    fn knowledge() -> ProcessedKnowledge {
        let mut k = ProcessedKnowledge::new("Export sales to CSV", KnowledgeType::Procedural, 0.9);
        k.summary = "exporting a sales table to a CSV file".into();
        k.steps = vec!["query sales".into(), "convert with pandas".into(), "write file".into()];
        k.code_template = Some("import pandas as pd\ndf.to_csv('out.csv')".into());
        k.dependencies = vec!["shell".into(), "pandas".into()];
        k
    }

    #[test]
    fn test_skill_id_from_keyword() {
        let mut k = knowledge();
        assert_eq!(skill_id(&k), "export");
        k.title = "How to Parse logs".into();
        assert_eq!(skill_id(&k), "parse");
        k.tags = vec!["CSV Export".into()];
        assert_eq!(skill_id(&k), "csv-export");
    }

    #[test]
    fn test_generate_composes_and_inlines() {
        let k = knowledge();
        let resolution = DependencyResolver::new(vec!["shell".to_string()], Vec::new()).resolve(&k.dependencies);
        assert_eq!(resolution.resolved, vec![Capability::Tool("shell".into())]);

        let exp = ExperimentResult {
            tests_run: 3,
            tests_passed: 3,
            issues: vec![],
        };
        let skill = generate_skill(&k, &exp, &resolution, 2, false);
        assert_eq!(skill.manifest.version, 2);
        assert_eq!(skill.manifest.composed_from, vec!["shell".to_string()]);
        assert!(skill.manifest.description.starts_with("Use when exporting"));
        let names: Vec<_> = skill.scripts.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(names, vec!["pandas.sh", "main.py"]);
        assert!(skill.instructions.starts_with("---\n"));
        assert!(skill.instructions.contains("1. query sales"));
        assert!(skill.instructions.contains("## Verification"));
        assert!(skill.instructions.contains("## Red Flags"));
    }
}
