//! 技能质量门：十个检查点，每项 1 分

use super::types::{GeneratedSkill, QualityReport};
use crate::config::PrecipitationSection;

const MIN_LENGTH: usize = 500;
const MIN_TRIGGERS: usize = 2;
const MIN_STEPS: usize = 3;

/// 评分对应的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityVerdict {
    /// 降级为知识笔记
    Downgrade,
    /// 安装，附带改进建议
    InstallWithSuggestions,
    Install,
}

#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    pub floor: u32,
    pub clean: u32,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::from(&PrecipitationSection::default())
    }
}

impl From<&PrecipitationSection> for QualityGate {
    fn from(cfg: &PrecipitationSection) -> Self {
        Self {
            floor: cfg.quality_floor,
            clean: cfg.quality_clean,
        }
    }
}

impl QualityGate {
    pub fn verdict(&self, report: &QualityReport) -> QualityVerdict {
        if report.score < self.floor {
            QualityVerdict::Downgrade
        } else if report.score < self.clean {
            QualityVerdict::InstallWithSuggestions
        } else {
            QualityVerdict::Install
        }
    }
}

fn has_frontmatter(md: &str) -> bool {
    md.strip_prefix("---\n")
        .map(|rest| rest.contains("\n---"))
        .unwrap_or(false)
}

fn has_section(md: &str, names: &[&str]) -> bool {
    md.lines().any(|line| {
        line.strip_prefix("## ")
            .map(|h| {
                let h = h.trim().to_lowercase();
                names.iter().any(|n| h.starts_with(n))
            })
            .unwrap_or(false)
    })
}

fn numbered_steps(md: &str) -> usize {
    md.lines()
        .filter(|line| {
            let t = line.trim_start();
            let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
            digits > 0 && t[digits..].starts_with(". ")
        })
        .count()
}

pub fn evaluate(skill: &GeneratedSkill) -> QualityReport {
    let md = skill.instructions.as_str();
    let m = &skill.manifest;
    let checks: [(&str, bool, &str); 10] = [
        ("frontmatter", has_frontmatter(md), "add a YAML frontmatter block"),
        (
            "title_heading",
            md.lines().any(|l| l.starts_with("# ")),
            "add a top-level `# Title` heading",
        ),
        (
            "length",
            md.chars().count() >= MIN_LENGTH,
            "expand the instructions (at least 500 characters)",
        ),
        (
            "triggers",
            m.triggers.len() >= MIN_TRIGGERS,
            "declare at least two trigger phrases",
        ),
        (
            "numbered_steps",
            numbered_steps(md) >= MIN_STEPS,
            "list at least three concrete numbered steps",
        ),
        (
            "red_flags",
            has_section(md, &["red flags", "anti-patterns", "pitfalls"]),
            "add a Red Flags section with anti-patterns",
        ),
        (
            "verification",
            has_section(md, &["verification"]),
            "add explicit verification criteria",
        ),
        (
            "use_when",
            m.description.to_lowercase().starts_with("use when"),
            "start the description with \"Use when ...\"",
        ),
        (
            "allowed_tools",
            !m.allowed_tools.is_empty(),
            "declare the tools this skill may call",
        ),
        (
            "usage",
            has_section(md, &["usage", "examples", "example"]),
            "add a Usage or Examples section",
        ),
    ];

    let mut report = QualityReport::default();
    for (name, ok, suggestion) in checks {
        if ok {
            report.score += 1;
            report.passed.push(name.to_string());
        } else {
            report.failed.push(name.to_string());
            report.suggestions.push(suggestion.to_string());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precipitation::types::SkillManifest;

    fn skill(instructions: &str, triggers: usize, tools: bool) -> GeneratedSkill {
        GeneratedSkill {
            manifest: SkillManifest {
                id: "csv".into(),
                name: "CSV".into(),
                version: 1,
                description: "Use when exporting tables".into(),
                triggers: (0..triggers).map(|i| format!("t{}", i)).collect(),
                allowed_tools: if tools { vec!["shell".into()] } else { vec![] },
                required_tools: vec![],
                required_skills: vec![],
                composed_from: vec![],
                auto_use: false,
                created_at: String::new(),
            },
            instructions: instructions.to_string(),
            scripts: vec![],
        }
    }

    #[test]
    fn test_full_score() {
        let mut md = String::from("---\nname: CSV\n---\n\n# CSV\n\n## Steps\n\n1. a\n2. b\n3. c\n\n");
        md.push_str("## Usage\n\n```\nx\n```\n\n## Verification\n\n- ok\n\n## Red Flags\n\n- no\n\n");
        md.push_str(&"detail ".repeat(80));
        let report = evaluate(&skill(&md, 2, true));
        assert_eq!(report.score, 10, "{:?}", report.failed);
        assert!(report.suggestions.is_empty());
        assert_eq!(QualityGate::default().verdict(&report), QualityVerdict::Install);
    }

    #[test]
    fn test_floor_and_suggestions() {
        // frontmatter、标题、use when、allowed tools → 4 分
        let report = evaluate(&skill("---\na: b\n---\n# CSV\n", 1, true));
        assert_eq!(report.score, 4);
        assert_eq!(QualityGate::default().verdict(&report), QualityVerdict::Downgrade);

        let report = evaluate(&skill("---\na: b\n---\n# CSV\n## Usage\n", 2, true));
        assert_eq!(report.score, 6);
        let gate = QualityGate::default();
        assert_eq!(gate.verdict(&report), QualityVerdict::InstallWithSuggestions);
        assert_eq!(report.suggestions.len(), 4);
    }

    #[test]
    fn test_numbered_steps_count() {
        assert_eq!(numbered_steps("1. a\n 2. b\n10. c\n1) no\nx. y"), 3);
    }
}
