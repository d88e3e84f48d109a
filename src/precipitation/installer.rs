//! 技能安装：先写临时目录再 rename，保证版本目录要么完整要么不存在

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::types::{GeneratedSkill, PrecipitationError, QualityReport};
use crate::skills::{SkillRegistrar, INSTRUCTIONS_FILE, MANIFEST_FILE};

pub const QUALITY_FILE: &str = "quality.json";
const SCRIPTS_DIR: &str = "scripts";

pub struct SkillInstaller {
    skills_dir: PathBuf,
    registrar: Option<Arc<dyn SkillRegistrar>>,
}

/// 安装结果
#[derive(Debug, Clone)]
pub struct Installed {
    pub path: PathBuf,
    /// 热注册是否成功
    pub registered: bool,
}

impl SkillInstaller {
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            skills_dir: skills_dir.into(),
            registrar: None,
        }
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn SkillRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    pub fn version_dir(&self, id: &str, version: u32) -> PathBuf {
        self.skills_dir.join(id).join(format!("v{}", version))
    }

    pub async fn install(&self, skill: &GeneratedSkill, quality: &QualityReport) -> Result<Installed, PrecipitationError> {
        let m = &skill.manifest;
        let target = self.version_dir(&m.id, m.version);
        if target.exists() {
            return Err(PrecipitationError::Invalid(format!(
                "skill {} v{} already installed",
                m.id, m.version
            )));
        }
        let parent = self.skills_dir.join(&m.id);
        std::fs::create_dir_all(&parent)?;
        let staging = parent.join(format!(".tmp-v{}-{}", m.version, uuid::Uuid::new_v4().simple()));

        if let Err(e) = write_tree(&staging, skill, quality) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
        if let Err(e) = std::fs::rename(&staging, &target) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        tracing::info!(skill = %m.id, version = m.version, path = %target.display(), "skill installed");

        let registered = match &self.registrar {
            Some(r) => match r.register(&target).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(skill = %m.id, error = %e, "hot registration failed, keeping installed files");
                    false
                }
            },
            None => false,
        };
        Ok(Installed {
            path: target,
            registered,
        })
    }
}

fn write_tree(dir: &Path, skill: &GeneratedSkill, quality: &QualityReport) -> Result<(), PrecipitationError> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(MANIFEST_FILE), toml::to_string(&skill.manifest)?)?;
    std::fs::write(dir.join(INSTRUCTIONS_FILE), &skill.instructions)?;
    let quality_json =
        serde_json::to_string_pretty(quality).map_err(|e| PrecipitationError::Invalid(e.to_string()))?;
    std::fs::write(dir.join(QUALITY_FILE), quality_json)?;
    if !skill.scripts.is_empty() {
        let scripts = dir.join(SCRIPTS_DIR);
        std::fs::create_dir_all(&scripts)?;
        for script in &skill.scripts {
            std::fs::write(scripts.join(&script.file_name), &script.content)?;
        }
    }
    Ok(())
}
