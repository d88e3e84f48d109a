//! 技能加载器
//!
//! 从技能目录加载已安装的生成技能并缓存。每个技能一个目录，每个版本一个子目录（写入后不再修改）：
//! 加载时取最高版本。沉淀引擎安装新技能后通过 SkillRegistrar 热注册到缓存。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::precipitation::SkillManifest;

pub const MANIFEST_FILE: &str = "skill.toml";
pub const INSTRUCTIONS_FILE: &str = "SKILL.md";

/// 已安装的技能
#[derive(Debug, Clone)]
pub struct InstalledSkill {
    pub manifest: SkillManifest,
    /// SKILL.md 内容
    pub instructions: String,
    pub dir: PathBuf,
}

impl InstalledSkill {
    /// 获取用于 LLM 选择的简短描述
    pub fn summary(&self) -> String {
        format!(
            "[{} v{}] {}: {}",
            self.manifest.id, self.manifest.version, self.manifest.name, self.manifest.description
        )
    }
}

/// 技能缓存
pub type SkillCache = Arc<RwLock<HashMap<String, InstalledSkill>>>;

/// 安装后的热注册回调；失败不回滚已写入的文件
#[async_trait]
pub trait SkillRegistrar: Send + Sync {
    async fn register(&self, dir: &Path) -> anyhow::Result<()>;
}

/// `v3` → 3
fn parse_version_dir(name: &str) -> Option<u32> {
    name.strip_prefix('v')?.parse().ok()
}

/// 技能目录下已存在的最高版本
pub fn latest_version(skill_dir: &Path) -> Option<u32> {
    let entries = std::fs::read_dir(skill_dir).ok()?;
    entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| parse_version_dir(&e.file_name().to_string_lossy()))
        .max()
}

/// 技能加载器
pub struct SkillLoader {
    skills_dir: PathBuf,
    cache: SkillCache,
}

impl SkillLoader {
    /// 创建新的加载器
    pub fn new(skills_dir: impl AsRef<Path>) -> Self {
        Self {
            skills_dir: skills_dir.as_ref().to_path_buf(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    /// 获取缓存引用
    pub fn cache(&self) -> SkillCache {
        Arc::clone(&self.cache)
    }

    /// 加载所有技能（每个取最高版本）并缓存
    pub async fn load_all(&self) -> anyhow::Result<Vec<InstalledSkill>> {
        let mut skills = Vec::new();

        if !self.skills_dir.exists() {
            return Ok(skills);
        }

        let entries = std::fs::read_dir(&self.skills_dir)?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(version) = latest_version(&path) else {
                continue;
            };
            let dir = path.join(format!("v{}", version));
            match Self::load_skill(&dir) {
                Ok(skill) => skills.push(skill),
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable skill"),
            }
        }

        let mut cache = self.cache.write().await;
        for skill in &skills {
            cache.insert(skill.manifest.id.clone(), skill.clone());
        }

        tracing::info!("Loaded {} skills", skills.len());
        Ok(skills)
    }

    /// 加载单个版本目录
    pub fn load_skill(dir: &Path) -> anyhow::Result<InstalledSkill> {
        let toml_content = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let manifest: SkillManifest = toml::from_str(&toml_content)?;
        let instructions = std::fs::read_to_string(dir.join(INSTRUCTIONS_FILE)).unwrap_or_default();
        Ok(InstalledSkill {
            manifest,
            instructions,
            dir: dir.to_path_buf(),
        })
    }

    /// 根据 ID 获取技能
    pub async fn get(&self, id: &str) -> Option<InstalledSkill> {
        let cache = self.cache.read().await;
        cache.get(id).cloned()
    }

    /// 获取所有技能的摘要列表
    pub async fn list_summaries(&self) -> Vec<String> {
        let cache = self.cache.read().await;
        cache.values().map(|s| s.summary()).collect()
    }

    /// 获取所有技能 ID
    pub async fn list_ids(&self) -> Vec<String> {
        let cache = self.cache.read().await;
        cache.keys().cloned().collect()
    }
}

#[async_trait]
impl SkillRegistrar for SkillLoader {
    async fn register(&self, dir: &Path) -> anyhow::Result<()> {
        let skill = Self::load_skill(dir)?;
        let mut cache = self.cache.write().await;
        // 只接受不低于当前缓存的版本
        let newer = cache
            .get(&skill.manifest.id)
            .map(|cur| cur.manifest.version <= skill.manifest.version)
            .unwrap_or(true);
        if newer {
            tracing::info!(skill = %skill.manifest.id, version = skill.manifest.version, "skill registered");
            cache.insert(skill.manifest.id.clone(), skill);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, version: u32) -> SkillManifest {
        SkillManifest {
            id: id.to_string(),
            name: "CSV 导出".to_string(),
            version,
            description: "Use when exporting tables".to_string(),
            triggers: vec!["export csv".to_string()],
            allowed_tools: vec![],
            required_tools: vec![],
            required_skills: vec![],
            composed_from: vec![],
            auto_use: false,
            created_at: String::new(),
        }
    }

    fn write_version(root: &Path, id: &str, version: u32) -> PathBuf {
        let dir = root.join(id).join(format!("v{}", version));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), toml::to_string(&manifest(id, version)).unwrap()).unwrap();
        std::fs::write(dir.join(INSTRUCTIONS_FILE), "# CSV\n").unwrap();
        dir
    }

    #[test]
    fn test_skill_summary() {
        let skill = InstalledSkill {
            manifest: manifest("csv", 2),
            instructions: String::new(),
            dir: PathBuf::from("."),
        };
        assert!(skill.summary().contains("csv v2"));
        assert!(skill.summary().contains("CSV 导出"));
    }

    #[tokio::test]
    async fn test_load_all_picks_latest_version() {
        let tmp = tempfile::tempdir().unwrap();
        write_version(tmp.path(), "csv", 1);
        write_version(tmp.path(), "csv", 2);
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let loader = SkillLoader::new(tmp.path());
        let skills = loader.load_all().await.unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(loader.get("csv").await.unwrap().manifest.version, 2);
        assert_eq!(latest_version(&tmp.path().join("csv")), Some(2));
        assert_eq!(latest_version(&tmp.path().join("missing")), None);
    }

    #[tokio::test]
    async fn test_register_ignores_older_version() {
        let tmp = tempfile::tempdir().unwrap();
        let v1 = write_version(tmp.path(), "csv", 1);
        let v2 = write_version(tmp.path(), "csv", 2);
        let loader = SkillLoader::new(tmp.path());

        loader.register(&v2).await.unwrap();
        loader.register(&v1).await.unwrap();
        assert_eq!(loader.get("csv").await.unwrap().manifest.version, 2);
        assert!(loader.register(&tmp.path().join("nope")).await.is_err());
    }
}
