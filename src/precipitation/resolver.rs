//! 依赖解析：把知识声明的依赖映射到已有能力（注册工具 / 已安装技能）

use std::collections::BTreeSet;

use crate::skills::SkillLoader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Tool(String),
    Skill(String),
}

impl Capability {
    pub fn name(&self) -> &str {
        match self {
            Capability::Tool(n) | Capability::Skill(n) => n,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub resolved: Vec<Capability>,
    /// 找不到对应能力的依赖，生成时改为内联脚本
    pub unresolved: Vec<String>,
}

impl Resolution {
    pub fn tools(&self) -> Vec<String> {
        self.resolved
            .iter()
            .filter_map(|c| match c {
                Capability::Tool(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn skills(&self) -> Vec<String> {
        self.resolved
            .iter()
            .filter_map(|c| match c {
                Capability::Skill(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn composed_from(&self) -> Vec<String> {
        self.resolved.iter().map(|c| c.name().to_string()).collect()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace('-', "_")
}

#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    tools: BTreeSet<String>,
    skills: BTreeSet<String>,
}

impl DependencyResolver {
    pub fn new<T, S>(tools: T, skills: S) -> Self
    where
        T: IntoIterator<Item = String>,
        S: IntoIterator<Item = String>,
    {
        Self {
            tools: tools.into_iter().map(|t| normalize(&t)).collect(),
            skills: skills.into_iter().map(|s| normalize(&s)).collect(),
        }
    }

    /// 工具名 + 加载器缓存中的技能 id
    pub async fn from_loader(tools: Vec<String>, loader: &SkillLoader) -> Self {
        Self::new(tools, loader.list_ids().await)
    }

    /// 工具优先于同名技能；重复依赖只解析一次
    pub fn resolve(&self, dependencies: &[String]) -> Resolution {
        let mut out = Resolution::default();
        let mut seen = BTreeSet::new();
        for dep in dependencies {
            let key = normalize(dep);
            if key.is_empty() || !seen.insert(key.clone()) {
                continue;
            }
            if self.tools.contains(&key) {
                out.resolved.push(Capability::Tool(key));
            } else if self.skills.contains(&key) {
                out.resolved.push(Capability::Skill(key));
            } else {
                out.unresolved.push(dep.trim().to_string());
            }
        }
        out
    }
}
