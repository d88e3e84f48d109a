//! Markdown 知识库（vault）
//!
//! 目录结构：
//! - `<vault>/<note_type>/<slug>.md`：知识笔记，YAML frontmatter + Markdown 正文
//! - `<vault>/memories/<category>/<slug>.md`：任务中提取的记忆
//! - `<vault>/lessons.md`：失败教训，只追加
//!
//! 检索用 walkdir 遍历全部 .md，按查询词与标题 + 正文的重叠数 / sqrt(文档词数) 打分。

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::core::AgentError;
use crate::memory::long_term::tokenize_lower;
use crate::memory::{KnowledgeEntry, KnowledgeStore, LongTermMemory};
use crate::precipitation::{PrecipitateResult, PrecipitationDecision, ProcessedKnowledge};

const LESSONS_FILE: &str = "lessons.md";

/// 笔记 frontmatter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteFrontmatter {
    pub title: String,
    #[serde(rename = "type")]
    pub note_type: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_task: Option<String>,
    /// draft 需要审批；published 可直接使用
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: String,
}

pub struct MarkdownVault {
    root: PathBuf,
}

impl MarkdownVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lessons_path(&self) -> PathBuf {
        self.root.join(LESSONS_FILE)
    }

    fn write_note(&self, rel_dir: &str, slug: &str, front: &NoteFrontmatter, body: &str) -> std::io::Result<PathBuf> {
        let dir = self.root.join(rel_dir);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.md", slug));
        let yaml = serde_yaml::to_string(front)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, format!("---\n{}---\n\n{}\n", yaml, body.trim_end()))?;
        Ok(path)
    }

    /// 同步检索（LongTermMemory 与 KnowledgeStore::search 共用）
    fn search_notes(&self, query: &str, limit: usize) -> Vec<KnowledgeEntry> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() || limit == 0 || !self.root.exists() {
            return Vec::new();
        }
        let mut hits: Vec<KnowledgeEntry> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.path().extension().map(|x| x == "md").unwrap_or(false))
            .filter_map(|e| {
                let content = std::fs::read_to_string(e.path()).ok()?;
                let (front, body) = split_frontmatter(&content);
                let title = front
                    .as_ref()
                    .map(|f| f.title.clone())
                    .unwrap_or_else(|| file_stem(e.path()));
                let note_type = front
                    .as_ref()
                    .map(|f| f.note_type.clone())
                    .unwrap_or_else(|| "note".to_string());
                let doc_tokens: HashSet<String> = tokenize_lower(&format!("{} {}", title, body));
                let score = score(&query_tokens, &doc_tokens);
                (score > 0.0).then(|| KnowledgeEntry {
                    title,
                    note_type,
                    path: e.path().to_path_buf(),
                    snippet: body.trim().chars().take(300).collect(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
    }
}

fn score(query_tokens: &HashSet<String>, doc_tokens: &HashSet<String>) -> f64 {
    let overlap = query_tokens.intersection(doc_tokens).count();
    if overlap == 0 {
        return 0.0;
    }
    overlap as f64 / (doc_tokens.len().max(1) as f64).sqrt()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// 拆出 frontmatter；没有或解析失败时整篇视为正文
pub fn split_frontmatter(content: &str) -> (Option<NoteFrontmatter>, &str) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (None, content);
    };
    let Some(end) = rest.find("\n---") else {
        return (None, content);
    };
    let yaml = &rest[..end + 1];
    let body = rest[end + 4..].trim_start_matches('\n');
    match serde_yaml::from_str::<NoteFrontmatter>(yaml) {
        Ok(front) => (Some(front), body),
        Err(_) => (None, content),
    }
}

/// 记忆文件名：标题 slug 加短 uuid，开头相同的记忆不会互相覆盖
fn memory_slug(title: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", slugify(title), &id[..8])
}

/// 标题转文件名：小写字母数字，其余折叠为 '-'
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.chars().take(80).collect()
    }
}

fn render_knowledge_body(k: &ProcessedKnowledge) -> String {
    let mut body = format!("# {}\n\n{}\n", k.title, k.summary.trim());
    if !k.steps.is_empty() {
        body.push_str("\n## Steps\n\n");
        for (i, s) in k.steps.iter().enumerate() {
            body.push_str(&format!("{}. {}\n", i + 1, s));
        }
    }
    if let Some(code) = k.code_template.as_deref().filter(|c| !c.trim().is_empty()) {
        body.push_str(&format!("\n## Code\n\n```\n{}\n```\n", code.trim_end()));
    }
    if !k.dependencies.is_empty() {
        body.push_str(&format!("\n## Dependencies\n\n{}\n", k.dependencies.join(", ")));
    }
    body
}

fn store_err(e: impl std::fmt::Display) -> AgentError {
    AgentError::StoreError(e.to_string())
}

#[async_trait]
impl KnowledgeStore for MarkdownVault {
    async fn precipitate(
        &self,
        knowledge: &ProcessedKnowledge,
        decision: PrecipitationDecision,
    ) -> Result<PrecipitateResult, AgentError> {
        let slug = slugify(&knowledge.title);
        let note_type = match decision {
            PrecipitationDecision::Procedure => "procedure",
            _ => knowledge.knowledge_type.as_str(),
        };
        let front = NoteFrontmatter {
            title: knowledge.title.clone(),
            note_type: note_type.to_string(),
            confidence: knowledge.confidence,
            tags: knowledge.tags.clone(),
            source_task: knowledge.source_task.clone(),
            status: if decision.requires_approval() { "draft" } else { "published" }.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let path = self
            .write_note(note_type, &slug, &front, &render_knowledge_body(knowledge))
            .map_err(store_err)?;
        tracing::info!(path = %path.display(), decision = decision.as_str(), "knowledge note written");
        Ok(PrecipitateResult {
            success: true,
            note_type: note_type.to_string(),
            path: Some(path),
            entity_id: format!("{}/{}", note_type, slug),
        })
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeEntry>, AgentError> {
        Ok(self.search_notes(query, limit))
    }

    async fn save_memory(&self, title: &str, content: &str, category: &str) -> Result<(), AgentError> {
        let category = if category.trim().is_empty() { "general" } else { category };
        let front = NoteFrontmatter {
            title: title.to_string(),
            note_type: "memory".to_string(),
            confidence: 1.0,
            tags: vec![category.to_string()],
            source_task: None,
            status: "published".to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let dir = format!("memories/{}", slugify(category));
        self.write_note(&dir, &memory_slug(title), &front, content)
            .map_err(store_err)?;
        Ok(())
    }

    async fn append_lesson(&self, task_id: &str, lesson: &str) -> Result<(), AgentError> {
        if lesson.trim().is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.root).map_err(store_err)?;
        let line = format!(
            "- [{}] ({}) {}\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M"),
            task_id,
            lesson.trim().replace('\n', " ")
        );
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.lessons_path())
            .and_then(|mut f| f.write_all(line.as_bytes()))
            .map_err(store_err)
    }
}

impl LongTermMemory for MarkdownVault {
    fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let title: String = text.chars().take(60).collect();
        let front = NoteFrontmatter {
            title: title.clone(),
            note_type: "memory".to_string(),
            confidence: 1.0,
            tags: Vec::new(),
            source_task: None,
            status: "published".to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.write_note("memories/general", &memory_slug(&title), &front, text) {
            tracing::warn!(error = %e, "failed to add memory note");
        }
    }

    fn search(&self, query: &str, k: usize) -> Vec<String> {
        self.search_notes(query, k)
            .into_iter()
            .map(|e| format!("{}: {}", e.title, e.snippet))
            .collect()
    }
}
