//! 知识库接口
//!
//! 沉淀引擎写知识笔记、任务控制器保存记忆 / 失败教训都走 KnowledgeStore；
//! 默认实现是 MarkdownVault（本地目录下的 Markdown + YAML frontmatter）。

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::precipitation::{PrecipitateResult, PrecipitationDecision, ProcessedKnowledge};

/// 检索命中
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub title: String,
    pub note_type: String,
    pub path: PathBuf,
    /// 正文开头一段
    pub snippet: String,
    pub score: f64,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// 写入一条知识笔记；同一标题重复写入覆盖同一条笔记
    async fn precipitate(
        &self,
        knowledge: &ProcessedKnowledge,
        decision: PrecipitationDecision,
    ) -> Result<PrecipitateResult, AgentError>;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeEntry>, AgentError>;

    async fn save_memory(&self, title: &str, content: &str, category: &str) -> Result<(), AgentError>;

    /// 追加一条失败教训（只追加，不改写）
    async fn append_lesson(&self, task_id: &str, lesson: &str) -> Result<(), AgentError>;
}
