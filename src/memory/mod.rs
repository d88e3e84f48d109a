//! 记忆层：LLM 消息、长期记忆检索、Markdown 知识库

pub mod knowledge;
pub mod long_term;
pub mod message;
pub mod vault;

pub use knowledge::{KnowledgeEntry, KnowledgeStore};
pub use long_term::{InMemoryLongTerm, LongTermMemory, NoopLongTerm};
pub use message::{last_user_content, Message, Role};
pub use vault::{slugify, split_frontmatter, MarkdownVault, NoteFrontmatter};
