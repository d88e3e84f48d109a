//! 长期记忆：跨任务检索
//!
//! 推理循环每步用 search(query, k) 取回相关记忆；InMemoryLongTerm 按词重叠打分，
//! MarkdownVault 也实现了这个 trait（检索知识库笔记）。

use std::collections::HashSet;
use std::sync::RwLock;

pub trait LongTermMemory: Send + Sync {
    fn add(&self, text: &str);

    /// 最相关的 k 条
    fn search(&self, query: &str, k: usize) -> Vec<String>;

    /// Noop 实现返回 false，调用方可以跳过检索
    fn enabled(&self) -> bool {
        true
    }
}

#[derive(Clone, Default)]
pub struct NoopLongTerm;

impl LongTermMemory for NoopLongTerm {
    fn add(&self, _text: &str) {}

    fn search(&self, _query: &str, _k: usize) -> Vec<String> {
        Vec::new()
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// 小写词集合（去掉首尾标点，忽略单字符）
pub(crate) fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.chars().count() > 1)
        .collect()
}

/// 内存实现：按关键词重叠检索，同分时新写入的优先
pub struct InMemoryLongTerm {
    store: RwLock<Vec<(String, HashSet<String>)>>,
    max_entries: usize,
}

impl InMemoryLongTerm {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: RwLock::new(Vec::new()),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.store.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryLongTerm {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl LongTermMemory for InMemoryLongTerm {
    fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut store = self.store.write().unwrap_or_else(|p| p.into_inner());
        store.push((text.to_string(), tokenize_lower(text)));
        let n = store.len();
        if n > self.max_entries {
            store.drain(0..n - self.max_entries);
        }
    }

    fn search(&self, query: &str, k: usize) -> Vec<String> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() || k == 0 {
            return Vec::new();
        }
        let store = self.store.read().unwrap_or_else(|p| p.into_inner());
        let mut scored: Vec<(usize, usize, &String)> = store
            .iter()
            .enumerate()
            .map(|(i, (text, tokens))| (query_tokens.intersection(tokens).count(), i, text))
            .filter(|(s, _, _)| *s > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        scored.into_iter().take(k).map(|(_, _, t)| t.clone()).collect()
    }
}
