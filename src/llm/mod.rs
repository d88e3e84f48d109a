//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、推理接口

pub mod llm_reasoner;
pub mod mock;
pub mod openai;
pub mod parse;
pub mod reasoner;
pub mod traits;

use std::sync::Arc;

pub use llm_reasoner::LlmReasoner;
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use reasoner::{ReasoningContext, Reasoner, SubtaskExecution, SubtaskRequest, TaskReasoner};
pub use traits::{LlmClient, TokenStream};

use crate::config::AppConfig;

/// 按配置创建 LLM 客户端；未设置 OPENAI_API_KEY 或 provider 为 mock 时使用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    match (provider.as_str(), api_key) {
        ("mock", _) | (_, None) => {
            tracing::warn!("No API key set or provider is mock, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        (_, Some(key)) => {
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&key),
            ))
        }
    }
}
