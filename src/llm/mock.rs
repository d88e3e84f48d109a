//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 先按顺序吐出预置的回复；用完后回显最后一条 User 消息作为直接回答，
//! 因此推理循环在没有真实模型时也能一步结束。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{last_user_content, Message};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    scripted: Mutex<VecDeque<String>>,
    /// 收到过的最后一条 user 消息（测试断言 prompt 内容用）
    last_prompt: Mutex<Option<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置回复，按调用顺序返回
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scripted: Mutex::new(responses.into_iter().map(Into::into).collect()),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, AgentError> {
        let last_user = last_user_content(messages).unwrap_or("(no input)").to_string();
        *self.last_prompt.lock().unwrap_or_else(|p| p.into_inner()) = Some(last_user.clone());

        if let Some(next) = self
            .scripted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
        {
            return Ok(next);
        }
        let first_line = last_user.lines().next().unwrap_or_default();
        Ok(serde_json::json!({ "answer": format!("Echo from Mock: {}", first_line) }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_echo() {
        let llm = MockLlmClient::scripted(["one", "two"]);
        let msgs = vec![Message::user("hello")];
        assert_eq!(llm.complete(&msgs).await.unwrap(), "one");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "two");
        let echo = llm.complete(&msgs).await.unwrap();
        assert!(echo.contains("Echo from Mock: hello"));
        assert_eq!(llm.last_prompt().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_token() {
        use futures_util::StreamExt;
        let llm = MockLlmClient::scripted(["tok"]);
        let mut s = llm.complete_stream(&[Message::user("x")]).await.unwrap();
        assert_eq!(s.next().await.unwrap().unwrap(), "tok");
        assert!(s.next().await.is_none());
    }
}
