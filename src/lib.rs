//! Cowork - 自主任务执行内核
//!
//! 模块划分：
//! - **autonomous**: 任务分解、子任务执行与两阶段复审、目标验证、记忆提取
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、任务事件、内核构建器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、推理接口
//! - **memory**: LLM 消息、长期记忆检索、Markdown 知识库
//! - **precipitation**: 知识 / 技能沉淀（决策、生成、质量门、安装）
//! - **react**: ReAct 主循环、意图分类、Critic
//! - **recovery**: 错误分类与重试计划
//! - **skills**: 已安装技能的加载与热注册
//! - **suspend**: 挂起 / 恢复协调与心跳
//! - **tools**: 工具注册表、带超时与审计的执行器、自适应执行器

pub mod autonomous;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod precipitation;
pub mod react;
pub mod recovery;
pub mod skills;
pub mod suspend;
pub mod tools;
