//! Nectar - 先审批、后执行的本地操作智能体
//!
//! 模块划分：
//! - **action**: 提议数据模型与 ActionClient（HTTP 推理服务 / LLM 直连）
//! - **approval**: 审批闸门（终端交互 / 固定结论）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 回合、状态机、会话监管、编排器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 会话历史与原子持久化
//! - **observability**: tracing 初始化
//! - **tools**: 执行器、文件创建、命令运行与策略

pub mod action;
pub mod approval;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
