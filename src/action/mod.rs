//! 行动层：提议数据模型与 ActionClient（HTTP 推理服务 / LLM 直连）

pub mod client;
pub mod http;
pub mod llm;
pub mod proposal;

pub use client::ActionClient;
pub use http::HttpActionClient;
pub use llm::LlmActionClient;
pub use proposal::{parse_proposal, ActionOutcome, ActionProposal, Operation, OutcomeStatus};
