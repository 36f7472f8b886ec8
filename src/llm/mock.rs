//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 取最后一条 User 消息，回显为一个只含 `echo` 命令的提议 JSON，便于本地跑通整条审批流程。

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端：把用户请求包装成 echo 提议
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let proposal = serde_json::json!({
            "summary": format!("Echo the request (mock): {}", last_user),
            "operations": [
                {"type": "run_command", "command": "echo", "args": [last_user]}
            ]
        });
        Ok(format!("```json\n{}\n```", proposal))
    }
}
