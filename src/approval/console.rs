//! 终端审批：打印提议与操作列表，读取一行回答

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::action::ActionProposal;
use crate::approval::{ApprovalDecision, ApprovalGate};

/// 仅 y / yes（不区分大小写）视为批准，其余（包括空输入）均为拒绝
pub fn parse_answer(line: &str) -> ApprovalDecision {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::Approved,
        _ => ApprovalDecision::Rejected,
    }
}

pub fn render_proposal(proposal: &ActionProposal) -> String {
    let mut out = format!("\nProposal: {}\n", proposal.summary());
    for (idx, op) in proposal.operations().iter().enumerate() {
        out.push_str(&format!("  {}. {}\n", idx + 1, op));
    }
    out
}

/// 终端审批闸门；输入与 REPL 共享同一个读取端，避免两个缓冲区争抢 stdin
pub struct ConsoleApprovalGate<R, W> {
    input: Arc<Mutex<R>>,
    output: Mutex<W>,
}

impl<R, W> ConsoleApprovalGate<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: Arc<Mutex<R>>, output: W) -> Self {
        Self {
            input,
            output: Mutex::new(output),
        }
    }

    async fn prompt(&self, proposal: &ActionProposal) -> std::io::Result<()> {
        let mut out = self.output.lock().await;
        out.write_all(render_proposal(proposal).as_bytes()).await?;
        out.write_all(b"Proceed? [y/N] ").await?;
        out.flush().await
    }
}

#[async_trait]
impl<R, W> ApprovalGate for ConsoleApprovalGate<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(&self, proposal: &ActionProposal, cancel: &CancellationToken) -> ApprovalDecision {
        if let Err(e) = self.prompt(proposal).await {
            tracing::warn!("failed to print proposal: {}", e);
        }

        let mut input = self.input.lock().await;
        let mut line = String::new();
        let read = tokio::select! {
            res = input.read_line(&mut line) => Some(res),
            _ = cancel.cancelled() => None,
        };

        let decision = match read {
            Some(Ok(0)) => ApprovalDecision::Rejected,
            Some(Ok(_)) => parse_answer(&line),
            Some(Err(e)) => {
                tracing::warn!("failed to read approval: {}", e);
                ApprovalDecision::Rejected
            }
            None => {
                tracing::info!("approval wait cancelled");
                ApprovalDecision::Rejected
            }
        };
        tracing::debug!(?decision, "approval decided");
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Operation;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::io::BufReader;

    fn proposal() -> ActionProposal {
        ActionProposal::new(
            "create note",
            vec![Operation::CreateFile {
                path: PathBuf::from("note.txt"),
                content: "hi".into(),
            }],
        )
        .unwrap()
    }

    fn gate_with_input(
        input: &'static [u8],
    ) -> ConsoleApprovalGate<BufReader<&'static [u8]>, Vec<u8>> {
        ConsoleApprovalGate::new(Arc::new(Mutex::new(BufReader::new(input))), Vec::new())
    }

    #[test]
    fn test_parse_answer_defaults_to_reject() {
        assert_eq!(parse_answer("y\n"), ApprovalDecision::Approved);
        assert_eq!(parse_answer(" YES "), ApprovalDecision::Approved);
        assert_eq!(parse_answer("\n"), ApprovalDecision::Rejected);
        assert_eq!(parse_answer("n"), ApprovalDecision::Rejected);
        assert_eq!(parse_answer("sure"), ApprovalDecision::Rejected);
    }

    #[tokio::test]
    async fn test_confirm_reads_answer_and_prints_operations() {
        let gate = gate_with_input(b"yes\n");
        let decision = gate.confirm(&proposal(), &CancellationToken::new()).await;
        assert_eq!(decision, ApprovalDecision::Approved);

        let printed = String::from_utf8(gate.output.lock().await.clone()).unwrap();
        assert!(printed.contains("Proposal: create note"));
        assert!(printed.contains("1. create_file note.txt (2 bytes)"));
        assert!(printed.ends_with("Proceed? [y/N] "));
    }

    #[tokio::test]
    async fn test_empty_line_and_eof_reject() {
        let gate = gate_with_input(b"\n");
        assert_eq!(
            gate.confirm(&proposal(), &CancellationToken::new()).await,
            ApprovalDecision::Rejected
        );

        let gate = gate_with_input(b"");
        assert_eq!(
            gate.confirm(&proposal(), &CancellationToken::new()).await,
            ApprovalDecision::Rejected
        );
    }

    #[tokio::test]
    async fn test_cancel_during_wait_rejects() {
        // duplex 的写端保持打开且从不写入，读取会一直挂起
        let (_writer, reader) = tokio::io::duplex(64);
        let gate = ConsoleApprovalGate::new(Arc::new(Mutex::new(BufReader::new(reader))), Vec::new());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let decision = tokio::time::timeout(Duration::from_secs(5), gate.confirm(&proposal(), &cancel))
            .await
            .expect("confirm hung after cancel");
        assert_eq!(decision, ApprovalDecision::Rejected);
    }
}
