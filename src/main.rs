//! Nectar 入口
//!
//! `nectar "<request>"` 执行单个回合后退出（回合失败时退出码为 1）；不带参数时进入 REPL。
//! 回合进行中按 Ctrl+C 只取消当前回合，空闲时按 Ctrl+C 退出。

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use nectar::approval::ConsoleApprovalGate;
use nectar::config::{load_config, AppConfig};
use nectar::core::{build_orchestrator, Orchestrator, SessionSupervisor, Turn, TurnStatus};
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

const HELP: &str = "\
Type a request to get a proposal; nothing runs until you answer y.
  /history   show this session's turns (newest first)
  /clear     forget this session's turns
  /help      show this message
  /exit      leave (alias /quit)";

const HISTORY_LIMIT: usize = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nectar::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    // REPL 与审批闸门共用同一个 stdin 读取端
    let stdin = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin())));
    let gate = Arc::new(ConsoleApprovalGate::new(stdin.clone(), tokio::io::stdout()));
    let mut orchestrator = build_orchestrator(&cfg, gate).await;

    let supervisor = Arc::new(SessionSupervisor::new());
    spawn_interrupt_watcher(supervisor.clone());

    let request = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let result = if request.trim().is_empty() {
        run_repl(&mut orchestrator, &supervisor, &stdin).await
    } else {
        run_once(&mut orchestrator, &supervisor, &request).await
    };

    orchestrator
        .history()
        .close()
        .await
        .context("Failed to save history")?;

    // 直接退出：阻塞中的 stdin 读取线程会拖住运行时的关闭
    let code = match result {
        Ok(Some(TurnStatus::Failed)) => 1,
        Ok(_) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code)
}

/// Ctrl+C：有进行中的回合则取消它，否则结束会话
fn spawn_interrupt_watcher(supervisor: Arc<SessionSupervisor>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !supervisor.cancel_turn() {
                supervisor.shutdown();
                break;
            }
        }
    });
}

async fn submit(
    orchestrator: &mut Orchestrator,
    supervisor: &SessionSupervisor,
    request: &str,
) -> anyhow::Result<Turn> {
    let cancel = supervisor.begin_turn();
    let submitted = orchestrator.submit(request, cancel).await;
    supervisor.end_turn();
    match submitted {
        Ok(turn) => {
            print_turn(&turn);
            Ok(turn)
        }
        Err(e) => {
            // 未能保存的回合照样展示结果，用户需要知道操作是否已经执行
            if let Some(turn) = e.turn() {
                print_turn(turn);
            }
            Err(e.into())
        }
    }
}

fn print_turn(turn: &Turn) {
    println!("{}", turn.describe());
    for outcome in &turn.outcomes {
        if let Some(stdout) = outcome.stdout.as_deref().filter(|s| !s.trim().is_empty()) {
            println!("--- #{} stdout ---\n{}", outcome.operation_ref + 1, stdout.trim_end());
        }
    }
}

async fn run_once(
    orchestrator: &mut Orchestrator,
    supervisor: &SessionSupervisor,
    request: &str,
) -> anyhow::Result<Option<TurnStatus>> {
    let turn = submit(orchestrator, supervisor, request).await?;
    Ok(Some(turn.status))
}

async fn run_repl(
    orchestrator: &mut Orchestrator,
    supervisor: &SessionSupervisor,
    stdin: &Arc<Mutex<BufReader<Stdin>>>,
) -> anyhow::Result<Option<TurnStatus>> {
    println!("nectar: describe what you want done. /help for commands.");
    let shutdown = supervisor.session_token();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        let read = {
            let mut input = stdin.lock().await;
            tokio::select! {
                res = input.read_line(&mut line) => Some(res),
                _ = shutdown.cancelled() => None,
            }
        };
        match read {
            None | Some(Ok(0)) => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e).context("Failed to read input"),
        }

        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/help" => println!("{}", HELP),
            "/history" => print_history(orchestrator).await,
            "/clear" => match orchestrator.history().clear().await {
                Ok(()) => println!("History cleared."),
                Err(e) => println!("Could not clear history: {}", e),
            },
            request => {
                if let Err(e) = submit(orchestrator, supervisor, request).await {
                    println!("{:#}", e);
                }
            }
        }
    }
    Ok(None)
}

async fn print_history(orchestrator: &Orchestrator) {
    let turns = orchestrator.history().list(HISTORY_LIMIT).await;
    if turns.is_empty() {
        println!("No turns in this session yet.");
        return;
    }
    for turn in turns {
        println!(
            "#{} [{}] {:?}/{:?}  {}",
            turn.id,
            turn.started_at.format("%H:%M:%S"),
            turn.decision,
            turn.status,
            turn.request_text
        );
    }
}
