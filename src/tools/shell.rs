//! 命令执行：策略校验与子进程运行
//!
//! 直接启动程序（不经过 sh -c），完整捕获 stdout / stderr 与退出码。
//! 子进程在独立的进程组中运行；run_command 返回前（包括超时、取消或 future 被丢弃）
//! 整个进程组都会收到 SIGKILL，直接子进程被回收，命令派生的后代进程不会残留。

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// 默认禁止的子串（即使程序在白名单中，也不允许带这些参数）
pub const DEFAULT_FORBIDDEN_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod -r 777 /",
    ":(){ :|:& };:", // fork bomb
];

/// 命令策略：程序名白名单（为空表示不限制）与禁止子串
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    allowed_commands: HashSet<String>,
    forbidden_patterns: Vec<String>,
}

impl CommandPolicy {
    pub fn new(allowed_commands: Vec<String>, forbidden_patterns: Vec<String>) -> Self {
        Self {
            allowed_commands: allowed_commands
                .into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            forbidden_patterns: forbidden_patterns
                .into_iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// 不做任何限制
    pub fn permissive() -> Self {
        Self::default()
    }

    /// 程序名取路径最后一段（/usr/bin/kubectl → kubectl）
    fn program_name(command: &str) -> String {
        Path::new(command.trim())
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    pub fn check(&self, command: &str, args: &[String]) -> Result<(), String> {
        let line = std::iter::once(command)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        for forbidden in &self.forbidden_patterns {
            if line.contains(forbidden.as_str()) {
                return Err(format!("Forbidden pattern: {}", forbidden));
            }
        }
        if self.allowed_commands.is_empty() {
            return Ok(());
        }
        let name = Self::program_name(command);
        if self.allowed_commands.contains(&name) {
            Ok(())
        } else {
            Err(format!("Command '{}' not in allowlist", name))
        }
    }
}

/// 一次命令运行的结局
#[derive(Debug)]
pub enum CommandRun {
    /// 进程自行退出；被信号终止时 exit_code 为 None
    Exited {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    Cancelled,
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!("pipe read failed: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// 子进程所在的进程组；drop 时向整组发送 SIGKILL
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn kill(&self) {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Some(pgid) = self.pgid {
                match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                    // 组内已无进程
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => tracing::warn!(pgid, "failed to kill process group: {}", e),
                }
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn kill_and_reap(child: &mut Child, group: &ProcessGroup) {
    group.kill();
    // kill() 对直接子进程补发 SIGKILL 并等待退出，子进程被回收
    if let Err(e) = child.kill().await {
        tracing::warn!(pid = ?child.id(), "failed to kill child: {}", e);
    }
}

/// 在 cwd 下运行 command args…，施加超时并响应取消
pub async fn run_command(
    command: &str,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> std::io::Result<CommandRun> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // 新进程组，组号即子进程 pid
    #[cfg(unix)]
    cmd.process_group(0);
    let mut child = cmd.spawn()?;

    let group = ProcessGroup { pgid: child.id() };
    tracing::info!(command = %command, pid = ?child.id(), "command spawned");

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    enum Waited {
        Done(std::io::Result<std::process::ExitStatus>, String, String),
        TimedOut,
        Cancelled,
    }

    let waited = {
        let collect = async {
            tokio::join!(child.wait(), read_pipe(stdout_pipe), read_pipe(stderr_pipe))
        };
        tokio::select! {
            res = tokio::time::timeout(timeout, collect) => match res {
                Ok((status, stdout, stderr)) => Waited::Done(status, stdout, stderr),
                Err(_) => Waited::TimedOut,
            },
            _ = cancel.cancelled() => Waited::Cancelled,
        }
    };

    match waited {
        Waited::Done(status, stdout, stderr) => {
            // 直接子进程已退出，清理它留在组内的后台进程
            group.kill();
            let status = status?;
            Ok(CommandRun::Exited {
                exit_code: status.code(),
                stdout,
                stderr,
            })
        }
        Waited::TimedOut => {
            tracing::warn!(command = %command, timeout_ms = timeout.as_millis() as u64, "command timed out, killing");
            kill_and_reap(&mut child, &group).await;
            Ok(CommandRun::TimedOut)
        }
        Waited::Cancelled => {
            tracing::warn!(command = %command, "command cancelled, killing");
            kill_and_reap(&mut child, &group).await;
            Ok(CommandRun::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_policy_permissive_allows_anything() {
        let policy = CommandPolicy::permissive();
        assert!(policy.check("kubectl", &strings(&["get", "pods"])).is_ok());
    }

    #[test]
    fn test_policy_allowlist_uses_program_name() {
        let policy = CommandPolicy::new(strings(&["kubectl", "ls"]), vec![]);
        assert!(policy.check("/usr/local/bin/kubectl", &strings(&["get", "pods"])).is_ok());
        let err = policy.check("curl", &strings(&["example.com"])).unwrap_err();
        assert!(err.contains("not in allowlist"));
    }

    #[test]
    fn test_policy_forbidden_pattern_spans_args() {
        let policy = CommandPolicy::new(
            vec![],
            DEFAULT_FORBIDDEN_PATTERNS.iter().map(|s| s.to_string()).collect(),
        );
        let err = policy.check("rm", &strings(&["-rf", "/"])).unwrap_err();
        assert!(err.contains("Forbidden pattern"));
        assert!(policy.check("rm", &strings(&["note.txt"])).is_ok());
    }

    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let run = run_command(
            "sh",
            &strings(&["-c", "echo out; echo err >&2; exit 3"]),
            dir.path(),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        match run {
            CommandRun::Exited {
                exit_code,
                stdout,
                stderr,
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stdout, "out\n");
                assert_eq!(stderr, "err\n");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_uses_cwd() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let run = run_command(
            "ls",
            &[],
            dir.path(),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        match run {
            CommandRun::Exited { stdout, .. } => assert!(stdout.contains("marker.txt")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let res = run_command(
            "definitely-not-a-real-program-xyz",
            &[],
            dir.path(),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_cancel_kills_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let run = run_command(
            "sleep",
            &strings(&["10"]),
            dir.path(),
            Duration::from_secs(30),
            &cancel,
        )
        .await
        .unwrap();
        assert!(matches!(run, CommandRun::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// kill -0 成功表示进程仍存在；被 init 回收前可能短暂可见，轮询等待
    async fn wait_until_gone(pid: &str) -> bool {
        for _ in 0..40 {
            let alive = std::process::Command::new("kill")
                .args(["-0", pid])
                .status()
                .map(|s| s.success())
                .unwrap_or(false);
            if !alive {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_timeout_kills_forked_descendants() {
        let dir = tempfile::TempDir::new().unwrap();
        let run = run_command(
            "sh",
            &strings(&["-c", "sleep 37 & echo $! > bg.pid; wait; echo done"]),
            dir.path(),
            Duration::from_millis(300),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(matches!(run, CommandRun::TimedOut));

        let pid = std::fs::read_to_string(dir.path().join("bg.pid")).unwrap();
        assert!(wait_until_gone(pid.trim()).await, "background sleep survived");
    }

    #[tokio::test]
    async fn test_exit_cleans_background_children() {
        let dir = tempfile::TempDir::new().unwrap();
        let run = run_command(
            "sh",
            &strings(&["-c", "sleep 37 >/dev/null 2>&1 & echo $! > bg.pid"]),
            dir.path(),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(matches!(run, CommandRun::Exited { exit_code: Some(0), .. }));

        let pid = std::fs::read_to_string(dir.path().join("bg.pid")).unwrap();
        assert!(wait_until_gone(pid.trim()).await, "background sleep survived");
    }
}
