use log::{debug, warn};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch, Notify};

pub struct ProcessStartInfo {
    pub target: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub enum ProcessExit {
    Exited(ExitStatus),
    Killed,
    /// Waiting on the child failed; its fate is unknown.
    Lost(String),
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Exited(status) => write!(f, "{}", status),
            ProcessExit::Killed => f.write_str("killed"),
            ProcessExit::Lost(err) => write!(f, "lost track of process: {}", err),
        }
    }
}

struct CommandRequest {
    line: String,
    reply: oneshot::Sender<io::Result<()>>,
}

pub struct ProcessOutput {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Handle to a spawned server process. Clones share the same child.
///
/// Console writes go through a single writer task that owns stdin, so
/// lines from concurrent callers never interleave.
#[derive(Clone)]
pub struct ServerProcess {
    pid: u32,
    command_tx: mpsc::UnboundedSender<CommandRequest>,
    kill_notify: Arc<Notify>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl ServerProcess {
    pub fn spawn(info: ProcessStartInfo) -> io::Result<(Self, ProcessOutput)> {
        let mut cmd = Command::new(&info.target);
        cmd.args(&info.args)
            .current_dir(&info.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut process = cmd.spawn()?;
        let pid = process.id().unwrap_or(0);

        let stdin = process.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = process.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = process.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_commands(stdin, command_rx));

        let kill_notify = Arc::new(Notify::new());
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn({
            let kill_notify = kill_notify.clone();
            async move {
                let exit = select! {
                    result = process.wait() => match result {
                        Ok(status) => ProcessExit::Exited(status),
                        Err(err) => ProcessExit::Lost(err.to_string()),
                    },
                    _ = kill_notify.notified() => {
                        if let Err(err) = process.kill().await {
                            warn!("Could not kill process (pid={}): {}", pid, err);
                        }
                        ProcessExit::Killed
                    }
                };
                debug!("server process (pid={}) finished: {}", pid, exit);
                let _ = exit_tx.send(Some(exit));
            }
        });

        let handle = ServerProcess {
            pid,
            command_tx,
            kill_notify,
            exit_rx,
        };
        Ok((handle, ProcessOutput { stdout, stderr }))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Queues one console line and waits until it has been written.
    pub async fn send(&self, line: &str) -> io::Result<()> {
        let (reply, done) = oneshot::channel();
        let request = CommandRequest {
            line: line.to_owned(),
            reply,
        };
        if self.command_tx.send(request).is_err() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "console closed"));
        }
        done.await
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "console closed")))
    }

    pub fn kill(&self) {
        self.kill_notify.notify_one();
    }

    pub async fn wait(&self) -> ProcessExit {
        let mut exit_rx = self.exit_rx.clone();
        let exit = match exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit)
                .clone()
                .unwrap_or_else(|| ProcessExit::Lost("no exit status".to_owned())),
            Err(_) => ProcessExit::Lost("exit monitor dropped".to_owned()),
        };
        exit
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("{} not captured", name))
}

async fn write_commands(
    mut stdin: ChildStdin,
    mut command_rx: mpsc::UnboundedReceiver<CommandRequest>,
) {
    while let Some(request) = command_rx.recv().await {
        let result: io::Result<()> = async {
            stdin.write_all(request.line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        let _ = request.reply.send(result);
    }
}
