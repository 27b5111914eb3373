// src/server/process.rs
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::server::files;
use crate::store::ServerRecord;
use async_process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use futures_lite::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use futures_lite::AsyncRead;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

/// How long the exit waiter lets the output pumps drain after the process
/// has exited. Grandchildren holding the pipes open must not stall exit
/// handling.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a stdin flush may take before it is reported as back-pressure.
const FLUSH_GRACE: Duration = Duration::from_millis(250);

/// Program, arguments and working directory for one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl LaunchSpec {
    /// `<java> <jvm-args> -jar <server-jar> --assets <assets> --bind 0.0.0.0:<port>`
    pub fn for_server(runtime: &RuntimeConfig, record: &ServerRecord) -> Self {
        let mut args = runtime.jvm_args.clone();
        args.push("-jar".to_string());
        args.push(files::server_jar(&record.server_path).display().to_string());
        args.push("--assets".to_string());
        args.push(files::assets_archive(&record.server_path).display().to_string());
        args.push("--bind".to_string());
        args.push(format!("0.0.0.0:{}", record.port));

        Self {
            program: runtime.java_path.clone(),
            args,
            cwd: record.server_path.clone(),
        }
    }
}

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Signals the supervisor can deliver to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// SIGTERM on Unix; a hard kill elsewhere
    Terminate,
    /// SIGKILL / TerminateProcess
    Kill,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when killed by a signal or when waiting failed
    pub code: Option<i32>,
    pub success: bool,
}

/// Cloneable control surface of a spawned process.
///
/// The exit waiter task owns the `Child`; the handle talks to it through a
/// signal channel and observes its exit through a watch channel.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: u32,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    control: mpsc::UnboundedSender<ProcessSignal>,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Write raw bytes to the process's stdin.
    ///
    /// Fails with [`Error::StreamUnavailable`] once stdin is closed; a flush
    /// that does not complete promptly is only logged.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(Error::StreamUnavailable)?;

        if let Err(e) = stdin.write_all(bytes).await {
            tracing::debug!(pid = self.pid, error = %e, "stdin write failed, closing stream");
            *guard = None;
            return Err(Error::StreamUnavailable);
        }

        match tokio::time::timeout(FLUSH_GRACE, stdin.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::debug!(pid = self.pid, error = %e, "stdin flush failed, closing stream");
                *guard = None;
                Err(Error::StreamUnavailable)
            }
            Err(_) => {
                tracing::debug!(pid = self.pid, "stdin not flushed immediately, data is buffered");
                Ok(())
            }
        }
    }

    /// Write `line` followed by a newline.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write(&bytes).await
    }

    /// Ask the exit waiter to deliver a signal. Ignored once the process has
    /// been reaped.
    pub fn signal(&self, signal: ProcessSignal) {
        if self.control.send(signal).is_err() {
            tracing::debug!(pid = self.pid, ?signal, "Process already reaped, signal dropped");
        }
    }

    /// Exit information, if the process has exited and its exit handler ran.
    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    /// Wait until the process has exited and its exit handler has completed.
    pub async fn wait_exit(&self) -> Option<ProcessExit> {
        let mut exit = self.exit.clone();
        match exit.wait_for(|e| e.is_some()).await {
            Ok(status) => *status,
            Err(_) => None,
        }
    }
}

/// A freshly spawned process whose output and exit have not been wired yet.
///
/// Typical use: [`spawn`](Self::spawn), register the handle wherever it is
/// needed, then [`on_output`](Self::on_output) and finally
/// [`on_exit`](Self::on_exit), which hands the child to its waiter task.
pub struct ServerProcess {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    control_rx: mpsc::UnboundedReceiver<ProcessSignal>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    pumps: Vec<JoinHandle<()>>,
    handle: ProcessHandle,
}

impl ServerProcess {
    /// Spawn the process with all three stdio streams piped.
    pub fn spawn(spec: &LaunchSpec) -> Result<Self> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| Error::SpawnFailure(format!("{}: {}", spec.program, e)))?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (control, control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit) = watch::channel(None);

        Ok(Self {
            child,
            stdout,
            stderr,
            control_rx,
            exit_tx,
            pumps: Vec::new(),
            handle: ProcessHandle {
                pid,
                stdin: Arc::new(Mutex::new(stdin)),
                control,
                exit,
            },
        })
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    /// Start pumping stdout and stderr line by line into `handler`.
    ///
    /// Lines from one stream are handled in order; the handler is awaited
    /// before the next line of that stream is read.
    pub fn on_output<F, Fut>(&mut self, handler: F)
    where
        F: Fn(OutputStream, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let pid = self.handle.pid;

        if let Some(stdout) = self.stdout.take() {
            self.pumps.push(spawn_pump(stdout, pid, OutputStream::Stdout, Arc::clone(&handler)));
        }
        if let Some(stderr) = self.stderr.take() {
            self.pumps.push(spawn_pump(stderr, pid, OutputStream::Stderr, handler));
        }
    }

    /// Hand the child to a waiter task that delivers signals, reaps it,
    /// drains the pumps and then runs `handler`. Watchers of
    /// [`ProcessHandle::wait_exit`] are released only after `handler` has
    /// completed.
    pub fn on_exit<F, Fut>(self, handler: F) -> ProcessHandle
    where
        F: FnOnce(ProcessExit) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Self {
            mut child,
            control_rx: mut control,
            exit_tx,
            pumps,
            handle,
            ..
        } = self;
        let pid = handle.pid;

        tokio::spawn(async move {
            let status = loop {
                tokio::select! {
                    status = child.status() => break status,
                    Some(signal) = control.recv() => deliver_signal(&mut child, pid, signal),
                }
            };

            let exit = match status {
                Ok(status) => ProcessExit {
                    code: status.code(),
                    success: status.success(),
                },
                Err(e) => {
                    tracing::error!(pid, error = %e, "Failed to wait for process");
                    ProcessExit {
                        code: None,
                        success: false,
                    }
                }
            };
            tracing::debug!(pid, ?exit, "Process exited");

            for pump in pumps {
                if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await.is_err() {
                    tracing::debug!(pid, "Output pump still open after exit, detaching");
                }
            }

            handler(exit).await;
            let _ = exit_tx.send(Some(exit));
        });

        handle
    }

    /// Kill a process that will never be handed to [`on_exit`](Self::on_exit).
    pub async fn abandon(mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!(pid = self.handle.pid, error = %e, "Failed to kill abandoned process");
        }
        let _ = self.child.status().await;
    }
}

fn deliver_signal(child: &mut Child, pid: u32, signal: ProcessSignal) {
    let result = match signal {
        #[cfg(unix)]
        ProcessSignal::Terminate => {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::other)
        }
        #[cfg(not(unix))]
        ProcessSignal::Terminate => child.kill(),
        ProcessSignal::Kill => child.kill(),
    };

    match result {
        Ok(()) => tracing::debug!(pid, ?signal, "Signal delivered"),
        Err(e) => tracing::warn!(pid, ?signal, error = %e, "Failed to deliver signal"),
    }
}

/// Longest line handed to an output handler. Longer output arrives in
/// pieces of at most this size.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Like `read_until(b'\n')`, but stops after `limit` bytes so a process that
/// never writes a newline cannot grow the buffer without bound.
async fn read_capped_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut read = 0;
    loop {
        let (done, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(read);
            }
            let room = limit.saturating_sub(buf.len()).max(1);
            let window = &available[..available.len().min(room)];
            match window.iter().position(|b| *b == b'\n') {
                Some(i) => {
                    buf.extend_from_slice(&window[..=i]);
                    (true, i + 1)
                }
                None => {
                    buf.extend_from_slice(window);
                    (buf.len() >= limit, window.len())
                }
            }
        };
        reader.consume(used);
        read += used;
        if done {
            return Ok(read);
        }
    }
}

fn spawn_pump<R, F, Fut>(
    stream: R,
    pid: u32,
    kind: OutputStream,
    handler: Arc<F>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: Fn(OutputStream, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            buf.clear();
            match read_capped_line(&mut reader, &mut buf, MAX_LINE_BYTES).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }
                    // Non-UTF-8 output must not end the pump.
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    tracing::trace!(pid, stream = %kind, "{}", line);
                    handler(kind, line).await;
                }
                Err(e) => {
                    tracing::debug!(pid, stream = %kind, error = %e, "Output pump exiting on read error");
                    break;
                }
            }
        }

        tracing::debug!(pid, stream = %kind, "Output pump finished");
    })
}
