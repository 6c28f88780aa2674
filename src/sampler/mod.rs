// Out-of-process sampler attached to one kernel: spawn, feed the pid, decode its readings

pub mod framing;

pub use framing::{FRAME_SEPARATOR, FrameDecoder, SamplerFrame};

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use crate::host_info::{HostInfoSource, HostSnapshot};
use crate::kernel::KernelProcessInfo;
use crate::models::{CpuReading, MemoryReading, Sample, align_to_second, now_ms};

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

const READ_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("failed to spawn sampler {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sampler {0} pipe unavailable")]
    MissingPipe(&'static str),
}

/// Most recent kernel reading of one sampler, kept for gap-fill.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KernelReading {
    pub cpu_fraction: f64,
    pub memory_bytes: u64,
}

pub type SharedReading = Arc<Mutex<KernelReading>>;

/// Control handle of a running sampler. Detaching (or dropping) kills the process.
#[derive(Debug)]
pub struct SamplerHandle {
    kernel_pid: u32,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl SamplerHandle {
    /// Wraps a kill switch; the side holding the receiver must stop the sampler when it fires
    /// or when the sender is dropped.
    pub fn new(kernel_pid: u32, kill_tx: oneshot::Sender<()>) -> Self {
        Self {
            kernel_pid,
            kill_tx: Some(kill_tx),
        }
    }

    pub fn kernel_pid(&self) -> u32 {
        self.kernel_pid
    }

    pub fn is_attached(&self) -> bool {
        self.kill_tx.is_some()
    }

    /// Kills the sampler. Safe to call repeatedly.
    pub fn detach(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
            tracing::debug!(kernel_pid = self.kernel_pid, "sampler detached");
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

pub trait SamplerLauncher: Send + Sync {
    /// Starts a sampler for the kernel described by `process`. Readings are stored in `reading`
    /// and emitted as samples for `subject`.
    fn attach(
        &self,
        subject: &str,
        process: &KernelProcessInfo,
        reading: SharedReading,
    ) -> Result<SamplerHandle, AttachError>;
}

/// Runs the sampler script with the kernel's own interpreter and environment.
pub struct ProcessSamplerLauncher {
    script: PathBuf,
    host: Arc<dyn HostInfoSource>,
    samples: mpsc::UnboundedSender<Sample>,
}

impl ProcessSamplerLauncher {
    pub fn new(
        script: impl Into<PathBuf>,
        host: Arc<dyn HostInfoSource>,
        samples: mpsc::UnboundedSender<Sample>,
    ) -> Self {
        Self {
            script: script.into(),
            host,
            samples,
        }
    }
}

impl SamplerLauncher for ProcessSamplerLauncher {
    fn attach(
        &self,
        subject: &str,
        process: &KernelProcessInfo,
        reading: SharedReading,
    ) -> Result<SamplerHandle, AttachError> {
        let mut command = Command::new(&process.executable);
        command
            .arg(&self.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !process.env.is_empty() {
            command.env_clear().envs(&process.env);
        }
        let mut child = command.spawn().map_err(|source| AttachError::Spawn {
            program: process.executable.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(AttachError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(AttachError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(AttachError::MissingPipe("stderr"))?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let emitter = SampleEmitter {
            subject: subject.to_string(),
            host: self.host.clone(),
            samples: self.samples.clone(),
            reading,
        };
        tracing::info!(
            notebook = %subject,
            kernel_pid = process.pid,
            sampler_pid = child.id(),
            "sampler attached"
        );
        tokio::spawn(run_sampler(
            child,
            SamplerPipes {
                stdin,
                stdout,
                stderr,
            },
            process.pid,
            kill_rx,
            emitter,
        ));
        Ok(SamplerHandle::new(process.pid, kill_tx))
    }
}

struct SamplerPipes {
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

async fn run_sampler(
    mut child: Child,
    pipes: SamplerPipes,
    kernel_pid: u32,
    mut kill_rx: oneshot::Receiver<()>,
    emitter: SampleEmitter,
) {
    let SamplerPipes {
        mut stdin,
        mut stdout,
        stderr,
    } = pipes;
    if let Err(e) = send_pid(&mut stdin, kernel_pid).await {
        tracing::warn!(error = %e, notebook = %emitter.subject, "failed to send pid to sampler");
        drop(stdin);
        if let Err(e) = child.kill().await {
            tracing::debug!(error = %e, notebook = %emitter.subject, "sampler already exited");
        }
        return;
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stderr_open = true;

    loop {
        tokio::select! {
            _ = &mut kill_rx => break,
            read = stdout.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(notebook = %emitter.subject, "sampler output closed");
                    break;
                }
                Ok(n) => {
                    for frame in decoder.push(&buf[..n]) {
                        emitter.emit(frame);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, notebook = %emitter.subject, "sampler read failed");
                    break;
                }
            },
            line = stderr_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    tracing::warn!(notebook = %emitter.subject, "sampler error: {}", line);
                }
                Ok(None) => stderr_open = false,
                Err(e) => {
                    tracing::debug!(error = %e, notebook = %emitter.subject, "sampler stderr closed");
                    stderr_open = false;
                }
            },
        }
    }

    drop(stdin);
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, notebook = %emitter.subject, "sampler already exited");
    }
}

/// Writes the `{"pid": N}` request line the sampler waits for.
pub async fn send_pid<W>(stdin: &mut W, kernel_pid: u32) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let request = format!("{}{}", serde_json::json!({ "pid": kernel_pid }), LINE_ENDING);
    stdin.write_all(request.as_bytes()).await?;
    stdin.flush().await
}

struct SampleEmitter {
    subject: String,
    host: Arc<dyn HostInfoSource>,
    samples: mpsc::UnboundedSender<Sample>,
    reading: SharedReading,
}

impl SampleEmitter {
    fn emit(&self, frame: SamplerFrame) {
        let reading = KernelReading {
            cpu_fraction: frame.cpu_fraction(),
            memory_bytes: frame.memory_bytes(),
        };
        if let Ok(mut last) = self.reading.lock() {
            *last = reading;
        }
        let sample = build_sample(
            &self.subject,
            reading,
            &self.host.snapshot(),
            align_to_second(now_ms()),
        );
        if self.samples.send(sample).is_err() {
            tracing::debug!(notebook = %self.subject, "sample queue closed");
        }
    }
}

/// Combines a kernel reading with the host readings into one sample.
pub fn build_sample(
    subject: &str,
    reading: KernelReading,
    host: &HostSnapshot,
    timestamp: u64,
) -> Sample {
    Sample {
        notebook: subject.to_string(),
        timestamp,
        cpu: Some(CpuReading {
            kernel: reading.cpu_fraction,
            system: host.cpu_fraction(),
        }),
        memory: Some(MemoryReading {
            kernel: reading.memory_bytes,
            system: host.used_memory(),
            total: host.total_memory,
        }),
    }
}
