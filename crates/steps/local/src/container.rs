//!
//! # Local Container
//!
//! [`Container`] backed by host processes and a host directory. Process
//! output is read line by line and forwarded to the sinks supplied by the
//! caller; container paths resolve under the root directory. Files cross
//! the container boundary as tar archives.
//!

use crate::error::{LocalError, LocalResult};
use crate::paths::resolve_under;
use async_trait::async_trait;
use hodei_steps_core::{
    BoxError, ByteStream, Container, ContainerInfo, Process, ProcessIo, ProcessSpec,
    ResourceLimits, Signal, StreamInSpec, StreamOutSpec,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

type ExitState = Option<Result<i32, String>>;

/// How long output from surviving descendants is still forwarded once the
/// process itself has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
type OutputSink = Option<Box<dyn Write + Send>>;

/// Runs processes directly on the host, rooted at a directory.
pub struct LocalContainer {
    handle: String,
    root: PathBuf,
    events: Mutex<Vec<String>>,
    properties: BTreeMap<String, String>,
}

impl LocalContainer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            handle: uuid::Uuid::new_v4().to_string(),
            root: root.into(),
            events: Mutex::new(Vec::new()),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = handle.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record a lifecycle event reported by [`Container::info`].
    pub fn record_event(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    fn command(&self, spec: &ProcessSpec) -> LocalResult<Command> {
        let dir = match &spec.dir {
            Some(dir) => resolve_under(&self.root, dir)?,
            None => self.root.clone(),
        };

        let mut command = Command::new(&spec.path);
        command
            .args(&spec.args)
            .current_dir(dir)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        command.envs(spec.env.iter().cloned());

        if let Some(user) = &spec.user {
            debug!(user = %user, "user switching unsupported, running as current user");
        }

        // Own process group, so signals reach the whole tree.
        #[cfg(unix)]
        command.process_group(0);

        #[cfg(unix)]
        if spec.limits != ResourceLimits::default() {
            let limits = spec.limits.clone();
            // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
            unsafe {
                command.pre_exec(move || apply_limits(&limits));
            }
        }

        Ok(command)
    }
}

#[cfg(unix)]
fn apply_limits(limits: &ResourceLimits) -> io::Result<()> {
    fn rlimit(value: u64) -> libc::rlimit {
        libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        }
    }

    fn check(rc: libc::c_int) -> io::Result<()> {
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    if let Some(nofile) = limits.nofile {
        check(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlimit(nofile)) })?;
    }
    if let Some(nproc) = limits.nproc {
        check(unsafe { libc::setrlimit(libc::RLIMIT_NPROC, &rlimit(nproc)) })?;
    }
    Ok(())
}

#[async_trait]
impl Container for LocalContainer {
    fn handle(&self) -> String {
        self.handle.clone()
    }

    async fn run(&self, spec: ProcessSpec, io: ProcessIo) -> Result<Arc<dyn Process>, BoxError> {
        let mut command = self.command(&spec)?;
        let child = command.spawn().map_err(|source| LocalError::Spawn {
            path: spec.path.clone(),
            source,
        })?;

        let id = uuid::Uuid::new_v4().to_string();
        let pid = child.id();
        info!(
            container = %self.handle,
            process = %id,
            pid = ?pid,
            path = %spec.path,
            "process spawned"
        );

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(id.clone(), child, io, exit_tx));

        Ok(Arc::new(LocalProcess {
            id,
            pid,
            exit: exit_rx,
        }))
    }

    async fn stream_in(&self, spec: StreamInSpec) -> Result<(), BoxError> {
        let destination = resolve_under(&self.root, &spec.path)?;
        let archive = spool(spec.stream).await?;

        let target = destination.clone();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            std::fs::create_dir_all(&target)?;
            tar::Archive::new(archive).unpack(&target)
        })
        .await??;

        debug!(
            container = %self.handle,
            destination = %destination.display(),
            "streamed in"
        );
        Ok(())
    }

    async fn stream_out(&self, spec: StreamOutSpec) -> Result<ByteStream, BoxError> {
        let source = resolve_under(&self.root, &spec.path)?;
        debug!(container = %self.handle, source = %source.display(), "streaming out");

        let archive = tokio::task::spawn_blocking(move || pack(&source)).await??;
        Ok(Box::new(tokio::fs::File::from_std(archive)))
    }

    async fn info(&self) -> Result<ContainerInfo, BoxError> {
        Ok(ContainerInfo {
            events: self.events.lock().clone(),
            properties: self.properties.clone(),
        })
    }
}

/// Copy `stream` into an anonymous temp file, rewound for reading.
async fn spool(mut stream: ByteStream) -> io::Result<std::fs::File> {
    let mut file = tokio::fs::File::from_std(tempfile::tempfile()?);
    tokio::io::copy(&mut stream, &mut file).await?;
    file.flush().await?;
    file.rewind().await?;
    Ok(file.into_std().await)
}

/// Tar `source` into a rewound temp file. The archive's top entry is named
/// after `source`; directories are added recursively.
fn pack(source: &Path) -> io::Result<std::fs::File> {
    let name = source
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "nothing to stream out"))?;

    let mut builder = tar::Builder::new(tempfile::tempfile()?);
    if source.is_dir() {
        builder.append_dir_all(name, source)?;
    } else {
        builder.append_path_with_name(source, name)?;
    }
    let mut archive = builder.into_inner()?;
    archive.rewind()?;
    Ok(archive)
}

/// Forward output while reaping the child. Descendants holding the pipes
/// open get [`OUTPUT_DRAIN_TIMEOUT`] before their output is abandoned.
async fn supervise(
    id: String,
    mut child: Child,
    io: ProcessIo,
    exit: watch::Sender<ExitState>,
) {
    let stdout = child.stdout.take().map(|s| FramedRead::new(s, LinesCodec::new()));
    let stderr = child.stderr.take().map(|s| FramedRead::new(s, LinesCodec::new()));
    let pump = pump_output(stdout, stderr, io);
    tokio::pin!(pump);

    let status = tokio::select! {
        () = &mut pump => child.wait().await,
        status = child.wait() => {
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut pump).await.is_err() {
                warn!(process = %id, "output still open after exit, detaching");
            }
            status
        }
    };
    let status = status.map(exit_code).map_err(|err| err.to_string());
    debug!(process = %id, status = ?status, "process reaped");
    exit.send_replace(Some(status));
}

async fn pump_output<O, E>(
    mut stdout: Option<FramedRead<O, LinesCodec>>,
    mut stderr: Option<FramedRead<E, LinesCodec>>,
    io: ProcessIo,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let ProcessIo {
        stdout: mut stdout_sink,
        stderr: mut stderr_sink,
    } = io;

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => {
                if let Some(line) = line {
                    write_line(&mut stdout_sink, &line);
                }
            }
            line = next_line(&mut stderr), if stderr.is_some() => {
                if let Some(line) = line {
                    write_line(&mut stderr_sink, &line);
                }
            }
        }
    }
}

/// Next line from `lines`; drops the reader once it ends or fails.
async fn next_line<R>(lines: &mut Option<FramedRead<R, LinesCodec>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let reader = lines.as_mut()?;
    match reader.next().await {
        Some(Ok(line)) => Some(line),
        Some(Err(err)) => {
            warn!(error = %err, "error reading process output");
            *lines = None;
            None
        }
        None => {
            *lines = None;
            None
        }
    }
}

fn write_line(sink: &mut OutputSink, line: &str) {
    if let Some(sink) = sink {
        if let Err(err) = writeln!(sink, "{}", line) {
            debug!(error = %err, "dropping process output");
        }
    }
}

/// Exit code, or 128 + signal number for processes killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// A host process started by [`LocalContainer`].
pub struct LocalProcess {
    id: String,
    pid: Option<u32>,
    exit: watch::Receiver<ExitState>,
}

impl LocalProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[async_trait]
impl Process for LocalProcess {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn wait(&self) -> Result<i32, BoxError> {
        let mut exit = self.exit.clone();
        let state = exit
            .wait_for(Option::is_some)
            .await
            .map(|state| state.clone())
            .map_err(|_| BoxError::from("process supervisor stopped"))?;
        match state {
            Some(Ok(code)) => Ok(code),
            Some(Err(message)) => Err(message.into()),
            None => Err("process never exited".into()),
        }
    }

    async fn signal(&self, signal: Signal) -> Result<(), BoxError> {
        // A reaped pid may already belong to another process.
        if self.exit.borrow().is_some() {
            debug!(process = %self.id, ?signal, "process already exited, not signalling");
            return Ok(());
        }
        let pid = self.pid.ok_or_else(|| LocalError::NoPid(self.id.clone()))?;
        send_signal(pid, signal)?;
        Ok(())
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> LocalResult<()> {
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // The child leads its own group; a negative pid signals every member.
    // SAFETY: kill(2) has no memory safety requirements.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signo) };
    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) -> LocalResult<()> {
    Err(LocalError::SignalsUnsupported)
}
