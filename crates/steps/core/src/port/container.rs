//!
//! # Container Port
//!
//! Abstract isolated execution environment the steps drive. Implementations
//! live outside this crate (see `hodei-steps-local` for a host-process
//! adapter and `hodei-steps-testing` for fakes).
//!

use crate::error::BoxError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Readable byte stream handed across the port boundary.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Signals a running process can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Terminate,
    Kill,
}

/// Optional resource limits for a spawned process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub nofile: Option<u64>,
    pub nproc: Option<u64>,
}

/// Description of a process to launch inside the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub path: String,
    pub args: Vec<String>,
    pub dir: Option<String>,
    pub env: Vec<(String, String)>,
    pub user: Option<String>,
    pub limits: ResourceLimits,
}

impl ProcessSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Value of an environment variable, last assignment wins.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Output sinks wired to a spawned process.
#[derive(Default)]
pub struct ProcessIo {
    pub stdout: Option<Box<dyn Write + Send>>,
    pub stderr: Option<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for ProcessIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessIo")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Unpack a tar stream into the container directory `path`.
pub struct StreamInSpec {
    pub path: String,
    pub user: Option<String>,
    pub stream: ByteStream,
}

/// Tar up the file or directory at `path`. The archive's top entry is
/// named after the last path component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutSpec {
    pub path: String,
    pub user: Option<String>,
}

/// Snapshot of container metadata relevant to step outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Lifecycle events, e.g. `"out of memory"`.
    pub events: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

/// A process spawned inside a container.
#[async_trait]
pub trait Process: Send + Sync {
    fn id(&self) -> String;

    /// Block until exit and return the exit status.
    async fn wait(&self) -> Result<i32, BoxError>;

    async fn signal(&self, signal: Signal) -> Result<(), BoxError>;
}

/// An isolated execution environment.
#[async_trait]
pub trait Container: Send + Sync {
    fn handle(&self) -> String;

    async fn run(&self, spec: ProcessSpec, io: ProcessIo) -> Result<Arc<dyn Process>, BoxError>;

    async fn stream_in(&self, spec: StreamInSpec) -> Result<(), BoxError>;

    async fn stream_out(&self, spec: StreamOutSpec) -> Result<ByteStream, BoxError>;

    async fn info(&self) -> Result<ContainerInfo, BoxError>;
}
