//! In-memory [`Container`] and [`Process`] fakes.

use crate::wait::FailingReader;
use async_trait::async_trait;
use hodei_steps_core::{
    BoxError, ByteStream, Container, ContainerInfo, Process, ProcessIo, ProcessSpec, Signal,
    StreamInSpec, StreamOutSpec,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::AsyncReadExt;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;

type ExitState = Option<Result<i32, String>>;

/// A process that exits when told to.
pub struct FakeProcess {
    id: String,
    exit: watch::Sender<ExitState>,
    signals: Mutex<Vec<(Signal, Instant)>>,
    exit_on_signal: Mutex<HashMap<Signal, i32>>,
    io: Mutex<ProcessIo>,
    wait_count: AtomicUsize,
}

impl FakeProcess {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            exit: watch::channel(None).0,
            signals: Mutex::new(Vec::new()),
            exit_on_signal: Mutex::new(HashMap::new()),
            io: Mutex::new(ProcessIo::default()),
            wait_count: AtomicUsize::new(0),
        })
    }

    /// Make `wait` return `status`.
    pub fn exit(&self, status: i32) {
        self.exit.send_replace(Some(Ok(status)));
    }

    /// Make `wait` fail with `message`.
    pub fn fail_wait(&self, message: &str) {
        self.exit.send_replace(Some(Err(message.to_string())));
    }

    /// Exit with `status` as soon as `signal` is received.
    pub fn exit_on(&self, signal: Signal, status: i32) {
        self.exit_on_signal.lock().insert(signal, status);
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().iter().map(|(s, _)| *s).collect()
    }

    /// Signals with the (tokio) time they were received.
    pub fn signal_times(&self) -> Vec<(Signal, Instant)> {
        self.signals.lock().clone()
    }

    pub fn wait_count(&self) -> usize {
        self.wait_count.load(Ordering::SeqCst)
    }

    /// Write to the stdout sink the process was spawned with.
    pub fn write_stdout(&self, text: &str) {
        if let Some(out) = self.io.lock().stdout.as_mut() {
            let _ = out.write_all(text.as_bytes());
        }
    }

    /// Write to the stderr sink the process was spawned with.
    pub fn write_stderr(&self, text: &str) {
        if let Some(err) = self.io.lock().stderr.as_mut() {
            let _ = err.write_all(text.as_bytes());
        }
    }

    fn attach_io(&self, io: ProcessIo) {
        *self.io.lock() = io;
    }
}

#[async_trait]
impl Process for FakeProcess {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn wait(&self) -> Result<i32, BoxError> {
        self.wait_count.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.exit.subscribe();
        let state = rx
            .wait_for(|state| state.is_some())
            .await
            .map(|state| state.clone())
            .map_err(|_| BoxError::from("process handle dropped"))?;
        match state {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(message.into()),
            None => Err("process never exited".into()),
        }
    }

    async fn signal(&self, signal: Signal) -> Result<(), BoxError> {
        self.signals.lock().push((signal, Instant::now()));
        let exit_status = self.exit_on_signal.lock().get(&signal).copied();
        if let Some(status) = exit_status {
            self.exit(status);
        }
        Ok(())
    }
}

/// Content streamed into a [`FakeContainer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedIn {
    pub path: String,
    pub user: Option<String>,
    pub content: Vec<u8>,
}

/// A container that records what the steps asked of it.
#[derive(Default)]
pub struct FakeContainer {
    processes: Mutex<VecDeque<Arc<FakeProcess>>>,
    spawned: Mutex<Vec<(ProcessSpec, Arc<FakeProcess>)>>,
    spawned_signal: Notify,
    run_error: Mutex<Option<String>>,
    run_hangs: AtomicBool,
    events: Mutex<Vec<String>>,
    info_error: Mutex<Option<String>>,
    info_count: AtomicUsize,
    streamed_in: Mutex<Vec<StreamedIn>>,
    stream_in_error: Mutex<Option<String>>,
    stream_in_hangs: AtomicBool,
    stream_in_started: Notify,
    stream_out_content: Mutex<Vec<u8>>,
    stream_out_error: Mutex<Option<String>>,
    stream_out_read_error: Mutex<Option<String>>,
    stream_out_specs: Mutex<Vec<StreamOutSpec>>,
}

impl FakeContainer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hand out `process` on the next `run`.
    pub fn push_process(&self, process: Arc<FakeProcess>) {
        self.processes.lock().push_back(process);
    }

    pub fn fail_run(&self, message: &str) {
        *self.run_error.lock() = Some(message.to_string());
    }

    /// `run` never completes.
    pub fn hang_on_run(&self) {
        self.run_hangs.store(true, Ordering::SeqCst);
    }

    pub fn set_events<I, S>(&self, events: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.events.lock() = events.into_iter().map(Into::into).collect();
    }

    pub fn fail_info(&self, message: &str) {
        *self.info_error.lock() = Some(message.to_string());
    }

    pub fn fail_stream_in(&self, message: impl Into<String>) {
        *self.stream_in_error.lock() = Some(message.into());
    }

    /// `stream_in` never completes.
    pub fn hang_on_stream_in(&self) {
        self.stream_in_hangs.store(true, Ordering::SeqCst);
    }

    pub fn set_stream_out(&self, content: impl Into<Vec<u8>>) {
        *self.stream_out_content.lock() = content.into();
    }

    pub fn fail_stream_out(&self, message: &str) {
        *self.stream_out_error.lock() = Some(message.to_string());
    }

    /// `stream_out` succeeds but reading the stream fails.
    pub fn fail_stream_out_read(&self, message: &str) {
        *self.stream_out_read_error.lock() = Some(message.to_string());
    }

    pub fn spawned_specs(&self) -> Vec<ProcessSpec> {
        self.spawned.lock().iter().map(|(spec, _)| spec.clone()).collect()
    }

    pub fn run_count(&self) -> usize {
        self.spawned.lock().len()
    }

    pub fn info_count(&self) -> usize {
        self.info_count.load(Ordering::SeqCst)
    }

    pub fn streamed_in(&self) -> Vec<StreamedIn> {
        self.streamed_in.lock().clone()
    }

    pub fn stream_out_specs(&self) -> Vec<StreamOutSpec> {
        self.stream_out_specs.lock().clone()
    }

    /// Wait until a process has been spawned and return the latest one.
    pub async fn wait_for_process(&self) -> Arc<FakeProcess> {
        loop {
            let notified = self.spawned_signal.notified();
            if let Some((_, process)) = self.spawned.lock().last() {
                return process.clone();
            }
            notified.await;
        }
    }

    /// Wait until `stream_in` has been entered.
    pub async fn wait_for_stream_in(&self) {
        self.stream_in_started.notified().await;
    }
}

#[async_trait]
impl Container for FakeContainer {
    fn handle(&self) -> String {
        "fake-container".to_string()
    }

    async fn run(&self, spec: ProcessSpec, io: ProcessIo) -> Result<Arc<dyn Process>, BoxError> {
        if self.run_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let run_error = self.run_error.lock().clone();
        if let Some(message) = run_error {
            return Err(message.into());
        }

        let process = self
            .processes
            .lock()
            .pop_front()
            .unwrap_or_else(FakeProcess::new);
        process.attach_io(io);
        self.spawned.lock().push((spec, process.clone()));
        self.spawned_signal.notify_waiters();
        Ok(process)
    }

    async fn stream_in(&self, mut spec: StreamInSpec) -> Result<(), BoxError> {
        self.stream_in_started.notify_one();
        if self.stream_in_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let stream_in_error = self.stream_in_error.lock().clone();
        if let Some(message) = stream_in_error {
            return Err(message.into());
        }

        let mut content = Vec::new();
        spec.stream.read_to_end(&mut content).await?;
        self.streamed_in.lock().push(StreamedIn {
            path: spec.path,
            user: spec.user,
            content,
        });
        Ok(())
    }

    async fn stream_out(&self, spec: StreamOutSpec) -> Result<ByteStream, BoxError> {
        self.stream_out_specs.lock().push(spec);
        let stream_out_error = self.stream_out_error.lock().clone();
        if let Some(message) = stream_out_error {
            return Err(message.into());
        }
        let read_error = self.stream_out_read_error.lock().clone();
        if let Some(message) = read_error {
            return Ok(Box::new(FailingReader::new(message)));
        }
        Ok(Box::new(Cursor::new(self.stream_out_content.lock().clone())))
    }

    async fn info(&self) -> Result<ContainerInfo, BoxError> {
        self.info_count.fetch_add(1, Ordering::SeqCst);
        let info_error = self.info_error.lock().clone();
        if let Some(message) = info_error {
            return Err(message.into());
        }
        Ok(ContainerInfo {
            events: self.events.lock().clone(),
            ..Default::default()
        })
    }
}
