//!
//! # Run Step
//!
//! Spawns a process in the container and waits for it. Cancellation walks
//! an escalation ladder: terminate, then kill after [`TERMINATE_TIMEOUT`],
//! then give up with [`StepError::ExitTimeout`] after [`EXIT_TIMEOUT`].
//!

use crate::canceller::Canceller;
use crate::error::{EmittableError, StepError, StepResult};
use crate::port::clock::{Clock, Timer};
use crate::port::container::{Container, ProcessIo, ProcessSpec, Signal};
use crate::port::log_streamer::{LogStreamer, emit_stdout};
use crate::step::Step;
use async_trait::async_trait;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Grace period between the terminate and kill signals.
pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a killed process may take to report its exit.
pub const EXIT_TIMEOUT: Duration = Duration::from_secs(1);

const OUT_OF_MEMORY_EVENT: &str = "out of memory";

/// A host port mapped onto a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

#[derive(Serialize)]
struct InstancePort {
    external: u16,
    internal: u16,
}

/// Addressing information exported to the process as `CF_INSTANCE_*`
/// environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkEnvironment {
    pub external_ip: String,
    pub internal_ip: String,
    pub port_mappings: Vec<PortMapping>,
}

impl NetworkEnvironment {
    pub fn new(external_ip: impl Into<String>, internal_ip: impl Into<String>) -> Self {
        Self {
            external_ip: external_ip.into(),
            internal_ip: internal_ip.into(),
            port_mappings: Vec::new(),
        }
    }

    pub fn with_port_mapping(mut self, container_port: u16, host_port: u16) -> Self {
        self.port_mappings.push(PortMapping {
            container_port,
            host_port,
        });
        self
    }

    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("CF_INSTANCE_IP".to_string(), self.external_ip.clone()),
            ("CF_INSTANCE_INTERNAL_IP".to_string(), self.internal_ip.clone()),
        ];

        match self.port_mappings.first() {
            Some(first) => {
                vars.push(("CF_INSTANCE_PORT".to_string(), first.host_port.to_string()));
                vars.push((
                    "CF_INSTANCE_ADDR".to_string(),
                    format!("{}:{}", self.external_ip, first.host_port),
                ));

                let ports: Vec<InstancePort> = self
                    .port_mappings
                    .iter()
                    .map(|m| InstancePort {
                        external: m.host_port,
                        internal: m.container_port,
                    })
                    .collect();
                let ports = serde_json::to_string(&ports).unwrap_or_else(|err| {
                    error!(error = %err, "marshal networking env vars failed");
                    "[]".to_string()
                });
                vars.push(("CF_INSTANCE_PORTS".to_string(), ports));
            }
            None => {
                vars.push(("CF_INSTANCE_PORT".to_string(), String::new()));
                vars.push(("CF_INSTANCE_ADDR".to_string(), String::new()));
                vars.push(("CF_INSTANCE_PORTS".to_string(), "[]".to_string()));
            }
        }
        vars
    }
}

/// Runs a single process to completion inside a container.
pub struct RunStep {
    container: Arc<dyn Container>,
    spec: ProcessSpec,
    streamer: Arc<dyn LogStreamer>,
    clock: Arc<dyn Clock>,
    network: Option<NetworkEnvironment>,
    suppress_log_output: bool,
    suppress_exit_status_code: bool,
    canceller: Canceller,
}

impl RunStep {
    pub fn new(
        container: Arc<dyn Container>,
        spec: ProcessSpec,
        streamer: Arc<dyn LogStreamer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            container,
            spec,
            streamer,
            clock,
            network: None,
            suppress_log_output: false,
            suppress_exit_status_code: false,
            canceller: Canceller::new(),
        }
    }

    /// Export `CF_INSTANCE_*` variables to the process.
    pub fn with_network(mut self, network: NetworkEnvironment) -> Self {
        self.network = Some(network);
        self
    }

    /// Discard process output and skip the exit status line.
    pub fn with_suppressed_log_output(mut self) -> Self {
        self.suppress_log_output = true;
        self
    }

    /// Omit the `Exit status N` line from the log stream.
    pub fn with_suppressed_exit_status(mut self) -> Self {
        self.suppress_exit_status_code = true;
        self
    }

    fn process_io(&self) -> ProcessIo {
        if self.suppress_log_output {
            ProcessIo {
                stdout: Some(Box::new(io::sink())),
                stderr: Some(Box::new(io::sink())),
            }
        } else {
            ProcessIo {
                stdout: Some(self.streamer.stdout()),
                stderr: Some(self.streamer.stderr()),
            }
        }
    }

    async fn handle_exit(&self, process_id: &str, status: i32) -> StepResult {
        let cancelled = self.canceller.is_cancelled();
        info!(process = %process_id, exit_status = status, cancelled, "process exit");

        let mut out_of_memory = false;
        if status != 0 {
            match self.container.info().await {
                Ok(info) => {
                    out_of_memory = info
                        .events
                        .iter()
                        .any(|event| event.to_lowercase().contains(OUT_OF_MEMORY_EVENT));
                }
                Err(err) => error!(process = %process_id, error = %err, "failed to get info"),
            }
        }
        let oom_suffix = if out_of_memory { " (out of memory)" } else { "" };

        if !self.suppress_log_output {
            if !self.suppress_exit_status_code {
                emit_stdout(
                    &*self.streamer,
                    &format!("Exit status {}{}\n", status, oom_suffix),
                );
            }
            self.streamer.flush();
        }

        if cancelled {
            return Err(StepError::Cancelled);
        }

        if status != 0 {
            let message = format!("Exited with status {}{}", status, oom_suffix);
            error!(
                process = %process_id,
                status_code = status,
                error = %message,
                "run step failed with nonzero status code"
            );
            return Err(EmittableError::message_only(message).into());
        }

        Ok(())
    }
}

/// Completes when the timer fires; never completes for an absent timer.
async fn expiry(timer: &mut Option<Box<dyn Timer>>) -> Instant {
    match timer {
        Some(timer) => timer.fired().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Step for RunStep {
    async fn perform(&self) -> StepResult {
        info!(path = %self.spec.path, "running");

        let mut spec = self.spec.clone();
        if let Some(network) = &self.network {
            spec.env.extend(network.env_vars());
        }

        if self.canceller.is_cancelled() {
            info!("cancelled before creating process");
            return Err(StepError::Cancelled);
        }

        debug!("creating process");
        let started = self.clock.now();
        let process = tokio::select! {
            _ = self.canceller.cancelled() => {
                info!("cancelled before process creation completed");
                return Err(StepError::Cancelled);
            }
            created = self.container.run(spec, self.process_io()) => match created {
                Ok(process) => process,
                Err(err) => {
                    error!(
                        error = %err,
                        duration = ?(self.clock.now() - started),
                        "failed creating process"
                    );
                    return Err(StepError::Other(err));
                }
            },
        };

        let process_id = process.id();
        debug!(
            process = %process_id,
            duration = ?(self.clock.now() - started),
            "successful process create"
        );

        let mut wait = process.wait();

        let mut terminating = false;
        let mut kill_timer: Option<Box<dyn Timer>> = None;
        let mut exit_timer: Option<Box<dyn Timer>> = None;

        loop {
            tokio::select! {
                exited = &mut wait => {
                    return match exited {
                        Ok(status) => self.handle_exit(&process_id, status).await,
                        Err(err) => {
                            error!(process = %process_id, error = %err, "running error");
                            Err(StepError::Other(err))
                        }
                    };
                }
                _ = self.canceller.cancelled(), if !terminating => {
                    debug!(process = %process_id, "signalling terminate");
                    if let Err(err) = process.signal(Signal::Terminate).await {
                        error!(process = %process_id, error = %err, "signalling terminate failed");
                    }
                    terminating = true;
                    kill_timer = Some(self.clock.new_timer(TERMINATE_TIMEOUT));
                }
                _ = expiry(&mut kill_timer) => {
                    debug!(process = %process_id, "signalling kill");
                    if let Err(err) = process.signal(Signal::Kill).await {
                        error!(process = %process_id, error = %err, "signalling kill failed");
                    }
                    kill_timer = None;
                    exit_timer = Some(self.clock.new_timer(EXIT_TIMEOUT));
                }
                _ = expiry(&mut exit_timer) => {
                    error!(process = %process_id, timeout = ?EXIT_TIMEOUT, "process did not exit");
                    return Err(StepError::ExitTimeout);
                }
            }
        }
    }

    fn cancel(&self) {
        self.canceller.cancel();
    }
}
