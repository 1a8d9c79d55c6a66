//! Supervised set of long-running processes sharing one shutdown token
//!
//! Every listener, the pipeline consumer and each periodic task is a named
//! process. The first process to fail cancels the rest; so do SIGINT and
//! SIGTERM. After cancellation the remaining processes get `drain_timeout` to
//! finish (the pipeline uses it to empty the queue and settle store writes)
//! before they are aborted. [`Runner::run`] returns the first failure so the
//! binary can exit non-zero and let its supervisor restart it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type ProcessFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A process body, started with the shared token
pub type Process = Box<dyn FnOnce(CancellationToken) -> ProcessFuture + Send>;

/// Runs processes until one fails, a signal arrives or all are done
pub struct Runner {
    processes: Vec<(String, Process)>,
    drain_timeout: Duration,
    token: CancellationToken,
    signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Empty runner; 30 s drain, signal handling on
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            drain_timeout: Duration::from_secs(30),
            token: CancellationToken::new(),
            signals: true,
        }
    }

    /// Add a named process
    pub fn with_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// How long processes may run on after cancellation
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Share an externally owned token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Turn SIGINT/SIGTERM handling on or off
    pub fn with_signals(mut self, enabled: bool) -> Self {
        self.signals = enabled;
        self
    }

    /// Number of registered processes
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Run everything; `Err` is the first process failure
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                let result = process(process_token).await;
                (name, result)
            });
        }

        if self.signals {
            spawn_signal_handlers(&token);
        }

        let mut first_error: Option<anyhow::Error> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => log::debug!("process {name} finished"),
                Ok((name, Err(err))) => {
                    log::error!("process {name} failed: {err:#}");
                    if first_error.is_none() {
                        first_error = Some(err.context(format!("process {name} failed")));
                    }
                    token.cancel();
                }
                Err(err) => {
                    log::error!("process panicked: {err}");
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("process panicked: {err}"));
                    }
                    token.cancel();
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        if !join_set.is_empty() {
            log::info!(
                "draining {} processes (timeout {:?})",
                join_set.len(),
                self.drain_timeout
            );
            let drain = async {
                while let Some(joined) = join_set.join_next().await {
                    match joined {
                        Ok((name, Ok(()))) => log::debug!("process {name} stopped"),
                        Ok((name, Err(err))) => log::warn!("process {name} failed during shutdown: {err:#}"),
                        Err(err) => log::warn!("process panicked during shutdown: {err}"),
                    }
                }
            };
            if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
                log::error!("processes still running after {:?}; aborting", self.drain_timeout);
                join_set.shutdown().await;
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                log::info!("all processes stopped");
                Ok(())
            }
        }
    }
}

fn spawn_signal_handlers(token: &CancellationToken) {
    let interrupt = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("received interrupt, shutting down");
                interrupt.cancel();
            }
            Err(err) => log::error!("cannot listen for interrupt: {err}"),
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = token.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    log::info!("received SIGTERM, shutting down");
                    terminate.cancel();
                }
                Err(err) => log::error!("cannot listen for SIGTERM: {err}"),
            }
        });
    }
}
