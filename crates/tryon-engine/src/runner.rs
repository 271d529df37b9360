use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tryon_contracts::tryon::{ErrorKind, GenerationError, Slot};

use crate::client::GenerationClient;
use crate::orchestrator::{Dispatch, Orchestrator, RequestToken, Resolution};

struct Completion {
    slot: Slot,
    token: RequestToken,
    outcome: Result<String, GenerationError>,
}

/// Outcome of [`SessionRunner::wait_idle`]. Requests still in flight at the
/// deadline stay pending and can be collected by a later wait or pump.
#[derive(Debug, Default)]
pub struct WaitReport {
    pub resolutions: Vec<Resolution>,
    pub still_in_flight: usize,
}

impl WaitReport {
    pub fn timed_out(&self) -> bool {
        self.still_in_flight > 0
    }
}

/// Executes orchestrator dispatches on worker threads and feeds their outcomes
/// back on the caller's thread. Slot state is only ever touched here, never by
/// workers.
pub struct SessionRunner {
    orchestrator: Orchestrator,
    client: Arc<dyn GenerationClient>,
    tx: mpsc::Sender<Completion>,
    rx: mpsc::Receiver<Completion>,
    in_flight: usize,
}

impl SessionRunner {
    pub fn new(orchestrator: Orchestrator, client: Arc<dyn GenerationClient>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            orchestrator,
            client,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.orchestrator
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn submit(&mut self, dispatch: Dispatch) -> Result<()> {
        let client = Arc::clone(&self.client);
        let tx = self.tx.clone();
        let Dispatch {
            slot,
            token,
            request,
        } = dispatch;
        let spawned = thread::Builder::new()
            .name(format!("tryon-{}-{token}", slot.as_str()))
            .spawn(move || {
                let outcome = client.generate(&request);
                let _ = tx.send(Completion {
                    slot,
                    token,
                    outcome,
                });
            });
        match spawned {
            Ok(_) => {
                self.in_flight += 1;
                Ok(())
            }
            Err(err) => {
                self.orchestrator.resolve(
                    token,
                    Err(GenerationError::new(
                        ErrorKind::RemoteUnavailable,
                        format!("worker spawn failed: {err}"),
                    )),
                );
                Err(err).context("failed to spawn generation worker")
            }
        }
    }

    /// Accepts anything that yields dispatches, including the `Option` most
    /// orchestrator operations return.
    pub fn submit_all(&mut self, dispatches: impl IntoIterator<Item = Dispatch>) -> Result<()> {
        for dispatch in dispatches {
            self.submit(dispatch)?;
        }
        Ok(())
    }

    /// Applies every outcome that has already arrived without blocking.
    pub fn pump(&mut self) -> Result<Vec<Resolution>> {
        let mut resolutions = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            resolutions.push(self.apply(completion)?);
        }
        Ok(resolutions)
    }

    /// Blocks until every submitted request, retries included, has resolved or
    /// `timeout` passes.
    pub fn wait_idle(&mut self, timeout: Duration) -> Result<WaitReport> {
        let deadline = Instant::now() + timeout;
        let mut report = WaitReport::default();
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    in_flight = self.in_flight,
                    "wait ended after {:.1}s with requests still pending",
                    timeout.as_secs_f64()
                );
                break;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(completion) => report.resolutions.push(self.apply(completion)?),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        report.still_in_flight = self.in_flight;
        Ok(report)
    }

    fn apply(&mut self, completion: Completion) -> Result<Resolution> {
        self.in_flight = self.in_flight.saturating_sub(1);
        tracing::debug!(
            slot = %completion.slot,
            token = completion.token,
            ok = completion.outcome.is_ok(),
            "generation returned"
        );
        let resolution = self
            .orchestrator
            .resolve(completion.token, completion.outcome);
        if let Resolution::Retried { dispatch, .. } = &resolution {
            self.submit(dispatch.clone())?;
        }
        Ok(resolution)
    }
}
