//! Streamed form of the loop: a producer thread feeding a bounded channel.
//!
//! The loop itself stays synchronous. The consumer may read events with
//! `recv().await` from async code or `blocking_recv()` from a plain thread.
//! Dropping the receiver stops the loop after the step in flight has been
//! recorded; the step log is left unfinalized so the run can be resumed.

use std::thread;

use anyhow::{Context, Result, anyhow};
use tokio::sync::mpsc;
use tracing::debug;

use crate::cotas::{Disconnected, LoopConfig, ProgressSink, RunOutcome, RunRequest, run_cotas};
use crate::core::events::ProgressEvent;
use crate::io::lookup::Lookup;
use crate::io::oracle::Oracle;
use crate::io::sandbox::Sandbox;
use crate::io::session::SessionPaths;

/// Backends a streamed run owns for its lifetime.
pub struct Collaborators {
    pub oracle: Box<dyn Oracle + Send>,
    pub sandbox: Box<dyn Sandbox + Send>,
    pub lookup: Box<dyn Lookup + Send>,
}

impl ProgressSink for mpsc::Sender<ProgressEvent> {
    fn emit(&mut self, event: ProgressEvent) -> Result<(), Disconnected> {
        self.blocking_send(event).map_err(|_| Disconnected)
    }
}

/// Handle to the producer thread.
pub struct RunWorker {
    handle: thread::JoinHandle<Result<RunOutcome>>,
}

impl RunWorker {
    /// Wait for the loop to stop.
    pub fn join(self) -> Result<RunOutcome> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("run thread panicked")),
        }
    }
}

/// Start the loop on its own thread. Events arrive on the returned receiver in
/// step order, at most `event_buffer` ahead of the consumer.
pub fn spawn_run(
    paths: SessionPaths,
    collaborators: Collaborators,
    config: LoopConfig,
    request: RunRequest,
    event_buffer: usize,
) -> Result<(mpsc::Receiver<ProgressEvent>, RunWorker)> {
    let (mut tx, rx) = mpsc::channel(event_buffer.max(1));
    let handle = thread::Builder::new()
        .name(format!("cotas-{}", paths.session_id))
        .spawn(move || {
            let Collaborators {
                oracle,
                sandbox,
                lookup,
            } = collaborators;
            let outcome = run_cotas(
                &paths,
                oracle.as_ref(),
                sandbox.as_ref(),
                lookup.as_ref(),
                &config,
                &request,
                &mut tx,
            );
            debug!("run thread finished");
            outcome
        })
        .context("spawn run thread")?;
    Ok((rx, RunWorker { handle }))
}
