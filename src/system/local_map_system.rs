//! Local-map system: owns the worker thread and its channels.
//!
//! The controller, bag and graph live on the worker thread only. Producers talk
//! to it through a bounded keyframe channel; corrections come back on an
//! unbounded channel and the latest one is mirrored in [`SharedState`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::io::config::LocalMapConfig;
use crate::local_mapping::{LocalMapController, LocalMapError, LocalMapState, LocalMapper};
use crate::optimizer::{GraphSolver, SparseBaSolver};
use crate::window::KeyframeRecord;

use super::messages::{CorrectionInfo, LocalMapMsg};
use super::shared_state::SharedState;

pub struct LocalMapSystem {
    shared: Arc<SharedState>,

    /// Keyframes and control messages to the worker. `None` once shut down.
    sender: Option<Sender<LocalMapMsg>>,

    corrections: Receiver<CorrectionInfo>,

    handle: Option<JoinHandle<()>>,
}

impl LocalMapSystem {
    /// Validate `config` and spawn the worker with the in-crate solver.
    pub fn new(config: &LocalMapConfig) -> Result<Self> {
        Self::with_solver(config, SparseBaSolver::new())
    }

    pub fn with_solver<S>(config: &LocalMapConfig, solver: S) -> Result<Self>
    where
        S: GraphSolver + Send + 'static,
    {
        config.validate()?;
        let camera = config.camera()?;

        let shared = SharedState::new();
        let (sender, receiver) = bounded::<LocalMapMsg>(config.inbox_capacity);
        let (correction_tx, corrections) = unbounded::<CorrectionInfo>();

        let controller = LocalMapController::with_solver(camera, config, solver);
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("local-mapping".to_string())
            .spawn(move || {
                let mut mapper = LocalMapper::new(controller, correction_tx);
                mapper.run(receiver, worker_shared);
            })
            .context("Failed to spawn local mapping thread")?;

        info!(
            window_size = config.window_size,
            inbox_capacity = config.inbox_capacity,
            "Local map system started"
        );

        Ok(Self {
            shared,
            sender: Some(sender),
            corrections,
            handle: Some(handle),
        })
    }

    /// Hand a keyframe to the worker.
    ///
    /// Malformed records are rejected here. Blocks while the inbox is full.
    pub fn submit(&self, record: KeyframeRecord) -> Result<(), LocalMapError> {
        if let Err(e) = record.validate() {
            warn!(frame = %record.frame_id, error = %e, "Rejected malformed keyframe");
            return Err(e.into());
        }
        self.send(LocalMapMsg::Keyframe(record))
    }

    /// Ask the worker to drop its window and start over.
    pub fn reset(&self) -> Result<(), LocalMapError> {
        self.send(LocalMapMsg::Reset)
    }

    fn send(&self, msg: LocalMapMsg) -> Result<(), LocalMapError> {
        let sender = self.sender.as_ref().ok_or(LocalMapError::Disconnected)?;
        sender.send(msg).map_err(|_| LocalMapError::Disconnected)
    }

    pub fn corrections(&self) -> &Receiver<CorrectionInfo> {
        &self.corrections
    }

    pub fn recv_correction_timeout(&self, timeout: Duration) -> Option<CorrectionInfo> {
        self.corrections.recv_timeout(timeout).ok()
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn state(&self) -> LocalMapState {
        self.shared.local_map_state()
    }

    /// Close the inbox and wait for the worker to drain it.
    pub fn shutdown(&mut self) {
        self.sender = None;
        self.join();
    }

    /// Stop the worker without processing what is still queued.
    pub fn abort(&mut self) {
        self.shared.request_shutdown();
        self.sender = None;
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Local mapping thread panicked");
            }
            info!(
                corrections = self.shared.corrections_emitted(),
                "Local map system stopped"
            );
        }
    }
}

impl Drop for LocalMapSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
