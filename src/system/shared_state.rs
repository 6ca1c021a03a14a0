//! State shared between the producer side and the local-map worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::local_mapping::LocalMapState;

use super::messages::CorrectionInfo;

pub struct SharedState {
    /// Set by the worker while its inbox holds more than a few keyframes.
    pub back_pressure: AtomicBool,

    /// Ask the worker to exit without draining its inbox.
    pub shutdown_requested: AtomicBool,

    /// Controller state as of the last processed message.
    state: RwLock<LocalMapState>,

    /// Most recent correction, for consumers that only want the latest.
    latest_correction: RwLock<Option<CorrectionInfo>>,

    corrections_emitted: AtomicU64,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_back_pressured(&self) -> bool {
        self.back_pressure.load(Ordering::SeqCst)
    }

    pub fn set_back_pressure(&self, value: bool) {
        self.back_pressure.store(value, Ordering::SeqCst);
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn local_map_state(&self) -> LocalMapState {
        *self.state.read()
    }

    pub fn set_local_map_state(&self, state: LocalMapState) {
        *self.state.write() = state;
    }

    pub fn latest_correction(&self) -> Option<CorrectionInfo> {
        self.latest_correction.read().clone()
    }

    pub fn publish_correction(&self, info: CorrectionInfo) {
        *self.latest_correction.write() = Some(info);
        self.corrections_emitted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn clear_latest_correction(&self) {
        *self.latest_correction.write() = None;
    }

    pub fn corrections_emitted(&self) -> u64 {
        self.corrections_emitted.load(Ordering::SeqCst)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            back_pressure: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            state: RwLock::new(LocalMapState::Uninitialized),
            latest_correction: RwLock::new(None),
            corrections_emitted: AtomicU64::new(0),
        }
    }
}
