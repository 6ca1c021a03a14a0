//! Local-map worker loop.
//!
//! Receives keyframes from tracking, runs them through the controller and
//! publishes every correction on the output channel and in the shared state.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::optimizer::{GraphSolver, SparseBaSolver};
use crate::system::messages::{CorrectionInfo, LocalMapMsg};
use crate::system::shared_state::SharedState;

use super::controller::LocalMapController;

/// Flow control threshold: if more keyframes than this are waiting, signal
/// tracking to stop creating new ones.
const MAX_QUEUE_SIZE: usize = 3;

/// Timeout for receiving keyframes. Allows periodic shutdown checks.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

pub struct LocalMapper<S: GraphSolver = SparseBaSolver> {
    controller: LocalMapController<S>,
    corrections: Sender<CorrectionInfo>,
}

impl<S: GraphSolver> LocalMapper<S> {
    pub fn new(controller: LocalMapController<S>, corrections: Sender<CorrectionInfo>) -> Self {
        Self {
            controller,
            corrections,
        }
    }

    pub fn controller(&self) -> &LocalMapController<S> {
        &self.controller
    }

    /// Main thread loop. Runs until shutdown is requested or every sender is
    /// gone and the channel is drained.
    pub fn run(&mut self, receiver: Receiver<LocalMapMsg>, shared: Arc<SharedState>) {
        loop {
            if shared.is_shutdown_requested() {
                debug!("Local mapper shutting down on request");
                break;
            }

            shared.set_back_pressure(receiver.len() > MAX_QUEUE_SIZE);

            match receiver.recv_timeout(RECV_TIMEOUT) {
                Ok(msg) => self.handle(msg, &shared),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Keyframe channel closed, local mapper exiting");
                    break;
                }
            }
        }
        shared.set_back_pressure(false);
    }

    /// Handle a single message.
    pub fn handle(&mut self, msg: LocalMapMsg, shared: &SharedState) {
        match msg {
            LocalMapMsg::Keyframe(record) => {
                let frame_id = record.frame_id;
                if self.controller.enqueue(record).is_err() {
                    return;
                }

                while self.controller.inbox_len() > 0 {
                    match self.controller.process_next() {
                        Ok(Some(info)) => self.publish(info, shared),
                        Ok(None) => {}
                        Err(e) => warn!(frame = %frame_id, error = %e, "No correction for keyframe"),
                    }
                }
            }
            LocalMapMsg::Reset => {
                info!("Local map reset requested");
                self.controller.reset();
                shared.clear_latest_correction();
            }
        }
        shared.set_local_map_state(self.controller.state());
    }

    fn publish(&self, info: CorrectionInfo, shared: &SharedState) {
        shared.publish_correction(info.clone());
        let _ = self.corrections.send(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraModel;
    use crate::io::config::LocalMapConfig;
    use crate::local_mapping::LocalMapState;
    use crate::simulation::{SceneConfig, SyntheticScene};
    use crossbeam_channel::unbounded;

    #[test]
    fn test_handle_publishes_corrections() {
        let config = LocalMapConfig {
            window_size: 3,
            ..LocalMapConfig::default()
        };
        let camera = config.camera().unwrap();
        let mut scene = SyntheticScene::new(camera, SceneConfig::exact(5));

        let (tx, rx) = unbounded();
        let shared = SharedState::new();
        let mut mapper = LocalMapper::new(LocalMapController::new(camera, &config), tx);

        for i in 0..5 {
            mapper.handle(LocalMapMsg::Keyframe(scene.keyframe(i)), &shared);
        }

        let frames: Vec<u64> = rx.try_iter().map(|c| c.frame_id.as_u64()).collect();
        assert_eq!(frames, vec![2, 3, 4]);
        assert_eq!(shared.corrections_emitted(), 3);
        assert_eq!(shared.local_map_state(), LocalMapState::SlidingWindow);
        assert_eq!(shared.latest_correction().unwrap().frame_id.as_u64(), 4);

        mapper.handle(LocalMapMsg::Reset, &shared);
        assert_eq!(shared.local_map_state(), LocalMapState::Uninitialized);
        assert!(shared.latest_correction().is_none());
        assert!(mapper.controller().bag().is_empty());
    }

    #[test]
    fn test_run_exits_when_channel_closes() {
        let camera = CameraModel::new(400.0, 400.0, 320.0, 240.0);
        let config = LocalMapConfig::default();
        let (kf_tx, kf_rx) = crossbeam_channel::bounded(4);
        let (tx, _rx) = unbounded();
        let shared = SharedState::new();

        let mut mapper = LocalMapper::new(LocalMapController::new(camera, &config), tx);
        drop(kf_tx);
        mapper.run(kf_rx, shared.clone());

        assert!(!shared.is_back_pressured());
    }
}
