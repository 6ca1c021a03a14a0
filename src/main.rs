use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use vo_localmap::io::{CorrectionWriter, LocalMapConfig};
use vo_localmap::local_mapping::LocalMapState;
use vo_localmap::simulation::{SceneConfig, SyntheticScene};
use vo_localmap::system::LocalMapSystem;

/// Poll interval while waiting for corrections.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Give up after this long without a correction.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

struct Args {
    config: Option<PathBuf>,
    csv: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        csv: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--csv" => {
                let path = iter.next().context("--csv needs an output path")?;
                args.csv = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => bail!("Unknown option {}", flag),
            path => {
                if args.config.is_some() {
                    bail!("Only one config file may be given");
                }
                args.config = Some(PathBuf::from(path));
            }
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            LocalMapConfig::load(path)?
        }
        None => {
            info!("Using default configuration");
            LocalMapConfig::default()
        }
    };

    let camera = config.camera()?;
    let scene_config = SceneConfig {
        image_width: config.image_width,
        image_height: config.image_height,
        ..SceneConfig::default()
    };
    info!(
        keyframes = scene_config.num_keyframes,
        landmarks = scene_config.num_landmarks,
        seed = scene_config.seed,
        "Generating synthetic scene"
    );
    let mut scene = SyntheticScene::new(camera, scene_config);

    let mut writer = match &args.csv {
        Some(path) => Some(CorrectionWriter::create(path)?),
        None => None,
    };

    let mut system = LocalMapSystem::new(&config)?;
    let keyframes = scene.keyframes();
    let expected = keyframes.len().saturating_sub(config.window_size - 1);

    for kf in keyframes {
        system.submit(kf)?;
    }

    let mut received = 0;
    let mut idle = Duration::ZERO;
    while received < expected {
        let Some(info) = system.recv_correction_timeout(POLL_INTERVAL) else {
            if system.state() == LocalMapState::Fail {
                warn!(received, expected, "Local mapping failed");
                break;
            }
            idle += POLL_INTERVAL;
            if idle >= DRAIN_TIMEOUT {
                warn!(received, expected, "Timed out waiting for corrections");
                break;
            }
            continue;
        };
        received += 1;
        idle = Duration::ZERO;

        let truth = scene.true_pose(info.frame_id.as_u64());
        let (rot_err, trans_err) = info.pose.distance_to(&truth);
        info!(
            frame = %info.frame_id,
            landmarks = info.landmark_count,
            outliers = info.outlier_count,
            cost = info.summary.second_pass.final_cost,
            rot_err_deg = rot_err.to_degrees(),
            trans_err_m = trans_err,
            "Correction"
        );

        if let Some(writer) = writer.as_mut() {
            writer.write(&info)?;
        }
    }

    system.shutdown();
    info!(state = %system.state(), corrections = received, "Done");

    if let (Some(mut writer), Some(path)) = (writer, args.csv) {
        writer.flush()?;
        info!("Wrote {} corrections to {:?}", writer.rows(), path);
    }

    Ok(())
}
