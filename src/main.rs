use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use rigid_pose_lift::camera::CameraIntrinsics;
use rigid_pose_lift::config::{Config, PoseLiftingOptions};
use rigid_pose_lift::lifting::{load_template, ScnPose};
use rigid_pose_lift::pose::{ImageMeta, Pose, RigidFivePoint};
use rigid_pose_lift::{PosePredictor, RigidBodyPoseLifter};

const CONFIG_PATH: &str = "config.toml";

/// 記録済みの1フレーム
#[derive(Debug, Deserialize)]
struct RecordedFrame {
    /// None ならカメラ設定の解像度・回転なし
    #[serde(default)]
    image: Option<ImageMeta>,
    #[serde(default)]
    pose: Option<Pose<RigidFivePoint>>,
    /// 推論失敗として再生する
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Error)]
#[error("recorded prediction failure: {0}")]
struct RecordedFailure(String);

/// 記録済みの推論結果をそのまま返す
struct RecordedPredictor;

impl PosePredictor<RigidFivePoint> for RecordedPredictor {
    type Input = RecordedFrame;
    type Output = Option<Pose<RigidFivePoint>>;
    type Error = RecordedFailure;

    fn predict(&mut self, frame: &RecordedFrame) -> Result<Self::Output, RecordedFailure> {
        match &frame.error {
            Some(message) => Err(RecordedFailure(message.clone())),
            None => Ok(frame.pose.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
struct FrameResult {
    frame: usize,
    /// ゲートと向き補正を通った2D姿勢（3D推定の成否に関係なく残す）
    pose: Option<Pose<RigidFivePoint>>,
    flipped: bool,
    scn_pose: Option<ScnPose>,
    error: Option<String>,
}

type ReplayLifter = RigidBodyPoseLifter<RigidFivePoint, RecordedPredictor>;

/// 1フレーム分の 2D → 3D
fn replay_frame(
    lifter: &mut ReplayLifter,
    index: usize,
    frame: &RecordedFrame,
    image: &ImageMeta,
    camera: &CameraIntrinsics,
    options: &PoseLiftingOptions,
) -> FrameResult {
    let pose = match lifter.run_2d(frame, options) {
        Ok((pose, _)) => pose,
        Err(e) => {
            tracing::warn!(frame = index, "2D pose rejected: {}", e);
            return FrameResult {
                frame: index,
                pose: None,
                flipped: false,
                scn_pose: None,
                error: Some(e.to_string()),
            };
        }
    };
    let flipped = lifter.stabilizer().previous_flipped();

    let (scn_pose, error) = match lifter.infer_3d(&pose, image, camera, options) {
        Ok(scn) => (Some(scn), None),
        Err(e) => {
            tracing::warn!(frame = index, "3D pose failed: {}", e);
            (None, Some(e.to_string()))
        }
    };
    FrameResult {
        frame: index,
        pose: Some(pose),
        flipped,
        scn_pose,
        error,
    }
}

fn load_frames(path: impl AsRef<Path>) -> Result<Vec<RecordedFrame>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read frames {}", path.display()))?;
    let frames = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse frames {}", path.display()))?;
    Ok(frames)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path);
    let options = &config.lifting;

    let template = load_template(&config.replay.template_path)
        .with_context(|| format!("Template: {}", config.replay.template_path))?;
    let frames = load_frames(&config.replay.frames_path)?;
    let camera = CameraIntrinsics::from_config(&config.camera);
    let default_image = ImageMeta::upright(config.camera.width as f64, config.camera.height as f64);

    let mut lifter: ReplayLifter = RigidBodyPoseLifter::new(RecordedPredictor, template)?;

    println!("Rigid Pose Lift - replay");
    println!(
        "Template: {} ({} points, layout {})",
        config.replay.template_path,
        lifter.template().len(),
        lifter.stabilizer().layout().name()
    );
    println!("Frames: {} ({} frames)", config.replay.frames_path, frames.len());
    println!("Focal length: {:.1}px", camera.focal_length_x());
    println!(
        "Gate: {} keypoints > {}, excluded {:?}",
        options.min_keypoints_above_threshold,
        options.keypoint_confidence_threshold,
        options.excluded_keypoint_indices
    );
    match options.flip_threshold_degrees {
        Some(t) => println!("Flip threshold: {}°", t),
        None => println!("Flip threshold: OFF"),
    }
    println!();

    let mut results = Vec::with_capacity(frames.len());
    let mut solved = 0;

    for (i, frame) in frames.iter().enumerate() {
        let image = frame.image.unwrap_or(default_image);
        let result = replay_frame(&mut lifter, i, frame, &image, &camera, options);

        match (&result.scn_pose, &result.error) {
            (Some(scn), _) => {
                solved += 1;
                let t = scn.translation_vector;
                println!(
                    "[{:4}] t=({:+.3}, {:+.3}, {:+.3}) angle={:6.1}°{}",
                    i,
                    t.x,
                    t.y,
                    t.z,
                    scn.rotation_vector.w.to_degrees(),
                    if result.flipped { " (flipped)" } else { "" }
                );
            }
            (None, Some(e)) => println!("[{:4}] {}", i, e),
            (None, None) => {}
        }
        results.push(result);
    }

    println!();
    println!("Solved {}/{} frames", solved, frames.len());

    if let Some(path) = &config.replay.output_path {
        let json = serde_json::to_string_pretty(&results)?;
        fs::write(path, json).with_context(|| format!("Failed to write results {}", path))?;
        println!("Results saved: {}", path);
    }

    Ok(())
}
