use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub lifting: PoseLiftingOptions,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

/// 2D→3D リフティングのオプション
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PoseLiftingOptions {
    /// 有効な2D姿勢とみなすのに必要な、閾値超えキーポイント数
    #[serde(default = "default_min_keypoints_above_threshold")]
    pub min_keypoints_above_threshold: usize,
    /// キーポイント信頼度の閾値（これを超えたものだけ数える）
    #[serde(default = "default_keypoint_confidence_threshold")]
    pub keypoint_confidence_threshold: f64,
    /// 判定と3D推定から除外するキーポイント
    #[serde(default)]
    pub excluded_keypoint_indices: Vec<usize>,
    /// 向き反転の角度閾値（度）。None なら反転判定しない
    #[serde(default)]
    pub flip_threshold_degrees: Option<f64>,
    /// キーポイント平滑化。None なら平滑化しない
    #[serde(default)]
    pub smoothing: Option<SmoothingOptions>,
    #[serde(default)]
    pub solver: SolverOptions,
}

fn default_min_keypoints_above_threshold() -> usize { 3 }
fn default_keypoint_confidence_threshold() -> f64 { 0.6 }

impl Default for PoseLiftingOptions {
    fn default() -> Self {
        Self {
            min_keypoints_above_threshold: default_min_keypoints_above_threshold(),
            keypoint_confidence_threshold: default_keypoint_confidence_threshold(),
            excluded_keypoint_indices: Vec::new(),
            flip_threshold_degrees: None,
            smoothing: None,
            solver: SolverOptions::default(),
        }
    }
}

impl PoseLiftingOptions {
    pub fn is_excluded(&self, index: usize) -> bool {
        self.excluded_keypoint_indices.contains(&index)
    }
}

/// One Euro Filter parameters
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct SmoothingOptions {
    #[serde(default = "default_min_cutoff")]
    pub min_cutoff: f64,
    #[serde(default = "default_beta")]
    pub beta: f64,
    #[serde(default = "default_derivative_cutoff")]
    pub derivative_cutoff: f64,
}

fn default_min_cutoff() -> f64 { 1.0 }
fn default_beta() -> f64 { 0.0 }
fn default_derivative_cutoff() -> f64 { 1.0 }

impl Default for SmoothingOptions {
    fn default() -> Self {
        Self {
            min_cutoff: default_min_cutoff(),
            beta: default_beta(),
            derivative_cutoff: default_derivative_cutoff(),
        }
    }
}

impl SmoothingOptions {
    /// 弱めの平滑化プリセット
    pub fn low() -> Self {
        Self {
            min_cutoff: 1.0,
            beta: 0.1,
            derivative_cutoff: 1.0,
        }
    }
}

/// PnPソルバーのパラメータ
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Levenberg-Marquardt の最大反復回数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 許容する再投影誤差のRMS（ピクセル）。超えたら失敗扱い
    #[serde(default = "default_max_reprojection_error")]
    pub max_reprojection_error: f64,
    /// 正規方程式の条件数の下限（最小固有値 / 最大固有値）
    #[serde(default = "default_min_condition")]
    pub min_condition: f64,
}

fn default_max_iterations() -> usize { 100 }
fn default_max_reprojection_error() -> f64 { 20.0 }
fn default_min_condition() -> f64 { 1e-5 }

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_reprojection_error: default_max_reprojection_error(),
            min_condition: default_min_condition(),
        }
    }
}

/// カメラ内部パラメータの指定
///
/// `focal_length` があればそれを使い、なければ `fov_v` と画像サイズから計算する。
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CameraConfig {
    #[serde(default)]
    pub focal_length: Option<f64>,
    /// 垂直画角（度）
    #[serde(default = "default_fov_v")]
    pub fov_v: f64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_fov_v() -> f64 { 60.0 }
fn default_width() -> u32 { 1920 }
fn default_height() -> u32 { 1440 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            focal_length: None,
            fov_v: default_fov_v(),
            width: default_width(),
            height: default_height(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReplayConfig {
    /// 剛体テンプレート (JSON)
    #[serde(default = "default_template_path")]
    pub template_path: String,
    /// 記録済み2D姿勢 (JSON)
    #[serde(default = "default_frames_path")]
    pub frames_path: String,
    /// 結果の保存先。None なら保存しない
    #[serde(default)]
    pub output_path: Option<String>,
}

fn default_template_path() -> String { "template.json".to_string() }
fn default_frames_path() -> String { "frames.json".to_string() }

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            template_path: default_template_path(),
            frames_path: default_frames_path(),
            output_path: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 読み込みに失敗したらデフォルト設定
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{:#}; using default config", e);
                Self::default()
            }
        }
    }
}
