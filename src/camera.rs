use nalgebra::Matrix3;

use crate::config::CameraConfig;

/// カメラ内部パラメータ（歪みなしピンホール）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// 垂直画角と解像度から構築（正方ピクセル、主点は画像中心）
    pub fn from_fov(fov_v_deg: f64, width: u32, height: u32) -> Self {
        let w = width as f64;
        let h = height as f64;
        let fy = h / (2.0 * (fov_v_deg.to_radians() / 2.0).tan());
        let fx = fy;
        Self::new(fx, fy, w / 2.0, h / 2.0)
    }

    /// 内部パラメータ行列 K (row-major 3x3) から構築
    pub fn from_matrix(k: &[f64; 9]) -> Self {
        Self::new(k[0], k[4], k[2], k[5])
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        match config.focal_length {
            Some(f) => Self::new(f, f, config.width as f64 / 2.0, config.height as f64 / 2.0),
            None => Self::from_fov(config.fov_v, config.width, config.height),
        }
    }

    /// x方向の焦点距離（ピクセル）
    pub fn focal_length_x(&self) -> f64 {
        self.fx
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }
}
