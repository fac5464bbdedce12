use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// y/z 軸を反転する行列（画像処理系 ↔ シーン系）
fn axis_flip() -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0))
}

/// シーンのカメラ座標系（y 上向き、カメラは -z を向く）に剛体を置くための変換
///
/// `camera_transform` は列ベクトル規約（平行移動は4列目）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScnPose {
    pub camera_transform: Matrix4<f64>,
    /// 回転軸 (x, y, z) と角度（ラジアン）
    pub rotation_vector: Vector4<f64>,
    pub translation_vector: Vector3<f64>,
}

impl ScnPose {
    /// 画像処理系（y 下向き、z 前向き）の回転・並進から変換
    pub fn from_vision(rotation: &Rotation3<f64>, translation: &Vector3<f64>) -> Self {
        let flip = axis_flip();
        let r = flip * rotation.matrix() * flip;
        let t = flip * translation;
        let scene_rotation = Rotation3::from_matrix_unchecked(r);

        let rotation_vector = match scene_rotation.axis_angle() {
            Some((axis, angle)) => Vector4::new(axis.x, axis.y, axis.z, angle),
            None => Vector4::new(0.0, 0.0, 1.0, 0.0),
        };

        let mut camera_transform = Matrix4::identity();
        camera_transform.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        camera_transform.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);

        Self {
            camera_transform,
            rotation_vector,
            translation_vector: t,
        }
    }

    /// シーン系の回転
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_matrix_unchecked(self.camera_transform.fixed_view::<3, 3>(0, 0).into_owned())
    }

    /// テンプレート座標の点をカメラ座標へ
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.camera_transform.transform_point(point)
    }

    /// カメラからの距離
    pub fn distance(&self) -> f64 {
        self.translation_vector.norm()
    }
}
