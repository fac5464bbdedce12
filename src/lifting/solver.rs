//! Perspective-n-Point solver.
//!
//! Recovers the rigid transform that projects template points onto observed
//! keypoints for a pinhole camera with a single focal length, principal point
//! at the origin and no distortion. Several initial guesses are refined with
//! Levenberg–Marquardt and the one with the lowest reprojection error wins:
//!
//! - DLT on the 3x4 projection matrix (6+ non-coplanar points)
//! - planar homography decomposition (4+ coplanar points)
//! - weak-perspective starts from a fixed set of orientations (always)

use nalgebra::{
    Matrix2, Matrix2x3, Matrix3, Matrix3x4, Matrix6, Point2, Point3, Rotation3, SMatrix, SVector,
    UnitQuaternion, Vector2, Vector3, Vector6,
};
use std::f64::consts::{FRAC_PI_2, PI};

use super::scn::ScnPose;
use super::template::RigidBodyTemplate;
use crate::config::SolverOptions;
use crate::error::PoseLiftError;
use crate::pose::{Pose, Size, Skeleton};

/// PnP に必要な最小対応点数
pub const MIN_CORRESPONDENCES: usize = 3;

/// 固有値比（第2 / 第1）がこれ以下ならテンプレートを直線とみなす
const COLLINEAR_RATIO: f64 = 1e-4;
/// 固有値比（第3 / 第1）がこれ以下ならテンプレートを平面とみなす
const COPLANAR_RATIO: f64 = 1e-8;
/// 正規化画像座標の固有値比がこれ以下なら直線上に並んでいる
const IMAGE_COLLINEAR_RATIO: f64 = 1e-10;

/// 正規化座標の残差二乗和がこれ以下なら収束
const COST_EPS: f64 = 1e-24;

/// 画像処理系（x 右、y 下、z 前）での解
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnpSolution {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    /// 再投影誤差の RMS（ピクセル）
    pub rms_error: f64,
}

/// 推定中の姿勢
#[derive(Debug, Clone, Copy)]
struct Estimate {
    rotation: UnitQuaternion<f64>,
    translation: Vector3<f64>,
}

/// 正規方程式 (J^T J, J^T r) と残差二乗和
struct NormalEquations {
    jtj: Matrix6<f64>,
    jtr: Vector6<f64>,
    cost: f64,
}

#[derive(Debug, Clone)]
pub struct PnpSolver {
    options: SolverOptions,
}

impl Default for PnpSolver {
    fn default() -> Self {
        Self::new(SolverOptions::default())
    }
}

impl PnpSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    /// 姿勢とテンプレートから3D姿勢を推定
    ///
    /// キーポイントは画像中心原点に移し、`excluded` のインデックスは2D・3Dの両方から除く。
    pub fn solve<S: Skeleton>(
        &self,
        pose: &Pose<S>,
        image_size: Size,
        focal_length_x: f64,
        template: &RigidBodyTemplate,
        excluded: &[usize],
    ) -> Result<ScnPose, PoseLiftError> {
        let (image_points, object_points) = correspondences(pose, image_size, template, excluded);
        let solution = self.solve_correspondences(&image_points, &object_points, focal_length_x)?;
        Ok(ScnPose::from_vision(&solution.rotation, &solution.translation))
    }

    /// 2D-3D 対応から回転・並進を推定（どちらも画像処理系）
    pub fn solve_correspondences(
        &self,
        image_points: &[Point2<f64>],
        object_points: &[Point3<f64>],
        focal_length: f64,
    ) -> Result<PnpSolution, PoseLiftError> {
        let n = image_points.len().min(object_points.len());
        if n < MIN_CORRESPONDENCES {
            return Err(PoseLiftError::InsufficientCorrespondences { found: n });
        }
        if image_points.len() != object_points.len() {
            return Err(PoseLiftError::degenerate("mismatched correspondence counts"));
        }
        if !focal_length.is_finite() || focal_length <= 0.0 {
            return Err(PoseLiftError::degenerate(format!("invalid focal length {}", focal_length)));
        }
        let finite = image_points.iter().all(|p| p.coords.iter().all(|v| v.is_finite()))
            && object_points.iter().all(|p| p.coords.iter().all(|v| v.is_finite()));
        if !finite {
            return Err(PoseLiftError::degenerate("non-finite coordinates"));
        }

        // 正規化画像座標
        let normalized: Vec<Point2<f64>> = image_points
            .iter()
            .map(|p| Point2::from(p.coords / focal_length))
            .collect();

        let shape = ObjectShape::analyze(object_points);
        if shape.is_collinear() {
            return Err(PoseLiftError::degenerate("template points are collinear"));
        }
        if image_spread_ratio(&normalized) <= IMAGE_COLLINEAR_RATIO {
            return Err(PoseLiftError::degenerate("image points are collinear"));
        }

        let mut seeds = Vec::new();
        if !shape.is_coplanar() && n >= 6 {
            seeds.extend(dlt_seed(object_points, &normalized, &shape));
        }
        if shape.is_coplanar() && n >= 4 {
            seeds.extend(homography_seed(object_points, &normalized, &shape));
        }
        seeds.extend(weak_perspective_seeds(object_points, &normalized, &shape));

        let mut best: Option<(Estimate, f64)> = None;
        for seed in seeds {
            let Some((estimate, cost)) = self.refine(seed, object_points, &normalized) else {
                continue;
            };
            tracing::trace!(cost, "refined PnP seed");
            if best.map_or(true, |(_, c)| cost < c) {
                best = Some((estimate, cost));
            }
            if cost < COST_EPS {
                break;
            }
        }

        let (estimate, cost) = best
            .ok_or_else(|| PoseLiftError::degenerate("no seed converged in front of the camera"))?;

        let rms_error = focal_length * (cost / n as f64).sqrt();
        if !rms_error.is_finite() || rms_error > self.options.max_reprojection_error {
            return Err(PoseLiftError::degenerate(format!(
                "reprojection error {:.2}px exceeds {:.2}px",
                rms_error, self.options.max_reprojection_error
            )));
        }

        let eq = normal_equations(&estimate, object_points, &normalized)
            .ok_or_else(|| PoseLiftError::degenerate("points behind the camera"))?;
        let condition = scaled_condition(&eq.jtj);
        if condition < self.options.min_condition {
            return Err(PoseLiftError::degenerate(format!(
                "ill-conditioned solution (condition {:.3e})",
                condition
            )));
        }

        Ok(PnpSolution {
            rotation: estimate.rotation.to_rotation_matrix(),
            translation: estimate.translation,
            rms_error,
        })
    }

    /// Levenberg–Marquardt で再投影誤差を最小化
    ///
    /// 回転は左からの微小回転 exp([w]x) で更新する。点がカメラの後ろに出る初期値は None。
    fn refine(
        &self,
        seed: Estimate,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
    ) -> Option<(Estimate, f64)> {
        let mut estimate = seed;
        let mut eq = normal_equations(&estimate, object, image)?;
        let mut lambda = 1e-3;

        for _ in 0..self.options.max_iterations {
            if eq.cost < COST_EPS {
                break;
            }

            let mut improved = false;
            while lambda < 1e12 {
                let mut damped = eq.jtj;
                for i in 0..6 {
                    damped[(i, i)] += lambda * (eq.jtj[(i, i)] + 1e-12);
                }
                let Some(chol) = damped.cholesky() else {
                    lambda *= 10.0;
                    continue;
                };
                let delta = chol.solve(&(-eq.jtr));

                let candidate = Estimate {
                    rotation: UnitQuaternion::new(delta.fixed_rows::<3>(0).into_owned()) * estimate.rotation,
                    translation: estimate.translation + delta.fixed_rows::<3>(3),
                };
                match normal_equations(&candidate, object, image) {
                    Some(next) if next.cost < eq.cost => {
                        let gain = (eq.cost - next.cost) / eq.cost;
                        estimate = candidate;
                        eq = next;
                        lambda = (lambda / 10.0).max(1e-12);
                        improved = gain > 1e-12 && delta.norm() > 1e-14;
                        break;
                    }
                    _ => lambda *= 10.0,
                }
            }
            if !improved {
                break;
            }
        }

        let rotation = UnitQuaternion::new_normalize(estimate.rotation.into_inner());
        Some((
            Estimate {
                rotation,
                translation: estimate.translation,
            },
            eq.cost,
        ))
    }
}

/// 姿勢とテンプレートから、除外を反映した 2D (画像中心原点) / 3D (画像処理系) の対応を作る
pub fn correspondences<S: Skeleton>(
    pose: &Pose<S>,
    image_size: Size,
    template: &RigidBodyTemplate,
    excluded: &[usize],
) -> (Vec<Point2<f64>>, Vec<Point3<f64>>) {
    let half_w = image_size.width / 2.0;
    let half_h = image_size.height / 2.0;
    pose.keypoints()
        .iter()
        .filter(|kp| !excluded.contains(&kp.index))
        .filter_map(|kp| {
            template.vision_point(kp.index).map(|object| {
                (
                    Point2::new(kp.position.x - half_w, kp.position.y - half_h),
                    object,
                )
            })
        })
        .unzip()
}

/// 3D 点群の重心と主軸
struct ObjectShape {
    centroid: Vector3<f64>,
    /// 主軸（固有値の降順、右手系）
    axes: Matrix3<f64>,
    /// 固有値（降順）
    spread: Vector3<f64>,
}

impl ObjectShape {
    fn analyze(points: &[Point3<f64>]) -> Self {
        let n = points.len() as f64;
        let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
        let mut cov = Matrix3::zeros();
        for p in points {
            let d = p.coords - centroid;
            cov += d * d.transpose();
        }
        cov /= n;

        let eigen = cov.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let e1: Vector3<f64> = eigen.eigenvectors.column(order[0]).into_owned();
        let e2: Vector3<f64> = eigen.eigenvectors.column(order[1]).into_owned();
        let e3 = e1.cross(&e2);
        let spread = Vector3::new(
            eigen.eigenvalues[order[0]].max(0.0),
            eigen.eigenvalues[order[1]].max(0.0),
            eigen.eigenvalues[order[2]].max(0.0),
        );

        Self {
            centroid,
            axes: Matrix3::from_columns(&[e1, e2, e3]),
            spread,
        }
    }

    fn is_collinear(&self) -> bool {
        self.spread[0] <= f64::EPSILON || self.spread[1] <= COLLINEAR_RATIO * self.spread[0]
    }

    fn is_coplanar(&self) -> bool {
        self.spread[2] <= COPLANAR_RATIO * self.spread[0]
    }

    /// 重心からの RMS 半径
    fn radius(&self) -> f64 {
        self.spread.sum().sqrt()
    }
}

/// 2D 点群の固有値比（最小 / 最大）
fn image_spread_ratio(points: &[Point2<f64>]) -> f64 {
    let n = points.len() as f64;
    let mean = points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let mut cov = Matrix2::zeros();
    for p in points {
        let d = p.coords - mean;
        cov += d * d.transpose();
    }
    let eigen = cov.symmetric_eigen();
    let max = eigen.eigenvalues.max();
    if max <= 0.0 {
        return 0.0;
    }
    eigen.eigenvalues.min().max(0.0) / max
}

/// 絶対値が最小の固有値の位置（A^T A の零空間の方向）
fn smallest_index<'a>(eigenvalues: impl Iterator<Item = &'a f64>) -> usize {
    eigenvalues
        .enumerate()
        .min_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// 最も近い回転行列（SVD による直交化）
fn nearest_rotation(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
    }
    Some(r)
}

/// DLT による初期値（非平面、6点以上）
///
/// 3D 点は重心・スケールで正規化してから 3x4 射影行列を求める。
fn dlt_seed(object: &[Point3<f64>], image: &[Point2<f64>], shape: &ObjectShape) -> Option<Estimate> {
    let scale = shape.radius();
    if scale <= 0.0 {
        return None;
    }

    let mut ata = SMatrix::<f64, 12, 12>::zeros();
    for (p, m) in object.iter().zip(image) {
        let q = (p.coords - shape.centroid) / scale;
        let ph = [q.x, q.y, q.z, 1.0];

        let mut row1 = SVector::<f64, 12>::zeros();
        let mut row2 = SVector::<f64, 12>::zeros();
        for k in 0..4 {
            row1[k] = ph[k];
            row1[8 + k] = -m.x * ph[k];
            row2[4 + k] = ph[k];
            row2[8 + k] = -m.y * ph[k];
        }
        ata += row1 * row1.transpose();
        ata += row2 * row2.transpose();
    }

    let eigen = ata.symmetric_eigen();
    let h = eigen.eigenvectors.column(smallest_index(eigen.eigenvalues.iter())).into_owned();
    let mut proj = Matrix3x4::from_row_slice(h.as_slice());
    let mut a: Matrix3<f64> = proj.fixed_view::<3, 3>(0, 0).into_owned();
    if a.determinant() < 0.0 {
        proj = -proj;
        a = -a;
    }

    let svd = a.svd(false, false);
    let lambda = svd.singular_values.mean() / scale;
    if lambda <= 0.0 {
        return None;
    }
    let r = nearest_rotation(&a)?;
    let center_cam = proj.column(3).into_owned() / lambda;
    if center_cam.z <= 0.0 {
        return None;
    }

    let rotation = UnitQuaternion::from_matrix(&r);
    let translation = center_cam - rotation * shape.centroid;
    Some(Estimate {
        rotation,
        translation,
    })
}

/// 平面ホモグラフィ分解による初期値（共平面、4点以上）
fn homography_seed(object: &[Point3<f64>], image: &[Point2<f64>], shape: &ObjectShape) -> Option<Estimate> {
    let scale = shape.radius();
    if scale <= 0.0 {
        return None;
    }
    let basis_t = shape.axes.transpose();

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (p, m) in object.iter().zip(image) {
        let local = basis_t * (p.coords - shape.centroid) / scale;
        let (a, b) = (local.x, local.y);
        let row1 = SVector::<f64, 9>::from_column_slice(&[a, b, 1.0, 0.0, 0.0, 0.0, -m.x * a, -m.x * b, -m.x]);
        let row2 = SVector::<f64, 9>::from_column_slice(&[0.0, 0.0, 0.0, a, b, 1.0, -m.y * a, -m.y * b, -m.y]);
        ata += row1 * row1.transpose();
        ata += row2 * row2.transpose();
    }

    let eigen = ata.symmetric_eigen();
    let h = eigen.eigenvectors.column(smallest_index(eigen.eigenvalues.iter())).into_owned();
    let hm = Matrix3::from_row_slice(h.as_slice());
    let h1 = hm.column(0).into_owned();
    let h2 = hm.column(1).into_owned();
    let h3 = hm.column(2).into_owned();

    let norm = (h1.norm() + h2.norm()) / 2.0;
    if norm <= f64::EPSILON {
        return None;
    }
    let mut lambda = 1.0 / norm;
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }
    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let r_plane = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r3]))?;
    let t_plane = h3 * lambda;

    // 平面座標は (P - c) / scale を主軸に射影したもの
    let r = r_plane * basis_t;
    let rotation = UnitQuaternion::from_matrix(&r);
    let translation = t_plane * scale - rotation * shape.centroid;
    Some(Estimate {
        rotation,
        translation,
    })
}

/// 弱透視投影による初期値（複数の向きから）
fn weak_perspective_seeds(object: &[Point3<f64>], image: &[Point2<f64>], shape: &ObjectShape) -> Vec<Estimate> {
    let n = image.len() as f64;
    let mean = image.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let image_radius = (image.iter().map(|p| (p.coords - mean).norm_squared()).sum::<f64>() / n).sqrt();
    if image_radius <= f64::EPSILON {
        return Vec::new();
    }
    let depth = shape.radius() / image_radius;

    let orientations = [
        Vector3::zeros(),
        Vector3::new(PI, 0.0, 0.0),
        Vector3::new(0.0, PI, 0.0),
        Vector3::new(0.0, 0.0, PI),
        Vector3::new(FRAC_PI_2, 0.0, 0.0),
        Vector3::new(-FRAC_PI_2, 0.0, 0.0),
        Vector3::new(0.0, FRAC_PI_2, 0.0),
        Vector3::new(0.0, -FRAC_PI_2, 0.0),
        Vector3::new(0.0, 0.0, FRAC_PI_2),
        Vector3::new(0.0, 0.0, -FRAC_PI_2),
    ];

    orientations
        .iter()
        .map(|axis_angle| {
            let rotation = UnitQuaternion::new(*axis_angle);
            let center = Vector3::new(mean.x * depth, mean.y * depth, depth);
            let mut translation = center - rotation * shape.centroid;

            // 全点をカメラの前に出す
            let min_z = object
                .iter()
                .map(|p| (rotation * p.coords + translation).z)
                .fold(f64::INFINITY, f64::min);
            let margin = 0.1 * depth;
            if min_z < margin {
                translation.z += margin - min_z;
            }
            Estimate {
                rotation,
                translation,
            }
        })
        .collect()
}

/// 現在の推定値での正規方程式。カメラの後ろの点があれば None
fn normal_equations(estimate: &Estimate, object: &[Point3<f64>], image: &[Point2<f64>]) -> Option<NormalEquations> {
    let mut jtj = Matrix6::zeros();
    let mut jtr = Vector6::zeros();
    let mut cost = 0.0;

    for (p, m) in object.iter().zip(image) {
        let rotated = estimate.rotation * p.coords;
        let pc = rotated + estimate.translation;
        if pc.z <= f64::EPSILON {
            return None;
        }
        let inv_z = 1.0 / pc.z;
        let r = Vector2::new(pc.x * inv_z - m.x, pc.y * inv_z - m.y);
        cost += r.norm_squared();

        let jp = Matrix2x3::new(
            inv_z, 0.0, -pc.x * inv_z * inv_z,
            0.0, inv_z, -pc.y * inv_z * inv_z,
        );
        let mut j = SMatrix::<f64, 2, 6>::zeros();
        j.fixed_view_mut::<2, 3>(0, 0).copy_from(&(jp * -rotated.cross_matrix()));
        j.fixed_view_mut::<2, 3>(0, 3).copy_from(&jp);

        jtj += j.transpose() * j;
        jtr += j.transpose() * r;
    }

    if !cost.is_finite() {
        return None;
    }
    Some(NormalEquations { jtj, jtr, cost })
}

/// 対角スケーリング後の J^T J の条件（最小固有値 / 最大固有値）
fn scaled_condition(jtj: &Matrix6<f64>) -> f64 {
    let mut d = Vector6::zeros();
    for i in 0..6 {
        let v = jtj[(i, i)];
        if v <= 0.0 {
            return 0.0;
        }
        d[i] = 1.0 / v.sqrt();
    }
    let scaled = Matrix6::from_diagonal(&d) * jtj * Matrix6::from_diagonal(&d);
    let eigen = scaled.symmetric_eigen();
    let max = eigen.eigenvalues.max();
    if max <= 0.0 {
        return 0.0;
    }
    eigen.eigenvalues.min().max(0.0) / max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, RigidFivePoint};
    use nalgebra::Unit;

    const FOCAL: f64 = 1000.0;

    /// 画像処理系で点を投影（主点は原点）
    fn project(r: &Rotation3<f64>, t: &Vector3<f64>, points: &[Point3<f64>]) -> Vec<Point2<f64>> {
        points
            .iter()
            .map(|p| {
                let pc = r * p.coords + t;
                Point2::new(FOCAL * pc.x / pc.z, FOCAL * pc.y / pc.z)
            })
            .collect()
    }

    fn box_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(-0.1, -0.05, 0.0),
            Point3::new(0.1, -0.05, 0.0),
            Point3::new(0.1, 0.05, 0.02),
            Point3::new(-0.1, 0.05, 0.02),
            Point3::new(0.0, 0.0, 0.08),
            Point3::new(0.05, -0.02, -0.06),
            Point3::new(-0.04, 0.03, -0.03),
        ]
    }

    fn rotation_error_degrees(a: &Rotation3<f64>, b: &Rotation3<f64>) -> f64 {
        (a.inverse() * b).angle().to_degrees()
    }

    fn assert_recovers(points: &[Point3<f64>], r: Rotation3<f64>, t: Vector3<f64>) {
        let image = project(&r, &t, points);
        let solution = PnpSolver::default()
            .solve_correspondences(&image, points, FOCAL)
            .unwrap();
        let rot_err = rotation_error_degrees(&solution.rotation, &r);
        let trans_err = (solution.translation - t).norm() / t.norm();
        assert!(rot_err < 1.0, "rotation error {} deg", rot_err);
        assert!(trans_err < 0.01, "translation error {}", trans_err);
        assert!(solution.rms_error < 1e-3, "rms {}", solution.rms_error);
    }

    #[test]
    fn test_recovers_non_planar_pose() {
        let r = Rotation3::from_axis_angle(&Unit::new_normalize(Vector3::new(0.3, 1.0, 0.2)), 0.5);
        assert_recovers(&box_points(), r, Vector3::new(0.05, -0.03, 0.8));
    }

    #[test]
    fn test_recovers_planar_pose() {
        let points = vec![
            Point3::new(-0.1, -0.1, 0.0),
            Point3::new(0.1, -0.1, 0.0),
            Point3::new(0.1, 0.1, 0.0),
            Point3::new(-0.1, 0.1, 0.0),
            Point3::new(0.03, 0.05, 0.0),
        ];
        let r = Rotation3::from_axis_angle(&Unit::new_normalize(Vector3::new(1.0, 0.2, 0.0)), 0.6);
        assert_recovers(&points, r, Vector3::new(-0.02, 0.04, 1.0));
    }

    #[test]
    fn test_recovers_five_points() {
        let all = box_points();
        let points = &all[..5];
        let r = Rotation3::from_axis_angle(&Unit::new_normalize(Vector3::new(0.0, 1.0, 0.1)), 0.4);
        assert_recovers(points, r, Vector3::new(0.0, 0.02, 0.6));
    }

    #[test]
    fn test_three_points_solve() {
        // 3点は複数の厳密解がありうるので、再投影誤差だけ確認する
        let all = box_points();
        let points = &all[..3];
        let r = Rotation3::from_axis_angle(&Unit::new_normalize(Vector3::new(0.3, 1.0, 0.2)), 0.5);
        let image = project(&r, &Vector3::new(0.05, -0.03, 0.8), points);
        let solution = PnpSolver::default()
            .solve_correspondences(&image, points, FOCAL)
            .unwrap();
        assert!(solution.rms_error < 1e-3, "rms {}", solution.rms_error);
        assert!(solution.translation.z > 0.0);
    }

    /// x 軸上にほぼ並んだ5点（直線からのずれ `eps`）と、±1px のノイズを載せた投影
    fn near_collinear(eps: f64) -> (Vec<Point3<f64>>, Vec<Point2<f64>>) {
        let points = vec![
            Point3::new(-0.1, eps, 0.0),
            Point3::new(-0.05, -eps, eps),
            Point3::new(0.0, eps, -eps),
            Point3::new(0.05, -eps, 0.0),
            Point3::new(0.1, 0.0, eps),
        ];
        let noise = [(1.0, -1.0), (-1.0, 1.0), (1.0, 1.0), (-1.0, -1.0), (0.5, -0.5)];
        let r = Rotation3::from_euler_angles(1.2, 0.2, 0.1);
        let image = project(&r, &Vector3::new(0.0, 0.0, 0.5), &points)
            .iter()
            .zip(noise)
            .map(|(p, (dx, dy))| Point2::new(p.x + dx, p.y + dy))
            .collect();
        (points, image)
    }

    #[test]
    fn test_near_collinear_template_is_degenerate() {
        for eps in [1e-4, 1e-5] {
            let (points, image) = near_collinear(eps);
            let err = PnpSolver::default()
                .solve_correspondences(&image, &points, FOCAL)
                .unwrap_err();
            assert!(matches!(err, PoseLiftError::DegeneratePointConfiguration(_)), "eps={}", eps);
        }
    }

    #[test]
    fn test_ill_conditioned_solution_rejected() {
        // 直線判定は通るが、向きがほとんど拘束されない配置
        let (points, image) = near_collinear(1e-3);
        let solver = PnpSolver::new(SolverOptions {
            min_condition: 1e-2,
            ..SolverOptions::default()
        });
        let err = solver.solve_correspondences(&image, &points, FOCAL).unwrap_err();
        assert!(matches!(err, PoseLiftError::DegeneratePointConfiguration(_)));
    }

    #[test]
    fn test_insufficient_correspondences() {
        let all = box_points();
        let points = &all[..2];
        let image = project(&Rotation3::identity(), &Vector3::new(0.0, 0.0, 1.0), points);
        let err = PnpSolver::default()
            .solve_correspondences(&image, points, FOCAL)
            .unwrap_err();
        assert!(matches!(err, PoseLiftError::InsufficientCorrespondences { found: 2 }));

        let err = PnpSolver::default()
            .solve_correspondences(&[], &[], FOCAL)
            .unwrap_err();
        assert!(matches!(err, PoseLiftError::InsufficientCorrespondences { found: 0 }));
    }

    #[test]
    fn test_collinear_template_is_degenerate() {
        let points: Vec<Point3<f64>> = (0..5).map(|i| Point3::new(i as f64 * 0.05, 0.0, 0.0)).collect();
        let image: Vec<Point2<f64>> = (0..5).map(|i| Point2::new(i as f64 * 10.0, i as f64 * 3.0)).collect();
        let err = PnpSolver::default()
            .solve_correspondences(&image, &points, FOCAL)
            .unwrap_err();
        assert!(matches!(err, PoseLiftError::DegeneratePointConfiguration(_)));
    }

    #[test]
    fn test_invalid_focal_length() {
        let points = box_points();
        let image = project(&Rotation3::identity(), &Vector3::new(0.0, 0.0, 1.0), &points);
        for f in [0.0, -10.0, f64::NAN] {
            let err = PnpSolver::default()
                .solve_correspondences(&image, &points, f)
                .unwrap_err();
            assert!(matches!(err, PoseLiftError::DegeneratePointConfiguration(_)));
        }
    }

    #[test]
    fn test_inconsistent_points_rejected_by_residual() {
        // 剛体では説明できない2D配置（誤差が大きい）
        let points = box_points();
        let mut image = project(&Rotation3::identity(), &Vector3::new(0.0, 0.0, 1.0), &points);
        image[0] = Point2::new(400.0, -350.0);
        image[4] = Point2::new(-380.0, 300.0);
        let solver = PnpSolver::new(SolverOptions {
            max_reprojection_error: 2.0,
            ..SolverOptions::default()
        });
        let err = solver.solve_correspondences(&image, &points, FOCAL).unwrap_err();
        assert!(matches!(err, PoseLiftError::DegeneratePointConfiguration(_)));
    }

    #[test]
    fn test_correspondences_apply_exclusion_and_centering() {
        let template = RigidBodyTemplate::new(box_points()[..5].to_vec());
        let pose = Pose::<RigidFivePoint>::new(
            (0..5).map(|i| Keypoint::new(i, 100.0 + i as f64, 50.0, 0.9)).collect(),
            0.9,
            Size::new(200.0, 100.0),
        )
        .unwrap();

        let (image, object) = correspondences(&pose, Size::new(200.0, 100.0), &template, &[1, 3]);
        assert_eq!(image.len(), 3);
        assert_eq!(object.len(), 3);
        assert_eq!(image[1], Point2::new(2.0, 0.0));
        // テンプレートは (x, -y, -z)
        assert_eq!(object[1], Point3::new(0.1, -0.05, -0.02));
    }
}
