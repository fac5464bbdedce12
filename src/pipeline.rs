use crate::camera::CameraIntrinsics;
use crate::config::PoseLiftingOptions;
use crate::error::PoseLiftError;
use crate::lifting::{PnpSolver, RigidBodyTemplate, ScnPose};
use crate::pose::{ImageMeta, Pose, Skeleton};
use crate::tracker::{filter_and_validate, KeypointSmoother, OrientationStabilizer};

/// 2D姿勢推定の結果
///
/// 推論器ごとの生の出力型から姿勢を取り出す。
pub trait PoseOutput<S: Skeleton> {
    fn pose(&self) -> Option<Pose<S>>;
}

impl<S: Skeleton> PoseOutput<S> for Pose<S> {
    fn pose(&self) -> Option<Pose<S>> {
        Some(self.clone())
    }
}

impl<S: Skeleton> PoseOutput<S> for Option<Pose<S>> {
    fn pose(&self) -> Option<Pose<S>> {
        self.clone()
    }
}

/// 外部の2Dキーポイント推定器
///
/// 同期呼び出し。失敗はそのまま `PoseLiftError::Prediction` として呼び出し側へ返る。
pub trait PosePredictor<S: Skeleton> {
    type Input: ?Sized;
    type Output: PoseOutput<S>;
    type Error: std::error::Error + Send + Sync + 'static;

    fn predict(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 2D推定 → 信頼度ゲート → 向き補正 → 3D推定 を1フレームずつ行う
///
/// 向き補正の状態はこのインスタンスが持つ。カメラ/セッションごとに1つ作る。
pub struct RigidBodyPoseLifter<S: Skeleton, P: PosePredictor<S>> {
    predictor: P,
    template: RigidBodyTemplate,
    stabilizer: OrientationStabilizer<S>,
    smoother: Option<KeypointSmoother>,
}

impl<S: Skeleton, P: PosePredictor<S>> RigidBodyPoseLifter<S, P> {
    /// テンプレートの点数がレイアウトのキーポイント数と一致しなければエラー
    pub fn new(predictor: P, template: RigidBodyTemplate) -> Result<Self, PoseLiftError> {
        let stabilizer = OrientationStabilizer::new(None)?;
        let expected = stabilizer.layout().keypoint_count();
        if template.len() != expected {
            return Err(PoseLiftError::TemplateMismatch {
                template: template.len(),
                layout: expected,
            });
        }
        Ok(Self {
            predictor,
            template,
            stabilizer,
            smoother: None,
        })
    }

    pub fn template(&self) -> &RigidBodyTemplate {
        &self.template
    }

    pub fn stabilizer(&self) -> &OrientationStabilizer<S> {
        &self.stabilizer
    }

    /// 向き補正と平滑化の状態を捨てる
    pub fn reset(&mut self) -> Result<(), PoseLiftError> {
        self.stabilizer = OrientationStabilizer::new(self.stabilizer.flip_threshold_degrees())?;
        if let Some(smoother) = &mut self.smoother {
            smoother.reset();
        }
        Ok(())
    }

    /// 推論して、ゲートと向き補正を通した姿勢と生の推論結果を返す
    pub fn run_2d(
        &mut self,
        image: &P::Input,
        options: &PoseLiftingOptions,
    ) -> Result<(Pose<S>, P::Output), PoseLiftError> {
        let output = self
            .predictor
            .predict(image)
            .map_err(|e| PoseLiftError::Prediction(Box::new(e)))?;
        self.process_2d_result(output, options)
    }

    /// 推論済みの結果にゲートと向き補正をかける
    ///
    /// 棄却されたフレームは向き補正の状態を更新しない。
    pub fn process_2d_result(
        &mut self,
        output: P::Output,
        options: &PoseLiftingOptions,
    ) -> Result<(Pose<S>, P::Output), PoseLiftError> {
        self.sync_options(options);

        let raw = output.pose().ok_or(PoseLiftError::NoPoseDetected)?;
        let smoothed = match &mut self.smoother {
            Some(smoother) => smoother.apply(&raw),
            None => raw,
        };
        let accepted = filter_and_validate(smoothed, options)?;
        let oriented = self.stabilizer.orient(accepted);
        Ok((oriented, output))
    }

    /// 向き補正済みの姿勢から3D姿勢を推定
    ///
    /// キーポイントは元画像の向きに戻してから使う。焦点距離は `camera` の fx。
    pub fn infer_3d(
        &self,
        pose: &Pose<S>,
        image: &ImageMeta,
        camera: &CameraIntrinsics,
        options: &PoseLiftingOptions,
    ) -> Result<ScnPose, PoseLiftError> {
        let original = pose.rotated_to_original(image);
        let solver = PnpSolver::new(options.solver);
        let result = solver.solve(
            &original,
            image.original_size,
            camera.focal_length_x(),
            &self.template,
            &options.excluded_keypoint_indices,
        );
        match &result {
            Ok(scn) => tracing::debug!(distance = scn.distance(), "3D pose solved"),
            Err(e) => tracing::debug!("3D pose failed: {}", e),
        }
        result
    }

    fn sync_options(&mut self, options: &PoseLiftingOptions) {
        self.stabilizer.set_flip_threshold(options.flip_threshold_degrees);

        let current = self.smoother.as_ref().map(|s| *s.options());
        if current != options.smoothing {
            let count = self.stabilizer.layout().keypoint_count();
            self.smoother = options.smoothing.map(|o| KeypointSmoother::new(o, count));
        }
    }
}
