use std::time::Instant;

use nalgebra::Point2;

use crate::config::SmoothingOptions;
use crate::pose::{Pose, Skeleton};

/// Fallback frame interval when two frames share a timestamp
const DEFAULT_DT: f64 = 1.0 / 30.0;

/// Low-pass filter component
struct LowPassFilter {
    prev: Option<f64>,
}

impl LowPassFilter {
    fn new() -> Self {
        Self { prev: None }
    }

    fn filter(&mut self, value: f64, alpha: f64) -> f64 {
        match self.prev {
            Some(prev) => {
                let result = alpha * value + (1.0 - alpha) * prev;
                self.prev = Some(result);
                result
            }
            None => {
                self.prev = Some(value);
                value
            }
        }
    }

    fn reset(&mut self) {
        self.prev = None;
    }
}

/// alpha = 1 / (1 + tau/Te), tau = 1/(2*pi*fc)
fn smoothing_factor(te: f64, cutoff: f64) -> f64 {
    let r = 2.0 * std::f64::consts::PI * cutoff * te;
    r / (r + 1.0)
}

/// One Euro Filter for a single scalar value
struct ScalarFilter {
    min_cutoff: f64,
    beta: f64,
    d_cutoff: f64,
    x_filter: LowPassFilter,
    dx_filter: LowPassFilter,
    prev_value: Option<f64>,
}

impl ScalarFilter {
    fn new(options: &SmoothingOptions) -> Self {
        Self {
            min_cutoff: options.min_cutoff,
            beta: options.beta,
            d_cutoff: options.derivative_cutoff,
            x_filter: LowPassFilter::new(),
            dx_filter: LowPassFilter::new(),
            prev_value: None,
        }
    }

    fn filter(&mut self, value: f64, dt: f64) -> f64 {
        // NaN は状態を汚さずそのまま返す
        if value.is_nan() {
            return value;
        }
        let dx = match self.prev_value {
            Some(prev) if dt > 0.0 => (value - prev) / dt,
            _ => 0.0,
        };
        self.prev_value = Some(value);

        let edx = self
            .dx_filter
            .filter(dx, smoothing_factor(dt, self.d_cutoff));
        let cutoff = self.min_cutoff + self.beta * edx.abs();
        self.x_filter.filter(value, smoothing_factor(dt, cutoff))
    }

    fn reset(&mut self) {
        self.x_filter.reset();
        self.dx_filter.reset();
        self.prev_value = None;
    }
}

/// キーポイント位置ごとの One Euro Filter
///
/// キーポイントのインデックスごとに x, y のフィルタを持つ。スコアは変更しない。
pub struct KeypointSmoother {
    options: SmoothingOptions,
    filters: Vec<[ScalarFilter; 2]>,
    last_time: Option<Instant>,
}

impl KeypointSmoother {
    pub fn new(options: SmoothingOptions, keypoint_count: usize) -> Self {
        Self {
            options,
            filters: (0..keypoint_count)
                .map(|_| [ScalarFilter::new(&options), ScalarFilter::new(&options)])
                .collect(),
            last_time: None,
        }
    }

    pub fn options(&self) -> &SmoothingOptions {
        &self.options
    }

    pub fn apply<S: Skeleton>(&mut self, pose: &Pose<S>) -> Pose<S> {
        self.apply_at(pose, Instant::now())
    }

    /// `now` をフレーム時刻として平滑化
    pub fn apply_at<S: Skeleton>(&mut self, pose: &Pose<S>, now: Instant) -> Pose<S> {
        let dt = match self.last_time {
            Some(t) => {
                let d = now.saturating_duration_since(t).as_secs_f64();
                if d > 0.0 { d } else { DEFAULT_DT }
            }
            None => DEFAULT_DT,
        };
        self.last_time = Some(now);

        let keypoints = pose
            .keypoints()
            .iter()
            .map(|kp| match self.filters.get_mut(kp.index) {
                Some([fx, fy]) => kp.with_position(Point2::new(
                    fx.filter(kp.position.x, dt),
                    fy.filter(kp.position.y, dt),
                )),
                None => *kp,
            })
            .collect();
        Pose::from_parts(keypoints, pose.score(), pose.bounds())
    }

    pub fn reset(&mut self) {
        for [fx, fy] in &mut self.filters {
            fx.reset();
            fy.reset();
        }
        self.last_time = None;
    }
}
