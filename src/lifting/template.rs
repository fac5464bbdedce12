use anyhow::{bail, Context, Result};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 追跡対象の剛体形状（キーポイントごとの3D座標）
///
/// 座標はテンプレート自身の座標系（y 上向き、z 手前向き）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyTemplate {
    points: Vec<Point3<f64>>,
}

impl RigidBodyTemplate {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Point3<f64>> {
        self.points.get(index)
    }

    /// 画像処理系の座標 (x, -y, -z) に変換した点
    pub fn vision_point(&self, index: usize) -> Option<Point3<f64>> {
        self.get(index).map(|p| Point3::new(p.x, -p.y, -p.z))
    }
}

pub fn save_template(path: impl AsRef<Path>, template: &RigidBodyTemplate) -> Result<()> {
    let json = serde_json::to_string_pretty(template)?;
    fs::write(path, json).context("Failed to write template file")?;
    Ok(())
}

pub fn load_template(path: impl AsRef<Path>) -> Result<RigidBodyTemplate> {
    let content = fs::read_to_string(path).context("Failed to read template file")?;
    let template: RigidBodyTemplate = serde_json::from_str(&content)?;
    if template.points.iter().any(|p| !p.coords.iter().all(|v| v.is_finite())) {
        bail!("Template contains non-finite coordinates");
    }
    Ok(template)
}
