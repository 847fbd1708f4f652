// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型与检测结果定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::RgbImage;

/// 推理后端
///
/// 后端只负责把图像变成原始检测结果（源图像素坐标），
/// 阈值、数量上限与排序由 [`crate::detector::ObjectDetector`] 统一处理。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&mut self, image: &RgbImage) -> Result<Vec<Detection>, Self::Error>;
}

/// 模型资源加载器，由 [`crate::detector::ObjectDetector::initialize`] 调用一次
pub trait LoadModel {
  type Model: Model;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(self, options: &DetectorOptions) -> Result<Self::Model, Self::Error>;
}

/// 边界框，单位为源图像像素
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }
}

impl std::fmt::Display for BoundingBox {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "[{:.0},{:.0}][{:.0},{:.0}]",
      self.left, self.top, self.right, self.bottom
    )
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
  pub label: String,
  pub score: f32,
}

impl Category {
  pub fn new(label: impl Into<String>, score: f32) -> Self {
    Self {
      label: label.into(),
      score,
    }
  }
}

/// 一个检测到的物体，`categories` 按置信度降序排列
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub categories: Vec<Category>,
}

impl Detection {
  pub fn new(bbox: BoundingBox, categories: Vec<Category>) -> Self {
    Self { bbox, categories }
  }

  pub fn top_category(&self) -> Option<&Category> {
    self.categories.first()
  }

  pub fn top_score(&self) -> f32 {
    self.top_category().map(|c| c.score).unwrap_or(0.0)
  }
}

mod labels;
mod options;
pub use self::labels::{LabelMap, LabelMapError};
pub use self::options::{DetectorOptions, OptionsError};

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxDetector, OnnxDetectorBuilder, OnnxDetectorError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn top_category_is_first() {
    let det = Detection::new(
      BoundingBox::new(0.0, 0.0, 10.0, 10.0),
      vec![Category::new("cat", 0.9), Category::new("dog", 0.1)],
    );
    assert_eq!(det.top_category().map(|c| c.label.as_str()), Some("cat"));
    assert_eq!(det.top_score(), 0.9);
  }

  #[test]
  fn empty_categories_score_zero() {
    let det = Detection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), vec![]);
    assert!(det.top_category().is_none());
    assert_eq!(det.top_score(), 0.0);
  }

  #[test]
  fn bbox_display() {
    let bbox = BoundingBox::new(10.0, 20.0, 110.0, 220.0);
    assert_eq!(bbox.to_string(), "[10,20][110,220]");
    assert_eq!(bbox.width(), 100.0);
    assert_eq!(bbox.height(), 200.0);
  }
}
