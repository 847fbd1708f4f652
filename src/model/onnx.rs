// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/onnx.rs - ONNX 检测模型后端
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

use image::{RgbImage, imageops::FilterType};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  model::{
    BoundingBox, Category, Detection, DetectorOptions, LabelMap, LabelMapError, LoadModel, Model,
  },
  url_to_path,
};

const ONNX_SCHEME: &str = "onnx";

// EfficientDet-Lite2 输入尺寸
const DEFAULT_INPUT_W: u32 = 448;
const DEFAULT_INPUT_H: u32 = 448;
// boxes, classes, scores, count
const SSD_NUM_OUTPUTS: usize = 4;

#[derive(Error, Debug)]
pub enum OnnxDetectorError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("标签文件错误: {0}")]
  LabelError(#[from] LabelMapError),
}

/// 模型资源描述，所有校验与读取都推迟到 [`LoadModel::load`]，
/// 这样资源有问题时只是检测不可用，而不是整个程序退出
pub struct OnnxDetectorBuilder {
  model_url: Url,
  labels_path: Option<PathBuf>,
  labels: Option<LabelMap>,
  input_w: u32,
  input_h: u32,
}

impl OnnxDetectorBuilder {
  pub fn new(model_url: Url) -> Self {
    Self {
      model_url,
      labels_path: None,
      labels: None,
      input_w: DEFAULT_INPUT_W,
      input_h: DEFAULT_INPUT_H,
    }
  }

  pub fn labels_file(mut self, path: Option<PathBuf>) -> Self {
    self.labels_path = path;
    self
  }

  pub fn labels(mut self, labels: LabelMap) -> Self {
    self.labels = Some(labels);
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_w = width;
    self.input_h = height;
    self
  }

  fn model_path(&self) -> Result<PathBuf, OnnxDetectorError> {
    if self.model_url.scheme() != ONNX_SCHEME {
      error!("模型路径方案错误: {}", self.model_url);
      return Err(OnnxDetectorError::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 '{}'",
        ONNX_SCHEME,
        self.model_url.scheme()
      )));
    }
    Ok(url_to_path(&self.model_url))
  }

  fn resolve_labels(&mut self) -> Result<LabelMap, OnnxDetectorError> {
    if let Some(path) = &self.labels_path {
      return Ok(LabelMap::from_file(path)?);
    }
    Ok(self.labels.take().unwrap_or_else(|| {
      warn!("未指定标签文件，类别名称将显示为 ???");
      LabelMap::default()
    }))
  }

  pub fn build(mut self, options: &DetectorOptions) -> Result<OnnxDetector, OnnxDetectorError> {
    let model_path = self.model_path()?;
    let labels = self.resolve_labels()?;

    info!("加载模型文件: {}", model_path.display());
    let model_data = std::fs::read(&model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if let Some(threads) = options.num_threads {
      builder = builder.with_intra_threads(threads)?;
    }
    let session = builder.commit_from_memory(&model_data)?;

    let num_inputs = session.inputs.len();
    let num_outputs = session.outputs.len();
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    if num_inputs != 1 {
      error!("预期模型输入数量为 1, 实际为 {}", num_inputs);
      return Err(OnnxDetectorError::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        num_inputs
      )));
    }
    if num_outputs != SSD_NUM_OUTPUTS {
      error!(
        "预期模型输出数量为 {}, 实际为 {}",
        SSD_NUM_OUTPUTS, num_outputs
      );
      return Err(OnnxDetectorError::ModelInvalid(format!(
        "预期模型输出数量为 {}, 实际为 {}",
        SSD_NUM_OUTPUTS, num_outputs
      )));
    }
    info!("模型加载完成");

    Ok(OnnxDetector {
      session,
      labels,
      input_w: self.input_w,
      input_h: self.input_h,
    })
  }
}

impl LoadModel for OnnxDetectorBuilder {
  type Model = OnnxDetector;
  type Error = OnnxDetectorError;

  fn load(self, options: &DetectorOptions) -> Result<Self::Model, Self::Error> {
    self.build(options)
  }
}

/// 带后处理头的 SSD 类检测模型（如 EfficientDet-Lite）
///
/// 输入为 `uint8 [1, H, W, 3]`，输出依次为
/// `boxes [1, N, 4]`（归一化的 `ymin, xmin, ymax, xmax`）、
/// `classes [1, N]`、`scores [1, N]` 与 `count [1]`。
pub struct OnnxDetector {
  session: Session,
  labels: LabelMap,
  input_w: u32,
  input_h: u32,
}

struct RawOutput {
  boxes: Vec<f32>,
  classes: Vec<f32>,
  scores: Vec<f32>,
  count: usize,
}

impl OnnxDetector {
  fn preprocess(&self, image: &RgbImage) -> Vec<u8> {
    let resized = image::imageops::resize(image, self.input_w, self.input_h, FilterType::Triangle);
    resized.into_raw()
  }

  fn run(&mut self, data: Vec<u8>) -> Result<RawOutput, OnnxDetectorError> {
    let shape = [1usize, self.input_h as usize, self.input_w as usize, 3];
    let tensor = Tensor::from_array((shape, data))?;

    debug!("执行模型推理");
    let outputs = self.session.run(ort::inputs![tensor])?;

    let (box_shape, boxes) = outputs[0].try_extract_tensor::<f32>()?;
    let (_, classes) = outputs[1].try_extract_tensor::<f32>()?;
    let (_, scores) = outputs[2].try_extract_tensor::<f32>()?;
    let (_, count) = outputs[3].try_extract_tensor::<f32>()?;

    if box_shape.len() != 3 || box_shape[2] != 4 {
      return Err(OnnxDetectorError::ModelInvalid(format!(
        "边界框输出形状不符合预期: {:?}",
        &box_shape[..]
      )));
    }

    let available = (boxes.len() / 4).min(classes.len()).min(scores.len());
    let count = count
      .first()
      .map(|&c| (c.max(0.0) as usize).min(available))
      .unwrap_or(available);

    Ok(RawOutput {
      boxes: boxes.to_vec(),
      classes: classes.to_vec(),
      scores: scores.to_vec(),
      count,
    })
  }
}

impl Model for OnnxDetector {
  type Error = OnnxDetectorError;

  fn infer(&mut self, image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    let data = self.preprocess(image);
    let output = self.run(data)?;
    Ok(decode_output(&output, &self.labels, image.width(), image.height()))
  }
}

/// 把归一化的 SSD 输出换算成源图像像素坐标
fn decode_output(output: &RawOutput, labels: &LabelMap, width: u32, height: u32) -> Vec<Detection> {
  let (w, h) = (width as f32, height as f32);
  let mut items = Vec::with_capacity(output.count);

  for i in 0..output.count {
    let ymin = output.boxes[i * 4].clamp(0.0, 1.0);
    let xmin = output.boxes[i * 4 + 1].clamp(0.0, 1.0);
    let ymax = output.boxes[i * 4 + 2].clamp(0.0, 1.0);
    let xmax = output.boxes[i * 4 + 3].clamp(0.0, 1.0);
    let class_id = output.classes[i].max(0.0) as usize;

    items.push(Detection::new(
      BoundingBox::new(xmin * w, ymin * h, xmax * w, ymax * h),
      vec![Category::new(labels.label(class_id), output.scores[i])],
    ));
  }

  debug!("模型输出 {} 个候选物体", items.len());
  items
}

#[cfg(test)]
mod tests {
  use super::*;

  fn builder(url: &str) -> OnnxDetectorBuilder {
    OnnxDetectorBuilder::new(Url::parse(url).unwrap())
  }

  #[test]
  fn wrong_scheme_is_load_error() {
    let result = builder("file:///models/lite2.onnx").build(&DetectorOptions::default());
    assert!(matches!(result, Err(OnnxDetectorError::ModelPathError(_))));
  }

  #[test]
  fn missing_labels_file_is_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("onnx://{}", dir.path().join("lite2.onnx").display());
    let result = builder(&url)
      .labels_file(Some(dir.path().join("labels.txt")))
      .build(&DetectorOptions::default());
    assert!(matches!(result, Err(OnnxDetectorError::LabelError(_))));
  }

  #[test]
  fn missing_model_file_is_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("onnx://{}", dir.path().join("lite2.onnx").display());
    let result = builder(&url).build(&DetectorOptions::default());
    assert!(matches!(result, Err(OnnxDetectorError::ModelLoadError(_))));
  }

  #[test]
  fn decode_scales_boxes_to_source_pixels() {
    let labels: LabelMap = ["person", "cat"].into_iter().map(String::from).collect();
    let output = RawOutput {
      boxes: vec![0.25, 0.1, 0.75, 0.5, -0.2, 0.5, 0.5, 1.3, 0.0, 0.0, 1.0, 1.0],
      classes: vec![1.0, 7.0, 0.0],
      scores: vec![0.9, 0.6, 0.3],
      count: 2,
    };

    let detections = decode_output(&output, &labels, 200, 100);
    assert_eq!(detections.len(), 2);

    assert_eq!(detections[0].bbox, BoundingBox::new(20.0, 25.0, 100.0, 75.0));
    assert_eq!(detections[0].categories, vec![Category::new("cat", 0.9)]);

    // 越界坐标被截断，未知类别显示为 ???
    assert_eq!(detections[1].bbox, BoundingBox::new(100.0, 0.0, 200.0, 50.0));
    assert_eq!(detections[1].categories[0].label, "???");
  }
}
