// 该文件是 Kanjian （看见） 项目的一部分。
// src/app.rs - 选图、检测、显示的主流程
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
use tracing::{error, info, warn};

use crate::{
  detector::{DetectorError, ObjectDetector},
  input::{ImagePicker, PickEvent},
  model::Model,
  output::{AnnotatedImage, Annotator, Render},
  task::{CancelToken, DetectionWorker, PipelineError},
};

/// 每次选图动作之后给用户的提示
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
  Shown { detections: usize },
  NoObjects,
  Cancelled,
  DetectorUnavailable,
  Error(String),
}

impl std::fmt::Display for Notice {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Notice::Shown { detections } => write!(f, "检测到 {} 个物体", detections),
      Notice::NoObjects => write!(f, "未检测到物体"),
      Notice::Cancelled => write!(f, "已取消图像选择"),
      Notice::DetectorUnavailable => write!(f, "目标检测器未初始化"),
      Notice::Error(msg) => write!(f, "{}", msg),
    }
  }
}

/// 当前显示的内容：最近一次选中的源图像及其标注结果
#[derive(Debug, Default)]
pub struct Viewer {
  source: Option<RgbImage>,
  displayed: Option<AnnotatedImage>,
}

impl Viewer {
  pub fn source(&self) -> Option<&RgbImage> {
    self.source.as_ref()
  }

  pub fn displayed(&self) -> Option<&AnnotatedImage> {
    self.displayed.as_ref()
  }

  fn show(&mut self, source: RgbImage, annotated: AnnotatedImage) {
    self.source = Some(source);
    self.displayed = Some(annotated);
  }
}

pub struct App<M: Model + Send + 'static, O: Render> {
  worker: Option<DetectionWorker<M>>,
  annotator: Annotator,
  output: O,
  viewer: Viewer,
  cancel: CancelToken,
}

impl<M: Model + Send + 'static, O: Render> App<M, O> {
  /// 加载失败时应用仍可使用，只是所有检测请求都会被拒绝
  pub fn new(
    detector: Result<ObjectDetector<M>, DetectorError>,
    annotator: Annotator,
    output: O,
    cancel: CancelToken,
  ) -> Self {
    let worker = match detector {
      Ok(detector) => Some(DetectionWorker::spawn(detector, cancel.clone())),
      Err(e) => {
        error!("目标检测器加载失败: {}", e);
        None
      }
    };

    Self {
      worker,
      annotator,
      output,
      viewer: Viewer::default(),
      cancel,
    }
  }

  pub fn detector_available(&self) -> bool {
    self.worker.is_some()
  }

  pub fn viewer(&self) -> &Viewer {
    &self.viewer
  }

  pub fn output(&self) -> &O {
    &self.output
  }

  /// 处理一次选图动作，流程执行完毕才返回
  pub fn handle(&mut self, event: PickEvent) -> Notice {
    let notice = match event {
      PickEvent::Cancelled => Notice::Cancelled,
      PickEvent::Picked(url) => {
        info!("选中图像: {}", url);
        self.process(url)
      }
    };

    match &notice {
      Notice::Error(_) | Notice::DetectorUnavailable => warn!("{}", notice),
      _ => info!("{}", notice),
    }
    notice
  }

  fn process(&mut self, url: url::Url) -> Notice {
    let Some(worker) = self.worker.as_mut() else {
      return Notice::DetectorUnavailable;
    };

    let outcome = worker.submit(url).and_then(|ticket| worker.wait(ticket));
    let (source, detections) = match outcome {
      Ok(result) => result,
      Err(PipelineError::Cancelled) => return Notice::Cancelled,
      Err(PipelineError::Detector(DetectorError::HandleInvalid)) => {
        return Notice::DetectorUnavailable;
      }
      Err(PipelineError::ImageDecode(e)) => {
        return Notice::Error(format!("无法加载图像: {}", e));
      }
      Err(e) => return Notice::Error(format!("检测出错: {}", e)),
    };

    // 每次都从未修改的源图像重新绘制
    let annotated = self.annotator.render(&source, &detections);
    if let Err(e) = self.output.render_result(&annotated) {
      error!("显示结果失败: {}", e);
      return Notice::Error(format!("无法显示结果: {}", e));
    }

    // 检测框全部落在画面外时与没有检测结果一样处理
    let count = annotated.annotations.len();
    self.viewer.show(source, annotated);
    if count == 0 {
      Notice::NoObjects
    } else {
      Notice::Shown { detections: count }
    }
  }

  /// 持续处理选图动作，直到选择器结束或收到取消信号
  pub fn run<P: ImagePicker>(&mut self, picker: &mut P, mut on_notice: impl FnMut(&Notice)) {
    while !self.cancel.is_cancelled() {
      let Some(event) = picker.pick() else {
        break;
      };
      let notice = self.handle(event);
      on_notice(&notice);
    }
  }

  pub fn shutdown(mut self) {
    if let Some(worker) = self.worker.take() {
      worker.shutdown();
    }
    info!("应用退出");
  }
}
