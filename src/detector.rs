// 该文件是 Kanjian （看见） 项目的一部分。
// src/detector.rs - 目标检测器
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

use std::sync::Mutex;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::model::{Detection, DetectorOptions, LoadModel, Model, OptionsError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("检测器选项无效: {0}")]
  InvalidOptions(#[from] OptionsError),
  #[error("模型加载错误: {0}")]
  ModelLoad(#[source] BoxError),
  #[error("检测器句柄无效")]
  HandleInvalid,
  #[error("检测失败: {0}")]
  Detection(#[source] BoxError),
}

/// 检测器适配器
///
/// 持有唯一的推理句柄；`detect` 调用在句柄锁上串行执行，
/// `release` 也要先拿到同一把锁，因此不会与进行中的推理竞争。
pub struct ObjectDetector<M: Model> {
  handle: Mutex<Option<M>>,
  options: DetectorOptions,
}

impl<M: Model> ObjectDetector<M> {
  pub fn initialize<L>(loader: L, options: DetectorOptions) -> Result<Self, DetectorError>
  where
    L: LoadModel<Model = M>,
  {
    options.validate()?;
    info!(
      "初始化检测器: 最大结果数 {}, 置信度阈值 {}",
      options.max_results, options.score_threshold
    );

    let model = loader.load(&options).map_err(|e| {
      error!("模型加载失败: {}", e);
      DetectorError::ModelLoad(Box::new(e))
    })?;
    info!("检测器初始化完成");

    Ok(Self {
      handle: Mutex::new(Some(model)),
      options,
    })
  }

  pub fn options(&self) -> &DetectorOptions {
    &self.options
  }

  pub fn is_released(&self) -> bool {
    match self.handle.lock() {
      Ok(guard) => guard.is_none(),
      Err(_) => true,
    }
  }

  /// 检测图像中的物体
  ///
  /// 结果已按阈值过滤、按置信度降序排列且不超过 `max_results` 个；
  /// 没有物体达到阈值时返回空列表。
  pub fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    let mut guard = self.handle.lock().map_err(|_| {
      error!("检测器句柄锁已损坏");
      DetectorError::HandleInvalid
    })?;
    let model = guard.as_mut().ok_or_else(|| {
      warn!("检测器已释放，拒绝检测请求");
      DetectorError::HandleInvalid
    })?;

    let now = std::time::Instant::now();
    let raw = model
      .infer(image)
      .map_err(|e| DetectorError::Detection(Box::new(e)))?;
    let elapsed = now.elapsed();
    drop(guard);

    let candidates = raw.len();
    let detections = self.postprocess(raw);
    info!(
      "推理完成，耗时: {:.2?}, 检测到 {} 个物体",
      elapsed,
      detections.len()
    );
    debug!("候选 {} 个，保留 {} 个", candidates, detections.len());

    Ok(detections)
  }

  fn postprocess(&self, raw: Vec<Detection>) -> Vec<Detection> {
    let mut detections: Vec<Detection> = raw
      .into_iter()
      .filter_map(|mut det| {
        det.categories.retain(|c| self.options.accepts(c));
        det
          .categories
          .sort_by(|a, b| b.score.total_cmp(&a.score));
        match det.top_category() {
          Some(top) if top.score >= self.options.score_threshold => Some(det),
          _ => None,
        }
      })
      .collect();

    detections.sort_by(|a, b| b.top_score().total_cmp(&a.top_score()));
    detections.truncate(self.options.max_results);
    detections
  }

  /// 释放推理句柄，重复调用无副作用
  pub fn release(&self) {
    let mut guard = match self.handle.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    if guard.take().is_some() {
      info!("检测器句柄已释放");
    }
  }
}

impl<M: Model> Drop for ObjectDetector<M> {
  fn drop(&mut self) {
    self.release();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, Category};
  use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc,
  };
  use std::thread;
  use std::time::Duration;

  #[derive(Debug, Error)]
  #[error("scripted failure")]
  struct ScriptedError;

  struct Scripted {
    output: Vec<Detection>,
    fail: bool,
  }

  impl Model for Scripted {
    type Error = ScriptedError;

    fn infer(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
      if self.fail {
        self.fail = false;
        return Err(ScriptedError);
      }
      Ok(self.output.clone())
    }
  }

  struct Loader(Result<Scripted, ScriptedError>);

  impl LoadModel for Loader {
    type Model = Scripted;
    type Error = ScriptedError;

    fn load(self, _options: &DetectorOptions) -> Result<Scripted, ScriptedError> {
      self.0
    }
  }

  fn det(label: &str, score: f32) -> Detection {
    Detection::new(
      BoundingBox::new(1.0, 1.0, 5.0, 5.0),
      vec![Category::new(label, score)],
    )
  }

  fn detector(output: Vec<Detection>, options: DetectorOptions) -> ObjectDetector<Scripted> {
    ObjectDetector::initialize(
      Loader(Ok(Scripted {
        output,
        fail: false,
      })),
      options,
    )
    .unwrap()
  }

  fn image() -> RgbImage {
    RgbImage::new(8, 8)
  }

  #[test]
  fn filters_sorts_and_caps() {
    let raw = vec![
      det("a", 0.55),
      det("b", 0.3),
      det("c", 0.95),
      det("d", 0.7),
      det("e", 0.6),
      det("f", 0.8),
      det("g", 0.5),
      det("h", 0.65),
    ];
    let detector = detector(raw, DetectorOptions::default());
    let result = detector.detect(&image()).unwrap();

    assert_eq!(result.len(), 5);
    assert!(result.iter().all(|d| d.top_score() >= 0.5));
    assert!(result.windows(2).all(|w| w[0].top_score() >= w[1].top_score()));
    let labels: Vec<_> = result.iter().map(|d| d.categories[0].label.as_str()).collect();
    assert_eq!(labels, ["c", "f", "d", "h", "e"]);
  }

  #[test]
  fn nothing_above_threshold_is_empty_not_error() {
    let detector = detector(vec![det("a", 0.1), det("b", 0.49)], DetectorOptions::default());
    assert!(detector.detect(&image()).unwrap().is_empty());
  }

  #[test]
  fn categories_sorted_within_detection() {
    let raw = vec![Detection::new(
      BoundingBox::new(0.0, 0.0, 2.0, 2.0),
      vec![Category::new("dog", 0.2), Category::new("cat", 0.9)],
    )];
    let detector = detector(raw, DetectorOptions::default());
    let result = detector.detect(&image()).unwrap();
    assert_eq!(result[0].categories[0].label, "cat");
    assert_eq!(result[0].categories[1].label, "dog");
  }

  #[test]
  fn empty_categories_dropped() {
    let raw = vec![Detection::new(BoundingBox::new(0.0, 0.0, 2.0, 2.0), vec![])];
    let detector = detector(raw, DetectorOptions::default().score_threshold(0.0));
    assert!(detector.detect(&image()).unwrap().is_empty());
  }

  #[test]
  fn denylist_removes_category() {
    let raw = vec![det("cat", 0.9), det("dog", 0.8)];
    let options = DetectorOptions::default().category_denylist(vec!["cat".into()]);
    let result = detector(raw, options).detect(&image()).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].categories[0].label, "dog");
  }

  #[test]
  fn detect_after_release_fails() {
    let detector = detector(vec![det("cat", 0.9)], DetectorOptions::default());
    assert_eq!(detector.detect(&image()).unwrap().len(), 1);
    detector.release();
    detector.release();
    assert!(detector.is_released());
    assert!(matches!(
      detector.detect(&image()),
      Err(DetectorError::HandleInvalid)
    ));
  }

  #[test]
  fn load_failure_reported() {
    let result = ObjectDetector::initialize(Loader(Err(ScriptedError)), DetectorOptions::default());
    assert!(matches!(result, Err(DetectorError::ModelLoad(_))));
  }

  #[test]
  fn invalid_options_rejected_before_load() {
    let result = ObjectDetector::initialize(
      Loader(Ok(Scripted {
        output: vec![],
        fail: false,
      })),
      DetectorOptions::default().max_results(0),
    );
    assert!(matches!(result, Err(DetectorError::InvalidOptions(_))));
  }

  #[test]
  fn inference_failure_keeps_handle() {
    let detector = ObjectDetector::initialize(
      Loader(Ok(Scripted {
        output: vec![det("cat", 0.9)],
        fail: true,
      })),
      DetectorOptions::default(),
    )
    .unwrap();
    assert!(matches!(
      detector.detect(&image()),
      Err(DetectorError::Detection(_))
    ));
    assert_eq!(detector.detect(&image()).unwrap().len(), 1);
  }

  /// 在推理中途阻塞，直到测试放行
  struct Gated {
    entered: mpsc::Sender<()>,
    proceed: mpsc::Receiver<()>,
    calls: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
  }

  impl Model for Gated {
    type Error = ScriptedError;

    fn infer(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let _ = self.entered.send(());
      let _ = self.proceed.recv();
      self.finished.fetch_add(1, Ordering::SeqCst);
      Ok(vec![det("cat", 0.9)])
    }
  }

  impl LoadModel for Gated {
    type Model = Gated;
    type Error = ScriptedError;

    fn load(self, _options: &DetectorOptions) -> Result<Gated, ScriptedError> {
      Ok(self)
    }
  }

  #[test]
  fn release_waits_for_inflight_detect() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (proceed_tx, proceed_rx) = mpsc::channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let detector = ObjectDetector::initialize(
      Gated {
        entered: entered_tx,
        proceed: proceed_rx,
        calls: Arc::clone(&calls),
        finished: Arc::clone(&finished),
      },
      DetectorOptions::default(),
    )
    .unwrap();

    let released = AtomicBool::new(false);
    let finished_at_release = AtomicUsize::new(0);

    thread::scope(|s| {
      let first = s.spawn(|| detector.detect(&image()));
      entered_rx.recv().unwrap();

      let second = s.spawn(|| detector.detect(&image()));
      let releaser = s.spawn(|| {
        detector.release();
        finished_at_release.store(finished.load(Ordering::SeqCst), Ordering::SeqCst);
        released.store(true, Ordering::SeqCst);
      });

      thread::sleep(Duration::from_millis(150));
      let calls_while_blocked = calls.load(Ordering::SeqCst);
      let released_while_blocked = released.load(Ordering::SeqCst);

      // 第二个请求若在释放前拿到锁，也需要放行一次
      proceed_tx.send(()).unwrap();
      proceed_tx.send(()).unwrap();

      assert_eq!(calls_while_blocked, 1);
      assert!(!released_while_blocked);

      assert_eq!(first.join().unwrap().unwrap().len(), 1);
      assert!(matches!(
        second.join().unwrap(),
        Ok(_) | Err(DetectorError::HandleInvalid)
      ));
      releaser.join().unwrap();
    });

    assert!(released.load(Ordering::SeqCst));
    assert!(finished_at_release.load(Ordering::SeqCst) >= 1);
    assert!(matches!(
      detector.detect(&image()),
      Err(DetectorError::HandleInvalid)
    ));
  }
}
