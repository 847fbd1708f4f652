// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 后台检测任务
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
  mpsc::{self, Receiver, RecvTimeoutError, Sender},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  detector::{DetectorError, ObjectDetector},
  input::{ImageFileInput, ImageFileInputError},
  model::{Detection, Model},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("图像加载错误: {0}")]
  ImageDecode(#[from] ImageFileInputError),
  #[error("{0}")]
  Detector(#[from] DetectorError),
  #[error("任务已取消")]
  Cancelled,
  #[error("检测线程已退出")]
  WorkerGone,
}

/// 取消标记，工作线程在推理前检查，消费方在应用结果前检查
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

pub type Ticket = u64;

struct Job {
  ticket: Ticket,
  url: Url,
}

/// 一次检测的结果，附带解码后的源图像供渲染使用
pub struct JobOutcome {
  pub ticket: Ticket,
  pub result: Result<(RgbImage, Vec<Detection>), PipelineError>,
}

/// 在独立线程上运行解码与检测，结果通过单消费者通道送回
pub struct DetectionWorker<M: Model + Send + 'static> {
  requests: Option<Sender<Job>>,
  results: Receiver<JobOutcome>,
  thread: Option<JoinHandle<()>>,
  detector: Arc<ObjectDetector<M>>,
  cancel: CancelToken,
  next_ticket: Ticket,
}

impl<M: Model + Send + 'static> DetectionWorker<M> {
  pub fn spawn(detector: ObjectDetector<M>, cancel: CancelToken) -> Self {
    let detector = Arc::new(detector);
    let (req_tx, req_rx) = mpsc::channel::<Job>();
    let (res_tx, res_rx) = mpsc::channel::<JobOutcome>();

    let worker_detector = Arc::clone(&detector);
    let worker_cancel = cancel.clone();
    let thread = thread::spawn(move || {
      info!("检测线程启动");
      for Job { ticket, url } in req_rx {
        let result = run_job(&worker_detector, &worker_cancel, &url);
        if res_tx.send(JobOutcome { ticket, result }).is_err() {
          warn!("结果接收方已关闭，检测线程退出");
          break;
        }
      }
      info!("检测线程退出");
    });

    Self {
      requests: Some(req_tx),
      results: res_rx,
      thread: Some(thread),
      detector,
      cancel,
      next_ticket: 0,
    }
  }

  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }

  /// 提交一张图像，返回本次任务的票据
  pub fn submit(&mut self, url: Url) -> Result<Ticket, PipelineError> {
    self.next_ticket += 1;
    let ticket = self.next_ticket;
    let sender = self.requests.as_ref().ok_or(PipelineError::WorkerGone)?;
    sender
      .send(Job { ticket, url })
      .map_err(|_| PipelineError::WorkerGone)?;
    debug!("提交检测任务 #{}", ticket);
    Ok(ticket)
  }

  /// 等待指定票据的结果；过期票据的结果与取消后的结果都会被丢弃
  pub fn wait(&self, ticket: Ticket) -> Result<(RgbImage, Vec<Detection>), PipelineError> {
    loop {
      if self.cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
      }
      let outcome = match self.results.recv_timeout(Duration::from_millis(50)) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => continue,
        Err(RecvTimeoutError::Disconnected) => return Err(PipelineError::WorkerGone),
      };
      if outcome.ticket != ticket {
        debug!("丢弃过期结果 #{}", outcome.ticket);
        continue;
      }
      if self.cancel.is_cancelled() {
        debug!("任务 #{} 已取消，丢弃结果", ticket);
        return Err(PipelineError::Cancelled);
      }
      return outcome.result;
    }
  }

  /// 关闭请求通道、等待线程结束，然后释放检测器句柄
  pub fn shutdown(mut self) {
    self.stop();
  }

  fn stop(&mut self) {
    self.requests.take();
    if let Some(thread) = self.thread.take() {
      if thread.join().is_err() {
        error!("检测线程异常退出");
      }
      self.detector.release();
    }
  }
}

impl<M: Model + Send + 'static> Drop for DetectionWorker<M> {
  fn drop(&mut self) {
    self.stop();
  }
}

fn run_job<M: Model>(
  detector: &ObjectDetector<M>,
  cancel: &CancelToken,
  url: &Url,
) -> Result<(RgbImage, Vec<Detection>), PipelineError> {
  let image = ImageFileInput::from_url(url)
    .inspect_err(|e| error!("无法加载图像 {}: {}", url, e))?
    .into_image();
  if cancel.is_cancelled() {
    return Err(PipelineError::Cancelled);
  }
  let detections = detector
    .detect(&image)
    .inspect_err(|e| error!("检测失败: {}", e))?;
  Ok((image, detections))
}
