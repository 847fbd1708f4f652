// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/options.rs - 检测器选项
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

use thiserror::Error;

use crate::model::Category;

const DEFAULT_MAX_RESULTS: usize = 5;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, PartialEq)]
pub enum OptionsError {
  #[error("最大结果数必须大于 0")]
  ZeroMaxResults,
  #[error("置信度阈值必须在 [0, 1] 区间内, 实际为 {0}")]
  ThresholdOutOfRange(f32),
  #[error("推理线程数必须大于 0")]
  ZeroThreads,
  #[error("类别白名单与黑名单不能同时设置")]
  AllowAndDenyList,
}

/// 检测器选项，启动时设置一次
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOptions {
  pub max_results: usize,
  pub score_threshold: f32,
  pub num_threads: Option<usize>,
  pub category_allowlist: Vec<String>,
  pub category_denylist: Vec<String>,
}

impl Default for DetectorOptions {
  fn default() -> Self {
    Self {
      max_results: DEFAULT_MAX_RESULTS,
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      num_threads: None,
      category_allowlist: Vec::new(),
      category_denylist: Vec::new(),
    }
  }
}

impl DetectorOptions {
  pub fn max_results(mut self, max_results: usize) -> Self {
    self.max_results = max_results;
    self
  }

  pub fn score_threshold(mut self, score_threshold: f32) -> Self {
    self.score_threshold = score_threshold;
    self
  }

  pub fn num_threads(mut self, num_threads: Option<usize>) -> Self {
    self.num_threads = num_threads;
    self
  }

  pub fn category_allowlist(mut self, labels: Vec<String>) -> Self {
    self.category_allowlist = labels;
    self
  }

  pub fn category_denylist(mut self, labels: Vec<String>) -> Self {
    self.category_denylist = labels;
    self
  }

  pub fn validate(&self) -> Result<(), OptionsError> {
    if self.max_results == 0 {
      return Err(OptionsError::ZeroMaxResults);
    }
    // NaN 也会落在这里
    if !(0.0..=1.0).contains(&self.score_threshold) {
      return Err(OptionsError::ThresholdOutOfRange(self.score_threshold));
    }
    if self.num_threads == Some(0) {
      return Err(OptionsError::ZeroThreads);
    }
    if !self.category_allowlist.is_empty() && !self.category_denylist.is_empty() {
      return Err(OptionsError::AllowAndDenyList);
    }
    Ok(())
  }

  /// 类别是否通过白名单/黑名单过滤
  pub fn accepts(&self, category: &Category) -> bool {
    if !self.category_allowlist.is_empty() {
      return self.category_allowlist.iter().any(|l| *l == category.label);
    }
    !self.category_denylist.iter().any(|l| *l == category.label)
  }
}
