// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/labels.rs - 类别标签表
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

use std::path::Path;

use thiserror::Error;
use tracing::debug;

const UNKNOWN_LABEL: &str = "???";

#[derive(Error, Debug)]
pub enum LabelMapError {
  #[error("标签文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件为空")]
  Empty,
}

/// 类别序号到名称的映射，标签文件每行一个类别
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
  labels: Vec<String>,
}

impl LabelMap {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelMapError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let map = Self::parse(&text)?;
    debug!("加载 {} 个类别标签: {}", map.len(), path.as_ref().display());
    Ok(map)
  }

  pub fn parse(text: &str) -> Result<Self, LabelMapError> {
    // 空行也占一个序号
    let labels: Vec<String> = text.lines().map(|l| l.trim().to_string()).collect();
    if labels.iter().all(String::is_empty) {
      return Err(LabelMapError::Empty);
    }
    Ok(Self { labels })
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn label(&self, class_id: usize) -> &str {
    match self.labels.get(class_id) {
      Some(label) if !label.is_empty() => label,
      _ => UNKNOWN_LABEL,
    }
  }
}

impl FromIterator<String> for LabelMap {
  fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
    Self {
      labels: iter.into_iter().collect(),
    }
  }
}
