// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/picker.rs - 图像选择
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

use std::io::BufRead;

use tracing::warn;
use url::Url;

const CANCEL_WORD: &str = "cancel";

#[derive(Debug, Clone, PartialEq)]
pub enum PickEvent {
  Picked(Url),
  Cancelled,
}

/// 用户的一次图像选择动作，返回 `None` 表示会话结束
pub trait ImagePicker {
  fn pick(&mut self) -> Option<PickEvent>;
}

/// 把一行输入解释为选择动作：空行或 `cancel` 视为取消，
/// 能解析为 URL 的原样使用，其余按本地路径处理。
pub fn parse_pick(line: &str) -> PickEvent {
  let line = line.trim();
  if line.is_empty() || line.eq_ignore_ascii_case(CANCEL_WORD) {
    return PickEvent::Cancelled;
  }

  // Windows 盘符会被当成单字母 scheme
  if let Ok(url) = Url::parse(line)
    && url.scheme().len() > 1
  {
    return PickEvent::Picked(url);
  }

  let path = std::path::Path::new(line);
  let absolute = if path.is_absolute() {
    path.to_path_buf()
  } else {
    match std::env::current_dir() {
      Ok(dir) => dir.join(path),
      Err(_) => path.to_path_buf(),
    }
  };

  match Url::from_file_path(&absolute) {
    Ok(url) => PickEvent::Picked(url),
    Err(()) => {
      warn!("无法解析图像路径: {}", line);
      PickEvent::Cancelled
    }
  }
}

/// 从文本流逐行读取选择
pub struct LinePicker<R> {
  reader: R,
}

impl<R: BufRead> LinePicker<R> {
  pub fn new(reader: R) -> Self {
    Self { reader }
  }
}

impl<R: BufRead> ImagePicker for LinePicker<R> {
  fn pick(&mut self) -> Option<PickEvent> {
    let mut line = String::new();
    match self.reader.read_line(&mut line) {
      Ok(0) => None,
      Ok(_) => Some(parse_pick(&line)),
      Err(e) => {
        warn!("读取输入失败: {}", e);
        None
      }
    }
  }
}

/// 依次给出预先确定的 URL
pub struct ListPicker {
  urls: std::vec::IntoIter<Url>,
}

impl ListPicker {
  pub fn new(urls: Vec<Url>) -> Self {
    Self {
      urls: urls.into_iter(),
    }
  }
}

impl ImagePicker for ListPicker {
  fn pick(&mut self) -> Option<PickEvent> {
    self.urls.next().map(PickEvent::Picked)
  }
}
