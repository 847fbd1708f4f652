// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像到目录
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

use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{AnnotatedImage, Render},
  url_to_path,
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 把每次标注结果保存为 `<目录>/<时间戳>-<序号>.png`，
/// 并在旁边写一份同名 `.json` 检测记录（默认关闭，`?record=true` 开启）
pub struct SaveImageFileOutput {
  directory: PathBuf,
  record: bool,
  counter: u32,
  last_saved: Option<PathBuf>,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let record = uri
      .query_pairs()
      .any(|(k, v)| k == "record" && (v == "true" || v == "1"));

    Ok(Self::new(url_to_path(uri)).with_record(record))
  }
}

impl SaveImageFileOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      record: false,
      counter: 0,
      last_saved: None,
    }
  }

  pub fn with_record(mut self, record: bool) -> Self {
    self.record = record;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn last_saved(&self) -> Option<&Path> {
    self.last_saved.as_deref()
  }

  fn next_path(&mut self) -> PathBuf {
    self.counter = self.counter.wrapping_add(1);
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    self
      .directory
      .join(format!("{}-{:04}.png", stamp, self.counter))
  }

  fn write_record(&self, image: &AnnotatedImage, path: &Path) -> Result<(), SaveImageFileError> {
    let detections: Vec<_> = image
      .annotations
      .iter()
      .map(|a| {
        json!({
          "label": a.text,
          "rect": [a.rect.left(), a.rect.top(), a.rect.width(), a.rect.height()],
          "color": a.color.0,
          "text_origin": [a.text_origin.0, a.text_origin.1],
        })
      })
      .collect();
    let record = json!({
      "width": image.image.width(),
      "height": image.image.height(),
      "detections": detections,
    });
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_string_pretty(&record)?,
    )?;
    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&mut self, image: &AnnotatedImage) -> Result<(), Self::Error> {
    std::fs::create_dir_all(&self.directory)?;

    let path = self.next_path();
    image.image.save(&path)?;
    if self.record {
      self.write_record(image, &path)?;
    }
    info!("保存图像到文件: {}", path.display());

    self.last_saved = Some(path);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;
  use crate::model::{BoundingBox, Category, Detection};
  use crate::output::Annotator;

  #[test]
  fn scheme_checked() {
    let url = Url::parse("image:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn record_flag_from_query() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert!(!output.record);
    assert_eq!(output.directory(), Path::new("/tmp/out"));

    let url = Url::parse("folder:///tmp/out?record=true").unwrap();
    assert!(SaveImageFileOutput::from_url(&url).unwrap().record);
    let url = Url::parse("folder:///tmp/out?record=0").unwrap();
    assert!(!SaveImageFileOutput::from_url(&url).unwrap().record);
  }

  #[test]
  fn saves_image_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut output = SaveImageFileOutput::new(dir.path().join("nested")).with_record(true);

    let source = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
    let detection = Detection::new(
      BoundingBox::new(10.0, 30.0, 40.0, 60.0),
      vec![Category::new("cat", 0.9)],
    );
    let annotated = Annotator::default().render(&source, &[detection]);
    output.render_result(&annotated).unwrap();

    let saved = output.last_saved().unwrap().to_path_buf();
    let reloaded = image::open(&saved).unwrap().into_rgb8();
    assert_eq!(reloaded, annotated.image);

    let record: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(saved.with_extension("json")).unwrap())
        .unwrap();
    assert_eq!(record["detections"][0]["label"], "cat (90.00%)");
    assert_eq!(record["width"], 64);
  }

  #[test]
  fn successive_saves_do_not_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let mut output = SaveImageFileOutput::new(dir.path());
    let annotated = Annotator::default().render(&RgbImage::new(4, 4), &[]);

    output.render_result(&annotated).unwrap();
    let first = output.last_saved().unwrap().to_path_buf();
    output.render_result(&annotated).unwrap();
    let second = output.last_saved().unwrap().to_path_buf();

    assert_ne!(first, second);
    assert!(first.exists() && second.exists());
    assert!(!first.with_extension("json").exists());
  }
}
