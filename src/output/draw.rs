// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::Detection;

// 文本与边框常量
const LABEL_FONT_SIZE: f32 = 40.0;
const LABEL_BASELINE_OFFSET: i32 = 10;
const STROKE_WIDTH: u32 = 5;
const GOLDEN_ANGLE: f32 = 137.507_77;

// 内置字体 DejaVu Sans
const BUNDLED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum FontError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 画在图上的一个检测框及其标签
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
  pub rect: Rect,
  pub color: Rgb<u8>,
  pub text: String,
  /// 文本左上角
  pub text_origin: (i32, i32),
}

/// 标注后的图像，源图像本身不被修改
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
  pub image: RgbImage,
  pub annotations: Vec<Annotation>,
}

impl AnnotatedImage {
  pub fn is_empty(&self) -> bool {
    self.annotations.is_empty()
  }
}

/// 标注渲染器
pub struct Annotator {
  font: Option<FontArc>,
  font_size: f32,
  stroke_width: u32,
  baseline_offset: i32,
}

impl Default for Annotator {
  fn default() -> Self {
    let font = match FontArc::try_from_slice(BUNDLED_FONT) {
      Ok(font) => Some(font),
      Err(e) => {
        warn!("无法加载内置字体: {}", e);
        None
      }
    };

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      stroke_width: STROKE_WIDTH,
      baseline_offset: LABEL_BASELINE_OFFSET,
    }
  }
}

impl Annotator {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  pub fn stroke_width(mut self, stroke_width: u32) -> Self {
    self.stroke_width = stroke_width.max(1);
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, FontError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)?;
    debug!("加载字体: {}", path.as_ref().display());
    Ok(font)
  }

  pub fn without_font(mut self) -> Self {
    self.font = None;
    self
  }

  /// 用给定字体文件替换内置字体，加载失败时保留内置字体
  pub fn with_font_override(self, path: Option<&Path>) -> Self {
    let Some(path) = path else {
      return self;
    };
    match Self::load_font(path) {
      Ok(font) => self.with_font(font),
      Err(e) => {
        warn!("无法加载字体 {}，继续使用内置字体: {}", path.display(), e);
        self
      }
    }
  }

  /// 第 `index` 个检测框的颜色，在色环上按黄金角分布
  pub fn color_for(index: usize) -> Rgb<u8> {
    let hue = (index as f32 * GOLDEN_ANGLE) % 360.0;
    hsv_to_rgb(hue, 0.8, 0.9)
  }

  /// 在源图像的副本上绘制检测框与标签
  pub fn render(&self, source: &RgbImage, detections: &[Detection]) -> AnnotatedImage {
    let mut image = source.clone();
    let mut annotations = Vec::with_capacity(detections.len());

    for detection in detections {
      let Some(category) = detection.top_category() else {
        continue;
      };
      let color = Self::color_for(annotations.len());
      let Some(rect) = clamp_rect(&image, detection) else {
        debug!("检测框超出图像范围，跳过: {}", detection.bbox);
        continue;
      };

      self.draw_box(&mut image, rect, color);

      let text = label_text(&category.label, category.score);
      let text_origin = self.draw_label(&mut image, rect, color, &text);
      debug!("绘制: {} 于 {}", text, detection.bbox);

      annotations.push(Annotation {
        rect,
        color,
        text,
        text_origin,
      });
    }

    AnnotatedImage { image, annotations }
  }

  fn draw_box(&self, image: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    // 边框向内加粗
    for t in 0..self.stroke_width {
      let inset = 2 * t;
      if rect.width() <= inset || rect.height() <= inset {
        break;
      }
      let inner = Rect::at(rect.left() + t as i32, rect.top() + t as i32)
        .of_size(rect.width() - inset, rect.height() - inset);
      draw_hollow_rect_mut(image, inner, color);
    }
  }

  fn draw_label(&self, image: &mut RgbImage, rect: Rect, color: Rgb<u8>, text: &str) -> (i32, i32) {
    let scale = PxScale::from(self.font_size);
    let ascent = match &self.font {
      Some(font) => font.as_scaled(scale).ascent(),
      None => self.font_size,
    };

    // 基线位于框顶上方固定距离处
    let baseline = rect.top() - self.baseline_offset;
    let x = rect.left();
    let y = (baseline - ascent.ceil() as i32).max(0);

    if let Some(font) = &self.font {
      draw_text_mut(image, color, x, y, scale, font, text);
    }
    (x, y)
  }
}

pub fn label_text(label: &str, score: f32) -> String {
  format!("{} ({:.2}%)", label, score * 100.0)
}

fn clamp_rect(image: &RgbImage, detection: &Detection) -> Option<Rect> {
  let (w, h) = (image.width() as i32, image.height() as i32);
  if w == 0 || h == 0 {
    return None;
  }
  let bbox = &detection.bbox;

  let x_min = (bbox.left.floor() as i32).clamp(0, w - 1);
  let y_min = (bbox.top.floor() as i32).clamp(0, h - 1);
  let x_max = (bbox.right.ceil() as i32).clamp(0, w - 1);
  let y_max = (bbox.bottom.ceil() as i32).clamp(0, h - 1);

  if x_min >= x_max || y_min >= y_max {
    return None;
  }

  Some(Rect::at(x_min, y_min).of_size((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32))
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
