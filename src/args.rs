// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 命令行参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Kanjian 参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，例如 onnx:///models/lite2-detection.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 类别标签文件，每行一个类别
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 标签字体文件（TTF/OTF），未指定时尝试系统字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 输出目录，例如 folder:///tmp/kanjian
  #[arg(long, value_name = "OUTPUT", default_value = "folder:///tmp/kanjian")]
  pub output: Url,

  /// 最大检测结果数
  #[arg(long, default_value = "5", value_name = "COUNT")]
  pub max_results: usize,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub score_threshold: f32,

  /// 推理线程数
  #[arg(long, value_name = "COUNT")]
  pub threads: Option<usize>,

  /// 只保留这些类别
  #[arg(long, value_name = "LABEL", value_delimiter = ',')]
  pub allow: Vec<String>,

  /// 忽略这些类别
  #[arg(long, value_name = "LABEL", value_delimiter = ',')]
  pub deny: Vec<String>,

  /// 模型输入尺寸 宽
  #[arg(long, default_value = "448", value_name = "PIXELS")]
  pub input_width: u32,

  /// 模型输入尺寸 高
  #[arg(long, default_value = "448", value_name = "PIXELS")]
  pub input_height: u32,

  /// 待检测图像（image:// 或 file:// URL）；为空时从标准输入逐行读取路径，
  /// 空行表示取消本次选择
  #[arg(value_name = "IMAGE")]
  pub images: Vec<Url>,
}
