// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use kanjian::{
  FromUrl,
  app::App,
  detector::ObjectDetector,
  input::{LinePicker, ListPicker},
  model::{DetectorOptions, OnnxDetectorBuilder},
  output::{Annotator, SaveImageFileOutput},
  task::CancelToken,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输出路径: {}", args.output);
  info!("最大结果数: {}", args.max_results);
  info!("置信度阈值: {}", args.score_threshold);

  let options = DetectorOptions::default()
    .max_results(args.max_results)
    .score_threshold(args.score_threshold)
    .num_threads(args.threads)
    .category_allowlist(args.allow)
    .category_denylist(args.deny);

  let builder = OnnxDetectorBuilder::new(args.model.clone())
    .labels_file(args.labels.clone())
    .input_size(args.input_width, args.input_height);

  // 模型或标签加载失败不退出，后续检测请求会被拒绝
  let detector = ObjectDetector::initialize(builder, options);
  if let Err(e) = &detector {
    eprintln!("目标检测模型加载失败: {}", e);
  }

  let annotator = Annotator::default().with_font_override(args.font.as_deref());
  let output = SaveImageFileOutput::from_url(&args.output)?;

  let cancel = CancelToken::default();
  let handler_cancel = cancel.clone();
  ctrlc::set_handler(move || {
    warn!("收到中断信号，取消当前任务...");
    handler_cancel.cancel();
    // 标准输入可能仍阻塞在读取上
    std::thread::spawn(|| {
      std::thread::sleep(Duration::from_secs(3));
      warn!("强制退出程序");
      std::process::exit(130);
    });
  })?;

  let mut app = App::new(detector, annotator, output, cancel);
  let report = |notice: &kanjian::app::Notice| println!("{}", notice);

  if args.images.is_empty() {
    println!("请输入图像路径（空行取消，Ctrl-D 退出）:");
    let stdin = std::io::stdin();
    let mut picker = LinePicker::new(stdin.lock());
    app.run(&mut picker, report);
  } else {
    let mut picker = ListPicker::new(args.images);
    app.run(&mut picker, report);
  }

  app.shutdown();
  Ok(())
}
