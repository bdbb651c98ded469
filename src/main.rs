// 该文件是 Biaozhu （标注） 项目的一部分。
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use biaozhu::config::AppConfig;
use biaozhu::pipeline::{InferenceOutcome, Pipeline, PipelineError};

/// Biaozhu 目标检测标注工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径（TOML）
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 覆盖配置中的置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub min_score: Option<f32>,

  /// 覆盖配置中的工作目录
  #[arg(long, value_name = "DIR")]
  pub work_dir: Option<PathBuf>,

  /// 直接处理该路径下的 JPEG 文件，不复制到上传目录
  #[arg(long)]
  pub in_place: bool,

  /// 输入 JPEG 图像
  #[arg(value_name = "IMAGE")]
  pub input: PathBuf,
}

fn main() -> Result<()> {
  biaozhu::init_tracing();

  let args = Args::parse();

  let mut config = AppConfig::load(args.config.as_deref())?;
  if let Some(min_score) = args.min_score {
    config.render.min_score = min_score;
  }
  if let Some(work_dir) = args.work_dir {
    config.workspace.work_dir = work_dir;
  }
  config.validate()?;
  info!("配置:\n{}", config);

  let pipeline = Pipeline::from_config(config)?;

  let outcome = if args.in_place {
    pipeline.process_image(&args.input)
  } else {
    let bytes = std::fs::read(&args.input)?;
    let file_name = args
      .input
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();
    pipeline.process_upload(&bytes, &file_name)
  };

  match outcome {
    Ok(outcome) => {
      match &outcome.inference {
        InferenceOutcome::Detections(annotations) => {
          info!("共标注 {} 个目标: {}", annotations.len(), outcome.output_path.display());
        }
        InferenceOutcome::Unavailable(reason) => {
          error!("未生成标注图像: {}", reason);
        }
      }
      println!("{}", outcome.output_name);
      Ok(())
    }
    Err(PipelineError::InvalidInput) => {
      println!("{}", PipelineError::InvalidInput);
      Ok(())
    }
    Err(e) => Err(e.into()),
  }
}
