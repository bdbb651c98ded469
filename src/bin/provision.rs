// 该文件是 Biaozhu （标注） 项目的一部分。
// src/bin/provision.rs - 预先下载并解压检测模型
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
use tracing::info;

use biaozhu::config::AppConfig;
use biaozhu::pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径（TOML）
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 覆盖配置中的工作目录
  #[arg(long, value_name = "DIR")]
  pub work_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
  biaozhu::init_tracing();

  let args = Args::parse();
  let mut config = AppConfig::load(args.config.as_deref())?;
  if let Some(work_dir) = args.work_dir {
    config.workspace.work_dir = work_dir;
  }
  config.validate()?;

  info!("模型地址: {}", config.model.archive_url);
  let now = std::time::Instant::now();
  let model_path = Pipeline::from_config(config)?.provision()?;
  info!("模型就绪，耗时: {:.2?}", now.elapsed());
  println!("{}", model_path.display());

  Ok(())
}
