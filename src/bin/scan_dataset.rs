// 该文件是 Yanxing （雁行） 项目的一部分。
// src/bin/scan_dataset.rs - 遍历数据集并统计取样结果
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
use tracing::{info, warn};

use yanxing::{
  Config, Dataset, Mode,
  output::OutputWrapper,
  task::{ScanTask, Task},
};

/// 遍历数据集，报告成功、替换与失败的样本
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: PathBuf,
  /// 数据集模式：train / val / test
  #[arg(long, value_name = "MODE")]
  pub mode: Mode,
  /// 工作线程数，默认取 data_loader.num_workers
  #[arg(long, value_name = "N")]
  pub workers: Option<usize>,
  /// 最多扫描的样本数
  #[arg(long, value_name = "N")]
  pub limit: Option<usize>,
  /// 随机种子
  #[arg(long, value_name = "SEED")]
  pub seed: Option<u64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("配置文件: {}", args.config.display());
  info!("模式: {}", args.mode);

  let config = Config::from_json_file(&args.config)?;
  let workers = args.workers.unwrap_or(config.data_loader.num_workers);
  let dataset = Dataset::new(config, args.mode)?;

  let report = ScanTask::default()
    .with_workers(workers)
    .with_limit(args.limit)
    .with_seed(args.seed)
    .run_task(&dataset, OutputWrapper::Discard)?;

  info!(
    "共 {} 个样本：成功 {}，其中替换 {}，失败 {}",
    report.total,
    report.succeeded,
    report.substituted,
    report.failed.len()
  );
  for (index, reason) in &report.failed {
    warn!("索引 {}: {}", index, reason);
  }
  if report.interrupted {
    warn!("扫描未完成");
  }

  Ok(())
}
