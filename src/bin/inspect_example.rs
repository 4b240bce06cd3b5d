// 该文件是 Yanxing （雁行） 项目的一部分。
// src/bin/inspect_example.rs - 取单个样本并可视化
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
use url::Url;

use yanxing::{
  Config, Dataset, FromUrl, Mode,
  output::OutputWrapper,
  task::{OneShotTask, Task},
};

/// 取单个样本，打印其形状并可选地写出可视化结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: PathBuf,
  /// 数据集模式：train / val / test
  #[arg(long, value_name = "MODE")]
  pub mode: Mode,
  /// 样本索引
  #[arg(long, value_name = "N")]
  pub index: usize,
  /// 随机种子
  #[arg(long, value_name = "SEED")]
  pub seed: Option<u64>,
  /// 输出路径，例如 folder:///tmp/yanxing
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("配置文件: {}", args.config.display());
  info!("模式: {}", args.mode);

  let config = Config::from_json_file(&args.config)?;
  let (mean, std) = (config.data.mean.clone(), config.data.std.clone());
  let dataset = Dataset::new(config, args.mode)?;
  info!("数据集共 {} 个样本", dataset.len());

  let output_url = match &args.output {
    Some(url) => url.clone(),
    None => Url::parse("null:")?,
  };
  info!("输出路径: {}", output_url);
  let output = OutputWrapper::from_url(&output_url)?.with_normalization(&mean, &std);

  let example = OneShotTask::new(args.index)
    .with_seed(args.seed)
    .run_task(&dataset, output)?;

  let (t, h, w) = example.clip_shape();
  info!("标签: {}，最终索引: {}", example.label, example.index);
  info!("帧: {} 帧 {}x{}", t, w, h);
  info!(
    "掩码: {:?} {:?}，每帧占用 {:?}",
    example.attention_mask.granularity(),
    example.attention_mask.shape(),
    example.attention_mask.occupancy()
  );
  if let Some(features) = &example.aux_features {
    info!("辅助特征: {:?}", features.shape());
  }
  if let Some(meta) = &example.metadata {
    info!("视频元数据: {:?}", meta);
  }

  Ok(())
}
