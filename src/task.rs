// 该文件是 Yanxing （雁行） 项目的一部分。
// src/task.rs - 取样任务
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Instant,
};

use rand::{RngCore, SeedableRng, rngs::StdRng};
use tracing::{info, warn};

use crate::{
  dataset::{Dataset, DatasetError, Example},
  decoder::VideoDecoder,
  output::Render,
  pose::PoseParser,
};

/// 可按索引取样本的数据源
pub trait ExampleSource: Sync {
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn fetch(&self, index: usize, rng: &mut dyn RngCore) -> Result<Example, DatasetError>;
}

impl<D: VideoDecoder, P: PoseParser> ExampleSource for Dataset<D, P> {
  fn len(&self) -> usize {
    Dataset::len(self)
  }

  fn fetch(&self, index: usize, rng: &mut dyn RngCore) -> Result<Example, DatasetError> {
    self.get_with(index, None, rng)
  }
}

pub trait Task<S, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, source: &S, output: O) -> Result<Self::Output, Self::Error>;
}

fn make_rng(seed: Option<u64>) -> StdRng {
  match seed {
    Some(seed) => StdRng::seed_from_u64(seed),
    None => StdRng::from_entropy(),
  }
}

/// 取一个样本并输出
#[derive(Debug, Clone, Copy)]
pub struct OneShotTask {
  index: usize,
  seed: Option<u64>,
}

impl OneShotTask {
  pub fn new(index: usize) -> Self {
    Self { index, seed: None }
  }

  pub fn with_seed(mut self, seed: Option<u64>) -> Self {
    self.seed = seed;
    self
  }
}

impl<S, RE, O> Task<S, O> for OneShotTask
where
  S: ExampleSource,
  RE: std::error::Error + Sync + Send + 'static,
  O: Render<Example, Error = RE>,
{
  type Output = Example;
  type Error = anyhow::Error;

  fn run_task(self, source: &S, output: O) -> Result<Example, Self::Error> {
    info!("开始任务，索引 {}", self.index);
    let mut rng = make_rng(self.seed);
    let now = Instant::now();
    let example = source.fetch(self.index, &mut rng)?;
    info!("取样完成，耗时: {:.2?}", now.elapsed());
    if example.index != self.index {
      warn!("索引 {} 被替换为 {}", self.index, example.index);
    }
    output.render_result(&example)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());
    Ok(example)
  }
}

/// 扫描结果
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanReport {
  pub total: usize,
  pub succeeded: usize,
  /// 成功但索引被替换的样本数
  pub substituted: usize,
  pub failed: Vec<(usize, String)>,
  pub interrupted: bool,
}

impl ScanReport {
  fn merge(&mut self, other: ScanReport) {
    self.succeeded += other.succeeded;
    self.substituted += other.substituted;
    self.failed.extend(other.failed);
    self.interrupted |= other.interrupted;
  }
}

/// 多线程遍历数据集，统计成功、替换与失败
#[derive(Debug, Clone)]
pub struct ScanTask {
  workers: usize,
  limit: Option<usize>,
  seed: Option<u64>,
  handle_ctrlc: bool,
}

impl Default for ScanTask {
  fn default() -> Self {
    Self {
      workers: 1,
      limit: None,
      seed: None,
      handle_ctrlc: true,
    }
  }
}

impl ScanTask {
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }

  pub fn with_limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }

  pub fn with_seed(mut self, seed: Option<u64>) -> Self {
    self.seed = seed;
    self
  }

  /// 是否安装 Ctrl-C 处理函数，进程内只能安装一次
  pub fn with_ctrlc(mut self, handle_ctrlc: bool) -> Self {
    self.handle_ctrlc = handle_ctrlc;
    self
  }

  fn scan_range<S, O>(
    source: &S,
    output: &O,
    range: std::ops::Range<usize>,
    rng: &mut dyn RngCore,
    stop: &AtomicBool,
  ) -> ScanReport
  where
    S: ExampleSource,
    O: Render<Example>,
    O::Error: std::fmt::Display,
  {
    let mut report = ScanReport::default();
    for index in range {
      if stop.load(Ordering::Relaxed) {
        report.interrupted = true;
        break;
      }
      match source.fetch(index, rng) {
        Ok(example) => {
          report.succeeded += 1;
          if example.index != index {
            report.substituted += 1;
          }
          if let Err(e) = output.render_result(&example) {
            warn!("索引 {} 输出失败: {}", index, e);
          }
        }
        Err(e) => {
          warn!("索引 {} 取样失败: {}", index, e);
          report.failed.push((index, e.to_string()));
        }
      }
    }
    report
  }
}

impl<S, O> Task<S, O> for ScanTask
where
  S: ExampleSource,
  O: Render<Example> + Sync,
  O::Error: std::fmt::Display,
{
  type Output = ScanReport;
  type Error = anyhow::Error;

  fn run_task(self, source: &S, output: O) -> Result<ScanReport, Self::Error> {
    let total = self.limit.map_or(source.len(), |limit| limit.min(source.len()));
    info!("开始扫描 {} 个样本，{} 个工作线程", total, self.workers);

    let stop = Arc::new(AtomicBool::new(false));
    if self.handle_ctrlc {
      let stop = stop.clone();
      ctrlc::set_handler(move || {
        info!("收到中断信号，处理完当前样本后退出...");
        stop.store(true, Ordering::Relaxed);
      })?;
    }

    let chunk = total.div_ceil(self.workers).max(1);
    let now = Instant::now();
    let partials = thread::scope(|scope| {
      let handles: Vec<_> = (0..self.workers)
        .map(|worker| {
          let range = (worker * chunk).min(total)..((worker + 1) * chunk).min(total);
          let seed = self.seed.map(|s| s.wrapping_add(worker as u64));
          let (stop, output) = (&stop, &output);
          scope.spawn(move || {
            let mut rng = make_rng(seed);
            Self::scan_range(source, output, range, &mut rng, stop)
          })
        })
        .collect();
      handles
        .into_iter()
        .map(|handle| {
          handle
            .join()
            .map_err(|_| anyhow::anyhow!("扫描工作线程异常退出"))
        })
        .collect::<Result<Vec<_>, _>>()
    })?;

    let mut report = ScanReport {
      total,
      ..ScanReport::default()
    };
    for partial in partials {
      report.merge(partial);
    }
    report.failed.sort_by_key(|(index, _)| *index);

    info!(
      "扫描完成，耗时: {:.2?}，成功 {}，替换 {}，失败 {}",
      now.elapsed(),
      report.succeeded,
      report.substituted,
      report.failed.len()
    );
    if report.interrupted {
      warn!("扫描被中断");
    }
    Ok(report)
  }
}
