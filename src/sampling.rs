// 该文件是 Yanxing （雁行） 项目的一部分。
// src/sampling.rs - 采样参数解析
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

use rand::Rng;

use crate::config::{Config, Mode};

/// 测试模式只有一个空间裁剪时使用的中心位置
const CENTER_SPATIAL_INDEX: usize = 1;

/// 时间采样方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalSample {
  /// 由解码器随机选择片段起点（-1）
  Random,
  /// 在整段视频上均匀采样（-2）
  Uniform,
  /// 第 n 个均匀分布的时间窗口
  Fixed(usize),
}

/// 空间采样方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialSample {
  /// 随机缩放、裁剪与翻转（-1）
  Random,
  /// 0/1/2：左/中/右（宽大于高）或 上/中/下（高大于宽）
  Fixed(usize),
}

/// 单次取数所用的采样参数，每次调用重新计算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingParams {
  pub temporal: TemporalSample,
  pub spatial: SpatialSample,
  pub min_scale: u32,
  pub max_scale: u32,
  pub crop_size: u32,
}

/// 采样参数解析器
///
/// `resolve` 是 (子索引, 模式, short cycle, 配置) 的纯函数。
#[derive(Debug, Clone)]
pub struct SamplingResolver {
  mode: Mode,
  num_spatial_crops: usize,
  train_jitter_scales: [u32; 2],
  train_crop_size: u32,
  test_crop_size: u32,
  short_cycle_crop_sizes: Option<[u32; 2]>,
  default_s: u32,
  uniform_sampling: bool,
  sampling_rate: usize,
  long_cycle_sampling_rate: usize,
}

impl SamplingResolver {
  pub fn new(mode: Mode, config: &Config) -> Self {
    Self {
      mode,
      num_spatial_crops: config.test.num_spatial_crops,
      train_jitter_scales: config.data.train_jitter_scales,
      train_crop_size: config.data.train_crop_size,
      test_crop_size: config.data.test_crop_size,
      short_cycle_crop_sizes: config.multigrid.short_cycle_crop_sizes(),
      default_s: config.multigrid.default_s,
      uniform_sampling: config.data.uniform_sampling,
      sampling_rate: config.data.sampling_rate,
      long_cycle_sampling_rate: config.multigrid.long_cycle_sampling_rate,
    }
  }

  pub fn mode(&self) -> Mode {
    self.mode
  }

  pub fn resolve(&self, sub_index: usize, short_cycle_idx: Option<usize>) -> SamplingParams {
    let mut params = match self.mode {
      Mode::Train | Mode::Val => self.resolve_training(short_cycle_idx),
      Mode::Test => self.resolve_test(sub_index),
    };
    if self.uniform_sampling {
      params.temporal = TemporalSample::Uniform;
    }
    params
  }

  fn resolve_training(&self, short_cycle_idx: Option<usize>) -> SamplingParams {
    let [mut min_scale, max_scale] = self.train_jitter_scales;
    let mut crop_size = self.train_crop_size;
    if let (Some(idx @ (0 | 1)), Some(sizes)) = (short_cycle_idx, self.short_cycle_crop_sizes) {
      crop_size = sizes[idx];
    }
    if self.default_s > 0 {
      // 缩小尺度等价于在采样网格上使用更大的跨度
      min_scale = (min_scale as f64 * crop_size as f64 / self.default_s as f64).round() as u32;
    }
    SamplingParams {
      temporal: TemporalSample::Random,
      spatial: SpatialSample::Random,
      min_scale,
      max_scale,
      crop_size,
    }
  }

  fn resolve_test(&self, sub_index: usize) -> SamplingParams {
    let temporal = TemporalSample::Fixed(sub_index / self.num_spatial_crops);
    if self.num_spatial_crops > 1 {
      // 测试是确定性的，不做尺度抖动
      SamplingParams {
        temporal,
        spatial: SpatialSample::Fixed(sub_index % self.num_spatial_crops),
        min_scale: self.test_crop_size,
        max_scale: self.test_crop_size,
        crop_size: self.test_crop_size,
      }
    } else {
      SamplingParams {
        temporal,
        spatial: SpatialSample::Fixed(CENTER_SPATIAL_INDEX),
        min_scale: self.train_jitter_scales[0],
        max_scale: self.train_jitter_scales[0],
        crop_size: self.test_crop_size,
      }
    }
  }

  /// 长周期阶段随机化时间采样率
  pub fn sampling_rate<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
    if self.long_cycle_sampling_rate > 0 {
      rng.gen_range(self.sampling_rate..=self.long_cycle_sampling_rate)
    } else {
      self.sampling_rate
    }
  }
}
