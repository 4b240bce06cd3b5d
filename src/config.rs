// 该文件是 Yanxing （雁行） 项目的一部分。
// src/config.rs - 数据集配置
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

//! # 配置
//!
//! 配置文件为 JSON 格式，所有字段均有默认值，只需写出需要覆盖的部分：
//!
//! ```json
//! {
//!   "data": { "path_to_data_dir": "/data/smarthome", "num_frames": 8 },
//!   "test": { "num_ensemble_views": 2, "num_spatial_crops": 3 },
//!   "mask": { "granularity": "identity" }
//! }
//! ```

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use serde::Deserialize;
use thiserror::Error;

/// 配置错误
///
/// 配置错误总是致命的，在数据集构造时尽早抛出，不参与重试。
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("不支持的模式: {0}")]
  UnsupportedMode(String),
  #[error("不支持的解码后端: {0}")]
  UnsupportedBackend(String),
  #[error("读取文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("配置解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("索引文件不存在: {0}")]
  IndexFileMissing(PathBuf),
  #[error("索引文件 {path} 第 {line} 行格式错误: {reason}")]
  MalformedIndexLine {
    path: PathBuf,
    line: usize,
    reason: String,
  },
  #[error("索引文件 {0} 中没有任何条目")]
  EmptyIndex(PathBuf),
  #[error("帧尺寸 {height}x{width} 不能被 patch 大小 {patch_size} 整除")]
  PatchGrid {
    height: usize,
    width: usize,
    patch_size: usize,
  },
  #[error("{0} 不是 experimental.debug.mask_fill 的有效取值")]
  InvalidMaskFill(i64),
  #[error("experimental.debug.random_mask 与 experimental.debug.mask_fill 不能同时启用")]
  ConflictingMaskOverride,
  #[error("特征目录不存在: {0}")]
  FeaturePathMissing(PathBuf),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 数据集模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
  Train,
  Val,
  Test,
}

impl Mode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Mode::Train => "train",
      Mode::Val => "val",
      Mode::Test => "test",
    }
  }

  /// 训练与验证模式下允许随机采样与替换
  pub fn is_training_like(&self) -> bool {
    matches!(self, Mode::Train | Mode::Val)
  }
}

impl FromStr for Mode {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "train" => Ok(Mode::Train),
      "val" => Ok(Mode::Val),
      "test" => Ok(Mode::Test),
      other => Err(ConfigError::UnsupportedMode(other.to_string())),
    }
  }
}

impl fmt::Display for Mode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 注意力掩码的粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
  /// 仅记录 patch 中是否存在关节点（扁平变体）
  Presence,
  /// 记录 patch 中具体是哪个关节点
  #[default]
  Identity,
}

/// 解码后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecodingBackend {
  /// 以图像序列目录表示的视频
  #[default]
  Frames,
  /// GStreamer 解码
  GStreamer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
  pub path_to_data_dir: PathBuf,
  pub path_prefix: PathBuf,
  pub path_label_separator: String,
  pub num_frames: usize,
  pub sampling_rate: usize,
  pub target_fps: f64,
  pub train_jitter_scales: [u32; 2],
  pub train_crop_size: u32,
  pub test_crop_size: u32,
  pub mean: Vec<f32>,
  pub std: Vec<f32>,
  pub random_flip: bool,
  pub inv_uniform_sample: bool,
  pub uniform_sampling: bool,
  pub decoding_backend: DecodingBackend,
}

impl Default for DataConfig {
  fn default() -> Self {
    Self {
      path_to_data_dir: PathBuf::new(),
      path_prefix: PathBuf::new(),
      path_label_separator: " ".to_string(),
      num_frames: 8,
      sampling_rate: 8,
      target_fps: 30.0,
      train_jitter_scales: [256, 320],
      train_crop_size: 224,
      test_crop_size: 224,
      mean: vec![0.45, 0.45, 0.45],
      std: vec![0.225, 0.225, 0.225],
      random_flip: true,
      inv_uniform_sample: false,
      uniform_sampling: false,
      decoding_backend: DecodingBackend::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TestConfig {
  pub num_ensemble_views: usize,
  pub num_spatial_crops: usize,
}

impl Default for TestConfig {
  fn default() -> Self {
    Self {
      num_ensemble_views: 10,
      num_spatial_crops: 3,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MultigridConfig {
  pub short_cycle_factors: [f64; 2],
  pub default_s: u32,
  pub long_cycle_sampling_rate: usize,
}

impl MultigridConfig {
  /// 短周期阶段 0 与 1 的裁剪尺寸，`default_s` 为 0 时不启用短周期
  pub fn short_cycle_crop_sizes(&self) -> Option<[u32; 2]> {
    (self.default_s > 0).then(|| {
      self
        .short_cycle_factors
        .map(|factor| (factor * self.default_s as f64).round() as u32)
    })
  }
}

impl Default for MultigridConfig {
  fn default() -> Self {
    Self {
      short_cycle_factors: [0.5, std::f64::consts::FRAC_1_SQRT_2],
      default_s: 0,
      long_cycle_sampling_rate: 0,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataLoaderConfig {
  pub enable_multi_thread_decode: bool,
  pub num_workers: usize,
}

impl Default for DataLoaderConfig {
  fn default() -> Self {
    Self {
      enable_multi_thread_decode: false,
      num_workers: 4,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
  pub patch_size: usize,
  pub granularity: Granularity,
  pub pose_inflation: usize,
}

impl Default for MaskConfig {
  fn default() -> Self {
    Self {
      patch_size: 16,
      granularity: Granularity::default(),
      pose_inflation: 0,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
  pub random_mask: bool,
  pub mask_fill: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExperimentalConfig {
  /// 预计算特征目录，为空表示不加载
  pub features_path: PathBuf,
  pub debug: DebugConfig,
}

/// 数据集完整配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub data: DataConfig,
  pub test: TestConfig,
  pub multigrid: MultigridConfig,
  pub data_loader: DataLoaderConfig,
  pub mask: MaskConfig,
  pub experimental: ExperimentalConfig,
  pub num_retries: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      data: DataConfig::default(),
      test: TestConfig::default(),
      multigrid: MultigridConfig::default(),
      data_loader: DataLoaderConfig::default(),
      mask: MaskConfig::default(),
      experimental: ExperimentalConfig::default(),
      num_retries: 10,
    }
  }
}

impl Config {
  pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
    let config: Config = serde_json::from_str(s)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json_str(&content)
  }

  /// 索引文件路径：`<path_to_data_dir>/<mode>.csv`
  pub fn index_file(&self, mode: Mode) -> PathBuf {
    self
      .data
      .path_to_data_dir
      .join(format!("{}.csv", mode.as_str()))
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let data = &self.data;
    let [min_scale, max_scale] = data.train_jitter_scales;
    if min_scale == 0 || min_scale > max_scale {
      return Err(ConfigError::Invalid(format!(
        "data.train_jitter_scales 必须满足 0 < min <= max, 实际为 [{}, {}]",
        min_scale, max_scale
      )));
    }
    if data.train_crop_size == 0 || data.test_crop_size == 0 {
      return Err(ConfigError::Invalid("裁剪尺寸必须大于 0".to_string()));
    }
    if data.num_frames == 0 || data.sampling_rate == 0 {
      return Err(ConfigError::Invalid(
        "data.num_frames 与 data.sampling_rate 必须大于 0".to_string(),
      ));
    }
    if !(data.target_fps > 0.0) {
      return Err(ConfigError::Invalid("data.target_fps 必须大于 0".to_string()));
    }
    if data.mean.len() != 3 || data.std.len() != 3 {
      return Err(ConfigError::Invalid(
        "data.mean 与 data.std 必须各有 3 个通道值".to_string(),
      ));
    }
    if data.std.iter().any(|s| *s == 0.0) {
      return Err(ConfigError::Invalid("data.std 不能包含 0".to_string()));
    }
    if data.path_label_separator.is_empty() {
      return Err(ConfigError::Invalid(
        "data.path_label_separator 不能为空".to_string(),
      ));
    }
    if self.test.num_ensemble_views == 0 || self.test.num_spatial_crops == 0 {
      return Err(ConfigError::Invalid(
        "test.num_ensemble_views 与 test.num_spatial_crops 必须大于 0".to_string(),
      ));
    }
    let long_cycle = self.multigrid.long_cycle_sampling_rate;
    if long_cycle > 0 && long_cycle < data.sampling_rate {
      return Err(ConfigError::Invalid(format!(
        "multigrid.long_cycle_sampling_rate ({}) 不能小于 data.sampling_rate ({})",
        long_cycle, data.sampling_rate
      )));
    }
    if self.num_retries == 0 {
      return Err(ConfigError::Invalid("num_retries 必须大于 0".to_string()));
    }
    for crop in [data.train_crop_size, data.test_crop_size] {
      check_patch_grid(crop as usize, crop as usize, self.mask.patch_size)?;
    }
    for crop in self.multigrid.short_cycle_crop_sizes().into_iter().flatten() {
      if crop == 0 {
        return Err(ConfigError::Invalid(
          "multigrid.short_cycle_factors 与 default_s 得到的裁剪尺寸为 0".to_string(),
        ));
      }
      check_patch_grid(crop as usize, crop as usize, self.mask.patch_size)?;
    }
    Ok(())
  }
}

/// 检查帧尺寸能否被 patch 大小整除
pub fn check_patch_grid(height: usize, width: usize, patch_size: usize) -> Result<(), ConfigError> {
  if patch_size == 0 || height % patch_size != 0 || width % patch_size != 0 {
    return Err(ConfigError::PatchGrid {
      height,
      width,
      patch_size,
    });
  }
  Ok(())
}
