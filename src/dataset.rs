// 该文件是 Yanxing （雁行） 项目的一部分。
// src/dataset.rs - 姿态引导的视频片段数据集
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

//! # 数据集
//!
//! 每次 [`Dataset::get`] 依次完成：
//!
//! 1. 由子索引解析采样参数；
//! 2. 带重试地解码片段，得到帧与实际采样的帧号；
//! 3. 按帧号对齐关节点；
//! 4. 对帧与关节点做联合的空间增强与时间重采样；
//! 5. 由关节点生成注意力掩码，并按调试选项替换；
//! 6. 加载可选的辅助特征。
//!
//! `Dataset` 是 `Send + Sync` 的，可被多个工作线程共享。

use ndarray::{Array4, ArrayD, Axis};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{Config, ConfigError, Mode},
  corpus::Corpus,
  decoder::{DecoderWrapper, VideoDecoder, VideoMeta, VideoMetaCache},
  features::{FeatureError, FeatureStore, NpyFeatureStore},
  fetch::{ClipFetcher, FetchError, RetryPolicy},
  mask::{AttentionMask, MaskError, MaskGeometry, MaskOverride, generate_mask},
  pose::{self, Keypoints, LcrNetJsonParser, PoseError, PoseParser},
  sampling::SamplingResolver,
  transform::{self, SpatialParams, TransformError},
};

#[derive(Error, Debug)]
pub enum DatasetError {
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("获取片段失败: {0}")]
  FetchError(#[from] FetchError),
  #[error("关节点错误: {0}")]
  PoseError(#[from] PoseError),
  #[error("增强失败: {0}")]
  TransformError(#[from] TransformError),
  #[error("掩码生成失败: {0}")]
  MaskError(#[from] MaskError),
  #[error("辅助特征加载失败: {0}")]
  FeatureError(#[from] FeatureError),
}

/// 单个样本
#[derive(Debug, Clone)]
pub struct Example {
  /// (C, T, H, W)，已归一化
  pub frames: Array4<f32>,
  pub attention_mask: AttentionMask,
  /// 与 `frames` 逐帧对应、处于裁剪后坐标系的关节点
  pub keypoints: Keypoints,
  pub label: i64,
  pub aux_features: Option<ArrayD<f32>>,
  /// 最终使用的索引，可能因重试被替换
  pub index: usize,
  /// 仅测试模式且未加载辅助特征时提供
  pub metadata: Option<VideoMeta>,
}

impl Example {
  /// (T, H, W)
  pub fn clip_shape(&self) -> (usize, usize, usize) {
    let (_, t, h, w) = self.frames.dim();
    (t, h, w)
  }
}

pub struct Dataset<D = DecoderWrapper, P = LcrNetJsonParser> {
  config: Config,
  mode: Mode,
  corpus: Corpus,
  resolver: SamplingResolver,
  policy: RetryPolicy,
  decoder: D,
  parser: P,
  features: Option<Box<dyn FeatureStore>>,
  meta_cache: VideoMetaCache,
  mask_override: MaskOverride,
}

fn ensemble_views(config: &Config) -> usize {
  if config.data.uniform_sampling {
    1
  } else {
    config.test.num_ensemble_views
  }
}

/// 语料每行展开的片段数，测试模式为 时间视角数 × 空间裁剪数
///
/// 启用均匀采样时只有一个时间视角。使用 `Dataset::with_collaborators` 时，
/// 传入的语料必须按此数目展开。
pub fn clips_per_line(config: &Config, mode: Mode) -> usize {
  match mode {
    Mode::Train | Mode::Val => 1,
    Mode::Test => ensemble_views(config) * config.test.num_spatial_crops,
  }
}

fn normalize_config(mut config: Config) -> Config {
  if ensemble_views(&config) != config.test.num_ensemble_views {
    info!(
      "启用均匀采样，test.num_ensemble_views 由 {} 改为 1",
      config.test.num_ensemble_views
    );
    config.test.num_ensemble_views = 1;
  }
  config
}

impl Dataset {
  /// 按配置构造数据集：读取 `<path_to_data_dir>/<mode>.csv`，选择解码后端，
  /// 并在 `experimental.features_path` 非空时加载辅助特征。
  pub fn new(config: Config, mode: Mode) -> Result<Self, DatasetError> {
    config.validate()?;
    let config = normalize_config(config);
    info!("构造 {} 数据集", mode);

    let corpus = Corpus::from_index_file(
      &config.index_file(mode),
      &config.data.path_label_separator,
      &config.data.path_prefix,
      clips_per_line(&config, mode),
    )?;
    let decoder = DecoderWrapper::from_backend(config.data.decoding_backend, config.data.target_fps)?;
    let features = NpyFeatureStore::from_config_path(&config.experimental.features_path)?
      .map(|store| Box::new(store) as Box<dyn FeatureStore>);

    Self::with_collaborators(config, mode, corpus, decoder, LcrNetJsonParser::new(), features)
  }
}

impl<D: VideoDecoder, P: PoseParser> Dataset<D, P> {
  /// 使用自定义的解码器、关节点解析器与特征存储构造数据集
  pub fn with_collaborators(
    config: Config,
    mode: Mode,
    corpus: Corpus,
    decoder: D,
    parser: P,
    features: Option<Box<dyn FeatureStore>>,
  ) -> Result<Self, DatasetError> {
    config.validate()?;
    let config = normalize_config(config);
    let expected = clips_per_line(&config, mode);
    if corpus.clips_per_line() != expected {
      return Err(
        ConfigError::Invalid(format!(
          "语料每行展开 {} 个片段, {} 模式需要 {} 个",
          corpus.clips_per_line(),
          mode,
          expected
        ))
        .into(),
      );
    }

    let mask_override = MaskOverride::from_config(&config.experimental.debug)?;
    if mask_override.is_active() {
      warn!("调试选项生效，注意力掩码将被替换为 {:?}", mask_override);
    }

    Ok(Self {
      resolver: SamplingResolver::new(mode, &config),
      policy: RetryPolicy::new(mode, config.num_retries),
      config,
      mode,
      corpus,
      decoder,
      parser,
      features,
      meta_cache: VideoMetaCache::new(),
      mask_override,
    })
  }

  pub fn len(&self) -> usize {
    self.corpus.len()
  }

  pub fn is_empty(&self) -> bool {
    self.corpus.is_empty()
  }

  pub fn mode(&self) -> Mode {
    self.mode
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn corpus(&self) -> &Corpus {
    &self.corpus
  }

  pub fn meta_cache(&self) -> &VideoMetaCache {
    &self.meta_cache
  }

  pub fn mask_override(&self) -> MaskOverride {
    self.mask_override
  }

  /// 使用线程本地随机源取样本
  pub fn get(&self, index: usize) -> Result<Example, DatasetError> {
    let mut rng = rand::thread_rng();
    self.get_with(index, None, &mut rng)
  }

  /// 取样本，`short_cycle_idx` 为多重网格训练的短周期阶段
  pub fn get_with(
    &self,
    index: usize,
    short_cycle_idx: Option<usize>,
    rng: &mut dyn RngCore,
  ) -> Result<Example, DatasetError> {
    let entry = self.corpus.get(index).ok_or(FetchError::OutOfRange {
      index,
      len: self.corpus.len(),
    })?;
    let params = self.resolver.resolve(entry.sub_index, short_cycle_idx);
    let sampling_rate = self.resolver.sampling_rate(rng);
    debug!("索引 {} 采样参数 {:?}, 采样率 {}", index, params, sampling_rate);

    let data = &self.config.data;
    let fetcher = ClipFetcher::new(
      &self.decoder,
      &self.corpus,
      &self.meta_cache,
      self.policy,
      self.config.data_loader.enable_multi_thread_decode,
      data.num_frames,
      self.config.test.num_ensemble_views,
      data.target_fps,
    );
    let fetched = fetcher.fetch(index, &params, sampling_rate, rng)?;
    let index = fetched.index;
    let entry = self.corpus.get(index).ok_or(FetchError::OutOfRange {
      index,
      len: self.corpus.len(),
    })?;

    let keypoints = pose::synchronize(&self.parser, &entry.pose_path, &fetched.clip)?;
    let (raw_frames, _, _) = fetched.clip.into_parts();

    let spatial = SpatialParams {
      spatial: params.spatial,
      min_scale: params.min_scale,
      max_scale: params.max_scale,
      crop_size: params.crop_size,
      random_flip: data.random_flip,
      inverse_uniform_sampling: data.inv_uniform_sample,
    };
    let (frames, keypoints) = transform::augment(
      &raw_frames,
      keypoints,
      &data.mean,
      &data.std,
      &spatial,
      data.num_frames,
      rng,
    )?;

    let geometry = MaskGeometry::new(
      self.config.mask.patch_size,
      frames.len_of(Axis(2)),
      frames.len_of(Axis(3)),
    )?;
    let attention_mask = generate_mask(
      &keypoints,
      &geometry,
      self.config.mask.granularity,
      self.config.mask.pose_inflation,
    )?;
    let attention_mask = self.mask_override.apply(attention_mask, rng);

    let aux_features = self
      .features
      .as_ref()
      .map(|store| store.load(&entry.video_identifier()))
      .transpose()?;

    let metadata = match (self.mode, &self.features) {
      (Mode::Test, None) => self.meta_cache.snapshot(index),
      _ => None,
    };

    Ok(Example {
      frames,
      attention_mask,
      keypoints,
      label: entry.label,
      aux_features,
      index,
      metadata,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    config::Granularity,
    decoder::{DecodeError, DecodeRequest},
    frame::DecodedClip,
    sampling::TemporalSample,
  };
  use ndarray::{Array2, Array3};
  use rand::{SeedableRng, rngs::StdRng};
  use std::path::{Path, PathBuf};

  /// 每个视频都有 32 帧 48x64 的灰色画面
  struct SyntheticDecoder;

  impl VideoDecoder for SyntheticDecoder {
    type Container = PathBuf;

    fn open(&self, path: &Path, _multithread: bool) -> Result<PathBuf, DecodeError> {
      Ok(path.to_path_buf())
    }

    fn decode(
      &self,
      _container: &mut PathBuf,
      request: &DecodeRequest,
      meta: &mut VideoMeta,
      rng: &mut dyn RngCore,
    ) -> Result<Option<DecodedClip>, DecodeError> {
      meta.frame_count = Some(32);
      meta.fps = Some(30.0);
      let Some(indices) = crate::decoder::sample_frame_indices(32, 30.0, request, rng) else {
        return Ok(None);
      };
      let frames = Array4::from_elem((indices.len(), 48, 64, 3), 128);
      Ok(Some(DecodedClip::new(frames, indices, (64, 48))?))
    }
  }

  /// 每帧一个位于画面中心的关节点
  struct CenterParser;

  impl PoseParser for CenterParser {
    fn parse(&self, _path: &Path) -> Result<Keypoints, PoseError> {
      let mut coords = Array3::zeros((32, 1, 2));
      coords.index_axis_mut(Axis(2), 0).fill(32.0);
      coords.index_axis_mut(Axis(2), 1).fill(24.0);
      Keypoints::new(coords, Array2::from_elem((32, 1), true))
    }
  }

  fn small_config() -> Config {
    let mut config = Config::default();
    config.data.num_frames = 4;
    config.data.sampling_rate = 2;
    config.data.train_jitter_scales = [32, 40];
    config.data.train_crop_size = 32;
    config.data.test_crop_size = 32;
    config.test.num_ensemble_views = 2;
    config.test.num_spatial_crops = 3;
    config.mask.patch_size = 16;
    config
  }

  fn dataset(config: Config, mode: Mode) -> Dataset<SyntheticDecoder, CenterParser> {
    let clips = clips_per_line(&config, mode);
    let corpus = Corpus::parse(
      "a.mp4 a.json 3\nb.mp4 b.json 5",
      Path::new("idx.csv"),
      " ",
      Path::new("/data"),
      clips,
    )
    .unwrap();
    Dataset::with_collaborators(config, mode, corpus, SyntheticDecoder, CenterParser, None).unwrap()
  }

  #[test]
  fn train_example_has_expected_shapes() {
    let ds = dataset(small_config(), Mode::Train);
    assert_eq!(ds.len(), 2);
    let mut rng = StdRng::seed_from_u64(0);
    let example = ds.get_with(1, None, &mut rng).unwrap();
    assert_eq!(example.frames.dim(), (3, 4, 32, 32));
    assert_eq!(example.label, 5);
    assert_eq!(example.index, 1);
    assert_eq!(example.keypoints.len(), 4);
    assert_eq!(example.attention_mask.shape(), &[4, 4, 1]);
    assert!(example.metadata.is_none());
    assert!(example.aux_features.is_none());
  }

  #[test]
  fn test_mode_expands_lines_and_keeps_metadata() {
    let ds = dataset(small_config(), Mode::Test);
    assert_eq!(ds.len(), 12);
    let mut rng = StdRng::seed_from_u64(0);
    let example = ds.get_with(7, None, &mut rng).unwrap();
    assert_eq!(example.label, 5);
    assert_eq!(example.metadata.unwrap().frame_count, Some(32));
    // 中心裁剪下中心关节点始终命中一个 patch
    assert_eq!(example.attention_mask.occupancy(), vec![1; 4]);
  }

  #[test]
  fn uniform_sampling_collapses_views() {
    let mut config = small_config();
    config.data.uniform_sampling = true;
    assert_eq!(clips_per_line(&config, Mode::Test), 3);
    let ds = dataset(config, Mode::Test);
    assert_eq!(ds.config().test.num_ensemble_views, 1);
    assert_eq!(ds.len(), 6);

    for sub_index in 0..3 {
      assert_eq!(ds.resolver.resolve(sub_index, None).temporal, TemporalSample::Uniform);
    }
    let mut rng = StdRng::seed_from_u64(0);
    let example = ds.get_with(4, None, &mut rng).unwrap();
    assert_eq!(example.label, 5);
    assert_eq!(example.frames.dim(), (3, 4, 32, 32));
  }

  #[test]
  fn short_cycle_crop_resizes_the_mask_grid() {
    let mut config = small_config();
    config.data.train_jitter_scales = [32, 48];
    config.multigrid.default_s = 32;
    config.multigrid.short_cycle_factors = [0.5, 1.0];
    let ds = dataset(config, Mode::Train);
    let mut rng = StdRng::seed_from_u64(0);
    let example = ds.get_with(0, Some(0), &mut rng).unwrap();
    assert_eq!(example.frames.dim(), (3, 4, 16, 16));
    assert_eq!(example.attention_mask.shape(), &[4, 1, 1]);
  }

  #[test]
  fn presence_granularity_and_fill_override() {
    let mut config = small_config();
    config.mask.granularity = Granularity::Presence;
    config.experimental.debug.mask_fill = Some(1);
    let ds = dataset(config, Mode::Val);
    let mut rng = StdRng::seed_from_u64(0);
    let example = ds.get_with(0, None, &mut rng).unwrap();
    assert_eq!(example.attention_mask.shape(), &[4, 4]);
    assert!(example.attention_mask.values().iter().all(|v| *v == 1));
  }

  #[test]
  fn invalid_fill_is_rejected_at_construction() {
    let mut config = small_config();
    config.experimental.debug.mask_fill = Some(3);
    let corpus = Corpus::parse("a b 1", Path::new("idx.csv"), " ", Path::new(""), 1).unwrap();
    let result =
      Dataset::with_collaborators(config, Mode::Train, corpus, SyntheticDecoder, CenterParser, None);
    assert!(matches!(
      result,
      Err(DatasetError::ConfigError(ConfigError::InvalidMaskFill(3)))
    ));
  }

  #[test]
  fn out_of_range_index_is_an_error() {
    let ds = dataset(small_config(), Mode::Train);
    let mut rng = StdRng::seed_from_u64(0);
    assert!(matches!(
      ds.get_with(2, None, &mut rng),
      Err(DatasetError::FetchError(FetchError::OutOfRange { .. }))
    ));
  }

  #[test]
  fn dataset_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Dataset>();
  }
}
