// 该文件是 Yanxing （雁行） 项目的一部分。
// src/decoder.rs - 视频解码
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
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, PoisonError, RwLock},
};

use rand::{Rng, RngCore};
use thiserror::Error;

use crate::{
  config::{ConfigError, DecodingBackend},
  frame::{DecodedClip, FrameError},
  sampling::TemporalSample,
};

#[cfg(feature = "frame_directory")]
mod frame_directory;
#[cfg(feature = "frame_directory")]
pub use self::frame_directory::{FrameDirectory, FrameDirectoryDecoder};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_decoder;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_decoder::{GStreamerContainer, GStreamerDecodeError, GStreamerDecoder};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("帧组装错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("{0} 不是可识别的视频")]
  NotAVideo(PathBuf),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 解码错误: {0}")]
  GStreamerError(#[from] GStreamerDecodeError),
}

/// 单次解码请求
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeRequest {
  pub sampling_rate: usize,
  pub num_frames: usize,
  pub temporal: TemporalSample,
  pub num_ensemble_views: usize,
  pub target_fps: f64,
  /// 短边上限，0 表示不限制
  pub max_spatial_scale: u32,
}

/// 每个视频的解码元数据，由解码器写入，用于加速后续解码
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMeta {
  pub frame_count: Option<usize>,
  pub fps: Option<f64>,
  pub width: Option<u32>,
  pub height: Option<u32>,
}

impl VideoMeta {
  pub fn is_empty(&self) -> bool {
    *self == VideoMeta::default()
  }
}

pub type VideoMetaHandle = Arc<Mutex<VideoMeta>>;

/// 按语料索引划分的解码元数据缓存
///
/// 每个索引独占一个槽位，不同索引之间互不影响。重复写入同一索引得到相同结果。
#[derive(Debug, Default)]
pub struct VideoMetaCache {
  slots: RwLock<HashMap<usize, VideoMetaHandle>>,
}

impl VideoMetaCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get_or_create(&self, index: usize) -> VideoMetaHandle {
    if let Some(slot) = self
      .slots
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&index)
    {
      return slot.clone();
    }
    self
      .slots
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(index)
      .or_default()
      .clone()
  }

  /// 读取某个索引当前的元数据副本
  pub fn snapshot(&self, index: usize) -> Option<VideoMeta> {
    self
      .slots
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&index)
      .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
  }

  pub fn len(&self) -> usize {
    self
      .slots
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 视频解码器
///
/// `open` 获取容器，`decode` 按请求采样。`decode` 返回 `Ok(None)` 表示该视频
/// 无法提供所需片段（格式不支持、长度不足等），调用方按可恢复失败处理。
pub trait VideoDecoder: Send + Sync {
  type Container;

  fn open(&self, path: &Path, multithread: bool) -> Result<Self::Container, DecodeError>;

  fn decode(
    &self,
    container: &mut Self::Container,
    request: &DecodeRequest,
    meta: &mut VideoMeta,
    rng: &mut dyn RngCore,
  ) -> Result<Option<DecodedClip>, DecodeError>;
}

/// 在 `[start, end]` 上生成 `n` 个等间距点
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
  match n {
    0 => Vec::new(),
    1 => vec![start],
    _ => {
      let step = (end - start) / (n - 1) as f64;
      (0..n).map(|i| start + step * i as f64).collect()
    }
  }
}

/// 计算片段在原视频中的帧号
///
/// 视频帧数少于 `num_frames` 时返回 `None`。
pub fn sample_frame_indices(
  video_size: usize,
  fps: f64,
  request: &DecodeRequest,
  rng: &mut dyn RngCore,
) -> Option<Vec<usize>> {
  if video_size == 0 || video_size < request.num_frames {
    return None;
  }
  let last = (video_size - 1) as f64;
  let (start, end) = match request.temporal {
    TemporalSample::Uniform => (0.0, last),
    temporal => {
      let clip_size =
        request.sampling_rate as f64 * request.num_frames as f64 / request.target_fps * fps;
      let delta = (video_size as f64 - clip_size).max(0.0);
      let start = match temporal {
        TemporalSample::Fixed(view) => delta * view as f64 / request.num_ensemble_views.max(1) as f64,
        _ => rng.gen_range(0.0..=delta),
      };
      (start, start + clip_size - 1.0)
    }
  };
  Some(
    linspace(start, end, request.num_frames)
      .into_iter()
      .map(|i| i.clamp(0.0, last) as usize)
      .collect(),
  )
}

/// 解码器包装，按配置选择后端
pub enum DecoderWrapper {
  #[cfg(feature = "frame_directory")]
  FrameDirectory(FrameDirectoryDecoder),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerDecoder),
}

pub enum ContainerWrapper {
  #[cfg(feature = "frame_directory")]
  FrameDirectory(FrameDirectory),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerContainer),
}

impl DecoderWrapper {
  #[cfg_attr(not(feature = "frame_directory"), allow(unused_variables))]
  pub fn from_backend(backend: DecodingBackend, default_fps: f64) -> Result<Self, ConfigError> {
    match backend {
      #[cfg(feature = "frame_directory")]
      DecodingBackend::Frames => Ok(DecoderWrapper::FrameDirectory(
        FrameDirectoryDecoder::new(default_fps),
      )),
      #[cfg(feature = "gstreamer_input")]
      DecodingBackend::GStreamer => Ok(DecoderWrapper::GStreamer(GStreamerDecoder::new())),
      #[allow(unreachable_patterns)]
      other => Err(ConfigError::UnsupportedBackend(format!(
        "{:?} (未启用对应的 feature)",
        other
      ))),
    }
  }
}

impl VideoDecoder for DecoderWrapper {
  type Container = ContainerWrapper;

  fn open(&self, path: &Path, multithread: bool) -> Result<Self::Container, DecodeError> {
    match self {
      #[cfg(feature = "frame_directory")]
      DecoderWrapper::FrameDirectory(decoder) => decoder
        .open(path, multithread)
        .map(ContainerWrapper::FrameDirectory),
      #[cfg(feature = "gstreamer_input")]
      DecoderWrapper::GStreamer(decoder) => decoder
        .open(path, multithread)
        .map(ContainerWrapper::GStreamer),
    }
  }

  fn decode(
    &self,
    container: &mut Self::Container,
    request: &DecodeRequest,
    meta: &mut VideoMeta,
    rng: &mut dyn RngCore,
  ) -> Result<Option<DecodedClip>, DecodeError> {
    match (self, container) {
      #[cfg(feature = "frame_directory")]
      (DecoderWrapper::FrameDirectory(decoder), ContainerWrapper::FrameDirectory(container)) => {
        decoder.decode(container, request, meta, rng)
      }
      #[cfg(feature = "gstreamer_input")]
      (DecoderWrapper::GStreamer(decoder), ContainerWrapper::GStreamer(container)) => {
        decoder.decode(container, request, meta, rng)
      }
      #[allow(unreachable_patterns)]
      _ => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::{SeedableRng, rngs::StdRng};

  fn request(temporal: TemporalSample) -> DecodeRequest {
    DecodeRequest {
      sampling_rate: 2,
      num_frames: 4,
      temporal,
      num_ensemble_views: 2,
      target_fps: 30.0,
      max_spatial_scale: 0,
    }
  }

  #[test]
  fn linspace_includes_both_ends() {
    assert_eq!(linspace(0.0, 6.0, 4), vec![0.0, 2.0, 4.0, 6.0]);
    assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);
    assert!(linspace(0.0, 1.0, 0).is_empty());
  }

  #[test]
  fn fixed_views_are_evenly_spaced() {
    let mut rng = StdRng::seed_from_u64(0);
    // clip_size = 2 * 4 / 30 * 30 = 8, delta = 92
    let first = sample_frame_indices(100, 30.0, &request(TemporalSample::Fixed(0)), &mut rng);
    assert_eq!(first, Some(vec![0, 2, 4, 7]));
    let second = sample_frame_indices(100, 30.0, &request(TemporalSample::Fixed(1)), &mut rng);
    assert_eq!(second, Some(vec![46, 48, 50, 53]));
  }

  #[test]
  fn uniform_covers_whole_video() {
    let mut rng = StdRng::seed_from_u64(0);
    let idx = sample_frame_indices(10, 30.0, &request(TemporalSample::Uniform), &mut rng);
    assert_eq!(idx, Some(vec![0, 3, 6, 9]));
  }

  #[test]
  fn random_window_stays_inside_video() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..50 {
      let idx = sample_frame_indices(20, 30.0, &request(TemporalSample::Random), &mut rng).unwrap();
      assert_eq!(idx.len(), 4);
      assert!(idx.iter().all(|i| *i < 20));
      assert!(idx.windows(2).all(|w| w[0] <= w[1]));
    }
  }

  #[test]
  fn too_short_video_yields_nothing() {
    let mut rng = StdRng::seed_from_u64(0);
    assert_eq!(
      sample_frame_indices(3, 30.0, &request(TemporalSample::Random), &mut rng),
      None
    );
    assert_eq!(
      sample_frame_indices(0, 30.0, &request(TemporalSample::Uniform), &mut rng),
      None
    );
  }

  #[test]
  fn meta_cache_slots_are_per_index() {
    let cache = VideoMetaCache::new();
    assert!(cache.snapshot(3).is_none());
    {
      let slot = cache.get_or_create(3);
      let mut meta = slot.lock().unwrap();
      meta.frame_count = Some(42);
    }
    let again = cache.get_or_create(3);
    assert_eq!(again.lock().unwrap().frame_count, Some(42));
    assert!(cache.get_or_create(4).lock().unwrap().is_empty());
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.snapshot(3).unwrap().frame_count, Some(42));
  }
}
