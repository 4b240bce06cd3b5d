// 该文件是 Yanxing （雁行） 项目的一部分。
// src/decoder/gstreamer_decoder.rs - GStreamer 视频解码
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

//! # GStreamer 解码后端
//!
//! 使用 `filesrc ! decodebin ! videoconvert ! appsink` 管道逐帧拉取 RGB 数据。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## Cargo 特性
//!
//! ```toml
//! [dependencies]
//! yanxing = { version = "0.1", features = ["gstreamer_input"] }
//! ```
//!
//! 元数据缓存中已有帧数与帧率时，只解码到所需的最后一帧为止。

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::{RgbImage, imageops::FilterType};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  decoder::{DecodeError, DecodeRequest, VideoDecoder, VideoMeta, sample_frame_indices},
  frame::DecodedClip,
};

#[derive(Error, Debug)]
pub enum GStreamerDecodeError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

pub struct GStreamerContainer {
  path: PathBuf,
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerContainer {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

/// 单帧拉取结果
struct PulledFrame {
  image: RgbImage,
  fps: Option<f64>,
}

impl GStreamerContainer {
  fn pull_frame(&self) -> Result<Option<PulledFrame>, GStreamerDecodeError> {
    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) if self.appsink.is_eos() => return Ok(None),
      Err(e) => return Err(GStreamerDecodeError::GStreamerBoolError(e)),
    };
    convert_sample_to_rgb(sample).map(Some)
  }
}

fn convert_sample_to_rgb(sample: gst::Sample) -> Result<PulledFrame, GStreamerDecodeError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerDecodeError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerDecodeError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerDecodeError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let fps = {
    let fraction = video_info.fps();
    (fraction.numer() > 0 && fraction.denom() > 0)
      .then(|| fraction.numer() as f64 / fraction.denom() as f64)
  };

  let map = buffer.map_readable().map_err(|e| {
    GStreamerDecodeError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerDecodeError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(width * height * 3);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      // 行按 stride 对齐，逐行拷贝
      for h in 0..height {
        let row = h * stride;
        pixels.extend_from_slice(&data[row..row + width * 3]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for h in 0..height {
        let row = h * stride;
        for w in 0..width {
          let src = row + w * 3;
          pixels.extend_from_slice(&[data[src + 2], data[src + 1], data[src]]);
        }
      }
    }
    _ => return Err(GStreamerDecodeError::UnsupportedFormat),
  }

  let image = RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| GStreamerDecodeError::PipelineError("无法创建 RGB 图像".to_string()))?;
  Ok(PulledFrame { image, fps })
}

fn limit_short_side(image: RgbImage, max_spatial_scale: u32) -> RgbImage {
  let (width, height) = image.dimensions();
  let short_side = width.min(height);
  if max_spatial_scale == 0 || short_side <= max_spatial_scale {
    return image;
  }
  let ratio = max_spatial_scale as f64 / short_side as f64;
  image::imageops::resize(
    &image,
    ((width as f64 * ratio).round() as u32).max(1),
    ((height as f64 * ratio).round() as u32).max(1),
    FilterType::Triangle,
  )
}

#[derive(Default)]
pub struct GStreamerDecoder;

impl GStreamerDecoder {
  pub fn new() -> Self {
    Self
  }

  fn pipeline_description(path: &Path, multithread: bool) -> String {
    // n-threads=0 由 videoconvert 自行决定线程数
    let threads = if multithread { 0 } else { 1 };
    format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert n-threads={} ! video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=8",
      path.display(),
      threads
    )
  }
}

impl VideoDecoder for GStreamerDecoder {
  type Container = GStreamerContainer;

  fn open(&self, path: &Path, multithread: bool) -> Result<Self::Container, DecodeError> {
    if !path.is_file() {
      return Err(DecodeError::NotAVideo(path.to_path_buf()));
    }
    gst::init().map_err(GStreamerDecodeError::from)?;

    let description = Self::pipeline_description(path, multithread);
    debug!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)
      .map_err(GStreamerDecodeError::from)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerDecodeError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerDecodeError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerDecodeError::AppSinkConversionFailed)?;

    pipeline
      .set_state(gst::State::Playing)
      .map_err(GStreamerDecodeError::from)?;

    Ok(GStreamerContainer {
      path: path.to_path_buf(),
      pipeline,
      appsink,
    })
  }

  fn decode(
    &self,
    container: &mut Self::Container,
    request: &DecodeRequest,
    meta: &mut VideoMeta,
    rng: &mut dyn RngCore,
  ) -> Result<Option<DecodedClip>, DecodeError> {
    // 已知帧数与帧率时先确定帧号，再只解码到最后一个需要的帧
    let planned = match (meta.frame_count, meta.fps) {
      (Some(count), Some(fps)) => match sample_frame_indices(count, fps, request, rng) {
        Some(indices) => Some(indices),
        None => return Ok(None),
      },
      _ => None,
    };
    let stop_after = planned.as_ref().and_then(|p| p.iter().max().copied());

    let mut images = Vec::new();
    let mut fps = meta.fps;
    while let Some(frame) = container.pull_frame().map_err(DecodeError::from)? {
      if fps.is_none() {
        fps = frame.fps;
      }
      images.push(frame.image);
      if stop_after.is_some_and(|last| images.len() > last) {
        break;
      }
    }

    if images.is_empty() {
      info!("{} 未解码出任何帧", container.path.display());
      return Ok(None);
    }

    let (width, height) = images[0].dimensions();
    meta.width = Some(width);
    meta.height = Some(height);
    let fps = fps.unwrap_or(request.target_fps);
    meta.fps = Some(fps);

    let had_plan = planned.is_some();
    let indices = match planned.filter(|p| p.iter().all(|i| *i < images.len())) {
      Some(indices) => indices,
      None => {
        if had_plan {
          warn!("{} 实际帧数少于缓存记录，重新采样", container.path.display());
        }
        meta.frame_count = Some(images.len());
        match sample_frame_indices(images.len(), fps, request, rng) {
          Some(indices) => indices,
          None => return Ok(None),
        }
      }
    };

    let selected: Vec<RgbImage> = indices
      .iter()
      .map(|i| limit_short_side(images[*i].clone(), request.max_spatial_scale))
      .collect();

    Ok(Some(DecodedClip::from_images(
      &selected,
      indices,
      (width, height),
    )?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pipeline_quotes_location_and_sets_threads() {
    let desc = GStreamerDecoder::pipeline_description(Path::new("/videos/a b.mp4"), true);
    assert!(desc.starts_with("filesrc location=\"/videos/a b.mp4\""));
    assert!(desc.contains("n-threads=0"));
    let desc = GStreamerDecoder::pipeline_description(Path::new("/videos/a.mp4"), false);
    assert!(desc.contains("n-threads=1"));
    assert!(desc.ends_with("appsink name=sink sync=false max-buffers=8"));
  }

  #[test]
  fn short_side_limit_keeps_aspect() {
    let image = RgbImage::new(64, 32);
    assert_eq!(limit_short_side(image.clone(), 0).dimensions(), (64, 32));
    assert_eq!(limit_short_side(image.clone(), 48).dimensions(), (64, 32));
    assert_eq!(limit_short_side(image, 16).dimensions(), (32, 16));
  }
}
