// 该文件是 Yanxing （雁行） 项目的一部分。
// src/decoder/frame_directory.rs - 图像序列目录解码
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

//! 以图像序列目录表示的视频。
//!
//! 目录中的图像按文件名排序即为帧顺序，可选的 `fps.txt` 给出帧率：
//!
//! ```text
//! P02T01C06/
//!   000001.jpg
//!   000002.jpg
//!   ...
//!   fps.txt      # 例如 "20"
//! ```

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage, imageops::FilterType};
use rand::RngCore;
use tracing::{debug, warn};

use crate::{
  decoder::{DecodeError, DecodeRequest, VideoDecoder, VideoMeta, sample_frame_indices},
  frame::DecodedClip,
};

const FPS_FILE: &str = "fps.txt";
const FRAME_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

pub struct FrameDirectory {
  path: PathBuf,
  frames: Vec<PathBuf>,
}

impl FrameDirectory {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn frame_count(&self) -> usize {
    self.frames.len()
  }
}

pub struct FrameDirectoryDecoder {
  default_fps: f64,
}

impl FrameDirectoryDecoder {
  pub fn new(default_fps: f64) -> Self {
    Self { default_fps }
  }

  fn read_fps(&self, dir: &Path) -> f64 {
    let path = dir.join(FPS_FILE);
    if !path.is_file() {
      return self.default_fps;
    }
    match std::fs::read_to_string(&path)
      .ok()
      .and_then(|s| s.trim().parse::<f64>().ok())
    {
      Some(fps) if fps > 0.0 => fps,
      _ => {
        warn!("无法解析帧率文件 {}，使用默认帧率", path.display());
        self.default_fps
      }
    }
  }

  fn load_frame(path: &Path, max_spatial_scale: u32) -> Result<RgbImage, DecodeError> {
    let image = ImageReader::open(path)?
      .with_guessed_format()?
      .decode()?
      .to_rgb8();
    let (width, height) = image.dimensions();
    let short_side = width.min(height);
    if max_spatial_scale == 0 || short_side <= max_spatial_scale {
      return Ok(image);
    }
    let ratio = max_spatial_scale as f64 / short_side as f64;
    let new_w = ((width as f64 * ratio).round() as u32).max(1);
    let new_h = ((height as f64 * ratio).round() as u32).max(1);
    Ok(image::imageops::resize(
      &image,
      new_w,
      new_h,
      FilterType::Triangle,
    ))
  }
}

fn is_frame_file(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
      .unwrap_or(false)
}

impl VideoDecoder for FrameDirectoryDecoder {
  type Container = FrameDirectory;

  fn open(&self, path: &Path, _multithread: bool) -> Result<Self::Container, DecodeError> {
    if !path.is_dir() {
      return Err(DecodeError::NotAVideo(path.to_path_buf()));
    }
    let mut frames = std::fs::read_dir(path)?
      .map(|entry| entry.map(|e| e.path()))
      .collect::<Result<Vec<_>, _>>()?;
    frames.retain(|p| is_frame_file(p));
    frames.sort();
    debug!("打开图像序列 {}，共 {} 帧", path.display(), frames.len());
    Ok(FrameDirectory {
      path: path.to_path_buf(),
      frames,
    })
  }

  fn decode(
    &self,
    container: &mut Self::Container,
    request: &DecodeRequest,
    meta: &mut VideoMeta,
    rng: &mut dyn RngCore,
  ) -> Result<Option<DecodedClip>, DecodeError> {
    let frame_count = container.frame_count();
    meta.frame_count = Some(frame_count);
    let fps = match meta.fps {
      Some(fps) => fps,
      None => {
        let fps = self.read_fps(&container.path);
        meta.fps = Some(fps);
        fps
      }
    };

    let Some(indices) = sample_frame_indices(frame_count, fps, request, rng) else {
      debug!(
        "{} 帧数 {} 不足 {}",
        container.path.display(),
        frame_count,
        request.num_frames
      );
      return Ok(None);
    };

    let source_size = match (meta.width, meta.height) {
      (Some(w), Some(h)) => (w, h),
      _ => {
        let (w, h) = image::image_dimensions(&container.frames[indices[0]])?;
        meta.width = Some(w);
        meta.height = Some(h);
        (w, h)
      }
    };

    let images = indices
      .iter()
      .map(|i| Self::load_frame(&container.frames[*i], request.max_spatial_scale))
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(DecodedClip::from_images(&images, indices, source_size)?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sampling::TemporalSample;
  use rand::{SeedableRng, rngs::StdRng};

  fn write_frames(dir: &Path, count: usize, width: u32, height: u32) {
    for i in 0..count {
      let image = RgbImage::from_fn(width, height, |_, _| image::Rgb([i as u8 * 10, 0, 0]));
      image.save(dir.join(format!("{:06}.png", i))).unwrap();
    }
  }

  fn request(num_frames: usize, max_spatial_scale: u32) -> DecodeRequest {
    DecodeRequest {
      sampling_rate: 1,
      num_frames,
      temporal: TemporalSample::Uniform,
      num_ensemble_views: 1,
      target_fps: 30.0,
      max_spatial_scale,
    }
  }

  #[test]
  fn decodes_selected_frames_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 7, 8, 6);
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let decoder = FrameDirectoryDecoder::new(30.0);
    let mut container = decoder.open(dir.path(), false).unwrap();
    assert_eq!(container.frame_count(), 7);

    let mut meta = VideoMeta::default();
    let mut rng = StdRng::seed_from_u64(0);
    let clip = decoder
      .decode(&mut container, &request(4, 0), &mut meta, &mut rng)
      .unwrap()
      .unwrap();
    assert_eq!(clip.frame_indices(), &[0, 2, 4, 6]);
    assert_eq!(clip.frames().dim(), (4, 6, 8, 3));
    assert_eq!(clip.frames()[[2, 0, 0, 0]], 40);
    assert_eq!(meta.frame_count, Some(7));
    assert_eq!((meta.width, meta.height), (Some(8), Some(6)));
  }

  #[test]
  fn short_video_decodes_to_none() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 2, 4, 4);
    let decoder = FrameDirectoryDecoder::new(30.0);
    let mut container = decoder.open(dir.path(), false).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let result = decoder
      .decode(&mut container, &request(4, 0), &mut VideoMeta::default(), &mut rng)
      .unwrap();
    assert!(result.is_none());
  }

  #[test]
  fn max_spatial_scale_downscales_but_keeps_source_size() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 4, 40, 20);
    let decoder = FrameDirectoryDecoder::new(30.0);
    let mut container = decoder.open(dir.path(), false).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let clip = decoder
      .decode(&mut container, &request(2, 10), &mut VideoMeta::default(), &mut rng)
      .unwrap()
      .unwrap();
    assert_eq!(clip.frame_size(), (20, 10));
    assert_eq!(clip.source_size(), (40, 20));
  }

  #[test]
  fn fps_file_is_read_once_into_meta() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 4, 4, 4);
    std::fs::write(dir.path().join(FPS_FILE), "15\n").unwrap();
    let decoder = FrameDirectoryDecoder::new(30.0);
    let mut container = decoder.open(dir.path(), false).unwrap();
    let mut meta = VideoMeta::default();
    let mut rng = StdRng::seed_from_u64(0);
    decoder
      .decode(&mut container, &request(2, 0), &mut meta, &mut rng)
      .unwrap();
    assert_eq!(meta.fps, Some(15.0));
  }

  #[test]
  fn plain_file_is_not_a_video() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.mp4");
    std::fs::write(&path, b"garbage").unwrap();
    let decoder = FrameDirectoryDecoder::new(30.0);
    assert!(matches!(
      decoder.open(&path, false),
      Err(DecodeError::NotAVideo(_))
    ));
  }
}
