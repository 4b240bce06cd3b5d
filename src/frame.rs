// 该文件是 Yanxing （雁行） 项目的一部分。
// src/frame.rs - THWC 片段定义
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

use image::RgbImage;
use ndarray::{Array4, ArrayView3, Axis};
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("帧数与帧索引数不一致: 帧 {frames}, 索引 {indices}")]
  LengthMismatch { frames: usize, indices: usize },
  #[error("第 {index} 帧尺寸 {actual:?} 与首帧 {expected:?} 不一致")]
  SizeMismatch {
    index: usize,
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("片段为空")]
  Empty,
}

/// 解码得到的片段
///
/// `frames` 的维度为 (T, H, W, C)，`frame_indices[t]` 是第 t 帧在原视频中的帧号。
/// 二者长度相同，这是后续关节点对齐的依据。
#[derive(Debug, Clone)]
pub struct DecodedClip {
  frames: Array4<u8>,
  frame_indices: Vec<usize>,
  source_size: (u32, u32),
}

impl DecodedClip {
  /// `source_size` 为原视频的 (宽, 高)，即关节点坐标所在的坐标系
  pub fn new(
    frames: Array4<u8>,
    frame_indices: Vec<usize>,
    source_size: (u32, u32),
  ) -> Result<Self, FrameError> {
    let t = frames.len_of(Axis(0));
    if t != frame_indices.len() {
      return Err(FrameError::LengthMismatch {
        frames: t,
        indices: frame_indices.len(),
      });
    }
    Ok(Self {
      frames,
      frame_indices,
      source_size,
    })
  }

  /// 由 RGB 图像序列组装片段
  pub fn from_images(
    images: &[RgbImage],
    frame_indices: Vec<usize>,
    source_size: (u32, u32),
  ) -> Result<Self, FrameError> {
    Self::new(stack_rgb_images(images)?, frame_indices, source_size)
  }

  pub fn frames(&self) -> &Array4<u8> {
    &self.frames
  }

  pub fn frame_indices(&self) -> &[usize] {
    &self.frame_indices
  }

  pub fn source_size(&self) -> (u32, u32) {
    self.source_size
  }

  pub fn temporal_len(&self) -> usize {
    self.frames.len_of(Axis(0))
  }

  /// 解码后的 (宽, 高)
  pub fn frame_size(&self) -> (u32, u32) {
    let (_, h, w, _) = self.frames.dim();
    (w as u32, h as u32)
  }

  pub fn into_parts(self) -> (Array4<u8>, Vec<usize>, (u32, u32)) {
    (self.frames, self.frame_indices, self.source_size)
  }
}

/// 将 RGB 图像序列堆叠为 (T, H, W, C) 数组
pub fn stack_rgb_images(images: &[RgbImage]) -> Result<Array4<u8>, FrameError> {
  let first = images.first().ok_or(FrameError::Empty)?;
  let (width, height) = first.dimensions();
  let mut data = Vec::with_capacity(images.len() * (width * height) as usize * RGB_CHANNELS);
  for (index, image) in images.iter().enumerate() {
    if image.dimensions() != (width, height) {
      return Err(FrameError::SizeMismatch {
        index,
        expected: (width, height),
        actual: image.dimensions(),
      });
    }
    // RgbImage 本身即为 HWC 布局
    data.extend_from_slice(image.as_raw());
  }
  Array4::from_shape_vec(
    (images.len(), height as usize, width as usize, RGB_CHANNELS),
    data,
  )
  .map_err(|_| FrameError::Empty)
}

/// 将单帧 (H, W, C) 转为 RGB 图像
pub fn hwc_to_rgb_image(frame: ArrayView3<'_, u8>) -> RgbImage {
  let (height, width, _) = frame.dim();
  RgbImage::from_fn(width as u32, height as u32, |x, y| {
    let (x, y) = (x as usize, y as usize);
    image::Rgb([frame[[y, x, 0]], frame[[y, x, 1]], frame[[y, x, 2]]])
  })
}
