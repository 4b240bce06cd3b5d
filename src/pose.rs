// 该文件是 Yanxing （雁行） 项目的一部分。
// src/pose.rs - 关节点序列与帧对齐
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

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, Axis, s};
use thiserror::Error;
use tracing::debug;

use crate::frame::DecodedClip;

mod lcr_net;
pub use self::lcr_net::LcrNetJsonParser;

#[derive(Error, Debug)]
pub enum PoseError {
  #[error("读取关节点文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("解析关节点文件 {path} 失败: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("关节点格式错误: {0}")]
  Format(String),
  #[error("帧对齐失败: 采样帧号 {frame} 超出关节点序列长度 {available}")]
  Alignment { frame: usize, available: usize },
  #[error("帧对齐失败: 片段 {frames} 帧, 关节点 {keypoints} 帧")]
  LengthMismatch { frames: usize, keypoints: usize },
}

/// 关节点序列
///
/// `coords` 维度为 (T, J, D)，D 为 2 (x, y) 或 3 (x, y, z)，坐标以像素为单位；
/// `valid` 维度为 (T, J)。
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoints {
  coords: Array3<f32>,
  valid: Array2<bool>,
}

impl Keypoints {
  pub fn new(coords: Array3<f32>, valid: Array2<bool>) -> Result<Self, PoseError> {
    let (t, j, d) = coords.dim();
    if valid.dim() != (t, j) {
      return Err(PoseError::Format(format!(
        "坐标维度 {:?} 与有效性掩码维度 {:?} 不一致",
        (t, j, d),
        valid.dim()
      )));
    }
    if d < 2 {
      return Err(PoseError::Format(format!("坐标至少需要 2 维, 实际 {}", d)));
    }
    Ok(Self { coords, valid })
  }

  /// 帧数
  pub fn len(&self) -> usize {
    self.coords.len_of(Axis(0))
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn joint_count(&self) -> usize {
    self.coords.len_of(Axis(1))
  }

  pub fn coords(&self) -> &Array3<f32> {
    &self.coords
  }

  pub fn valid(&self) -> &Array2<bool> {
    &self.valid
  }

  /// 第 t 帧第 j 个关节点的 (x, y)，无效时返回 `None`
  pub fn xy(&self, t: usize, j: usize) -> Option<(f32, f32)> {
    self.valid[[t, j]].then(|| (self.coords[[t, j, 0]], self.coords[[t, j, 1]]))
  }

  /// 按帧号挑选关节点，顺序与数量与 `frame_indices` 一致
  pub fn select_frames(&self, frame_indices: &[usize]) -> Result<Keypoints, PoseError> {
    let available = self.len();
    if let Some(frame) = frame_indices.iter().find(|i| **i >= available) {
      return Err(PoseError::Alignment {
        frame: *frame,
        available,
      });
    }
    Ok(Keypoints {
      coords: self.coords.select(Axis(0), frame_indices),
      valid: self.valid.select(Axis(0), frame_indices),
    })
  }

  /// 对 x、y 坐标做仿射变换 `x' = x * sx - ox`，深度不变
  pub fn affine_xy(&mut self, sx: f32, sy: f32, ox: f32, oy: f32) {
    self
      .coords
      .slice_mut(s![.., .., 0])
      .mapv_inplace(|x| x * sx - ox);
    self
      .coords
      .slice_mut(s![.., .., 1])
      .mapv_inplace(|y| y * sy - oy);
  }

  /// 水平翻转：像素 i 映射到像素 `width - 1 - i`，像素内偏移保持不变
  ///
  /// 坐标按连续像素坐标理解，像素 i 覆盖 `[i, i + 1)`，因此 `[0, width)` 内的点翻转后
  /// 仍在 `[0, width)` 内，且与帧的逐列反转一致。
  pub fn flip_x(&mut self, width: f32) {
    self.coords.slice_mut(s![.., .., 0]).mapv_inplace(|x| {
      let pixel = x.floor();
      (width - 1.0 - pixel) + (x - pixel)
    });
  }

  pub fn into_parts(self) -> (Array3<f32>, Array2<bool>) {
    (self.coords, self.valid)
  }
}

/// 关节点解析器
pub trait PoseParser: Send + Sync {
  /// 解析整段视频的关节点序列
  fn parse(&self, path: &Path) -> Result<Keypoints, PoseError>;
}

/// 将关节点与解码器实际采样的帧对齐
///
/// 解析整段视频的关节点后，只保留 `clip.frame_indices()` 对应的帧。若解码器对帧做过
/// 缩放，同步把坐标换算到解码后的尺寸。
pub fn synchronize<P: PoseParser + ?Sized>(
  parser: &P,
  pose_path: &Path,
  clip: &DecodedClip,
) -> Result<Keypoints, PoseError> {
  let full = parser.parse(pose_path)?;
  let mut keypoints = full.select_frames(clip.frame_indices())?;

  if keypoints.len() != clip.temporal_len() {
    return Err(PoseError::LengthMismatch {
      frames: clip.temporal_len(),
      keypoints: keypoints.len(),
    });
  }

  let (src_w, src_h) = clip.source_size();
  let (dst_w, dst_h) = clip.frame_size();
  if (src_w, src_h) != (dst_w, dst_h) && src_w > 0 && src_h > 0 {
    debug!(
      "关节点坐标从 {}x{} 换算到 {}x{}",
      src_w, src_h, dst_w, dst_h
    );
    keypoints.affine_xy(
      dst_w as f32 / src_w as f32,
      dst_h as f32 / src_h as f32,
      0.0,
      0.0,
    );
  }
  Ok(keypoints)
}
