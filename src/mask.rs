// 该文件是 Yanxing （雁行） 项目的一部分。
// src/mask.rs - 由关节点生成 patch 级注意力掩码
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

//! 帧被划分为 `patch_size × patch_size` 的网格，patch 按行优先编号：
//! `p = row * grid_width + col`。
//!
//! - `presence` 粒度输出 (T, P)，patch 内存在任一有效关节点即为 1；
//! - `identity` 粒度输出 (T, P, J)，第 j 个关节点所在 patch 为 1。

use ndarray::{Array2, Array3, ArrayD, Axis, IxDyn};
use rand::{Rng, RngCore};
use thiserror::Error;

use crate::{
  config::{ConfigError, DebugConfig, Granularity, check_patch_grid},
  pose::Keypoints,
};

#[derive(Error, Debug)]
pub enum MaskError {
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("identity 粒度要求至少一个关节点")]
  NoJoints,
}

/// patch 网格几何
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskGeometry {
  patch_size: usize,
  frame_height: usize,
  frame_width: usize,
}

impl MaskGeometry {
  pub fn new(patch_size: usize, frame_height: usize, frame_width: usize) -> Result<Self, MaskError> {
    check_patch_grid(frame_height, frame_width, patch_size)?;
    Ok(Self {
      patch_size,
      frame_height,
      frame_width,
    })
  }

  pub fn patch_size(&self) -> usize {
    self.patch_size
  }

  /// 网格 (行数, 列数)
  pub fn grid(&self) -> (usize, usize) {
    (
      self.frame_height / self.patch_size,
      self.frame_width / self.patch_size,
    )
  }

  pub fn patch_count(&self) -> usize {
    let (rows, cols) = self.grid();
    rows * cols
  }

  /// 连续像素坐标所在的 (行, 列)，落在帧外或非有限值时返回 `None`
  pub fn locate(&self, x: f32, y: f32) -> Option<(usize, usize)> {
    if !x.is_finite() || !y.is_finite() {
      return None;
    }
    if x < 0.0 || y < 0.0 || x >= self.frame_width as f32 || y >= self.frame_height as f32 {
      return None;
    }
    let (rows, cols) = self.grid();
    let col = (x as usize / self.patch_size).min(cols - 1);
    let row = (y as usize / self.patch_size).min(rows - 1);
    Some((row, col))
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttentionMask {
  granularity: Granularity,
  grid: (usize, usize),
  values: ArrayD<u8>,
}

impl AttentionMask {
  pub fn granularity(&self) -> Granularity {
    self.granularity
  }

  pub fn grid(&self) -> (usize, usize) {
    self.grid
  }

  pub fn values(&self) -> &ArrayD<u8> {
    &self.values
  }

  pub fn shape(&self) -> &[usize] {
    self.values.shape()
  }

  pub fn temporal_len(&self) -> usize {
    self.values.len_of(Axis(0))
  }

  /// 第 t 帧第 p 个 patch 是否被任一关节点占据
  pub fn patch_active(&self, t: usize, p: usize) -> bool {
    match self.granularity {
      Granularity::Presence => self.values[[t, p].as_slice()] != 0,
      Granularity::Identity => self
        .values
        .index_axis(Axis(0), t)
        .index_axis(Axis(0), p)
        .iter()
        .any(|v| *v != 0),
    }
  }

  /// 每帧被占据的 patch 数
  pub fn occupancy(&self) -> Vec<usize> {
    let patches = self.grid.0 * self.grid.1;
    (0..self.temporal_len())
      .map(|t| (0..patches).filter(|p| self.patch_active(t, *p)).count())
      .collect()
  }

  pub fn into_values(self) -> ArrayD<u8> {
    self.values
  }

  fn with_values(&self, values: ArrayD<u8>) -> Self {
    Self {
      granularity: self.granularity,
      grid: self.grid,
      values,
    }
  }
}

/// 生成注意力掩码
///
/// `inflation` 仅对 `presence` 粒度生效，把命中 patch 切比雪夫距离 `inflation`
/// 以内的 patch 一并标记。
pub fn generate_mask(
  keypoints: &Keypoints,
  geometry: &MaskGeometry,
  granularity: Granularity,
  inflation: usize,
) -> Result<AttentionMask, MaskError> {
  let frames = keypoints.len();
  let joints = keypoints.joint_count();
  let (rows, cols) = geometry.grid();
  let patches = rows * cols;

  let values = match granularity {
    Granularity::Identity => {
      if joints == 0 {
        return Err(MaskError::NoJoints);
      }
      let mut values = Array3::<u8>::zeros((frames, patches, joints));
      for t in 0..frames {
        for j in 0..joints {
          if let Some((row, col)) = keypoints.xy(t, j).and_then(|(x, y)| geometry.locate(x, y)) {
            values[[t, row * cols + col, j]] = 1;
          }
        }
      }
      values.into_dyn()
    }
    Granularity::Presence => {
      let mut values = Array2::<u8>::zeros((frames, patches));
      let radius = inflation as isize;
      for t in 0..frames {
        for j in 0..joints {
          let Some((row, col)) = keypoints.xy(t, j).and_then(|(x, y)| geometry.locate(x, y)) else {
            continue;
          };
          for dr in -radius..=radius {
            for dc in -radius..=radius {
              let (r, c) = (row as isize + dr, col as isize + dc);
              if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
                continue;
              }
              values[[t, r as usize * cols + c as usize]] = 1;
            }
          }
        }
      }
      values.into_dyn()
    }
  };

  Ok(AttentionMask {
    granularity,
    grid: (rows, cols),
    values,
  })
}

/// 调试用掩码替换策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskOverride {
  Keep,
  RandomBinary,
  Zeros,
  Ones,
}

impl MaskOverride {
  pub fn from_config(debug: &DebugConfig) -> Result<Self, ConfigError> {
    match (debug.random_mask, debug.mask_fill) {
      (true, Some(_)) => Err(ConfigError::ConflictingMaskOverride),
      (true, None) => Ok(Self::RandomBinary),
      (false, None) => Ok(Self::Keep),
      (false, Some(0)) => Ok(Self::Zeros),
      (false, Some(1)) => Ok(Self::Ones),
      (false, Some(fill)) => Err(ConfigError::InvalidMaskFill(fill)),
    }
  }

  pub fn is_active(&self) -> bool {
    *self != Self::Keep
  }

  /// 应用替换，形状保持不变
  pub fn apply(&self, mask: AttentionMask, rng: &mut dyn RngCore) -> AttentionMask {
    let shape = IxDyn(mask.shape());
    match self {
      Self::Keep => mask,
      Self::Zeros => {
        let values = ArrayD::zeros(shape);
        mask.with_values(values)
      }
      Self::Ones => {
        let values = ArrayD::ones(shape);
        mask.with_values(values)
      }
      Self::RandomBinary => {
        let values = ArrayD::from_shape_simple_fn(shape, || u8::from(rng.gen_bool(0.5)));
        mask.with_values(values)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::{SeedableRng, rngs::StdRng};

  fn single_joint(x: f32, y: f32, valid: bool) -> Keypoints {
    let coords = Array3::from_shape_vec((1, 1, 2), vec![x, y]).unwrap();
    Keypoints::new(coords, Array2::from_elem((1, 1), valid)).unwrap()
  }

  fn geometry() -> MaskGeometry {
    MaskGeometry::new(16, 64, 64).unwrap()
  }

  #[test]
  fn one_joint_marks_exactly_one_patch() {
    let mask = generate_mask(
      &single_joint(40.0, 20.0, true),
      &geometry(),
      Granularity::Identity,
      0,
    )
    .unwrap();
    assert_eq!(mask.shape(), &[1, 16, 1]);
    assert_eq!(mask.values().iter().filter(|v| **v == 1).count(), 1);
    // 第 1 行第 2 列
    assert_eq!(mask.values()[[0, 6, 0].as_slice()], 1);
    assert_eq!(mask.occupancy(), vec![1]);
  }

  #[test]
  fn out_of_frame_and_invalid_joints_are_ignored() {
    for kp in [
      single_joint(64.0, 10.0, true),
      single_joint(-0.5, 10.0, true),
      single_joint(f32::NAN, 10.0, true),
      single_joint(10.0, 10.0, false),
    ] {
      let mask = generate_mask(&kp, &geometry(), Granularity::Identity, 0).unwrap();
      assert!(mask.values().iter().all(|v| *v == 0));
    }
  }

  #[test]
  fn presence_inflation_uses_chebyshev_radius() {
    let kp = single_joint(0.0, 0.0, true);
    let mask = generate_mask(&kp, &geometry(), Granularity::Presence, 1).unwrap();
    assert_eq!(mask.shape(), &[1, 16]);
    let active: Vec<usize> = (0..16).filter(|p| mask.patch_active(0, *p)).collect();
    assert_eq!(active, vec![0, 1, 4, 5]);

    let kp = single_joint(30.0, 30.0, true);
    let mask = generate_mask(&kp, &geometry(), Granularity::Presence, 1).unwrap();
    assert_eq!(mask.occupancy(), vec![9]);
  }

  #[test]
  fn non_divisible_frame_is_a_config_error() {
    let err = MaskGeometry::new(16, 60, 64).unwrap_err();
    assert!(matches!(
      err,
      MaskError::ConfigError(ConfigError::PatchGrid { .. })
    ));
    assert!(MaskGeometry::new(0, 64, 64).is_err());
  }

  #[test]
  fn override_resolution() {
    let debug = |random_mask, mask_fill| DebugConfig {
      random_mask,
      mask_fill,
    };
    assert_eq!(MaskOverride::from_config(&debug(false, None)).unwrap(), MaskOverride::Keep);
    assert_eq!(
      MaskOverride::from_config(&debug(true, None)).unwrap(),
      MaskOverride::RandomBinary
    );
    assert_eq!(MaskOverride::from_config(&debug(false, Some(0))).unwrap(), MaskOverride::Zeros);
    assert_eq!(MaskOverride::from_config(&debug(false, Some(1))).unwrap(), MaskOverride::Ones);
    assert!(matches!(
      MaskOverride::from_config(&debug(false, Some(2))),
      Err(ConfigError::InvalidMaskFill(2))
    ));
    assert!(matches!(
      MaskOverride::from_config(&debug(true, Some(1))),
      Err(ConfigError::ConflictingMaskOverride)
    ));
  }

  #[test]
  fn override_preserves_shape() {
    let mask = generate_mask(
      &single_joint(40.0, 20.0, true),
      &geometry(),
      Granularity::Identity,
      0,
    )
    .unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    let zeros = MaskOverride::Zeros.apply(mask.clone(), &mut rng);
    assert_eq!(zeros.shape(), mask.shape());
    assert!(zeros.values().iter().all(|v| *v == 0));

    let ones = MaskOverride::Ones.apply(mask.clone(), &mut rng);
    assert!(ones.values().iter().all(|v| *v == 1));

    let random = MaskOverride::RandomBinary.apply(mask.clone(), &mut rng);
    assert_eq!(random.shape(), mask.shape());
    assert!(random.values().iter().all(|v| *v <= 1));

    assert_eq!(MaskOverride::Keep.apply(mask.clone(), &mut rng), mask);
  }
}
