// 该文件是 Yanxing （雁行） 项目的一部分。
// src/transform.rs - 帧与关节点的联合空间增强
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

//! 所有几何变换都同时作用于帧像素与关节点坐标，二者始终处于同一坐标系。
//! 帧在内部以 (T, H, W, C) 布局处理，最终输出为 (C, T, H, W)。

use image::{ImageBuffer, Rgb, imageops::FilterType};
use ndarray::{Array4, Axis, s};
use rand::{Rng, RngCore};
use thiserror::Error;
use tracing::debug;

use crate::{
  decoder::linspace,
  frame::RGB_CHANNELS,
  pose::{Keypoints, PoseError},
  sampling::SpatialSample,
};

#[derive(Error, Debug)]
pub enum TransformError {
  #[error("帧数与关节点帧数不一致: 帧 {frames}, 关节点 {keypoints}")]
  FrameCountMismatch { frames: usize, keypoints: usize },
  #[error("裁剪尺寸 {crop} 大于缩放后的帧 {width}x{height}")]
  CropTooLarge { crop: u32, width: u32, height: u32 },
  #[error("仅支持 RGB 三通道, 实际 {0} 通道")]
  UnsupportedChannels(usize),
  #[error("缩放范围无效: [{min}, {max}]")]
  InvalidScale { min: u32, max: u32 },
  #[error("确定性裁剪要求 min_scale == max_scale, 实际 [{min}, {max}]")]
  JitterInDeterministicCrop { min: u32, max: u32 },
  #[error("帧缓冲区构造失败")]
  Buffer,
  #[error("关节点错误: {0}")]
  PoseError(#[from] PoseError),
}

/// 空间增强参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialParams {
  pub spatial: SpatialSample,
  pub min_scale: u32,
  pub max_scale: u32,
  pub crop_size: u32,
  pub random_flip: bool,
  pub inverse_uniform_sampling: bool,
}

/// 通道归一化：`(x / 255 - mean) / std`，只作用于帧
pub fn normalize(frames: &Array4<u8>, mean: &[f32], std: &[f32]) -> Array4<f32> {
  let mut out = frames.mapv(|v| v as f32 / 255.0);
  for (c, mut channel) in out.axis_iter_mut(Axis(3)).enumerate() {
    let (m, sd) = (mean[c], std[c]);
    channel.mapv_inplace(|v| (v - m) / sd);
  }
  out
}

/// `normalize` 的逆变换，用于可视化
pub fn denormalize(frames: &Array4<f32>, mean: &[f32], std: &[f32]) -> Array4<u8> {
  let mut out = frames.clone();
  for (c, mut channel) in out.axis_iter_mut(Axis(3)).enumerate() {
    let (m, sd) = (mean[c], std[c]);
    channel.mapv_inplace(|v| v * sd + m);
  }
  out.mapv(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
}

fn check_alignment(frames: &Array4<f32>, keypoints: &Keypoints) -> Result<(), TransformError> {
  let t = frames.len_of(Axis(0));
  if t != keypoints.len() {
    return Err(TransformError::FrameCountMismatch {
      frames: t,
      keypoints: keypoints.len(),
    });
  }
  Ok(())
}

/// 双线性缩放所有帧
fn resize_frames(
  frames: &Array4<f32>,
  new_width: u32,
  new_height: u32,
) -> Result<Array4<f32>, TransformError> {
  let (t, h, w, c) = frames.dim();
  if c != RGB_CHANNELS {
    return Err(TransformError::UnsupportedChannels(c));
  }
  let mut data = Vec::with_capacity(t * (new_width * new_height) as usize * c);
  for frame in frames.axis_iter(Axis(0)) {
    let raw: Vec<f32> = frame.iter().copied().collect();
    let image = ImageBuffer::<Rgb<f32>, Vec<f32>>::from_raw(w as u32, h as u32, raw)
      .ok_or(TransformError::Buffer)?;
    let resized = image::imageops::resize(&image, new_width, new_height, FilterType::Triangle);
    data.extend_from_slice(resized.as_raw());
  }
  Array4::from_shape_vec((t, new_height as usize, new_width as usize, c), data)
    .map_err(|_| TransformError::Buffer)
}

/// 将短边缩放到 `[min_size, max_size]` 内的随机尺寸，保持宽高比
fn short_side_scale_jitter(
  frames: Array4<f32>,
  keypoints: &mut Keypoints,
  min_size: u32,
  max_size: u32,
  inverse_uniform_sampling: bool,
  rng: &mut dyn RngCore,
) -> Result<Array4<f32>, TransformError> {
  if min_size == 0 || min_size > max_size {
    return Err(TransformError::InvalidScale {
      min: min_size,
      max: max_size,
    });
  }
  let size = if min_size == max_size {
    min_size
  } else if inverse_uniform_sampling {
    (1.0 / rng.gen_range(1.0 / max_size as f64..1.0 / min_size as f64)).round() as u32
  } else {
    rng.gen_range(min_size as f64..max_size as f64).round() as u32
  };

  let (_, height, width, _) = frames.dim();
  let (height, width) = (height as u32, width as u32);
  if (width <= height && width == size) || (height <= width && height == size) {
    return Ok(frames);
  }
  let (new_width, new_height) = if width < height {
    (size, (height as f64 / width as f64 * size as f64).floor() as u32)
  } else {
    ((width as f64 / height as f64 * size as f64).floor() as u32, size)
  };
  debug!("短边缩放 {}x{} -> {}x{}", width, height, new_width, new_height);

  keypoints.affine_xy(
    new_width as f32 / width as f32,
    new_height as f32 / height as f32,
    0.0,
    0.0,
  );
  resize_frames(&frames, new_width, new_height)
}

fn crop_frames(
  frames: &Array4<f32>,
  keypoints: &mut Keypoints,
  size: u32,
  x_offset: usize,
  y_offset: usize,
) -> Array4<f32> {
  let size = size as usize;
  keypoints.affine_xy(1.0, 1.0, x_offset as f32, y_offset as f32);
  frames
    .slice(s![.., y_offset..y_offset + size, x_offset..x_offset + size, ..])
    .to_owned()
}

fn check_crop(frames: &Array4<f32>, size: u32) -> Result<(usize, usize), TransformError> {
  let (_, height, width, _) = frames.dim();
  if height < size as usize || width < size as usize {
    return Err(TransformError::CropTooLarge {
      crop: size,
      width: width as u32,
      height: height as u32,
    });
  }
  Ok((height, width))
}

fn random_crop(
  frames: &Array4<f32>,
  keypoints: &mut Keypoints,
  size: u32,
  rng: &mut dyn RngCore,
) -> Result<Array4<f32>, TransformError> {
  let (height, width) = check_crop(frames, size)?;
  let size_px = size as usize;
  let y_offset = if height > size_px { rng.gen_range(0..=height - size_px) } else { 0 };
  let x_offset = if width > size_px { rng.gen_range(0..=width - size_px) } else { 0 };
  Ok(crop_frames(frames, keypoints, size, x_offset, y_offset))
}

/// 确定性裁剪：宽大于等于高时取 左/中/右，否则取 上/中/下
fn uniform_crop(
  frames: &Array4<f32>,
  keypoints: &mut Keypoints,
  size: u32,
  spatial_idx: usize,
) -> Result<Array4<f32>, TransformError> {
  let (height, width) = check_crop(frames, size)?;
  let size_px = size as usize;
  let mut y_offset = (height - size_px).div_ceil(2);
  let mut x_offset = (width - size_px).div_ceil(2);
  if height > width {
    match spatial_idx {
      0 => y_offset = 0,
      2 => y_offset = height - size_px,
      _ => {}
    }
  } else {
    match spatial_idx {
      0 => x_offset = 0,
      2 => x_offset = width - size_px,
      _ => {}
    }
  }
  Ok(crop_frames(frames, keypoints, size, x_offset, y_offset))
}

/// 对帧与关节点做一次联合的缩放、裁剪与翻转
pub fn spatial_sampling(
  frames: Array4<f32>,
  mut keypoints: Keypoints,
  params: &SpatialParams,
  rng: &mut dyn RngCore,
) -> Result<(Array4<f32>, Keypoints), TransformError> {
  check_alignment(&frames, &keypoints)?;
  let frames = match params.spatial {
    SpatialSample::Random => {
      let frames = short_side_scale_jitter(
        frames,
        &mut keypoints,
        params.min_scale,
        params.max_scale,
        params.inverse_uniform_sampling,
        rng,
      )?;
      let frames = random_crop(&frames, &mut keypoints, params.crop_size, rng)?;
      if params.random_flip && rng.gen_bool(0.5) {
        keypoints.flip_x(params.crop_size as f32);
        frames.slice(s![.., .., ..;-1, ..]).to_owned()
      } else {
        frames
      }
    }
    SpatialSample::Fixed(spatial_idx) => {
      if params.min_scale != params.max_scale {
        return Err(TransformError::JitterInDeterministicCrop {
          min: params.min_scale,
          max: params.max_scale,
        });
      }
      let frames = short_side_scale_jitter(
        frames,
        &mut keypoints,
        params.min_scale,
        params.max_scale,
        false,
        rng,
      )?;
      uniform_crop(&frames, &mut keypoints, params.crop_size, spatial_idx)?
    }
  };
  check_alignment(&frames, &keypoints)?;
  Ok((frames, keypoints))
}

/// 按 `linspace(0, T - 1, num_frames)` 重采样，帧与关节点使用同一组帧号
pub fn temporal_resample(
  frames: Array4<f32>,
  keypoints: Keypoints,
  num_frames: usize,
) -> Result<(Array4<f32>, Keypoints), TransformError> {
  check_alignment(&frames, &keypoints)?;
  let t = frames.len_of(Axis(0));
  if t == num_frames || t == 0 {
    return Ok((frames, keypoints));
  }
  let indices: Vec<usize> = linspace(0.0, (t - 1) as f64, num_frames)
    .into_iter()
    .map(|i| i as usize)
    .collect();
  let frames = frames.select(Axis(0), &indices);
  let keypoints = keypoints.select_frames(&indices)?;
  Ok((frames, keypoints))
}

/// 完整的增强流程：归一化、联合空间增强、时间重采样，输出 (C, T, H, W)
pub fn augment(
  frames: &Array4<u8>,
  keypoints: Keypoints,
  mean: &[f32],
  std: &[f32],
  params: &SpatialParams,
  num_frames: usize,
  rng: &mut dyn RngCore,
) -> Result<(Array4<f32>, Keypoints), TransformError> {
  let frames = normalize(frames, mean, std);
  let (frames, keypoints) = spatial_sampling(frames, keypoints, params, rng)?;
  let (frames, keypoints) = temporal_resample(frames, keypoints, num_frames)?;
  let frames = frames
    .permuted_axes([3, 0, 1, 2])
    .as_standard_layout()
    .into_owned();
  Ok((frames, keypoints))
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array2, Array3};
  use rand::{SeedableRng, rngs::StdRng};

  const MEAN: [f32; 3] = [0.45, 0.45, 0.45];
  const STD: [f32; 3] = [0.225, 0.225, 0.225];

  fn keypoints_at(frames: usize, points: &[(f32, f32)]) -> Keypoints {
    let mut coords = Array3::zeros((frames, points.len(), 2));
    for t in 0..frames {
      for (j, (x, y)) in points.iter().enumerate() {
        coords[[t, j, 0]] = *x;
        coords[[t, j, 1]] = *y;
      }
    }
    Keypoints::new(coords, Array2::from_elem((frames, points.len()), true)).unwrap()
  }

  /// 在 (x, y) 处放一个亮点，其余为黑
  fn frames_with_dot(t: usize, h: usize, w: usize, x: usize, y: usize) -> Array4<f32> {
    let mut frames = Array4::zeros((t, h, w, 3));
    frames.slice_mut(s![.., y, x, ..]).fill(1.0);
    frames
  }

  fn brightest(frame: ndarray::ArrayView3<'_, f32>) -> (usize, usize) {
    let mut best = (0, 0, f32::MIN);
    for ((y, x, c), v) in frame.indexed_iter() {
      if c == 0 && *v > best.2 {
        best = (x, y, *v);
      }
    }
    (best.0, best.1)
  }

  #[test]
  fn normalize_round_trips_through_denormalize() {
    let raw = Array4::from_shape_fn((1, 2, 2, 3), |(_, y, x, c)| (y * 60 + x * 30 + c * 10) as u8);
    let normalized = normalize(&raw, &MEAN, &STD);
    assert!((normalized[[0, 0, 0, 0]] - (0.0 - 0.45) / 0.225).abs() < 1e-6);
    assert_eq!(denormalize(&normalized, &MEAN, &STD), raw);
  }

  #[test]
  fn fixed_crop_picks_left_center_right_for_wide_frames() {
    let frames = Array4::<f32>::zeros((2, 32, 64, 3));
    let params = |idx| SpatialParams {
      spatial: SpatialSample::Fixed(idx),
      min_scale: 32,
      max_scale: 32,
      crop_size: 32,
      random_flip: false,
      inverse_uniform_sampling: false,
    };
    let mut rng = StdRng::seed_from_u64(0);
    let kp = keypoints_at(2, &[(40.0, 10.0)]);
    let expected_x = [40.0, 24.0, 8.0];
    for (idx, x) in expected_x.iter().enumerate() {
      let (out, kp) = spatial_sampling(frames.clone(), kp.clone(), &params(idx), &mut rng).unwrap();
      assert_eq!(out.dim(), (2, 32, 32, 3));
      assert_eq!(kp.xy(1, 0), Some((*x, 10.0)));
    }
  }

  #[test]
  fn fixed_crop_picks_top_center_bottom_for_tall_frames() {
    let frames = Array4::<f32>::zeros((1, 48, 16, 3));
    let mut rng = StdRng::seed_from_u64(0);
    let kp = keypoints_at(1, &[(5.0, 30.0)]);
    for (idx, y) in [30.0, 14.0, -2.0].iter().enumerate() {
      let params = SpatialParams {
        spatial: SpatialSample::Fixed(idx),
        min_scale: 16,
        max_scale: 16,
        crop_size: 16,
        random_flip: false,
        inverse_uniform_sampling: false,
      };
      let (out, kp) = spatial_sampling(frames.clone(), kp.clone(), &params, &mut rng).unwrap();
      assert_eq!(out.dim(), (1, 16, 16, 3));
      assert_eq!(kp.xy(0, 0), Some((5.0, *y)));
    }
  }

  #[test]
  fn deterministic_crop_rejects_jitter() {
    let params = SpatialParams {
      spatial: SpatialSample::Fixed(1),
      min_scale: 16,
      max_scale: 32,
      crop_size: 16,
      random_flip: false,
      inverse_uniform_sampling: false,
    };
    let mut rng = StdRng::seed_from_u64(0);
    let err = spatial_sampling(
      Array4::zeros((1, 32, 32, 3)),
      keypoints_at(1, &[(1.0, 1.0)]),
      &params,
      &mut rng,
    )
    .unwrap_err();
    assert!(matches!(err, TransformError::JitterInDeterministicCrop { .. }));
  }

  #[test]
  fn keypoints_follow_pixels_through_random_crop_and_flip() {
    // 不缩放，只有裁剪与翻转，亮点位置必须与关节点一致
    let params = SpatialParams {
      spatial: SpatialSample::Random,
      min_scale: 48,
      max_scale: 48,
      crop_size: 32,
      random_flip: true,
      inverse_uniform_sampling: false,
    };
    for seed in 0..20 {
      let mut rng = StdRng::seed_from_u64(seed);
      let frames = frames_with_dot(1, 48, 64, 30, 24);
      // 连续坐标下像素 30 的中心为 30.5
      let kp = keypoints_at(1, &[(30.5, 24.5)]);
      let (out, kp) = spatial_sampling(frames, kp, &params, &mut rng).unwrap();
      let Some((x, y)) = kp.xy(0, 0) else { panic!("关节点丢失") };
      if (0.0..32.0).contains(&x) && (0.0..32.0).contains(&y) {
        let (px, py) = brightest(out.index_axis(Axis(0), 0));
        assert_eq!((px, py), (x.floor() as usize, y.floor() as usize), "seed {}", seed);
      }
    }
  }

  #[test]
  fn in_bounds_keypoints_stay_inside_crop() {
    let params = SpatialParams {
      spatial: SpatialSample::Random,
      min_scale: 32,
      max_scale: 40,
      crop_size: 32,
      random_flip: true,
      inverse_uniform_sampling: true,
    };
    let frames = Array4::<f32>::zeros((2, 40, 60, 3));
    let points = [(0.5, 0.5), (59.5, 39.5), (30.0, 20.0), (12.25, 33.75)];
    for seed in 0..30 {
      let mut rng = StdRng::seed_from_u64(seed);
      let (out, kp) =
        spatial_sampling(frames.clone(), keypoints_at(2, &points), &params, &mut rng).unwrap();
      assert_eq!(out.dim().1, 32);
      assert_eq!(out.dim().2, 32);
      assert_eq!(kp.len(), 2);
      for j in 0..points.len() {
        let (x, y) = kp.xy(0, j).unwrap();
        let (x1, y1) = kp.xy(1, j).unwrap();
        assert_eq!((x, y), (x1, y1));
        // 中心点在任何缩放与裁剪下都位于窗口内
        if j == 2 {
          assert!((0.0..32.0).contains(&x) && (0.0..32.0).contains(&y), "seed {}: {:?}", seed, (x, y));
        }
      }
    }
  }

  #[test]
  fn flip_keeps_edge_keypoints_inside_crop() {
    let params = SpatialParams {
      spatial: SpatialSample::Random,
      min_scale: 32,
      max_scale: 32,
      crop_size: 32,
      random_flip: true,
      inverse_uniform_sampling: false,
    };
    let points = [(0.0, 5.0), (32.0 - 1e-3, 5.0)];
    let mut flipped = 0;
    for seed in 0..20 {
      let mut rng = StdRng::seed_from_u64(seed);
      let (_, kp) = spatial_sampling(
        Array4::zeros((1, 32, 32, 3)),
        keypoints_at(1, &points),
        &params,
        &mut rng,
      )
      .unwrap();
      for j in 0..points.len() {
        let (x, _) = kp.xy(0, j).unwrap();
        assert!((0.0..32.0).contains(&x), "seed {}: joint {} at x={}", seed, j, x);
      }
      if kp.xy(0, 0) != Some(points[0]) {
        assert_eq!(kp.xy(0, 0), Some((31.0, 5.0)));
        flipped += 1;
      }
    }
    assert!(flipped > 0);
  }

  #[test]
  fn temporal_resample_keeps_frames_and_keypoints_aligned() {
    let frames = Array4::from_shape_fn((8, 2, 2, 3), |(t, _, _, _)| t as f32);
    let coords = Array3::from_shape_fn((8, 1, 2), |(t, _, _)| t as f32);
    let kp = Keypoints::new(coords, Array2::from_elem((8, 1), true)).unwrap();
    let (frames, kp) = temporal_resample(frames, kp, 4).unwrap();
    assert_eq!(frames.len_of(Axis(0)), 4);
    assert_eq!(kp.len(), 4);
    for t in 0..4 {
      assert_eq!(frames[[t, 0, 0, 0]], kp.coords()[[t, 0, 0]]);
    }
    assert_eq!(kp.coords()[[3, 0, 0]], 7.0);
  }

  #[test]
  fn mismatched_lengths_fail_loudly() {
    let mut rng = StdRng::seed_from_u64(0);
    let params = SpatialParams {
      spatial: SpatialSample::Fixed(1),
      min_scale: 8,
      max_scale: 8,
      crop_size: 8,
      random_flip: false,
      inverse_uniform_sampling: false,
    };
    let err = spatial_sampling(
      Array4::zeros((3, 8, 8, 3)),
      keypoints_at(2, &[(1.0, 1.0)]),
      &params,
      &mut rng,
    )
    .unwrap_err();
    assert!(matches!(
      err,
      TransformError::FrameCountMismatch {
        frames: 3,
        keypoints: 2
      }
    ));
  }

  #[test]
  fn augment_outputs_channel_first() {
    let raw = Array4::<u8>::from_elem((4, 32, 48, 3), 128);
    let params = SpatialParams {
      spatial: SpatialSample::Fixed(1),
      min_scale: 32,
      max_scale: 32,
      crop_size: 32,
      random_flip: false,
      inverse_uniform_sampling: false,
    };
    let mut rng = StdRng::seed_from_u64(0);
    let (frames, kp) = augment(
      &raw,
      keypoints_at(4, &[(24.0, 16.0)]),
      &MEAN,
      &STD,
      &params,
      2,
      &mut rng,
    )
    .unwrap();
    assert_eq!(frames.dim(), (3, 2, 32, 32));
    assert_eq!(kp.len(), 2);
    assert_eq!(kp.xy(0, 0), Some((16.0, 16.0)));
  }
}
