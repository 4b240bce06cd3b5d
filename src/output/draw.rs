// 该文件是 Yanxing （雁行） 项目的一部分。
// src/output/draw.rs - 样本可视化
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

use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_circle_mut, draw_hollow_rect_mut},
  rect::Rect,
};
use ndarray::Axis;

use crate::{
  dataset::Example,
  frame::hwc_to_rgb_image,
  transform::denormalize,
};

const MASK_COLOR: [u8; 3] = [255, 64, 0];
const MASK_ALPHA: f32 = 0.35;
const KEYPOINT_COLOR: [u8; 3] = [0, 255, 0];
const KEYPOINT_RADIUS: i32 = 2;

pub struct Draw {
  mean: Vec<f32>,
  std: Vec<f32>,
  mask_color: [u8; 3],
  mask_alpha: f32,
  keypoint_color: [u8; 3],
  keypoint_radius: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      mean: vec![0.45; 3],
      std: vec![0.225; 3],
      mask_color: MASK_COLOR,
      mask_alpha: MASK_ALPHA,
      keypoint_color: KEYPOINT_COLOR,
      keypoint_radius: KEYPOINT_RADIUS,
    }
  }
}

impl Draw {
  /// 使用与数据集相同的归一化参数还原像素
  pub fn with_normalization(mut self, mean: &[f32], std: &[f32]) -> Self {
    self.mean = mean.to_vec();
    self.std = std.to_vec();
    self
  }

  /// 还原出每一帧的 RGB 图像
  pub fn frames(&self, example: &Example) -> Vec<RgbImage> {
    // (C, T, H, W) -> (T, H, W, C)
    let thwc = example.frames.view().permuted_axes([1, 2, 3, 0]).to_owned();
    let pixels = denormalize(&thwc, &self.mean, &self.std);
    pixels
      .axis_iter(Axis(0))
      .map(hwc_to_rgb_image)
      .collect()
  }

  /// 绘制第 t 帧：叠加被占据的 patch 与关节点
  pub fn draw_frame(&self, image: &mut RgbImage, example: &Example, t: usize) {
    self.shade_mask(image, example, t);
    self.draw_keypoints(image, example, t);
  }

  fn shade_mask(&self, image: &mut RgbImage, example: &Example, t: usize) {
    let mask = &example.attention_mask;
    let (rows, cols) = mask.grid();
    if rows == 0 || cols == 0 || t >= mask.temporal_len() {
      return;
    }
    let patch_h = image.height() / rows as u32;
    let patch_w = image.width() / cols as u32;
    let color = Rgb(self.mask_color);
    for p in 0..rows * cols {
      if !mask.patch_active(t, p) {
        continue;
      }
      let (x0, y0) = ((p % cols) as u32 * patch_w, (p / cols) as u32 * patch_h);
      for y in y0..(y0 + patch_h).min(image.height()) {
        for x in x0..(x0 + patch_w).min(image.width()) {
          let pixel = image.get_pixel_mut(x, y);
          for c in 0..3 {
            pixel[c] = (pixel[c] as f32 * (1.0 - self.mask_alpha)
              + color[c] as f32 * self.mask_alpha)
              .round() as u8;
          }
        }
      }
      let rect = Rect::at(x0 as i32, y0 as i32).of_size(patch_w.max(1), patch_h.max(1));
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  fn draw_keypoints(&self, image: &mut RgbImage, example: &Example, t: usize) {
    let keypoints = &example.keypoints;
    if t >= keypoints.len() {
      return;
    }
    for j in 0..keypoints.joint_count() {
      let Some((x, y)) = keypoints.xy(t, j) else {
        continue;
      };
      if x < 0.0 || y < 0.0 || x >= image.width() as f32 || y >= image.height() as f32 {
        continue;
      }
      draw_filled_circle_mut(
        image,
        (x as i32, y as i32),
        self.keypoint_radius,
        Rgb(self.keypoint_color),
      );
    }
  }
}

/// 文本记录：标签、索引、形状与每帧掩码占用
pub struct Record;

impl Record {
  pub fn describe(example: &Example) -> String {
    let (t, h, w) = example.clip_shape();
    let mut lines = vec![
      format!("label: {}", example.label),
      format!("index: {}", example.index),
      format!("frames: {}x{}x{}", t, h, w),
      format!("mask: {:?} {:?}", example.attention_mask.granularity(), example.attention_mask.shape()),
    ];
    if let Some(features) = &example.aux_features {
      lines.push(format!("aux_features: {:?}", features.shape()));
    }
    if let Some(meta) = &example.metadata {
      lines.push(format!(
        "meta: frames={:?} fps={:?} size={:?}x{:?}",
        meta.frame_count, meta.fps, meta.width, meta.height
      ));
    }
    for (t, occupied) in example.attention_mask.occupancy().iter().enumerate() {
      lines.push(format!("t{:02}: {} patches", t, occupied));
    }
    lines.join("\n")
  }

  pub fn record(example: &Example, path: &std::path::Path) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), Self::describe(example))
  }
}
