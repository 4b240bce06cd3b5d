// 该文件是 Yanxing （雁行） 项目的一部分。
// src/pose/lcr_net.rs - LCR-Net JSON 关节点解析
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

//! LCR-Net 输出格式：
//!
//! ```json
//! {
//!   "njts": 13,
//!   "frames": [
//!     [ { "pose2d": [x0, ..., x12, y0, ..., y12], "pose3d": [...], "cumscore": 3.2 } ],
//!     []
//!   ]
//! }
//! ```
//!
//! 每帧可能有多个检测结果，取 `cumscore` 最高者；没有检测结果的帧全部标记为无效。

use std::path::Path;

use ndarray::{Array2, Array3};
use serde::Deserialize;

use crate::pose::{Keypoints, PoseError, PoseParser};

#[derive(Debug, Deserialize)]
struct LcrNetDocument {
  njts: usize,
  frames: Vec<Vec<LcrNetDetection>>,
}

#[derive(Debug, Deserialize)]
struct LcrNetDetection {
  pose2d: Vec<f32>,
  #[serde(default)]
  pose3d: Vec<f32>,
  #[serde(default)]
  cumscore: f32,
}

#[derive(Debug, Clone, Default)]
pub struct LcrNetJsonParser {
  with_depth: bool,
}

impl LcrNetJsonParser {
  pub fn new() -> Self {
    Self::default()
  }

  /// 同时读取 `pose3d` 中的深度作为第三个坐标分量
  pub fn with_depth(mut self, with_depth: bool) -> Self {
    self.with_depth = with_depth;
    self
  }

  pub fn parse_str(&self, content: &str) -> Result<Keypoints, PoseError> {
    let document: LcrNetDocument = serde_json::from_str(content).map_err(|source| {
      PoseError::Json {
        path: "<memory>".into(),
        source,
      }
    })?;
    self.build(document)
  }

  fn build(&self, document: LcrNetDocument) -> Result<Keypoints, PoseError> {
    let njts = document.njts;
    if njts == 0 {
      return Err(PoseError::Format("njts 必须大于 0".to_string()));
    }
    let dims = if self.with_depth { 3 } else { 2 };
    let frames = document.frames.len();
    let mut coords = Array3::<f32>::zeros((frames, njts, dims));
    let mut valid = Array2::<bool>::from_elem((frames, njts), false);

    for (t, detections) in document.frames.iter().enumerate() {
      let Some(best) = detections
        .iter()
        .max_by(|a, b| a.cumscore.total_cmp(&b.cumscore))
      else {
        continue;
      };
      if best.pose2d.len() != 2 * njts {
        return Err(PoseError::Format(format!(
          "第 {} 帧 pose2d 长度为 {}, 期望 {}",
          t,
          best.pose2d.len(),
          2 * njts
        )));
      }
      let depth = if self.with_depth {
        if best.pose3d.len() != 3 * njts {
          return Err(PoseError::Format(format!(
            "第 {} 帧 pose3d 长度为 {}, 期望 {}",
            t,
            best.pose3d.len(),
            3 * njts
          )));
        }
        Some(&best.pose3d[2 * njts..])
      } else {
        None
      };
      for j in 0..njts {
        let (x, y) = (best.pose2d[j], best.pose2d[njts + j]);
        coords[[t, j, 0]] = x;
        coords[[t, j, 1]] = y;
        if let Some(z) = depth {
          coords[[t, j, 2]] = z[j];
        }
        valid[[t, j]] = x.is_finite() && y.is_finite();
      }
    }

    Keypoints::new(coords, valid)
  }
}

impl PoseParser for LcrNetJsonParser {
  fn parse(&self, path: &Path) -> Result<Keypoints, PoseError> {
    let content = std::fs::read_to_string(path).map_err(|source| PoseError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let document: LcrNetDocument =
      serde_json::from_str(&content).map_err(|source| PoseError::Json {
        path: path.to_path_buf(),
        source,
      })?;
    self.build(document)
  }
}
