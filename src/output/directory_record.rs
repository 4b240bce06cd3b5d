// 该文件是 Yanxing （雁行） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! `folder:///path/to/dir` 为每个样本写出逐帧 PNG 与一份文本记录，
//! `folder:///path/to/dir?record` 只写文本记录。
//!
//! 文件按日期分目录存放：`<dir>/<yyyy>/<mm>/<dd>/<HH-MM-SS>-<id>-idx<index>`。

use std::{
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  dataset::Example,
  output::{
    Render,
    draw::{Draw, Record},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record,
}

impl DrawWrapper {
  pub fn save_example(&self, stem: &Path, example: &Example) -> Result<(), DirectoryRecordOutputError> {
    if let DrawWrapper::Draw(draw) = self {
      for (t, mut image) in draw.frames(example).into_iter().enumerate() {
        draw.draw_frame(&mut image, example, t);
        let path = PathBuf::from(format!("{}-t{:02}.png", stem.display(), t));
        image.save(&path)?;
      }
    }
    Record::record(example, stem)?;
    Ok(())
  }
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  counter: Mutex<u16>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record_only = uri.query_pairs().any(|(k, _)| k == "record");
    let draw = if record_only {
      DrawWrapper::Record
    } else {
      DrawWrapper::Draw(Box::default())
    };

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw,
      counter: Mutex::new(0),
    })
  }
}

impl DirectoryRecordOutput {
  /// 可视化时使用的归一化参数
  pub fn with_normalization(mut self, mean: &[f32], std: &[f32]) -> Self {
    self.draw = match self.draw {
      DrawWrapper::Draw(draw) => DrawWrapper::Draw(Box::new((*draw).with_normalization(mean, std))),
      DrawWrapper::Record => DrawWrapper::Record,
    };
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn next_id(&self) -> u16 {
    let mut counter = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn example_stem(&self, example: &Example) -> Result<PathBuf, std::io::Error> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}-idx{}",
      now.format("%H-%M-%S"),
      self.next_id(),
      example.index
    )))
  }
}

impl Render<Example> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, example: &Example) -> Result<(), Self::Error> {
    let stem = self.example_stem(example)?;
    debug!("写出样本 {} 到 {}", example.index, stem.display());
    self.draw.save_example(&stem, example)
  }
}
