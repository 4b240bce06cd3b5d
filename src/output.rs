// 该文件是 Yanxing （雁行） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use url::Url;

use crate::FromUrl;
#[cfg(feature = "directory_record")]
use crate::FromUrlWithScheme;
use crate::dataset::Example;

pub trait Render<T>: Sized {
  type Error;
  fn render_result(&self, item: &T) -> Result<(), Self::Error>;
}

#[cfg(feature = "directory_record")]
pub mod draw;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  /// 不输出任何内容
  Discard,
}

impl OutputWrapper {
  /// 可视化时使用的归一化参数，对不绘图的输出无影响
  pub fn with_normalization(self, mean: &[f32], std: &[f32]) -> Self {
    match self {
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        OutputWrapper::DirectoryRecordOutput(output.with_normalization(mean, std))
      }
      other => {
        let _ = (mean, std);
        other
      }
    }
  }
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      "null" => Ok(OutputWrapper::Discard),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<Example> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, example: &Example) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(example)
        .map_err(OutputError::from),
      OutputWrapper::Discard => Ok(()),
    }
  }
}
