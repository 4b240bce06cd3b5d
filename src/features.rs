// 该文件是 Yanxing （雁行） 项目的一部分。
// src/features.rs - 预计算辅助特征
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

use std::{
  fs::File,
  io::BufReader,
  path::{Path, PathBuf},
};

use ndarray::ArrayD;
use ndarray_npy::{ReadNpyError, ReadNpyExt};
use thiserror::Error;
use tracing::info;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum FeatureError {
  #[error("打开特征文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("读取特征文件 {path} 失败: {source}")]
  Npy {
    path: PathBuf,
    #[source]
    source: ReadNpyError,
  },
}

/// 以视频标识（去掉扩展名的文件名）为键的特征存储
pub trait FeatureStore: Send + Sync {
  fn load(&self, identifier: &str) -> Result<ArrayD<f32>, FeatureError>;
}

/// `<root>/<identifier>.npy`
#[derive(Debug, Clone)]
pub struct NpyFeatureStore {
  root: PathBuf,
}

impl NpyFeatureStore {
  pub fn new(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
    let root = root.into();
    if !root.is_dir() {
      return Err(ConfigError::FeaturePathMissing(root));
    }
    Ok(Self { root })
  }

  /// 路径为空时不加载特征
  pub fn from_config_path(path: &Path) -> Result<Option<Self>, ConfigError> {
    if path.as_os_str().is_empty() {
      return Ok(None);
    }
    let store = Self::new(path)?;
    info!("从 {} 加载辅助特征", path.display());
    Ok(Some(store))
  }

  pub fn path_for(&self, identifier: &str) -> PathBuf {
    self.root.join(format!("{}.npy", identifier))
  }
}

impl FeatureStore for NpyFeatureStore {
  fn load(&self, identifier: &str) -> Result<ArrayD<f32>, FeatureError> {
    let path = self.path_for(identifier);
    let file = File::open(&path).map_err(|source| FeatureError::Io {
      path: path.clone(),
      source,
    })?;
    ArrayD::<f32>::read_npy(BufReader::new(file)).map_err(|source| FeatureError::Npy { path, source })
  }
}
