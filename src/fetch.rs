// 该文件是 Yanxing （雁行） 项目的一部分。
// src/fetch.rs - 带重试与替换的片段获取
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

//! 视频打开或解码失败是常态，不会向上传播。训练与验证模式在尝试次数超过
//! 重试预算的一半后，换成随机抽取的另一个索引；测试模式始终坚持原索引。

use std::sync::PoisonError;

use rand::{Rng, RngCore};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::Mode,
  corpus::Corpus,
  decoder::{DecodeRequest, VideoDecoder, VideoMetaCache},
  frame::DecodedClip,
  sampling::SamplingParams,
};

#[derive(Error, Debug)]
pub enum FetchError {
  #[error("索引 {index} 超出语料范围 {len}")]
  OutOfRange { index: usize, len: usize },
  #[error("重试 {retries} 次后仍无法获取视频，最后尝试的索引为 {index}")]
  Exhausted { index: usize, retries: usize },
}

/// 替换策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  mode: Mode,
  num_retries: usize,
}

impl RetryPolicy {
  pub fn new(mode: Mode, num_retries: usize) -> Self {
    Self { mode, num_retries }
  }

  pub fn num_retries(&self) -> usize {
    self.num_retries
  }

  /// 第 `attempt` 次（从 0 开始）尝试失败后是否换索引
  pub fn should_substitute(&self, attempt: usize) -> bool {
    self.mode.is_training_like() && attempt > self.num_retries / 2
  }

  /// 第 `attempt` 次尝试失败后，下一次尝试使用的索引
  pub fn next_index(
    &self,
    attempt: usize,
    current: usize,
    corpus_len: usize,
    rng: &mut dyn RngCore,
  ) -> usize {
    if corpus_len > 0 && self.should_substitute(attempt) {
      rng.gen_range(0..corpus_len)
    } else {
      current
    }
  }
}

/// 成功获取的片段
#[derive(Debug)]
pub struct FetchedClip {
  pub clip: DecodedClip,
  /// 最终使用的索引，可能已被替换
  pub index: usize,
  /// 总尝试次数
  pub attempts: usize,
}

/// 重试状态机
#[derive(Debug)]
pub enum RetryState {
  Attempting { index: usize, attempt: usize },
  Substituting { from: usize, attempt: usize },
  Succeeded(FetchedClip),
  Exhausted { index: usize },
}

pub struct ClipFetcher<'a, D: VideoDecoder> {
  decoder: &'a D,
  corpus: &'a Corpus,
  cache: &'a VideoMetaCache,
  policy: RetryPolicy,
  multithread: bool,
  num_frames: usize,
  num_ensemble_views: usize,
  target_fps: f64,
}

impl<'a, D: VideoDecoder> ClipFetcher<'a, D> {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    decoder: &'a D,
    corpus: &'a Corpus,
    cache: &'a VideoMetaCache,
    policy: RetryPolicy,
    multithread: bool,
    num_frames: usize,
    num_ensemble_views: usize,
    target_fps: f64,
  ) -> Self {
    Self {
      decoder,
      corpus,
      cache,
      policy,
      multithread,
      num_frames,
      num_ensemble_views,
      target_fps,
    }
  }

  /// 获取 `index` 对应的片段，失败时按策略重试或替换
  pub fn fetch(
    &self,
    index: usize,
    params: &SamplingParams,
    sampling_rate: usize,
    rng: &mut dyn RngCore,
  ) -> Result<FetchedClip, FetchError> {
    if index >= self.corpus.len() {
      return Err(FetchError::OutOfRange {
        index,
        len: self.corpus.len(),
      });
    }
    let request = DecodeRequest {
      sampling_rate,
      num_frames: self.num_frames,
      temporal: params.temporal,
      num_ensemble_views: self.num_ensemble_views,
      target_fps: self.target_fps,
      max_spatial_scale: params.min_scale,
    };

    let mut state = RetryState::Attempting { index, attempt: 0 };
    loop {
      state = match state {
        RetryState::Attempting { index, attempt } => {
          if attempt >= self.policy.num_retries() {
            RetryState::Exhausted { index }
          } else {
            match self.try_once(index, &request, attempt, rng) {
              Some(clip) => RetryState::Succeeded(FetchedClip {
                clip,
                index,
                attempts: attempt + 1,
              }),
              None => RetryState::Substituting {
                from: index,
                attempt,
              },
            }
          }
        }
        RetryState::Substituting { from, attempt } => {
          let next = self
            .policy
            .next_index(attempt, from, self.corpus.len(), rng);
          if next != from {
            debug!("索引 {} 替换为 {}", from, next);
          }
          RetryState::Attempting {
            index: next,
            attempt: attempt + 1,
          }
        }
        RetryState::Succeeded(fetched) => return Ok(fetched),
        RetryState::Exhausted { index } => {
          return Err(FetchError::Exhausted {
            index,
            retries: self.policy.num_retries(),
          });
        }
      };
    }
  }

  fn try_once(
    &self,
    index: usize,
    request: &DecodeRequest,
    attempt: usize,
    rng: &mut dyn RngCore,
  ) -> Option<DecodedClip> {
    let entry = self.corpus.get(index)?;
    let path = &entry.video_path;

    let mut container = match self.decoder.open(path, self.multithread) {
      Ok(container) => container,
      Err(e) => {
        info!("无法打开视频 {}: {}", path.display(), e);
        warn!(
          "读取视频元数据失败 idx {} 路径 {}; 第 {} 次尝试",
          index,
          path.display(),
          attempt
        );
        return None;
      }
    };

    let handle = self.cache.get_or_create(index);
    let mut meta = handle.lock().unwrap_or_else(PoisonError::into_inner);
    match self.decoder.decode(&mut container, request, &mut meta, rng) {
      Ok(Some(clip)) => Some(clip),
      Ok(None) => {
        warn!(
          "解码视频失败 idx {} 路径 {}; 第 {} 次尝试",
          index,
          path.display(),
          attempt
        );
        None
      }
      Err(e) => {
        warn!(
          "解码视频出错 idx {} 路径 {}; 第 {} 次尝试: {}",
          index,
          path.display(),
          attempt,
          e
        );
        None
      }
    }
  }
}
