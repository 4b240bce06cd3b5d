// 该文件是 Yanxing （雁行） 项目的一部分。
// src/corpus.rs - 语料索引
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

use tracing::info;

use crate::config::ConfigError;

/// 语料条目
///
/// 构造后不再修改。同一行展开出的条目连续排列，共享路径与标签，
/// 仅 `sub_index` 不同。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
  pub video_path: PathBuf,
  pub pose_path: PathBuf,
  pub label: i64,
  /// 时空子索引，取值 `0..num_clips`
  pub sub_index: usize,
}

impl CorpusEntry {
  /// 视频标识：去掉扩展名的文件名
  pub fn video_identifier(&self) -> String {
    self
      .video_path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default()
  }
}

#[derive(Debug, Clone)]
pub struct Corpus {
  entries: Vec<CorpusEntry>,
  clips_per_line: usize,
}

impl Corpus {
  /// 从索引文件构造语料，每行格式为 `video_path SEP pose_path SEP label`
  pub fn from_index_file(
    path: &Path,
    separator: &str,
    path_prefix: &Path,
    clips_per_line: usize,
  ) -> Result<Self, ConfigError> {
    if !path.is_file() {
      return Err(ConfigError::IndexFileMissing(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let corpus = Self::parse(&content, path, separator, path_prefix, clips_per_line)?;
    info!(
      "从 {} 构造语料完成，共 {} 个条目",
      path.display(),
      corpus.len()
    );
    Ok(corpus)
  }

  pub fn parse(
    content: &str,
    path: &Path,
    separator: &str,
    path_prefix: &Path,
    clips_per_line: usize,
  ) -> Result<Self, ConfigError> {
    let mut entries = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
      let fields: Vec<&str> = line.split(separator).collect();
      if fields.len() != 3 {
        return Err(ConfigError::MalformedIndexLine {
          path: path.to_path_buf(),
          line: line_idx + 1,
          reason: format!("期望 3 个字段, 实际 {} 个", fields.len()),
        });
      }
      let label = fields[2]
        .trim()
        .parse::<i64>()
        .map_err(|e| ConfigError::MalformedIndexLine {
          path: path.to_path_buf(),
          line: line_idx + 1,
          reason: format!("标签 '{}' 不是整数: {}", fields[2], e),
        })?;
      let video_path = path_prefix.join(fields[0]);
      let pose_path = path_prefix.join(fields[1]);
      for sub_index in 0..clips_per_line {
        entries.push(CorpusEntry {
          video_path: video_path.clone(),
          pose_path: pose_path.clone(),
          label,
          sub_index,
        });
      }
    }

    if entries.is_empty() {
      return Err(ConfigError::EmptyIndex(path.to_path_buf()));
    }

    Ok(Corpus {
      entries,
      clips_per_line,
    })
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn clips_per_line(&self) -> usize {
    self.clips_per_line
  }

  pub fn get(&self, index: usize) -> Option<&CorpusEntry> {
    self.entries.get(index)
  }

  pub fn entries(&self) -> &[CorpusEntry] {
    &self.entries
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(content: &str, clips: usize) -> Result<Corpus, ConfigError> {
    Corpus::parse(
      content,
      Path::new("train.csv"),
      " ",
      Path::new("/data"),
      clips,
    )
  }

  #[test]
  fn lines_are_replicated_contiguously() {
    let corpus = parse("a.mp4 a.json 3\nb.mp4 b.json 7", 3).unwrap();
    assert_eq!(corpus.len(), 6);
    let subs: Vec<_> = corpus.entries().iter().map(|e| e.sub_index).collect();
    assert_eq!(subs, vec![0, 1, 2, 0, 1, 2]);
    assert!(corpus.entries()[..3].iter().all(|e| e.label == 3));
    assert!(corpus.entries()[3..].iter().all(|e| e.label == 7));
    assert_eq!(corpus.entries()[4].video_path, PathBuf::from("/data/b.mp4"));
    assert_eq!(corpus.entries()[4].pose_path, PathBuf::from("/data/b.json"));
  }

  #[test]
  fn wrong_field_count_reports_line() {
    let err = parse("a.mp4 a.json 3\nb.mp4 7", 1).unwrap_err();
    assert!(matches!(err, ConfigError::MalformedIndexLine { line: 2, .. }));
  }

  #[test]
  fn non_integer_label_is_rejected() {
    let err = parse("a.mp4 a.json cat", 1).unwrap_err();
    assert!(matches!(err, ConfigError::MalformedIndexLine { line: 1, .. }));
  }

  #[test]
  fn empty_index_is_rejected() {
    assert!(matches!(parse("", 1), Err(ConfigError::EmptyIndex(_))));
  }

  #[test]
  fn custom_separator_is_honoured() {
    let corpus = Corpus::parse(
      "clips/a b.mp4,poses/a.json,1",
      Path::new("val.csv"),
      ",",
      Path::new(""),
      1,
    )
    .unwrap();
    assert_eq!(corpus.entries()[0].video_path, PathBuf::from("clips/a b.mp4"));
    assert_eq!(corpus.entries()[0].video_identifier(), "a b");
  }

  #[test]
  fn missing_index_file_is_a_config_error() {
    let err = Corpus::from_index_file(
      Path::new("/definitely/not/here/train.csv"),
      " ",
      Path::new(""),
      1,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::IndexFileMissing(_)));
  }
}
