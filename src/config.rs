// 该文件是 Biaozhu （标注） 项目的一部分。
// src/config.rs - 配置定义与加载
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

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

pub const ENV_PREFIX: &str = "BIAOZHU";

const DEFAULT_ARCHIVE_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/object_detection_segmentation/ssd-mobilenetv1/model/ssd_mobilenet_v1_10.tar.gz";
const DEFAULT_MODEL_FILE: &str = "ssd_mobilenet_v1/ssd_mobilenet_v1.onnx";
const DEFAULT_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置加载错误: {0}")]
  Load(#[from] config::ConfigError),
  #[error("置信度阈值必须位于 [0, 1] 之间, 实际为 {0}")]
  InvalidMinScore(f32),
  #[error("{0} 必须大于 0")]
  ZeroValue(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub workspace: WorkspaceConfig,
  pub model: ModelConfig,
  pub download: DownloadConfig,
  pub catalog: CatalogConfig,
  pub render: RenderConfig,
}

/// 工作目录布局：上传图片与标注结果位于 `images_dir`，模型与类别表位于 `work_dir`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
  pub work_dir: PathBuf,
  pub images_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
  /// 模型压缩包下载地址
  pub archive_url: String,
  /// 解压后模型文件相对 `work_dir` 的路径
  pub model_file: PathBuf,
  pub input_node: String,
  pub boxes_node: String,
  pub scores_node: String,
  pub classes_node: String,
  pub count_node: String,
  pub intra_threads: usize,
  pub inference_timeout_secs: u64,
  /// 复用已存在的压缩包之前是否校验其完整性
  pub verify_archive: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
  pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
  pub min_score: f32,
  pub font: Option<PathBuf>,
  pub font_size: f32,
  /// 是否在输出图片旁写入 JSON 检测记录
  pub record_detections: bool,
}

impl Default for WorkspaceConfig {
  fn default() -> Self {
    Self {
      work_dir: PathBuf::from("."),
      images_dir: PathBuf::from("images"),
    }
  }
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      archive_url: DEFAULT_ARCHIVE_URL.to_string(),
      model_file: PathBuf::from(DEFAULT_MODEL_FILE),
      input_node: "image_tensor:0".to_string(),
      boxes_node: "detection_boxes:0".to_string(),
      scores_node: "detection_scores:0".to_string(),
      classes_node: "detection_classes:0".to_string(),
      count_node: "num_detections:0".to_string(),
      intra_threads: 4,
      inference_timeout_secs: 120,
      verify_archive: true,
    }
  }
}

impl Default for DownloadConfig {
  fn default() -> Self {
    Self { timeout_secs: 600 }
  }
}

impl Default for CatalogConfig {
  fn default() -> Self {
    Self {
      path: PathBuf::from("mscoco_label_map.pbtxt"),
    }
  }
}

impl Default for RenderConfig {
  fn default() -> Self {
    Self {
      min_score: 0.6,
      font: Some(PathBuf::from(DEFAULT_FONT)),
      font_size: 18.0,
      record_detections: false,
    }
  }
}

impl fmt::Display for AppConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(
      f,
      "work_dir {}, model {}, catalog {}, min_score {:.2}",
      self.workspace.work_dir.display(),
      self.model.model_file.display(),
      self.catalog.path.display(),
      self.render.min_score
    )
  }
}

impl AppConfig {
  /// 从可选的 TOML 文件与 `BIAOZHU__*` 环境变量加载配置
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
      builder = builder.add_source(File::from(path));
    }
    let config: AppConfig = builder
      .add_source(
        Environment::with_prefix(ENV_PREFIX)
          .separator("__")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()?;

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let min_score = self.render.min_score;
    if !(0.0..=1.0).contains(&min_score) {
      return Err(ConfigError::InvalidMinScore(min_score));
    }
    if self.model.inference_timeout_secs == 0 {
      return Err(ConfigError::ZeroValue("model.inference_timeout_secs"));
    }
    if self.download.timeout_secs == 0 {
      return Err(ConfigError::ZeroValue("download.timeout_secs"));
    }
    Ok(())
  }

  pub fn images_dir(&self) -> PathBuf {
    self.workspace.work_dir.join(&self.workspace.images_dir)
  }

  pub fn catalog_path(&self) -> PathBuf {
    self.workspace.work_dir.join(&self.catalog.path)
  }

  pub fn inference_timeout(&self) -> Duration {
    Duration::from_secs(self.model.inference_timeout_secs)
  }

  pub fn download_timeout(&self) -> Duration {
    Duration::from_secs(self.download.timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.render.min_score, 0.6);
    assert_eq!(config.model.input_node, "image_tensor:0");
    assert_eq!(config.images_dir(), PathBuf::from("./images"));
  }

  #[test]
  fn loads_partial_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("biaozhu.toml");
    std::fs::write(
      &path,
      "[render]\nmin_score = 0.75\n\n[workspace]\nwork_dir = \"/srv/biaozhu\"\n",
    )
    .unwrap();

    let config = AppConfig::load(Some(&path)).unwrap();
    assert_eq!(config.render.min_score, 0.75);
    assert_eq!(config.workspace.work_dir, PathBuf::from("/srv/biaozhu"));
    assert_eq!(config.catalog.path, PathBuf::from("mscoco_label_map.pbtxt"));
    assert!(config.model.verify_archive);
  }

  #[test]
  fn rejects_out_of_range_threshold() {
    let mut config = AppConfig::default();
    config.render.min_score = 1.5;
    assert!(matches!(
      config.validate(),
      Err(ConfigError::InvalidMinScore(_))
    ));
  }

  #[test]
  fn rejects_zero_timeout() {
    let mut config = AppConfig::default();
    config.model.inference_timeout_secs = 0;
    assert!(matches!(config.validate(), Err(ConfigError::ZeroValue(_))));
  }
}
