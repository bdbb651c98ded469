// 该文件是 Biaozhu （标注） 项目的一部分。
// src/provision.rs - 模型文件下载与解压
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

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::FromUrl;

#[derive(Error, Debug)]
pub enum ProvisionError {
  #[error("模型下载地址无效: {0}")]
  InvalidUrl(String),
  #[error("下载错误: {0}")]
  Download(#[from] reqwest::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] io::Error),
  #[error("解压 {path} 失败: {source}")]
  Extract { path: String, source: io::Error },
  #[error("解压后未找到模型文件: {0}")]
  ModelMissing(String),
}

/// 下载器，将 `url` 的内容写入 `dest`，返回写入的字节数
pub trait Fetch {
  fn fetch(&self, url: &Url, dest: &mut dyn Write) -> Result<u64, ProvisionError>;
}

pub struct HttpFetcher {
  client: reqwest::blocking::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self, ProvisionError> {
    let client = reqwest::blocking::Client::builder()
      .timeout(timeout)
      .build()?;
    Ok(HttpFetcher { client })
  }
}

impl Fetch for HttpFetcher {
  fn fetch(&self, url: &Url, dest: &mut dyn Write) -> Result<u64, ProvisionError> {
    let mut response = self.client.get(url.as_str()).send()?.error_for_status()?;
    if let Some(len) = response.content_length() {
      debug!("压缩包大小: {:.2} MB", len as f64 / (1024.0 * 1024.0));
    }
    Ok(io::copy(&mut response, dest)?)
  }
}

/// 模型压缩包的来源与解压后模型文件的位置
#[derive(Debug, Clone)]
pub struct ModelArchive {
  url: Url,
  archive_name: String,
  model_file: PathBuf,
}

impl FromUrl for ModelArchive {
  type Error = ProvisionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !matches!(url.scheme(), "http" | "https") {
      return Err(ProvisionError::InvalidUrl(format!(
        "仅支持 http/https, 实际为 '{}'",
        url.scheme()
      )));
    }

    let archive_name = url
      .path_segments()
      .and_then(|mut segments| segments.next_back())
      .filter(|name| !name.is_empty())
      .ok_or_else(|| ProvisionError::InvalidUrl(format!("地址缺少文件名: {}", url)))?
      .to_string();

    let stem = archive_name
      .strip_suffix(".tar.gz")
      .or_else(|| archive_name.strip_suffix(".tgz"))
      .unwrap_or(&archive_name);
    let model_file = Path::new(stem).join("model.onnx");

    Ok(ModelArchive {
      url: url.clone(),
      archive_name,
      model_file,
    })
  }
}

impl ModelArchive {
  pub fn model_file(mut self, model_file: impl Into<PathBuf>) -> Self {
    self.model_file = model_file.into();
    self
  }

  pub fn archive_name(&self) -> &str {
    &self.archive_name
  }
}

pub struct ModelProvisioner<F = HttpFetcher> {
  archive: ModelArchive,
  fetcher: F,
  verify_archive: bool,
  lock: Mutex<()>,
}

impl<F: Fetch> ModelProvisioner<F> {
  pub fn new(archive: ModelArchive, fetcher: F) -> Self {
    ModelProvisioner {
      archive,
      fetcher,
      verify_archive: true,
      lock: Mutex::new(()),
    }
  }

  pub fn verify_archive(mut self, verify: bool) -> Self {
    self.verify_archive = verify;
    self
  }

  /// 确保 `target_dir` 下存在模型文件并返回其路径；已存在时不访问网络
  pub fn ensure_model(&self, target_dir: &Path) -> Result<PathBuf, ProvisionError> {
    let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

    let model_path = target_dir.join(&self.archive.model_file);
    if model_path.is_file() {
      debug!("模型文件已存在: {}", model_path.display());
      return Ok(model_path);
    }

    fs::create_dir_all(target_dir)?;
    let archive_path = target_dir.join(&self.archive.archive_name);

    if archive_path.is_file() {
      if self.verify_archive && !archive_is_intact(&archive_path) {
        warn!("压缩包已损坏，重新下载: {}", archive_path.display());
        fs::remove_file(&archive_path)?;
      } else {
        info!("复用已存在的压缩包: {}", archive_path.display());
      }
    }

    if !archive_path.is_file() {
      self.download(&archive_path)?;
    }

    info!("解压模型压缩包: {}", archive_path.display());
    extract(&archive_path, target_dir)?;
    fs::remove_file(&archive_path)?;

    if !model_path.is_file() {
      return Err(ProvisionError::ModelMissing(
        model_path.display().to_string(),
      ));
    }

    info!("模型准备完成: {}", model_path.display());
    Ok(model_path)
  }

  /// 先写入 `.part` 文件，完整写入后再重命名为压缩包
  fn download(&self, archive_path: &Path) -> Result<(), ProvisionError> {
    let part_path = part_path(archive_path);
    info!("下载模型: {}", self.archive.url);
    let now = Instant::now();

    let result = File::create(&part_path)
      .map_err(ProvisionError::from)
      .and_then(|file| {
        let mut writer = BufWriter::new(file);
        let written = self.fetcher.fetch(&self.archive.url, &mut writer)?;
        writer.flush()?;
        Ok(written)
      });

    match result {
      Ok(written) => {
        fs::rename(&part_path, archive_path)?;
        info!(
          "下载完成 {:.2} MB, 耗时: {:.2?}",
          written as f64 / (1024.0 * 1024.0),
          now.elapsed()
        );
        Ok(())
      }
      Err(e) => {
        let _ = fs::remove_file(&part_path);
        Err(e)
      }
    }
  }
}

fn part_path(archive_path: &Path) -> PathBuf {
  let mut name = archive_path.as_os_str().to_owned();
  name.push(".part");
  PathBuf::from(name)
}

fn extract(archive_path: &Path, target_dir: &Path) -> Result<(), ProvisionError> {
  let wrap = |source| ProvisionError::Extract {
    path: archive_path.display().to_string(),
    source,
  };
  let file = File::open(archive_path).map_err(wrap)?;
  tar::Archive::new(GzDecoder::new(file))
    .unpack(target_dir)
    .map_err(wrap)
}

/// 完整读取 gzip 流与 tar 条目，gzip 的 CRC 在读到流末尾时校验
fn archive_is_intact(archive_path: &Path) -> bool {
  let check = || -> io::Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    for entry in archive.entries()? {
      io::copy(&mut entry?, &mut io::sink())?;
    }
    io::copy(&mut archive.into_inner(), &mut io::sink())?;
    Ok(())
  };

  match check() {
    Ok(()) => true,
    Err(e) => {
      debug!("压缩包校验失败 {}: {}", archive_path.display(), e);
      false
    }
  }
}
