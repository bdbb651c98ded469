// 该文件是 Biaozhu （标注） 项目的一部分。
// src/pipeline.rs - 单张图像的检测与标注流程
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

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::FromUrl;
use crate::catalog::{Catalog, CatalogError};
use crate::config::AppConfig;
use crate::frame::{ImageTensor, TensorType};
use crate::input::{PreprocessError, is_jpeg, to_tensor};
use crate::model::{LoadModel, Model, ModelError, OrtLoader, RawDetections};
use crate::output::{Annotation, BoxRenderer, RenderError};
use crate::provision::{Fetch, HttpFetcher, ModelArchive, ModelProvisioner, ProvisionError};

/// 标注结果文件名后缀，`cat.jpg` -> `catCONVERTED.jpg`
pub const ANNOTATED_SUFFIX: &str = "CONVERTED";

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("Invalid image file")]
  InvalidInput,
  #[error("保存上传文件失败: {0}")]
  Storage(std::io::Error),
  #[error("读取输入文件失败: {0}")]
  Read(std::io::Error),
  #[error("输入文件名无效: {0}")]
  InvalidName(String),
  #[error("模型准备失败: {0}")]
  Provision(#[from] ProvisionError),
  #[error("类别表加载失败: {0}")]
  Catalog(#[from] CatalogError),
}

/// 预处理、推理与渲染阶段的错误，这些错误只记录日志，不使请求失败
#[derive(Error, Debug)]
pub enum DetectionError {
  #[error(transparent)]
  Preprocess(#[from] PreprocessError),
  #[error(transparent)]
  Model(#[from] ModelError),
  #[error(transparent)]
  Render(#[from] RenderError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
  Detections(Vec<Annotation>),
  Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
  pub output_name: String,
  pub output_path: PathBuf,
  pub inference: InferenceOutcome,
}

pub struct Pipeline<L: LoadModel = OrtLoader, F = HttpFetcher> {
  config: AppConfig,
  provisioner: ModelProvisioner<F>,
  loader: L,
  renderer: BoxRenderer,
  model: Mutex<Option<Arc<L::Model>>>,
  catalog: Mutex<Option<Arc<Catalog>>>,
}

impl Pipeline {
  pub fn from_config(config: AppConfig) -> Result<Self, PipelineError> {
    let url = Url::parse(&config.model.archive_url)
      .map_err(|e| ProvisionError::InvalidUrl(format!("{}: {}", config.model.archive_url, e)))?;
    let archive = ModelArchive::from_url(&url)?.model_file(&config.model.model_file);
    let fetcher = HttpFetcher::new(config.download_timeout())?;
    let loader = OrtLoader::from(&config.model);
    let renderer = BoxRenderer::from_config(&config.render);
    Ok(Pipeline::new(config, archive, fetcher, loader, renderer))
  }
}

impl<L: LoadModel, F: Fetch> Pipeline<L, F> {
  pub fn new(
    config: AppConfig,
    archive: ModelArchive,
    fetcher: F,
    loader: L,
    renderer: BoxRenderer,
  ) -> Self {
    let provisioner =
      ModelProvisioner::new(archive, fetcher).verify_archive(config.model.verify_archive);
    Pipeline {
      config,
      provisioner,
      loader,
      renderer,
      model: Mutex::new(None),
      catalog: Mutex::new(None),
    }
  }

  /// 确保模型文件位于工作目录下
  pub fn provision(&self) -> Result<PathBuf, PipelineError> {
    Ok(
      self
        .provisioner
        .ensure_model(&self.config.workspace.work_dir)?,
    )
  }

  /// 校验文件头后以唯一文件名保存上传内容，再执行检测
  pub fn process_upload(
    &self,
    bytes: &[u8],
    file_name: &str,
  ) -> Result<ProcessOutcome, PipelineError> {
    if !is_jpeg(bytes) {
      warn!("拒绝非 JPEG 上传: {}", file_name);
      return Err(PipelineError::InvalidInput);
    }

    let path = store_upload(&self.config.images_dir(), bytes).map_err(PipelineError::Storage)?;
    info!("上传 {} 已保存: {}", file_name, path.display());

    self.process_image(&path)
  }

  /// 对 `input_path` 执行检测并在同目录写出标注图像
  ///
  /// 模型准备与类别表加载失败会使请求失败；预处理、推理和渲染失败只记录日志，
  /// 结果中以 [`InferenceOutcome::Unavailable`] 表示。
  pub fn process_image(&self, input_path: &Path) -> Result<ProcessOutcome, PipelineError> {
    let bytes = fs::read(input_path).map_err(PipelineError::Read)?;
    if !is_jpeg(&bytes) {
      warn!("输入不是 JPEG 图像: {}", input_path.display());
      return Err(PipelineError::InvalidInput);
    }
    let (output_name, output_path) = annotated_path(input_path)?;

    let model_path = self.provision()?;
    let catalog = self.catalog()?;

    let inference = match self.detect_and_render(&bytes, &model_path, &catalog, input_path, &output_path)
    {
      Ok(annotations) => InferenceOutcome::Detections(annotations),
      Err(e) => {
        error!("检测失败, 不生成标注: {}", e);
        InferenceOutcome::Unavailable(e.to_string())
      }
    };

    Ok(ProcessOutcome {
      output_name,
      output_path,
      inference,
    })
  }

  fn detect_and_render(
    &self,
    bytes: &[u8],
    model_path: &Path,
    catalog: &Catalog,
    input_path: &Path,
    output_path: &Path,
  ) -> Result<Vec<Annotation>, DetectionError> {
    let tensor = to_tensor(bytes, TensorType::UInt8)?;
    debug!("输入张量: {}x{}", tensor.width(), tensor.height());
    let model = self.model(model_path)?;

    info!("开始推理...");
    let now = Instant::now();
    let detections = match self.infer_with_timeout(model.clone(), tensor) {
      Err(e @ ModelError::Timeout(_)) => {
        self.discard_model(&model);
        return Err(e.into());
      }
      result => result?,
    };
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    let now = Instant::now();
    let annotations = self
      .renderer
      .render(&detections, catalog, input_path, output_path)?;
    info!(
      "渲染完成，绘制 {} 个检测框，耗时: {:.2?}",
      annotations.len(),
      now.elapsed()
    );
    for annotation in &annotations {
      debug!("  - {} at {:?}", annotation.label, annotation.rect);
    }

    Ok(annotations)
  }

  fn infer_with_timeout(
    &self,
    model: Arc<L::Model>,
    tensor: ImageTensor,
  ) -> Result<RawDetections, ModelError> {
    let timeout = self.config.inference_timeout();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
      let _ = tx.send(model.infer(&tensor));
    });

    match rx.recv_timeout(timeout) {
      Ok(result) => result,
      Err(RecvTimeoutError::Timeout) => Err(ModelError::Timeout(timeout)),
      Err(RecvTimeoutError::Disconnected) => Err(ModelError::WorkerPanicked),
    }
  }

  /// 首次成功加载后缓存，之后不再重新加载；加载失败不缓存
  fn model(&self, model_path: &Path) -> Result<Arc<L::Model>, ModelError> {
    let mut cached = self.model.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(model) = cached.as_ref() {
      return Ok(model.clone());
    }
    let model = Arc::new(self.loader.load(model_path)?);
    *cached = Some(model.clone());
    Ok(model)
  }

  /// 超时的推理线程仍占用会话，下次请求重新加载
  fn discard_model(&self, model: &Arc<L::Model>) {
    let mut cached = self.model.lock().unwrap_or_else(PoisonError::into_inner);
    if cached.as_ref().is_some_and(|cached| Arc::ptr_eq(cached, model)) {
      warn!("推理超时, 丢弃已缓存的模型");
      *cached = None;
    }
  }

  fn catalog(&self) -> Result<Arc<Catalog>, CatalogError> {
    let mut cached = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(catalog) = cached.as_ref() {
      return Ok(catalog.clone());
    }
    let catalog = Arc::new(Catalog::load(&self.config.catalog_path())?);
    info!("类别表加载完成, 共 {} 个类别", catalog.len());
    *cached = Some(catalog.clone());
    Ok(catalog)
  }
}

/// 上传内容已确认是 JPEG，扩展名固定为 `jpg`，与客户端文件名无关
fn upload_name() -> String {
  format!(
    "{}-{}.jpg",
    Utc::now().format("%Y%m%d-%H%M%S"),
    Uuid::new_v4().simple()
  )
}

/// 以新文件写入，已存在同名文件时报错而不覆盖
fn store_upload(images_dir: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
  fs::create_dir_all(images_dir)?;
  let path = images_dir.join(upload_name());
  let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
  file.write_all(bytes)?;
  Ok(path)
}

/// 标注结果与输入位于同一目录，文件名为 `<stem>CONVERTED.<ext>`
pub fn annotated_path(input_path: &Path) -> Result<(String, PathBuf), PipelineError> {
  let stem = input_path
    .file_stem()
    .and_then(|stem| stem.to_str())
    .ok_or_else(|| PipelineError::InvalidName(input_path.display().to_string()))?;
  let name = match input_path.extension().and_then(|ext| ext.to_str()) {
    Some(ext) => format!("{}{}.{}", stem, ANNOTATED_SUFFIX, ext),
    None => format!("{}{}", stem, ANNOTATED_SUFFIX),
  };
  let path = input_path.with_file_name(&name);
  Ok((name, path))
}
