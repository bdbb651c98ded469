// 该文件是 Biaozhu （标注） 项目的一部分。
// src/model/ssd.rs - SSD 检测图（ONNX Runtime）
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

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use ndarray::{ArrayD, Ix1, Ix2, Ix3};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::{DynValue, Tensor};
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::frame::ImageTensor;
use crate::model::{LoadModel, Model, ModelError, RawDetections};

/// 检测图的输入输出节点名称
#[derive(Debug, Clone)]
pub struct NodeNames {
  pub input: String,
  pub boxes: String,
  pub scores: String,
  pub classes: String,
  pub count: String,
}

impl From<&ModelConfig> for NodeNames {
  fn from(config: &ModelConfig) -> Self {
    NodeNames {
      input: config.input_node.clone(),
      boxes: config.boxes_node.clone(),
      scores: config.scores_node.clone(),
      classes: config.classes_node.clone(),
      count: config.count_node.clone(),
    }
  }
}

pub struct OrtLoader {
  nodes: NodeNames,
  intra_threads: usize,
}

impl From<&ModelConfig> for OrtLoader {
  fn from(config: &ModelConfig) -> Self {
    OrtLoader {
      nodes: NodeNames::from(config),
      intra_threads: config.intra_threads.max(1),
    }
  }
}

impl LoadModel for OrtLoader {
  type Model = SsdDetector;

  fn load(&self, model_path: &Path) -> Result<Self::Model, ModelError> {
    if !model_path.is_file() {
      return Err(ModelError::ModelFileNotFound(
        model_path.display().to_string(),
      ));
    }

    info!("加载检测图: {}", model_path.display());
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.intra_threads)?
      .commit_from_file(model_path)?;

    debug!(
      "模型输入: {:?}, 输出: {:?}",
      session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
      session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
    );

    if !session.inputs.iter().any(|i| i.name == self.nodes.input) {
      return Err(ModelError::MissingOutput(format!(
        "输入节点 {}",
        self.nodes.input
      )));
    }
    info!("模型加载完成");

    Ok(SsdDetector {
      session: Mutex::new(session),
      nodes: self.nodes.clone(),
    })
  }
}

pub struct SsdDetector {
  session: Mutex<Session>,
  nodes: NodeNames,
}

impl Model for SsdDetector {
  type Input = ImageTensor;
  type Output = RawDetections;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入 {:?}", input.shape());
    let tensor = match input {
      ImageTensor::UInt8(data) => Tensor::from_array(data.clone())?.into_dyn(),
      ImageTensor::Float32(data) => Tensor::from_array(data.clone())?.into_dyn(),
    };

    let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![self.nodes.input.as_str() => tensor])?;

    debug!("获取模型输出");
    let boxes = extract(outputs.get(&self.nodes.boxes), &self.nodes.boxes)?;
    let scores = extract(outputs.get(&self.nodes.scores), &self.nodes.scores)?;
    let classes = extract(outputs.get(&self.nodes.classes), &self.nodes.classes)?;
    let count = extract(outputs.get(&self.nodes.count), &self.nodes.count)?;

    RawDetections::new(
      boxes.into_dimensionality::<Ix3>()?,
      scores.into_dimensionality::<Ix2>()?,
      classes.into_dimensionality::<Ix2>()?,
      count.into_dimensionality::<Ix1>()?,
    )
  }
}

fn extract(value: Option<&DynValue>, name: &str) -> Result<ArrayD<f32>, ModelError> {
  let value = value.ok_or_else(|| ModelError::MissingOutput(name.to_string()))?;
  Ok(value.try_extract_array::<f32>()?.to_owned())
}
