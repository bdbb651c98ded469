// 该文件是 Biaozhu （标注） 项目的一部分。
// src/model.rs - 模型
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
use std::time::Duration;

use ndarray::{Array1, Array2, Array3, Axis};
use thiserror::Error;

use crate::frame::ImageTensor;

/// 每个检测框的坐标数量
pub const BOX_SLOTS: usize = 4;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 从模型文件构建推理模型
pub trait LoadModel {
  type Model: Model<Input = ImageTensor, Output = RawDetections, Error = ModelError>
    + Send
    + Sync
    + 'static;

  fn load(&self, model_path: &Path) -> Result<Self::Model, ModelError>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件不存在: {0}")]
  ModelFileNotFound(String),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("缺少输出节点: {0}")]
  MissingOutput(String),
  #[error("输出形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
  #[error("输出形状不一致: {0}")]
  ShapeMismatch(String),
  #[error("推理超时 ({0:.2?})")]
  Timeout(Duration),
  #[error("推理线程异常退出")]
  WorkerPanicked,
}

/// 模型的四个原始输出，按 (图像, 检测, 坐标) 索引，未经解释
#[derive(Debug, Clone)]
pub struct RawDetections {
  /// `[batch, max_detections, 4]`，坐标槽位依次为 ymin, xmin, ymax, xmax
  pub boxes: Array3<f32>,
  /// `[batch, max_detections]`
  pub scores: Array2<f32>,
  /// `[batch, max_detections]`，类别 ID 以浮点数输出
  pub classes: Array2<f32>,
  /// `[batch]`
  pub num_detections: Array1<f32>,
}

/// 归一化坐标的检测框，不保证 min <= max
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxNormalized {
  pub y_min: f32,
  pub x_min: f32,
  pub y_max: f32,
  pub x_max: f32,
}

impl BoxNormalized {
  /// 按模型输出的固定槽位顺序组装：0=ymin, 1=xmin, 2=ymax, 3=xmax
  pub fn from_slots(slots: [f32; BOX_SLOTS]) -> Self {
    let [y_min, x_min, y_max, x_max] = slots;
    BoxNormalized {
      y_min,
      x_min,
      y_max,
      x_max,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: BoxNormalized,
  pub score: f32,
  pub class_id: Option<u32>,
}

pub type DetectionBatch = Vec<Detection>;

/// 将浮点类别四舍五入为整数 ID，负数或非有限值返回 None
pub fn round_class_id(raw: f32) -> Option<u32> {
  let rounded = raw.round();
  (rounded.is_finite() && rounded >= 0.0 && rounded <= u32::MAX as f32).then_some(rounded as u32)
}

impl RawDetections {
  pub fn new(
    boxes: Array3<f32>,
    scores: Array2<f32>,
    classes: Array2<f32>,
    num_detections: Array1<f32>,
  ) -> Result<Self, ModelError> {
    let (images, max_detections, slots) = boxes.dim();
    if slots != BOX_SLOTS {
      return Err(ModelError::ShapeMismatch(format!(
        "检测框最后一维应为 {}, 实际为 {}",
        BOX_SLOTS, slots
      )));
    }
    if scores.dim() != (images, max_detections) || classes.dim() != (images, max_detections) {
      return Err(ModelError::ShapeMismatch(format!(
        "boxes {:?}, scores {:?}, classes {:?}",
        boxes.shape(),
        scores.shape(),
        classes.shape()
      )));
    }
    if num_detections.len() != images {
      return Err(ModelError::ShapeMismatch(format!(
        "num_detections 长度 {} 与批大小 {} 不一致",
        num_detections.len(),
        images
      )));
    }

    Ok(RawDetections {
      boxes,
      scores,
      classes,
      num_detections,
    })
  }

  pub fn images(&self) -> usize {
    self.boxes.len_of(Axis(0))
  }

  pub fn max_detections(&self) -> usize {
    self.boxes.len_of(Axis(1))
  }

  pub fn bbox(&self, image: usize, index: usize) -> BoxNormalized {
    BoxNormalized::from_slots([
      self.boxes[[image, index, 0]],
      self.boxes[[image, index, 1]],
      self.boxes[[image, index, 2]],
      self.boxes[[image, index, 3]],
    ])
  }

  /// 按下标配对 box/score/class，并按 `num_detections` 截断
  pub fn decode(&self) -> Vec<DetectionBatch> {
    (0..self.images())
      .map(|image| {
        let count = (self.num_detections[image].max(0.0) as usize).min(self.max_detections());
        (0..count)
          .map(|index| Detection {
            bbox: self.bbox(image, index),
            score: self.scores[[image, index]],
            class_id: round_class_id(self.classes[[image, index]]),
          })
          .collect()
      })
      .collect()
  }
}

mod ssd;
pub use self::ssd::{NodeNames, OrtLoader, SsdDetector};
