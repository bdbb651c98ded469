// 该文件是 Biaozhu （标注） 项目的一部分。
// src/frame.rs - NHWC 图像张量定义
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

use ndarray::Array4;

pub const RGB_CHANNELS: usize = 3;

/// 张量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorType {
  UInt8,
  #[default]
  Float32,
}

/// 形状为 `[1, H, W, 3]` 的图像张量
#[derive(Debug, Clone)]
pub enum ImageTensor {
  UInt8(Array4<u8>),
  Float32(Array4<f32>),
}

impl ImageTensor {
  pub fn shape(&self) -> &[usize] {
    match self {
      ImageTensor::UInt8(data) => data.shape(),
      ImageTensor::Float32(data) => data.shape(),
    }
  }

  pub fn tensor_type(&self) -> TensorType {
    match self {
      ImageTensor::UInt8(_) => TensorType::UInt8,
      ImageTensor::Float32(_) => TensorType::Float32,
    }
  }

  pub fn height(&self) -> usize {
    self.shape()[1]
  }

  pub fn width(&self) -> usize {
    self.shape()[2]
  }

  /// 转换为指定元素类型，浮点转整型时截断到 [0, 255]
  pub fn cast(self, tensor_type: TensorType) -> Self {
    match (self, tensor_type) {
      (ImageTensor::UInt8(data), TensorType::Float32) => {
        ImageTensor::Float32(data.mapv(f32::from))
      }
      (ImageTensor::Float32(data), TensorType::UInt8) => {
        ImageTensor::UInt8(data.mapv(|v| v.clamp(0.0, 255.0) as u8))
      }
      (tensor, _) => tensor,
    }
  }
}
