// 该文件是 Biaozhu （标注） 项目的一部分。
// src/input.rs - 图像解码与预处理
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

use image::ImageFormat;
use ndarray::Array4;
use thiserror::Error;
use tracing::debug;

use crate::frame::{ImageTensor, RGB_CHANNELS, TensorType};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("JPEG 解码错误: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("张量形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
}

/// 按文件头判断是否为 JPEG
pub fn is_jpeg(bytes: &[u8]) -> bool {
  matches!(image::guess_format(bytes), Ok(ImageFormat::Jpeg))
}

/// 将 JPEG 字节解码为 `[1, H, W, 3]` 张量并转换为 `tensor_type`
///
/// 每次调用独立完成解码、扩展批维度与类型转换，不与推理图共享状态。
pub fn to_tensor(bytes: &[u8], tensor_type: TensorType) -> Result<ImageTensor, PreprocessError> {
  let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?.into_rgb8();
  let (width, height) = image.dimensions();
  debug!("解码图像: {}x{}", width, height);

  let data = Array4::from_shape_vec(
    (1, height as usize, width as usize, RGB_CHANNELS),
    image.into_raw(),
  )?;

  Ok(ImageTensor::UInt8(data).cast(tensor_type))
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};
  use std::io::Cursor;

  fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format).unwrap();
    bytes.into_inner()
  }

  #[test]
  fn sniffs_jpeg_signature() {
    let image = RgbImage::from_pixel(8, 8, Rgb([200, 10, 10]));
    assert!(is_jpeg(&encode(&image, ImageFormat::Jpeg)));
    assert!(!is_jpeg(&encode(&image, ImageFormat::Png)));
    assert!(!is_jpeg(b"GIF89a"));
    assert!(!is_jpeg(&[]));
  }

  #[test]
  fn builds_batched_nhwc_tensor() {
    let image = RgbImage::from_pixel(40, 30, Rgb([128, 128, 128]));
    let bytes = encode(&image, ImageFormat::Jpeg);

    let tensor = to_tensor(&bytes, TensorType::UInt8).unwrap();
    assert_eq!(tensor.shape(), &[1, 30, 40, 3]);
    assert_eq!(tensor.tensor_type(), TensorType::UInt8);

    let tensor = to_tensor(&bytes, TensorType::default()).unwrap();
    assert_eq!(tensor.tensor_type(), TensorType::Float32);
    let ImageTensor::Float32(data) = tensor else {
      panic!("期望 float32 张量");
    };
    assert!((data[[0, 15, 20, 1]] - 128.0).abs() < 4.0);
  }

  #[test]
  fn rejects_non_jpeg_content() {
    let image = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
    let png = encode(&image, ImageFormat::Png);
    let err = to_tensor(&png, TensorType::UInt8).unwrap_err();
    assert!(matches!(err, PreprocessError::DecodeError(_)));
    assert!(err.to_string().starts_with("JPEG 解码错误"));
  }
}
