// 该文件是 Biaozhu （标注） 项目的一部分。
// src/output.rs - 检测结果渲染
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

use image::ImageFormat;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::config::RenderConfig;
use crate::model::{BoxNormalized, RawDetections, round_class_id};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;
mod record;
mod save_image_file;

pub use self::draw::Draw;
pub use self::record::write_record;
pub use self::save_image_file::SaveImageFileOutput;

#[derive(Error, Debug)]
pub enum RenderError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("字体无效: {0}")]
  InvalidFont(String),
  #[error("检测记录序列化错误: {0}")]
  RecordError(#[from] serde_json::Error),
}

/// 像素坐标的矩形，`x_min < x_max` 且 `y_min < y_max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelBox {
  pub x_min: i32,
  pub y_min: i32,
  pub x_max: i32,
  pub y_max: i32,
}

impl PixelBox {
  /// 归一化坐标乘以图像尺寸并截断到图像内；面积为零或为负时返回 None
  pub fn from_normalized(bbox: &BoxNormalized, width: u32, height: u32) -> Option<Self> {
    if width == 0 || height == 0 {
      return None;
    }
    let (w, h) = (width as f32, height as f32);
    let coords = [bbox.y_min * h, bbox.x_min * w, bbox.y_max * h, bbox.x_max * w];
    if coords.iter().any(|v| !v.is_finite()) {
      return None;
    }

    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;
    let [y_min, x_min, y_max, x_max] = coords.map(|v| v.round() as i32);
    let pixel = PixelBox {
      x_min: x_min.clamp(0, max_x),
      y_min: y_min.clamp(0, max_y),
      x_max: x_max.clamp(0, max_x),
      y_max: y_max.clamp(0, max_y),
    };

    (pixel.x_min < pixel.x_max && pixel.y_min < pixel.y_max).then_some(pixel)
  }

  pub fn width(&self) -> u32 {
    (self.x_max - self.x_min) as u32
  }

  pub fn height(&self) -> u32 {
    (self.y_max - self.y_min) as u32
  }
}

/// 一个待绘制的检测框及其标签
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
  pub class_id: u32,
  pub label: String,
  pub score: f32,
  pub rect: PixelBox,
}

pub fn format_label(display_name: &str, score: f32) -> String {
  format!("{} : {}%", display_name, (score * 100.0).round() as i64)
}

/// 按阈值过滤检测结果，并将检测框与标签绘制到输入图像的副本上
pub struct BoxRenderer {
  min_score: f32,
  draw: Draw,
  record: bool,
}

impl BoxRenderer {
  pub fn new(min_score: f32, draw: Draw) -> Self {
    BoxRenderer {
      min_score,
      draw,
      record: false,
    }
  }

  pub fn with_record(mut self, record: bool) -> Self {
    self.record = record;
    self
  }

  /// 字体不可用时仅记录一次警告，之后只绘制边框和标签底色
  pub fn from_config(config: &RenderConfig) -> Self {
    let mut draw = Draw::default().font_size(config.font_size);
    if let Some(font) = &config.font {
      match Draw::default().font_size(config.font_size).with_font_file(font) {
        Ok(with_font) => draw = with_font,
        Err(e) => warn!("无法加载字体 {}, 标签将不显示文字: {}", font.display(), e),
      }
    } else {
      warn!("未配置字体, 标签将不显示文字");
    }

    BoxRenderer::new(config.min_score, draw).with_record(config.record_detections)
  }

  /// 计算需要绘制的检测框：低于阈值、类别不在类别表中或面积为零的检测被跳过
  pub fn plan(
    &self,
    detections: &RawDetections,
    catalog: &Catalog,
    width: u32,
    height: u32,
  ) -> Vec<Annotation> {
    let mut annotations = Vec::new();

    for image in 0..detections.images() {
      for index in 0..detections.max_detections() {
        let score = detections.scores[[image, index]];
        if score.is_nan() || score < self.min_score {
          continue;
        }

        let bbox = detections.bbox(image, index);
        let Some(item) =
          round_class_id(detections.classes[[image, index]]).and_then(|id| catalog.find(id))
        else {
          debug!(
            "类别 {} 不在类别表中, 跳过检测 {}",
            detections.classes[[image, index]],
            index
          );
          continue;
        };

        let Some(rect) = PixelBox::from_normalized(&bbox, width, height) else {
          debug!("检测 {} 的框面积为零, 跳过: {:?}", index, bbox);
          continue;
        };

        annotations.push(Annotation {
          class_id: item.id,
          label: format_label(&item.display_name, score),
          score,
          rect,
        });
      }
    }

    annotations
  }

  /// 读取 `input_path`，绘制后写入 `output_path`；解码成功即一定写出文件
  ///
  /// 输出格式按输入内容判断，与两者的扩展名无关。
  pub fn render(
    &self,
    detections: &RawDetections,
    catalog: &Catalog,
    input_path: &Path,
    output_path: &Path,
  ) -> Result<Vec<Annotation>, RenderError> {
    let reader = image::ImageReader::open(input_path)?.with_guessed_format()?;
    let format = reader.format().unwrap_or(ImageFormat::Jpeg);
    let image = reader.decode()?.into_rgb8();
    let annotations = self.plan(detections, catalog, image.width(), image.height());

    SaveImageFileOutput::new(output_path, &self.draw)
      .format(format)
      .render_result(&image, &annotations)?;
    if self.record {
      write_record(&annotations, output_path)?;
    }

    Ok(annotations)
  }
}
