// 该文件是 Biaozhu （标注） 项目的一部分。
// src/output/draw.rs - 检测框与标签绘制
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::output::{Annotation, RenderError};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_CHAR_WIDTH_RATIO: f32 = 0.6; // 无字体时按字号估算字符宽度
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: usize = 80;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  thickness: i32,
  label_text_vertical_padding: i32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    // 每个类别一种颜色，色相均匀分布
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      thickness: BOX_THICKNESS,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      colors,
    }
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  pub fn with_font_file(mut self, path: &Path) -> Result<Self, RenderError> {
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data)
      .map_err(|e| RenderError::InvalidFont(format!("{}: {}", path.display(), e)))?;
    self.font = Some(font);
    Ok(self)
  }

  pub fn font_size(mut self, font_size: f32) -> Self {
    if font_size > 0.0 {
      self.font_size = font_size;
    }
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn color_for(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  pub fn draw_annotations(&self, image: &mut RgbImage, annotations: &[Annotation]) {
    for annotation in annotations {
      self.draw_bbox_with_label(image, annotation);
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, annotation: &Annotation) {
    let color = self.color_for(annotation.class_id);
    let rect = annotation.rect;

    // 向内加粗边框
    for t in 0..self.thickness {
      let width = rect.width() as i32 + 1 - 2 * t;
      let height = rect.height() as i32 + 1 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let r = Rect::at(rect.x_min + t, rect.y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, r, color);
    }

    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = match &self.font {
      Some(font) => text_size(scale, font, &annotation.label),
      None => (
        (annotation.label.chars().count() as f32 * self.font_size * LABEL_CHAR_WIDTH_RATIO) as u32,
        self.font_size as u32,
      ),
    };
    let label_height = text_height as i32 + 2 * self.label_text_vertical_padding;

    // 标签放在边框上方，超出图像时贴边
    let label_x = rect.x_min.max(0);
    let label_y = (rect.y_min - label_height).max(0);
    let label_width = (text_width as i32).min(image.width() as i32 - label_x);
    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let background = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, background, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        TEXT_COLOR,
        label_x,
        label_y + self.label_text_vertical_padding,
        scale,
        font,
        &annotation.label,
      );
    }
  }
}
