// 该文件是 Biaozhu （标注） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像文件
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

use image::{ImageFormat, RgbImage};
use tracing::info;

use crate::output::{Annotation, Render, RenderError, draw::Draw};

pub struct SaveImageFileOutput<'a> {
  path: &'a Path,
  draw: &'a Draw,
  format: ImageFormat,
}

impl<'a> SaveImageFileOutput<'a> {
  pub fn new(path: &'a Path, draw: &'a Draw) -> Self {
    SaveImageFileOutput {
      path,
      draw,
      format: ImageFormat::Jpeg,
    }
  }

  /// 输出编码格式，默认 JPEG，不由文件扩展名决定
  pub fn format(mut self, format: ImageFormat) -> Self {
    self.format = format;
    self
  }

  fn save_image(&self, image: RgbImage) -> Result<(), RenderError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save_with_format(self.path, self.format)?;

    info!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render<RgbImage, Vec<Annotation>> for SaveImageFileOutput<'_> {
  type Error = RenderError;

  fn render_result(
    &self,
    frame: &RgbImage,
    result: &Vec<Annotation>,
  ) -> Result<(), Self::Error> {
    let mut image = frame.clone();
    self.draw.draw_annotations(&mut image, result);
    self.save_image(image)
  }
}
