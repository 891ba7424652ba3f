// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/mod.rs - 输出模块
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod draw;
#[cfg(feature = "save_image_file")]
mod image_file;
#[cfg(feature = "stream_output")]
mod stream;

pub use draw::Draw;
#[cfg(feature = "save_image_file")]
pub use image_file::ImageFileOutput;
#[cfg(feature = "stream_output")]
pub use stream::StreamOutput;

use std::path::Path;

use thiserror::Error;
use url::Url;

use crate::{frame::Frame, pipeline::RenderBox};

/// 输出错误类型
#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("输出管道错误: {0}")]
  Pipeline(String),
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("未启用的输出方案: {0}（需要启用对应的编译特性）")]
  UnsupportedScheme(String),
}

/// 渲染边界：把一帧与其检测框画到 2D 表面并发布出去。
pub trait Render {
  /// 标注并发布一帧
  fn render_frame(&mut self, frame: &Frame, boxes: &[RenderBox]) -> Result<(), OutputError>;

  /// 冲刷并收尾
  fn finish(&mut self) -> Result<(), OutputError> {
    Ok(())
  }
}

/// 按 URL 方案创建输出。
///
/// - `image:///path/out.jpg` 标注后保存为图片（目录则逐帧落盘）
/// - `stream://host?port=5000` 标注后推送为实时流
pub fn create_render(
  url: &Url,
  font_path: Option<&Path>,
) -> Result<Box<dyn Render + Send>, OutputError> {
  let draw = Draw::new(font_path);
  match url.scheme() {
    #[cfg(feature = "save_image_file")]
    image_file::IMAGE_FILE_SCHEME => Ok(Box::new(ImageFileOutput::new(url, draw)?)),
    #[cfg(feature = "stream_output")]
    stream::STREAM_SCHEME => Ok(Box::new(StreamOutput::new(url, draw)?)),
    other => Err(OutputError::UnsupportedScheme(other.to_string())),
  }
}
