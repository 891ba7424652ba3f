// 该文件是 Qianli （千里眼） 项目的一部分。
// src/source/mod.rs - 输入源模块
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod image_file;
#[cfg(feature = "rtmp_input")]
mod rtmp;
#[cfg(feature = "webcam_input")]
mod webcam;

pub use image_file::ImageFileSource;
#[cfg(feature = "rtmp_input")]
pub use rtmp::RtmpSource;
#[cfg(feature = "webcam_input")]
pub use webcam::WebcamSource;

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::Frame};

/// 输入源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
  /// 图片文件（单帧）
  ImageFile,
  /// 摄像头实时流
  Webcam,
  /// RTMP 网络流
  Rtmp,
}

impl fmt::Display for SourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceKind::ImageFile => write!(f, "图片文件"),
      SourceKind::Webcam => write!(f, "摄像头"),
      SourceKind::Rtmp => write!(f, "RTMP 流"),
    }
  }
}

/// 输入源错误类型
#[derive(Error, Debug)]
pub enum SourceError {
  /// 输入源暂时取不到帧，帧循环在下一拍重试
  #[error("输入源暂时不可用: {0}")]
  Unavailable(String),
  /// 单帧输入源已经消费完毕，会话正常结束
  #[error("输入源已耗尽")]
  Exhausted,
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  #[error("输入管道错误: {0}")]
  Pipeline(String),
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("未启用的输入源方案: {0}（需要启用对应的编译特性）")]
  UnsupportedScheme(String),
}

impl SourceError {
  /// 暂时性错误不终止会话，由帧循环吞掉并重试。
  pub fn is_transient(&self) -> bool {
    matches!(self, SourceError::Unavailable(_))
  }
}

/// 帧输入源：按需产出“当前帧”。
///
/// 本层只读取已解码的像素数据，不做任何网络 I/O；
/// 向视频流喂数据是外部协作者（GStreamer 管道等）的职责。
pub trait FrameSource {
  fn kind(&self) -> SourceKind;

  /// 已知的帧尺寸 (宽, 高)；网络流在收到首帧前为 (0, 0)
  fn dimensions(&self) -> (u32, u32);

  /// 标称帧率（如果适用）
  fn fps(&self) -> Option<f64>;

  /// 采样当前帧
  fn next_frame(&mut self) -> Result<Frame, SourceError>;
}

/// 按 URL 方案创建输入源。
///
/// - `image:///path/to/pic.jpg` 图片文件
/// - `v4l2:///dev/video0?width=640&height=480` V4L2 摄像头
/// - `rtmp://host/app/stream` RTMP 网络流
pub fn create_source(url: &Url) -> Result<Box<dyn FrameSource + Send>, SourceError> {
  match url.scheme() {
    image_file::IMAGE_FILE_SCHEME => Ok(Box::new(ImageFileSource::from_url(url)?)),
    #[cfg(feature = "webcam_input")]
    webcam::WEBCAM_SCHEME => Ok(Box::new(WebcamSource::from_url(url)?)),
    #[cfg(feature = "rtmp_input")]
    rtmp::RTMP_SCHEME => Ok(Box::new(RtmpSource::from_url(url)?)),
    other => Err(SourceError::UnsupportedScheme(other.to_string())),
  }
}
