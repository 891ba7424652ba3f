// 该文件是 Qianli （千里眼） 项目的一部分。
// src/source/image_file.rs - 图片文件输入源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{ImageReader, RgbImage};
use tracing::error;
use url::Url;

use super::{FrameSource, SourceError, SourceKind};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

pub(super) const IMAGE_FILE_SCHEME: &str = "image";

/// 图片文件输入源。
///
/// 静态图只处理一次：首次采样产出解码后的帧，
/// 之后的采样一律返回 `SourceError::Exhausted`。
pub struct ImageFileSource {
  image: Option<RgbImage>,
  width: u32,
  height: u32,
}

impl FromUrl for ImageFileSource {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != IMAGE_FILE_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        IMAGE_FILE_SCHEME,
        url.scheme()
      );
      return Err(SourceError::SchemeMismatch {
        expected: IMAGE_FILE_SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let path = url.path();
    let image = ImageReader::open(path)?.decode()?.to_rgb8();

    Ok(Self::from_image(image))
  }
}

impl FromUrlWithScheme for ImageFileSource {
  const SCHEME: &'static str = IMAGE_FILE_SCHEME;
}

impl ImageFileSource {
  /// 由已解码的图像构造（上传字节解码后走这里）。
  pub fn from_image(image: RgbImage) -> Self {
    let width = image.width();
    let height = image.height();
    Self {
      image: Some(image),
      width,
      height,
    }
  }
}

impl FrameSource for ImageFileSource {
  fn kind(&self) -> SourceKind {
    SourceKind::ImageFile
  }

  fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn fps(&self) -> Option<f64> {
    None
  }

  fn next_frame(&mut self) -> Result<Frame, SourceError> {
    match self.image.take() {
      Some(image) => Ok(Frame::new(image, 0, 0)),
      None => Err(SourceError::Exhausted),
    }
  }
}
