// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/image_file.rs - 保存标注图像
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

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use url::Url;

use super::{Draw, OutputError, Render};
use crate::{frame::Frame, pipeline::RenderBox};

pub(super) const IMAGE_FILE_SCHEME: &str = "image";

/// 图像文件输出。
///
/// 指向文件时每帧覆盖写同一路径（可当作实时预览）；
/// 指向目录时按时间戳与帧序号逐帧落盘。
pub struct ImageFileOutput {
  path: PathBuf,
  per_frame: bool,
  draw: Draw,
  frames_written: u64,
}

impl ImageFileOutput {
  pub fn new(url: &Url, draw: Draw) -> Result<Self, OutputError> {
    if url.scheme() != IMAGE_FILE_SCHEME {
      return Err(OutputError::SchemeMismatch {
        expected: IMAGE_FILE_SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let raw_path = url.path();
    let per_frame = raw_path.ends_with('/') || Path::new(raw_path).is_dir();
    Ok(Self {
      path: PathBuf::from(raw_path),
      per_frame,
      draw,
      frames_written: 0,
    })
  }

  fn target_path(&self, frame: &Frame) -> PathBuf {
    if self.per_frame {
      let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
      self.path.join(format!("{}-{:06}.jpg", stamp, frame.index))
    } else {
      self.path.clone()
    }
  }
}

impl Render for ImageFileOutput {
  fn render_frame(&mut self, frame: &Frame, boxes: &[RenderBox]) -> Result<(), OutputError> {
    let mut image = frame.image.clone();
    self.draw.annotate(&mut image, boxes);

    let target = self.target_path(frame);
    if let Some(parent) = target.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    image.save(&target)?;

    self.frames_written += 1;
    debug!("保存标注图像: {}", target.display());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    info!("图像输出完成，共写出 {} 帧", self.frames_written);
    Ok(())
  }
}
