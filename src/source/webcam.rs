// 该文件是 Qianli （千里眼） 项目的一部分。
// src/source/webcam.rs - V4L2 摄像头输入源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::pin::Pin;
use std::time::Instant;

use image::RgbImage;
use tracing::{error, info};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{FrameSource, SourceError, SourceKind};
use crate::{FromUrl, frame::Frame};

pub(super) const WEBCAM_SCHEME: &str = "v4l2";

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// V4L2 摄像头输入源。
///
/// 设备流打开期间永不耗尽；取不到帧时报告
/// `SourceError::Unavailable`，由帧循环在下一拍重试。
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box> 固定
/// Device 的内存地址，从而可以安全地创建引用它的 Stream。
pub struct WebcamSource {
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  /// 帧索引
  frame_index: u64,
  /// 视频宽度
  width: u32,
  /// 视频高度
  height: u32,
  /// 开始时间
  start_time: Instant,
}

impl FromUrl for WebcamSource {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != WEBCAM_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        WEBCAM_SCHEME,
        url.scheme()
      );
      return Err(SourceError::SchemeMismatch {
        expected: WEBCAM_SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let width = url
      .query_pairs()
      .find(|(k, _)| k == "width")
      .and_then(|(_, v)| v.parse().ok())
      .unwrap_or(DEFAULT_WIDTH);
    let height = url
      .query_pairs()
      .find(|(k, _)| k == "height")
      .and_then(|(_, v)| v.parse().ok())
      .unwrap_or(DEFAULT_HEIGHT);

    Self::open(url.path(), width, height)
  }
}

impl WebcamSource {
  /// 打开设备并协商 YUYV 采集格式。
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, SourceError> {
    let device = Box::pin(Device::with_path(device_path).map_err(|e| {
      SourceError::Unavailable(format!("无法打开设备 {}: {}", device_path, e))
    })?);

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;

    // 驱动可能协商出与请求不同的分辨率
    let width = format.width;
    let height = format.height;
    info!("摄像头已打开: {} ({}x{})", device_path, width, height);

    let mut source = Self {
      device,
      stream: None,
      frame_index: 0,
      width,
      height,
      start_time: Instant::now(),
    };

    // 创建捕获流
    // SAFETY: device 被 Pin<Box> 固定，不会移动，所以引用始终有效
    // 1. device 固定在堆上，stream 存储在同一个结构体中
    // 2. Drop 顺序：stream (Option::take) -> device
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, 4)
        .map_err(|e| SourceError::Unavailable(format!("无法创建捕获流: {}", e)))?
    };

    source.stream = Some(stream);
    Ok(source)
  }

  /// 将 YUYV 格式转换为 RGB
  fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);

    for chunk in yuyv.chunks(4) {
      if chunk.len() < 4 {
        break;
      }

      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      // 第一个像素
      let r = (y0 + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y0 - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y0 + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);

      // 第二个像素
      let r = (y1 + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y1 - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y1 + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }

    rgb
  }
}

impl Drop for WebcamSource {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
  }
}

impl FrameSource for WebcamSource {
  fn kind(&self) -> SourceKind {
    SourceKind::Webcam
  }

  fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn fps(&self) -> Option<f64> {
    Some(30.0) // V4L2 默认帧率
  }

  fn next_frame(&mut self) -> Result<Frame, SourceError> {
    let stream = self
      .stream
      .as_mut()
      .ok_or_else(|| SourceError::Unavailable("捕获流未建立".to_string()))?;

    let (buffer, _meta) = stream
      .next()
      .map_err(|e| SourceError::Unavailable(format!("无法捕获帧: {}", e)))?;

    let rgb_data = Self::yuyv_to_rgb(buffer, self.width, self.height);
    let image = RgbImage::from_raw(self.width, self.height, rgb_data)
      .ok_or_else(|| SourceError::Pipeline("无法创建 RGB 图像".to_string()))?;

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }
}
