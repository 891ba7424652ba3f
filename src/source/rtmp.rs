// 该文件是 Qianli （千里眼） 项目的一部分。
// src/source/rtmp.rs - RTMP 网络流输入源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # RTMP 视频输入模块
//!
//! 基于 GStreamer 的 RTMP 拉流输入。拉流与解码由 GStreamer
//! 管道完成，本模块只从 appsink 读取已解码的 RGB 帧。
//!
//! 流尚未进入播放状态（缓冲、重连）时采样返回
//! `SourceError::Unavailable`，帧循环不会将其视为致命错误，
//! 而是在下一拍重试。
//!
//! ## 系统依赖
//!
//! 使用前需要安装 GStreamer 开发库，并启用 `rtmp_input` 特性：
//!
//! ```toml
//! [dependencies]
//! qianli = { version = "0.1", features = ["rtmp_input"] }
//! ```

use std::time::Instant;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use tracing::{error, info};
use url::Url;

use super::{FrameSource, SourceError, SourceKind};
use crate::{FromUrl, frame::Frame};

pub(super) const RTMP_SCHEME: &str = "rtmp";

/// appsink 取样等待时长（纳秒）；超时视为流缓冲中
const PULL_TIMEOUT_NS: u64 = 200_000_000;

/// RTMP 网络流输入源
pub struct RtmpSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl FromUrl for RtmpSource {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != RTMP_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        RTMP_SCHEME,
        url.scheme()
      );
      return Err(SourceError::SchemeMismatch {
        expected: RTMP_SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    gst::init().map_err(|e| SourceError::Pipeline(format!("GStreamer init error: {}", e)))?;

    let pipeline_desc = format!(
      "rtmpsrc location={} ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
       appsink max-buffers=2 drop=true name=sink",
      url
    );
    info!("GStreamer pipeline description: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)
      .map_err(|e| SourceError::Pipeline(format!("GStreamer error: {}", e)))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| SourceError::Pipeline("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| SourceError::Pipeline("Failed to get appsink element".to_string()))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| SourceError::Pipeline("Failed to convert element to appsink".to_string()))?;

    pipeline
      .set_state(gst::State::Playing)
      .map_err(|e| SourceError::Pipeline(format!("State change error: {}", e)))?;

    Ok(Self {
      pipeline,
      appsink,
      frame_index: 0,
      width: 0,
      height: 0,
      start_time: Instant::now(),
    })
  }
}

impl Drop for RtmpSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      tracing::warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl RtmpSource {
  fn convert_sample(&mut self, sample: gst::Sample) -> Result<Frame, SourceError> {
    let buffer = sample
      .buffer()
      .ok_or_else(|| SourceError::Pipeline("No buffer in sample".to_string()))?;
    let caps = sample
      .caps()
      .ok_or_else(|| SourceError::Pipeline("No caps in sample".to_string()))?;

    let video_info = gst_video::VideoInfo::from_caps(caps)
      .map_err(|_| SourceError::Pipeline("Failed to get video info from caps".to_string()))?;

    let width = video_info.width();
    let height = video_info.height();

    let map = buffer
      .map_readable()
      .map_err(|e| SourceError::Pipeline(format!("Failed to map buffer for reading: {}", e)))?;
    let data = map.as_slice();

    // Validate buffer size
    let expected_size = (width * height * 3) as usize;
    if data.len() < expected_size {
      return Err(SourceError::Pipeline(format!(
        "Buffer size mismatch: expected {} bytes, got {} bytes",
        expected_size,
        data.len()
      )));
    }

    // 帧尺寸可能在拍间变化（流重协商），跟随实际采样更新
    self.width = width;
    self.height = height;

    let image = RgbImage::from_raw(width, height, data[..expected_size].to_vec())
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

impl FrameSource for RtmpSource {
  fn kind(&self) -> SourceKind {
    SourceKind::Rtmp
  }

  fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn fps(&self) -> Option<f64> {
    None
  }

  fn next_frame(&mut self) -> Result<Frame, SourceError> {
    match self
      .appsink
      .try_pull_sample(gst::ClockTime::from_nseconds(PULL_TIMEOUT_NS))
    {
      Some(sample) => self.convert_sample(sample),
      // 流还在缓冲或已断开，交给帧循环下一拍重试
      None => Err(SourceError::Unavailable("流缓冲中，尚无可用帧".to_string())),
    }
  }
}
