// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/stream.rs - 实时流输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use tracing::{info, warn};
use url::Url;

use super::{Draw, OutputError, Render};
use crate::{frame::Frame, pipeline::RenderBox};

pub(super) const STREAM_SCHEME: &str = "stream";

/// 实时流输出：标注后的帧经 appsrc 编码推送。
///
/// `stream://host?port=5000&width=640&height=480&fps=30`
pub struct StreamOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
  fps: u64,
  draw: Draw,
  frame_count: u64,
}

impl StreamOutput {
  pub fn new(url: &Url, draw: Draw) -> Result<Self, OutputError> {
    if url.scheme() != STREAM_SCHEME {
      return Err(OutputError::SchemeMismatch {
        expected: STREAM_SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    gst::init().map_err(|e| OutputError::Pipeline(format!("GStreamer init error: {}", e)))?;

    let query = |key: &str| {
      url
        .query_pairs()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse::<u32>().ok())
    };
    let width = query("width").unwrap_or(640);
    let height = query("height").unwrap_or(480);
    let fps = query("fps").unwrap_or(30).max(1) as u64;
    let port = query("port").unwrap_or(5000);
    let host = url.host_str().unwrap_or("127.0.0.1");

    let pipeline_desc = format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! \
       x264enc speed-preset=ultrafast tune=zerolatency bitrate=2000 ! \
       h264parse ! rtph264pay config-interval=1 pt=96 ! \
       udpsink host={} port={}",
      host, port
    );
    info!("Creating stream output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)
      .map_err(|e| OutputError::Pipeline(format!("GStreamer error: {}", e)))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| OutputError::Pipeline("Failed to create pipeline".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or_else(|| OutputError::Pipeline("Failed to get appsrc element".to_string()))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| OutputError::Pipeline("Failed to convert element to appsrc".to_string()))?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(fps as i32, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_property("is-live", true);

    pipeline
      .set_state(gst::State::Playing)
      .map_err(|e| OutputError::Pipeline(format!("State change error: {}", e)))?;

    info!(
      "Stream output initialized: {}x{} @ {} fps to {}:{}",
      width, height, fps, host, port
    );

    Ok(Self {
      pipeline,
      appsrc,
      width,
      height,
      fps,
      draw,
      frame_count: 0,
    })
  }

  fn push_rgb(&mut self, data: &[u8]) -> Result<(), OutputError> {
    let mut buffer = gst::Buffer::with_size(data.len())
      .map_err(|_| OutputError::Pipeline("Buffer creation error".to_string()))?;

    {
      let buffer_ref = buffer.get_mut().unwrap();
      let mut map = buffer_ref
        .map_writable()
        .map_err(|_| OutputError::Pipeline("Failed to map buffer".to_string()))?;
      map.copy_from_slice(data);
    }

    let timestamp = (self.frame_count * 1_000_000_000) / self.fps;
    self.frame_count += 1;
    {
      let buffer_ref = buffer.get_mut().unwrap();
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(1_000_000_000 / self.fps));
    }

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| OutputError::Pipeline(format!("Failed to push buffer: {:?}", e)))?;
    Ok(())
  }
}

impl Render for StreamOutput {
  fn render_frame(&mut self, frame: &Frame, boxes: &[RenderBox]) -> Result<(), OutputError> {
    let mut image = frame.image.clone();
    self.draw.annotate(&mut image, boxes);

    // 帧尺寸与声明的 caps 不一致时缩放到输出尺寸
    if image.dimensions() != (self.width, self.height) {
      image = image::imageops::resize(
        &image,
        self.width,
        self.height,
        image::imageops::FilterType::Triangle,
      );
    }

    self.push_rgb(image.as_raw())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if let Err(e) = self.appsrc.end_of_stream() {
      warn!("Failed to send EOS: {}", e);
    }
    info!("流输出关闭，共推送 {} 帧", self.frame_count);
    Ok(())
  }
}

impl Drop for StreamOutput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer output pipeline: {}", e);
    }
  }
}
