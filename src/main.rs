// 该文件是 Qianli （千里眼） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use qianli::{
  model::{InferenceGateway, Model},
  output::create_render,
  pipeline::{DetectPipeline, PipelineConfig},
  remote::RemoteBackend,
  session::{CancelToken, DetectSession, SessionConfig},
  source::{FrameSource, SourceError, create_source},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型位置: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出目标: {}", args.output);
  info!(
    "置信度阈值: {}, NMS IOU 阈值: {}",
    args.confidence, args.nms_threshold
  );

  match args.model.scheme() {
    "http" | "https" => run_remote(&args),
    _ => run_local(&args),
  }
}

/// 本地推理：模型在进程内，走完整的检测流水线。
fn run_local(args: &args::Args) -> Result<()> {
  match args.model.scheme() {
    #[cfg(feature = "model_onnx")]
    "onnx" => {
      use qianli::FromUrl;
      info!("正在加载模型...");
      let model = qianli::model::OnnxModelBuilder::from_url(&args.model)?.build()?;
      let gateway = InferenceGateway::load(model)?;
      run_session(args, &gateway)
    }
    other => anyhow::bail!(
      "不支持的模型方案: {}（远端推理请使用 http/https）",
      other
    ),
  }
}

#[cfg_attr(not(feature = "model_onnx"), allow(dead_code))]
fn run_session<M: Model>(args: &args::Args, gateway: &InferenceGateway<M>) -> Result<()> {
  let mut source = create_source(&args.input).context("无法打开输入源")?;
  let font = font_path(args);
  let mut render =
    create_render(&args.output, Some(font.as_path())).context("无法创建输出")?;

  let pipeline = DetectPipeline::new(PipelineConfig {
    conf_threshold: args.confidence,
    iou_threshold: args.nms_threshold,
    ..PipelineConfig::default()
  });

  let mut session = DetectSession::new(SessionConfig {
    max_frames: args.max_frames,
    ..SessionConfig::default()
  });
  install_ctrlc(session.cancel_token())?;

  let summary = session.run(source.as_mut(), gateway, &pipeline, render.as_mut())?;
  info!(
    "处理完成: 共 {} 帧, {} 个检测",
    summary.frames, summary.detections
  );
  Ok(())
}

/// 远端推理：帧或文件交给远端后端标注，本地只负责采样与落盘。
fn run_remote(args: &args::Args) -> Result<()> {
  let backend = RemoteBackend::new(args.model.clone());
  match args.input.scheme() {
    "image" => remote_image(args, &backend),
    _ => remote_chunks(args, &backend),
  }
}

/// 整图路径：上传一个文件，收到的标注图直接落盘。
fn remote_image(args: &args::Args, backend: &RemoteBackend) -> Result<()> {
  let path = args.input.path();
  let bytes = std::fs::read(path).with_context(|| format!("无法读取文件: {}", path))?;
  let file_name = Path::new(path)
    .file_name()
    .and_then(|name| name.to_str())
    .unwrap_or("upload.png");

  let annotated = backend.upload_image(file_name, &bytes)?;

  let target = output_path(&args.output)?;
  write_bytes(&target, &annotated)?;
  info!("标注图像已保存: {}", target.display());
  Ok(())
}

/// 块路径：周期性上传 JPEG 编码的当前帧，标注帧覆盖落盘。
fn remote_chunks(args: &args::Args, backend: &RemoteBackend) -> Result<()> {
  let mut source = create_source(&args.input).context("无法打开输入源")?;
  let target = output_path(&args.output)?;

  let cancel = CancelToken::new();
  install_ctrlc(cancel.clone())?;

  let interval = Duration::from_millis(args.chunk_interval_ms.max(1));
  let mut chunks = 0u64;

  loop {
    if cancel.is_cancelled() {
      info!("收到停止请求，退出块上传循环");
      break;
    }
    if args.max_frames > 0 && chunks >= args.max_frames {
      info!("达到最大帧数 {}, 退出块上传循环", args.max_frames);
      break;
    }

    let frame = match source.next_frame() {
      Ok(frame) => frame,
      Err(SourceError::Exhausted) => {
        info!("输入源已耗尽");
        break;
      }
      Err(e) if e.is_transient() => {
        thread::sleep(Duration::from_millis(20));
        continue;
      }
      Err(e) => return Err(e).context("输入源错误"),
    };

    let mut jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85);
    frame
      .image
      .write_with_encoder(encoder)
      .context("JPEG 编码失败")?;

    // 非成功响应对该块是终结性的，不做重试
    let annotated = backend.upload_chunk(&jpeg)?;
    write_bytes(&target, &annotated)?;

    chunks += 1;
    info!("块 {} 已标注 ({} 字节)", chunks, annotated.len());
    thread::sleep(interval);
  }

  info!("远端处理完成: 共 {} 块", chunks);
  Ok(())
}

/// 远端路径的输出只支持图片落盘。
fn output_path(output: &Url) -> Result<PathBuf> {
  if output.scheme() != "image" {
    anyhow::bail!("远端推理的输出仅支持 image:// 方案，实际为 {}", output.scheme());
  }
  Ok(PathBuf::from(output.path()))
}

fn write_bytes(target: &Path, bytes: &[u8]) -> Result<()> {
  if let Some(parent) = target.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(target, bytes)?;
  Ok(())
}

fn font_path(args: &args::Args) -> PathBuf {
  args
    .font
    .clone()
    .unwrap_or_else(|| PathBuf::from(args::DEFAULT_FONT_PATH))
}

fn install_ctrlc(cancel: CancelToken) -> Result<()> {
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    cancel.cancel();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理器")?;
  Ok(())
}
