// 该文件是 Qianli （千里眼） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Qianli 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型位置
  /// 支持方案:
  /// - 本地: onnx:///path/model.onnx?size=640（需启用 model_onnx 特性）
  /// - 远端: http://host:port 或 https://host:port
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// 支持方案:
  /// - 图片: image:///path/to/pic.jpg
  /// - 摄像头: v4l2:///dev/video0?width=640&height=480
  /// - RTMP 流: rtmp://host/app/stream
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出目标
  /// 支持方案:
  /// - 图片: image:///path/out.jpg（目录则逐帧落盘）
  /// - 实时流: stream://host?port=5000
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 显示置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 标签字体文件路径（缺省时尝试系统 DejaVu 字体）
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 最大处理帧数（仅对视频/摄像头有效，0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,

  /// 远端块上传间隔（毫秒）
  #[arg(long, default_value = "1000", value_name = "MS")]
  pub chunk_interval_ms: u64,
}

/// 默认标签字体位置
pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
