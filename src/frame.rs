// 该文件是 Qianli （千里眼） 项目的一部分。
// src/frame.rs - 帧定义
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

use image::RgbImage;

/// 单帧图像：像素数据与原始尺寸的句柄。
///
/// 每拍由输入源创建一帧，经流水线同步消费后即丢弃，
/// 不跨拍保留。
pub struct Frame {
  /// RGB 像素数据
  pub image: RgbImage,
  /// 帧序号
  pub index: u64,
  /// 采集时间戳（相对输入源打开时刻，毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 帧原始尺寸 (宽, 高)
  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }
}
