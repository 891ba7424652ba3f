// 该文件是 Qianli （千里眼） 项目的一部分。
// src/pipeline/letterbox.rs - Letterbox 预处理
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

use image::imageops::FilterType;

use crate::{frame::Frame, tensor::InputTensor};

/// letterbox 填充灰度值
const PAD_VALUE: u8 = 114;

/// Letterbox 变换参数。
///
/// 逆向还原坐标时必须使用与该帧对应的参数：帧尺寸可能在
/// 拍间变化（摄像头分辨率重协商），因此参数逐帧传递，
/// 不是进程级常量。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxParams {
  /// 等比缩放系数 min(in_w/frame_w, in_h/frame_h)
  pub gain: f32,
  /// 水平方向单侧填充（像素）
  pub pad_x: f32,
  /// 垂直方向单侧填充（像素）
  pub pad_y: f32,
}

/// 等比缩放加对称填充，把帧转换为模型输入张量。
///
/// 返回 NCHW f32 张量（像素值除以 255）以及该帧的逆变换参数。
pub fn letterbox(frame: &Frame, input_size: (u32, u32)) -> (InputTensor, LetterboxParams) {
  let (in_w, in_h) = (input_size.0 as usize, input_size.1 as usize);
  let (frame_w, frame_h) = (frame.width() as f32, frame.height() as f32);

  let gain = (in_w as f32 / frame_w).min(in_h as f32 / frame_h);
  let scaled_w = ((frame_w * gain).round() as u32).max(1).min(in_w as u32);
  let scaled_h = ((frame_h * gain).round() as u32).max(1).min(in_h as u32);
  let pad_x = (in_w as f32 - frame_w * gain) / 2.0;
  let pad_y = (in_h as f32 - frame_h * gain) / 2.0;

  let resized = image::imageops::resize(&frame.image, scaled_w, scaled_h, FilterType::Triangle);

  // 先铺满填充色，再把缩放后的图像拷入居中位置（HWC -> CHW）
  let plane = in_w * in_h;
  let mut data = vec![PAD_VALUE as f32 / 255.0; 3 * plane];
  let off_x = pad_x.round() as usize;
  let off_y = pad_y.round() as usize;

  for y in 0..scaled_h as usize {
    for x in 0..scaled_w as usize {
      let pixel = resized.get_pixel(x as u32, y as u32);
      let index = (y + off_y) * in_w + (x + off_x);
      for c in 0..3 {
        data[c * plane + index] = pixel[c] as f32 / 255.0;
      }
    }
  }

  (
    InputTensor::new(data, [1, 3, in_h, in_w]),
    LetterboxParams { gain, pad_x, pad_y },
  )
}
