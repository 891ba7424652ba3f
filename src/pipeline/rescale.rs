// 该文件是 Qianli （千里眼） 项目的一部分。
// src/pipeline/rescale.rs - 坐标还原
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

use super::letterbox::LetterboxParams;

/// 渲染用边界框：目标表面像素坐标，角点形式。
#[derive(Debug, Clone, PartialEq)]
pub struct RenderBox {
  pub left: f32,
  pub top: f32,
  pub width: f32,
  pub height: f32,
  pub score: f32,
  pub class_id: u32,
}

impl RenderBox {
  /// 由目标表面坐标系下的中心形式框构造。
  pub fn from_center(bbox: [f32; 4], score: f32, class_id: u32) -> Self {
    Self {
      left: bbox[0] - bbox[2] / 2.0,
      top: bbox[1] - bbox[3] / 2.0,
      width: bbox[2],
      height: bbox[3],
      score,
      class_id,
    }
  }
}

/// letterbox 完整逆变换加目标表面缩放。
///
/// 先精确撤销预处理的等比缩放与对称填充，把模型坐标还原到
/// 原始帧坐标；若目标表面与原始帧尺度不同，再按目标比例
/// 二次缩放。输入输出均为中心形式 [cx, cy, w, h]。
pub fn rescale_bbox(
  bbox: &[f32; 4],
  params: &LetterboxParams,
  frame_size: (u32, u32),
  dest_size: (u32, u32),
) -> [f32; 4] {
  let cx = (bbox[0] - params.pad_x) / params.gain;
  let cy = (bbox[1] - params.pad_y) / params.gain;
  let w = bbox[2] / params.gain;
  let h = bbox[3] / params.gain;

  let scale_x = dest_size.0 as f32 / frame_size.0 as f32;
  let scale_y = dest_size.1 as f32 / frame_size.1 as f32;

  [cx * scale_x, cy * scale_y, w * scale_x, h * scale_y]
}

/// 平坦比例还原：只按目标/模型边长比缩放，不修正填充。
///
/// 仅当帧本身为正方形、letterbox 未引入填充时才与完整逆变换
/// 等价。这是降级后备方案，默认路径必须使用 [`rescale_bbox`]，
/// 否则框会随帧长宽比偏离目标。
pub fn rescale_bbox_flat(bbox: &[f32; 4], model_size: (u32, u32), dest_size: (u32, u32)) -> [f32; 4] {
  let scale_x = dest_size.0 as f32 / model_size.0 as f32;
  let scale_y = dest_size.1 as f32 / model_size.1 as f32;
  [
    bbox[0] * scale_x,
    bbox[1] * scale_y,
    bbox[2] * scale_x,
    bbox[3] * scale_y,
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::Frame;
  use crate::pipeline::letterbox::letterbox;
  use image::RgbImage;

  /// letterbox 正变换（测试用）：原始帧坐标映射到模型坐标
  fn apply_letterbox(bbox: &[f32; 4], params: &LetterboxParams) -> [f32; 4] {
    [
      bbox[0] * params.gain + params.pad_x,
      bbox[1] * params.gain + params.pad_y,
      bbox[2] * params.gain,
      bbox[3] * params.gain,
    ]
  }

  #[test]
  fn known_parameters_invert_exactly() {
    // gain 0.5, pad (20, 0): (100,100,40,40) -> (160,200,80,80)
    let params = LetterboxParams {
      gain: 0.5,
      pad_x: 20.0,
      pad_y: 0.0,
    };
    let restored = rescale_bbox(&[100.0, 100.0, 40.0, 40.0], &params, (1200, 1280), (1200, 1280));
    assert_eq!(restored, [160.0, 200.0, 80.0, 80.0]);
  }

  #[test]
  fn round_trip_through_letterbox_params() {
    let frame = Frame::new(RgbImage::new(1280, 720), 0, 0);
    let (_, params) = letterbox(&frame, (640, 640));

    let original = [312.5, 410.25, 97.0, 33.5];
    let forward = apply_letterbox(&original, &params);
    let restored = rescale_bbox(&forward, &params, (1280, 720), (1280, 720));

    for (a, b) in original.iter().zip(restored.iter()) {
      assert!((a - b).abs() < 1e-3, "{} != {}", a, b);
    }
  }

  #[test]
  fn destination_scale_applies_after_inversion() {
    let params = LetterboxParams {
      gain: 0.5,
      pad_x: 0.0,
      pad_y: 140.0,
    };
    // 原始帧 1280x720，显示画布 320x180（1/4 尺度）
    let restored = rescale_bbox(&[320.0, 320.0, 64.0, 36.0], &params, (1280, 720), (320, 180));
    assert_eq!(restored, [160.0, 90.0, 32.0, 18.0]);
  }

  #[test]
  fn flat_ratio_diverges_on_padded_frames() {
    // 非方形帧：平坦比例忽略填充修正，结果与完整逆变换不同
    let params = LetterboxParams {
      gain: 0.5,
      pad_x: 0.0,
      pad_y: 140.0,
    };
    let bbox = [320.0, 320.0, 64.0, 36.0];
    let full = rescale_bbox(&bbox, &params, (1280, 720), (1280, 720));
    let flat = rescale_bbox_flat(&bbox, (640, 640), (1280, 720));
    assert_ne!(full, flat);
  }

  #[test]
  fn render_box_corner_form() {
    let render = RenderBox::from_center([160.0, 200.0, 80.0, 80.0], 0.9, 3);
    assert_eq!(render.left, 120.0);
    assert_eq!(render.top, 160.0);
    assert_eq!(render.width, 80.0);
    assert_eq!(render.height, 80.0);
  }
}
