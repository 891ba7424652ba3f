// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::warn;

use crate::{labels::class_name, pipeline::RenderBox};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const CLASS_COLOR_COUNT: usize = 80;

/// 可视化工具：在图像上绘制边界框与标签。
pub struct Draw {
  /// 标签字体；缺失时只画框不画文字
  font: Option<FontArc>,
  font_scale: PxScale,
  /// 每类别一个颜色
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(None)
  }
}

impl Draw {
  /// 创建可视化工具；`font_path` 指向 TTF 字体文件。
  pub fn new(font_path: Option<&Path>) -> Self {
    let font = font_path.and_then(|path| match std::fs::read(path) {
      Ok(data) => match FontArc::try_from_vec(data) {
        Ok(font) => Some(font),
        Err(e) => {
          warn!("字体解析失败，标签文字停用: {}", e);
          None
        }
      },
      Err(e) => {
        warn!("无法读取字体 {}: {}", path.display(), e);
        None
      }
    });

    // 按色相均匀取色，同类别颜色稳定
    let colors: Vec<Rgb<u8>> = (0..CLASS_COLOR_COUNT)
      .map(|i| {
        let hue = (i as f32 / CLASS_COLOR_COUNT as f32) * 360.0;
        Self::hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      colors,
    }
  }

  /// HSV 转 RGB
  fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
      (c, x, 0.0)
    } else if h < 120.0 {
      (x, c, 0.0)
    } else if h < 180.0 {
      (0.0, c, x)
    } else if h < 240.0 {
      (0.0, x, c)
    } else if h < 300.0 {
      (x, 0.0, c)
    } else {
      (c, 0.0, x)
    };

    Rgb([
      ((r + m) * 255.0) as u8,
      ((g + m) * 255.0) as u8,
      ((b + m) * 255.0) as u8,
    ])
  }

  /// 在图像上绘制全部检测框与标签。
  pub fn annotate(&self, image: &mut RgbImage, boxes: &[RenderBox]) {
    for render_box in boxes {
      self.draw_box(image, render_box);
    }
  }

  fn draw_box(&self, image: &mut RgbImage, render_box: &RenderBox) {
    let color = self.colors[render_box.class_id as usize % self.colors.len()];

    let x = render_box.left.max(0.0) as i32;
    let y = render_box.top.max(0.0) as i32;
    let width = render_box
      .width
      .min(image.width() as f32 - render_box.left.max(0.0)) as u32;
    let height = render_box
      .height
      .min(image.height() as f32 - render_box.top.max(0.0)) as u32;

    if width == 0 || height == 0 {
      return;
    }

    let rect = Rect::at(x, y).of_size(width, height);
    draw_hollow_rect_mut(image, rect, color);

    // 加画一圈内框提高可见度
    if width > 2 && height > 2 {
      let inner = Rect::at(x + 1, y + 1).of_size(width - 2, height - 2);
      draw_hollow_rect_mut(image, inner, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    // 标签画在边框上方，空间不足时贴顶
    let label = format!("{} {:.2}", class_name(render_box.class_id), render_box.score);
    let text_width = (label.len() as f32 * LABEL_CHAR_WIDTH) as i32;
    let label_x = x.max(0);
    let label_y = (y - LABEL_TEXT_HEIGHT).max(0);

    let max_width = (image.width() as i32 - label_x).max(0);
    let bg_width = text_width.min(max_width) as u32;
    if bg_width == 0 {
      return;
    }

    let bg = Rect::at(label_x, label_y).of_size(bg_width, LABEL_TEXT_HEIGHT as u32);
    draw_filled_rect_mut(image, bg, color);
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      label_x,
      label_y + 2,
      self.font_scale,
      font,
      &label,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn render_box(left: f32, top: f32, width: f32, height: f32) -> RenderBox {
    RenderBox {
      left,
      top,
      width,
      height,
      score: 0.9,
      class_id: 0,
    }
  }

  #[test]
  fn annotate_touches_box_border_pixels() {
    let draw = Draw::new(None);
    let mut image = RgbImage::new(64, 64);
    draw.annotate(&mut image, &[render_box(10.0, 10.0, 20.0, 20.0)]);

    let border = *image.get_pixel(10, 10);
    assert_ne!(border, Rgb([0, 0, 0]));
    // 框内部不着色
    let inside = *image.get_pixel(20, 20);
    assert_eq!(inside, Rgb([0, 0, 0]));
  }

  #[test]
  fn out_of_bounds_box_is_ignored() {
    let draw = Draw::new(None);
    let mut image = RgbImage::new(32, 32);
    // 完全落在图像右侧之外，宽度被裁为 0
    draw.annotate(&mut image, &[render_box(40.0, 0.0, 10.0, 10.0)]);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn class_colors_are_stable_and_distinct() {
    let a = Draw::hsv_to_rgb(0.0, 0.8, 0.9);
    let b = Draw::hsv_to_rgb(180.0, 0.8, 0.9);
    assert_ne!(a, b);
    assert_eq!(a, Draw::hsv_to_rgb(0.0, 0.8, 0.9));
  }

  #[test]
  fn missing_font_degrades_to_boxes_only() {
    let draw = Draw::new(Some(Path::new("/definitely/not/a/font.ttf")));
    let mut image = RgbImage::new(64, 64);
    // 不会 panic，仍然画框
    draw.annotate(&mut image, &[render_box(5.0, 5.0, 10.0, 10.0)]);
    assert_ne!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
  }
}
