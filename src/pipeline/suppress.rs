// 该文件是 Qianli （千里眼） 项目的一部分。
// src/pipeline/suppress.rs - 非极大值抑制
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

use super::decode::Detection;

/// 计算两个中心形式边界框 [cx, cy, w, h] 的 IOU。
///
/// 并集面积不为正时定义 IOU 为 0，保证比较总是有定义，
/// 算法必然终止。
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let (ax1, ay1) = (a[0] - a[2] / 2.0, a[1] - a[3] / 2.0);
  let (ax2, ay2) = (a[0] + a[2] / 2.0, a[1] + a[3] / 2.0);
  let (bx1, by1) = (b[0] - b[2] / 2.0, b[1] - b[3] / 2.0);
  let (bx2, by2) = (b[0] + b[2] / 2.0, b[1] + b[3] / 2.0);

  let overlap_w = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
  let overlap_h = (ay2.min(by2) - ay1.max(by1)).max(0.0);
  let intersection = overlap_w * overlap_h;

  let union = a[2] * a[3] + b[2] * b[3] - intersection;
  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 贪心非极大值抑制。
///
/// 反复取剩余池中分数最高者为当选框，剔除与其 IOU 超过阈值的
/// 其余候选，直至池空。返回幸存者在输入切片中的下标，按分数
/// 降序。复杂度 O(n²)，n 为抑制前的候选数，是每帧的主要开销；
/// 调用方应先用分数下限预过滤来约束 n。
pub fn suppress(detections: &[Detection], iou_threshold: f32) -> Vec<usize> {
  let mut order: Vec<usize> = (0..detections.len()).collect();
  order.sort_by(|&a, &b| detections[b].score.total_cmp(&detections[a].score));

  let mut removed = vec![false; detections.len()];
  let mut keep = Vec::new();

  for position in 0..order.len() {
    let selected = order[position];
    if removed[selected] {
      continue;
    }
    keep.push(selected);

    for &other in &order[position + 1..] {
      if !removed[other]
        && iou(&detections[selected].bbox, &detections[other].bbox) > iou_threshold
      {
        removed[other] = true;
      }
    }
  }

  keep
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(bbox: [f32; 4], score: f32) -> Detection {
    Detection {
      bbox,
      score,
      class_id: 0,
    }
  }

  #[test]
  fn disjoint_boxes_have_zero_iou() {
    let a = [10.0, 10.0, 4.0, 4.0];
    let b = [100.0, 100.0, 4.0, 4.0];
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn identical_boxes_have_unit_iou() {
    let a = [50.0, 40.0, 20.0, 10.0];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn degenerate_boxes_define_zero_iou() {
    let a = [10.0, 10.0, 0.0, 0.0];
    let b = [10.0, 10.0, 0.0, 0.0];
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn partial_overlap_is_between_zero_and_one() {
    // 两个 10x10 框，水平错开 5 像素：交 50，并 150
    let a = [10.0, 10.0, 10.0, 10.0];
    let b = [15.0, 10.0, 10.0, 10.0];
    assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn overlapping_pair_keeps_higher_score() {
    // 同位置两框，IOU 0.8 > 阈值 0.5，仅保留 0.9 分者
    let detections = vec![
      detection([100.0, 100.0, 40.0, 50.0], 0.6),
      detection([100.0, 100.0, 40.0, 40.0], 0.9),
    ];
    assert!((iou(&detections[0].bbox, &detections[1].bbox) - 0.8).abs() < 1e-6);

    let keep = suppress(&detections, 0.5);
    assert_eq!(keep, vec![1]);
  }

  #[test]
  fn survivors_are_subset_in_descending_score_order() {
    let detections = vec![
      detection([10.0, 10.0, 8.0, 8.0], 0.3),
      detection([200.0, 40.0, 8.0, 8.0], 0.95),
      detection([10.0, 11.0, 8.0, 8.0], 0.7),
      detection([400.0, 300.0, 8.0, 8.0], 0.5),
      detection([201.0, 40.0, 8.0, 8.0], 0.6),
    ];
    let keep = suppress(&detections, 0.5);

    assert!(keep.len() <= detections.len());
    assert!(keep.iter().all(|&i| i < detections.len()));

    // 分数降序
    for pair in keep.windows(2) {
      assert!(detections[pair[0]].score >= detections[pair[1]].score);
    }

    // 任意幸存对 IOU 不超过阈值
    for (i, &a) in keep.iter().enumerate() {
      for &b in &keep[i + 1..] {
        assert!(iou(&detections[a].bbox, &detections[b].bbox) <= 0.5);
      }
    }
  }

  #[test]
  fn suppression_is_class_agnostic() {
    let mut low = detection([100.0, 100.0, 40.0, 40.0], 0.6);
    low.class_id = 7;
    let high = detection([100.0, 100.0, 40.0, 40.0], 0.9);

    let keep = suppress(&[low, high], 0.5);
    assert_eq!(keep, vec![1]);
  }

  #[test]
  fn empty_input_yields_empty_output() {
    assert!(suppress(&[], 0.5).is_empty());
  }
}
