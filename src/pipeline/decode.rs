// 该文件是 Qianli （千里眼） 项目的一部分。
// src/pipeline/decode.rs - 模型输出解码
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

use thiserror::Error;
use tracing::debug;

use crate::tensor::RawOutput;

/// 每个预测行的特征数：4 个框坐标 + 1 个分数 + 类别得分
pub const FEATURES_PER_PREDICTION: usize = 84;

/// 解码错误。结构性错误：同一会话内重试不会得到不同结果。
#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("输出格式错误: {0}")]
  MalformedOutput(String),
}

/// 单个候选检测
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 中心形式边界框 [cx, cy, w, h]，模型输入坐标系
  pub bbox: [f32; 4],
  /// 置信度 [0, 1]
  pub score: f32,
  /// 类别索引
  pub class_id: u32,
}

/// 解码原始模型输出为候选检测列表。
///
/// 本阶段是纯格式解码器，不做任何分数过滤；
/// 过滤推迟到抑制与渲染阶段。
pub fn decode(
  raw: &RawOutput,
  features_per_prediction: usize,
) -> Result<Vec<Detection>, DecodeError> {
  match raw {
    RawOutput::Flat { data, shape } => decode_flat(data, shape, features_per_prediction),
    RawOutput::Split {
      boxes,
      scores,
      classes,
    } => decode_split(boxes, scores, classes),
  }
}

fn decode_flat(
  data: &[f32],
  shape: &[usize],
  features_per_prediction: usize,
) -> Result<Vec<Detection>, DecodeError> {
  if features_per_prediction < 6 {
    return Err(DecodeError::MalformedOutput(format!(
      "每预测特征数 {} 过小，至少需要 4 框坐标 + 1 分数 + 1 类别",
      features_per_prediction
    )));
  }

  let declared: usize = shape.iter().product();
  if !shape.is_empty() && declared != data.len() {
    return Err(DecodeError::MalformedOutput(format!(
      "声明形状 {:?} 与数据长度 {} 不符",
      shape,
      data.len()
    )));
  }

  if data.len() % features_per_prediction != 0 {
    return Err(DecodeError::MalformedOutput(format!(
      "元素总数 {} 不能被每预测特征数 {} 整除",
      data.len(),
      features_per_prediction
    )));
  }

  let mut detections = Vec::with_capacity(data.len() / features_per_prediction);
  for row in data.chunks_exact(features_per_prediction) {
    let bbox = [row[0], row[1], row[2], row[3]];
    let score = row[4];

    let mut class_id = 0u32;
    let mut best = f32::MIN;
    for (index, &logit) in row[5..].iter().enumerate() {
      if logit > best {
        best = logit;
        class_id = index as u32;
      }
    }

    detections.push(Detection {
      bbox,
      score,
      class_id,
    });
  }

  debug!("解码 {} 个候选检测（展平布局）", detections.len());
  Ok(detections)
}

fn decode_split(
  boxes: &[[f32; 4]],
  scores: &[f32],
  classes: &[u32],
) -> Result<Vec<Detection>, DecodeError> {
  if boxes.len() != scores.len() || scores.len() != classes.len() {
    return Err(DecodeError::MalformedOutput(format!(
      "平行数组长度不一致: 框 {}, 分数 {}, 类别 {}",
      boxes.len(),
      scores.len(),
      classes.len()
    )));
  }

  let detections = boxes
    .iter()
    .zip(scores)
    .zip(classes)
    .map(|((&bbox, &score), &class_id)| Detection {
      bbox,
      score,
      class_id,
    })
    .collect::<Vec<_>>();

  debug!("解码 {} 个候选检测（多张量布局）", detections.len());
  Ok(detections)
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 构造一行 84 特征的预测
  fn row(bbox: [f32; 4], score: f32, class_id: usize) -> Vec<f32> {
    let mut row = vec![0.0; FEATURES_PER_PREDICTION];
    row[..4].copy_from_slice(&bbox);
    row[4] = score;
    row[5 + class_id] = 1.0;
    row
  }

  #[test]
  fn flat_rows_decode_box_score_and_argmax_class() {
    let mut data = row([100.0, 100.0, 40.0, 40.0], 0.9, 2);
    data.extend(row([300.0, 200.0, 80.0, 60.0], 0.6, 17));
    let raw = RawOutput::Flat {
      data,
      shape: vec![1, 2, FEATURES_PER_PREDICTION],
    };

    let detections = decode(&raw, FEATURES_PER_PREDICTION).unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].bbox, [100.0, 100.0, 40.0, 40.0]);
    assert_eq!(detections[0].score, 0.9);
    assert_eq!(detections[0].class_id, 2);
    assert_eq!(detections[1].class_id, 17);
  }

  #[test]
  fn indivisible_element_count_is_malformed() {
    let raw = RawOutput::Flat {
      data: vec![0.0; FEATURES_PER_PREDICTION + 1],
      shape: vec![],
    };
    let result = decode(&raw, FEATURES_PER_PREDICTION);
    assert!(matches!(result, Err(DecodeError::MalformedOutput(_))));
  }

  #[test]
  fn shape_data_disagreement_is_malformed() {
    let raw = RawOutput::Flat {
      data: vec![0.0; FEATURES_PER_PREDICTION],
      shape: vec![1, 2, FEATURES_PER_PREDICTION],
    };
    assert!(matches!(
      decode(&raw, FEATURES_PER_PREDICTION),
      Err(DecodeError::MalformedOutput(_))
    ));
  }

  #[test]
  fn no_score_filtering_at_decode_time() {
    let raw = RawOutput::Flat {
      data: row([10.0, 10.0, 5.0, 5.0], 0.001, 0),
      shape: vec![1, 1, FEATURES_PER_PREDICTION],
    };
    let detections = decode(&raw, FEATURES_PER_PREDICTION).unwrap();
    assert_eq!(detections.len(), 1);
  }

  #[test]
  fn split_arrays_zip_row_wise() {
    let raw = RawOutput::Split {
      boxes: vec![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]],
      scores: vec![0.8, 0.3],
      classes: vec![0, 41],
    };
    let detections = decode(&raw, FEATURES_PER_PREDICTION).unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[1].bbox, [5.0, 6.0, 7.0, 8.0]);
    assert_eq!(detections[1].score, 0.3);
    assert_eq!(detections[1].class_id, 41);
  }

  #[test]
  fn split_arity_mismatch_is_malformed() {
    let raw = RawOutput::Split {
      boxes: vec![[1.0, 2.0, 3.0, 4.0]],
      scores: vec![0.8, 0.3],
      classes: vec![0],
    };
    assert!(matches!(
      decode(&raw, FEATURES_PER_PREDICTION),
      Err(DecodeError::MalformedOutput(_))
    ));
  }
}
