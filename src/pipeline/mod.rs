// 该文件是 Qianli （千里眼） 项目的一部分。
// src/pipeline/mod.rs - 检测流水线
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

mod decode;
mod letterbox;
mod rescale;
mod suppress;

pub use decode::{DecodeError, Detection, FEATURES_PER_PREDICTION, decode};
pub use letterbox::{LetterboxParams, letterbox};
pub use rescale::{RenderBox, rescale_bbox, rescale_bbox_flat};
pub use suppress::{iou, suppress};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::Frame,
  model::{InferenceGateway, Model, ModelError},
};

/// 抑制前分数下限的默认值，必须低于显示阈值
const DEFAULT_SCORE_FLOOR: f32 = 0.05;

/// 流水线参数
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
  /// 显示置信度阈值
  pub conf_threshold: f32,
  /// NMS IOU 阈值
  pub iou_threshold: f32,
  /// 抑制前的分数下限，用于约束 O(n²) 抑制的 n
  pub score_floor: f32,
  /// 每预测特征数
  pub features_per_prediction: usize,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      conf_threshold: 0.25,
      iou_threshold: 0.45,
      score_floor: DEFAULT_SCORE_FLOOR,
      features_per_prediction: FEATURES_PER_PREDICTION,
    }
  }
}

/// 流水线错误。两类都属结构性错误，终止当前会话。
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error(transparent)]
  Model(#[from] ModelError),
  #[error(transparent)]
  Decode(#[from] DecodeError),
}

/// 检测流水线：预处理 → 推理 → 解码 → 抑制 → 坐标还原。
///
/// 每次 `process` 处理一帧，阶段间的张量在本拍内创建并释放。
#[derive(Debug, Clone)]
pub struct DetectPipeline {
  config: PipelineConfig,
}

impl DetectPipeline {
  pub fn new(mut config: PipelineConfig) -> Self {
    // 分数下限高于显示阈值会让抑制吞掉本应显示的框
    if config.score_floor > config.conf_threshold {
      warn!(
        "分数下限 {} 高于显示阈值 {}，已压到显示阈值",
        config.score_floor, config.conf_threshold
      );
      config.score_floor = config.conf_threshold;
    }
    Self { config }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  /// 处理一帧：返回目标表面坐标系下、按分数降序的渲染框。
  pub fn process<M: Model>(
    &self,
    gateway: &InferenceGateway<M>,
    frame: &Frame,
    dest_size: (u32, u32),
  ) -> Result<Vec<RenderBox>, PipelineError> {
    let input_size = gateway.input_size()?;

    let (tensor, params) = letterbox(frame, input_size);
    let raw = gateway.infer(tensor)?;

    let detections = decode(&raw, self.config.features_per_prediction)?;
    drop(raw);

    // 先用分数下限约束候选数，再做 O(n²) 抑制
    let candidates: Vec<Detection> = detections
      .into_iter()
      .filter(|d| d.score >= self.config.score_floor)
      .collect();
    let keep = suppress(&candidates, self.config.iou_threshold);

    let frame_size = frame.dimensions();
    let boxes: Vec<RenderBox> = keep
      .into_iter()
      .map(|index| &candidates[index])
      .filter(|d| d.score >= self.config.conf_threshold)
      .map(|d| {
        let bbox = rescale_bbox(&d.bbox, &params, frame_size, dest_size);
        RenderBox::from_center(bbox, d.score, d.class_id)
      })
      .collect();

    debug!(
      "帧 {}: {} 个候选幸存，{} 个超过显示阈值",
      frame.index,
      candidates.len(),
      boxes.len()
    );
    Ok(boxes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::{InputTensor, RawOutput};
  use image::RgbImage;

  /// 固定输出两个同位重叠框（0.9 / 0.6）的测试模型
  struct TwoBoxModel;

  impl Model for TwoBoxModel {
    type Error = std::convert::Infallible;

    fn input_size(&self) -> (u32, u32) {
      (640, 640)
    }

    fn infer(&self, _input: &InputTensor) -> Result<RawOutput, Self::Error> {
      // 1x84x8400 展平布局：8400 行 84 特征，仅两行非零
      let rows = 8400;
      let mut data = vec![0.0f32; rows * FEATURES_PER_PREDICTION];
      let plant = |data: &mut [f32], row: usize, bbox: [f32; 4], score: f32, class: usize| {
        let base = row * FEATURES_PER_PREDICTION;
        data[base..base + 4].copy_from_slice(&bbox);
        data[base + 4] = score;
        data[base + 5 + class] = 1.0;
      };
      plant(&mut data, 0, [320.0, 320.0, 40.0, 50.0], 0.6, 16);
      plant(&mut data, 4200, [320.0, 320.0, 40.0, 40.0], 0.9, 16);

      Ok(RawOutput::Flat {
        data,
        shape: vec![1, FEATURES_PER_PREDICTION, rows],
      })
    }
  }

  #[test]
  fn full_pass_suppresses_overlapping_duplicate() {
    let gateway = InferenceGateway::load(TwoBoxModel).unwrap();
    let pipeline = DetectPipeline::new(PipelineConfig::default());
    let frame = Frame::new(RgbImage::new(640, 640), 0, 0);

    let boxes = pipeline.process(&gateway, &frame, (640, 640)).unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].score, 0.9);
    assert_eq!(boxes[0].class_id, 16);
    // 方形帧无填充，gain = 1：中心形式 (320,320,40,40)
    assert_eq!(boxes[0].left, 300.0);
    assert_eq!(boxes[0].top, 300.0);
  }

  #[test]
  fn floor_clamped_to_display_threshold() {
    let pipeline = DetectPipeline::new(PipelineConfig {
      conf_threshold: 0.02,
      score_floor: 0.05,
      ..PipelineConfig::default()
    });
    assert!(pipeline.config().score_floor <= pipeline.config().conf_threshold);
  }

  #[test]
  fn not_ready_gateway_fails_structurally() {
    let gateway = InferenceGateway::<TwoBoxModel>::unloaded();
    let pipeline = DetectPipeline::new(PipelineConfig::default());
    let frame = Frame::new(RgbImage::new(64, 64), 0, 0);

    let result = pipeline.process(&gateway, &frame, (64, 64));
    assert!(matches!(
      result,
      Err(PipelineError::Model(ModelError::NotReady))
    ));
  }
}
