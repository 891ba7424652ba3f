// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/mod.rs - 模型与推理网关
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

#[cfg(feature = "model_onnx")]
mod onnx;

#[cfg(feature = "model_onnx")]
pub use onnx::{OnnxModel, OnnxModelBuilder, OnnxModelError};

use thiserror::Error;
use tracing::{debug, info};

use crate::tensor::{InputTensor, RawOutput};

/// 模型错误
#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载失败: {0}")]
  LoadFailed(String),
  #[error("模型尚未加载完成")]
  NotReady,
  #[error("推理后端错误: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 检测模型：张量进、张量出的黑盒。
///
/// 具体的网络结构、权重格式都在边界之外；
/// 流水线只依赖这个接口。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型固定输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  fn infer(&self, input: &InputTensor) -> Result<RawOutput, Self::Error>;
}

/// 推理网关：进程内模型句柄的唯一持有者。
///
/// 句柄从不复制、从不共享可变引用；会话互斥保证了
/// 不会有两次并发推理竞争同一句柄。输入张量按值传入并在
/// 调用返回前释放（包括错误路径），长时间运行的循环不会
/// 累积本机内存。
pub struct InferenceGateway<M: Model> {
  model: Option<M>,
}

impl<M: Model> InferenceGateway<M> {
  /// 尚未装载模型的网关；此时推理返回 `ModelError::NotReady`。
  pub fn unloaded() -> Self {
    Self { model: None }
  }

  /// 装载模型并立即执行一次零张量预热推理，
  /// 避免首次真实推理承担一次性的初始化开销。
  pub fn load(model: M) -> Result<Self, ModelError> {
    let (width, height) = model.input_size();
    info!("模型装载完成，执行预热推理 ({}x{})", width, height);

    let warmup = InputTensor::zeros(width as usize, height as usize);
    let output = model
      .infer(&warmup)
      .map_err(|e| ModelError::Backend(Box::new(e)))?;
    drop(output);
    drop(warmup);
    debug!("预热推理完成");

    Ok(Self { model: Some(model) })
  }

  pub fn is_ready(&self) -> bool {
    self.model.is_some()
  }

  /// 模型输入尺寸；未装载时返回 `NotReady`。
  pub fn input_size(&self) -> Result<(u32, u32), ModelError> {
    self
      .model
      .as_ref()
      .map(Model::input_size)
      .ok_or(ModelError::NotReady)
  }

  /// 执行一次推理。输入张量按值消费，任何退出路径都会释放。
  pub fn infer(&self, input: InputTensor) -> Result<RawOutput, ModelError> {
    let model = self.model.as_ref().ok_or(ModelError::NotReady)?;
    model
      .infer(&input)
      .map_err(|e| ModelError::Backend(Box::new(e)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  struct CountingModel {
    calls: Arc<AtomicUsize>,
  }

  impl Model for CountingModel {
    type Error = std::convert::Infallible;

    fn input_size(&self) -> (u32, u32) {
      (32, 32)
    }

    fn infer(&self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
      assert_eq!(input.shape(), [1, 3, 32, 32]);
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(RawOutput::Split {
        boxes: vec![],
        scores: vec![],
        classes: vec![],
      })
    }
  }

  #[test]
  fn unloaded_gateway_reports_not_ready() {
    let gateway = InferenceGateway::<CountingModel>::unloaded();
    assert!(!gateway.is_ready());
    assert!(matches!(gateway.input_size(), Err(ModelError::NotReady)));
    let result = gateway.infer(InputTensor::zeros(32, 32));
    assert!(matches!(result, Err(ModelError::NotReady)));
  }

  #[test]
  fn load_runs_one_warmup_inference() {
    let calls = Arc::new(AtomicUsize::new(0));
    let gateway = InferenceGateway::load(CountingModel {
      calls: calls.clone(),
    })
    .unwrap();

    assert!(gateway.is_ready());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    gateway.infer(InputTensor::zeros(32, 32)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
