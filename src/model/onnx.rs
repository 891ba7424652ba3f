// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ndarray::Array4;
use ort::{GraphOptimizationLevel, Session};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::Model;
use crate::{
  FromUrl,
  tensor::{InputTensor, RawOutput},
};

const ONNX_SCHEME: &str = "onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("模型输出异常: {0}")]
  Output(String),
}

/// ONNX 模型构建器，从 `onnx:///path/model.onnx?size=640` 创建。
pub struct OnnxModelBuilder {
  model_path: String,
  input_size: u32,
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != ONNX_SCHEME {
      return Err(OnnxModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        ONNX_SCHEME
      )));
    }

    let input_size = url
      .query_pairs()
      .find(|(k, _)| k == "size")
      .and_then(|(_, v)| v.parse().ok())
      .unwrap_or(DEFAULT_INPUT_SIZE);

    Ok(OnnxModelBuilder {
      model_path: url.path().to_string(),
      input_size,
    })
  }
}

impl OnnxModelBuilder {
  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxModelError> {
    info!("加载模型文件: {}", self.model_path);
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(4)?
      .commit_from_file(&self.model_path)?;
    info!("ONNX 推理会话创建完成");

    Ok(OnnxModel {
      session,
      input_size: self.input_size,
    })
  }
}

/// ONNX Runtime 后端的检测模型。
pub struct OnnxModel {
  session: Session,
  input_size: u32,
}

impl Model for OnnxModel {
  type Error = OnnxModelError;

  fn input_size(&self) -> (u32, u32) {
    (self.input_size, self.input_size)
  }

  fn infer(&self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
    let [n, c, h, w] = input.shape();
    let array = Array4::from_shape_vec((n, c, h, w), input.data().to_vec())
      .map_err(|e| OnnxModelError::Output(format!("输入形状异常: {}", e)))?;

    debug!("执行模型推理");
    let outputs = self.session.run(ort::inputs![array.view()]?)?;

    let tensor = outputs[0].try_extract_tensor::<f32>()?;
    let shape: Vec<usize> = tensor.shape().to_vec();
    let data: Vec<f32> = tensor.iter().copied().collect();
    debug!("模型输出形状: {:?}", shape);

    // 输入张量与 ORT 中间输出在本函数返回时释放
    Ok(RawOutput::Flat { data, shape })
  }
}
