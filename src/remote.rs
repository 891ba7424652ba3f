// 该文件是 Qianli （千里眼） 项目的一部分。
// src/remote.rs - 远端推理后端客户端
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

use std::io::Read;

use base64::Engine;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// multipart 边界串
const BOUNDARY: &str = "----qianli-multipart-7f59e2c4";

/// 响应体大小上限（防御超长响应）
const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

/// 远端请求错误。请求/响应一次定终身：
/// 非成功响应对该块/该文件是终结性的，调用方不重试。
#[derive(Error, Debug)]
pub enum RemoteError {
  #[error("远端请求失败: HTTP {status}")]
  RequestFailed { status: u16 },
  #[error("传输错误: {0}")]
  Transport(String),
  #[error("响应格式错误: {0}")]
  MalformedResponse(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 远端推理后端客户端。
///
/// 两条路径：整图上传（响应即标注图字节）与块上传
/// （响应为携带 base64 标注帧的 JSON）。两者统一用
/// multipart/form-data 编码，Content-Type 声明边界。
pub struct RemoteBackend {
  base_url: Url,
  agent: ureq::Agent,
}

impl RemoteBackend {
  pub fn new(base_url: Url) -> Self {
    Self {
      base_url,
      agent: ureq::agent(),
    }
  }

  /// 整图上传：multipart POST 一个文件，返回标注后的图像字节。
  pub fn upload_image(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<u8>, RemoteError> {
    let endpoint = self.endpoint("upload/")?;
    info!("整图上传: {} ({} 字节)", endpoint, bytes.len());

    let body = multipart_body("file", file_name, "application/octet-stream", bytes);
    let response = self.post(&endpoint, body)?;

    let mut annotated = Vec::new();
    response
      .into_reader()
      .take(MAX_RESPONSE_BYTES)
      .read_to_end(&mut annotated)?;
    debug!("收到标注图像 {} 字节", annotated.len());
    Ok(annotated)
  }

  /// 块上传：POST 一段 JPEG 编码的当前帧，
  /// 返回解码后的标注帧字节（JPEG）。
  pub fn upload_chunk(&self, jpeg: &[u8]) -> Result<Vec<u8>, RemoteError> {
    let endpoint = self.endpoint("upload_video_chunk")?;
    debug!("块上传: {} ({} 字节)", endpoint, jpeg.len());

    let body = multipart_body("video_chunk", "chunk.jpg", "image/jpeg", jpeg);
    let response = self.post(&endpoint, body)?;

    let text = response
      .into_string()
      .map_err(|e| RemoteError::Transport(e.to_string()))?;
    parse_chunk_response(&text)
  }

  fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
    self
      .base_url
      .join(path)
      .map_err(|e| RemoteError::MalformedResponse(format!("端点拼接失败: {}", e)))
  }

  fn post(&self, endpoint: &Url, body: Vec<u8>) -> Result<ureq::Response, RemoteError> {
    match self
      .agent
      .post(endpoint.as_str())
      .set(
        "Content-Type",
        &format!("multipart/form-data; boundary={}", BOUNDARY),
      )
      .send_bytes(&body)
    {
      Ok(response) => Ok(response),
      Err(ureq::Error::Status(status, _)) => Err(RemoteError::RequestFailed { status }),
      Err(e) => Err(RemoteError::Transport(e.to_string())),
    }
  }
}

/// 构造单字段的 multipart/form-data 请求体。
fn multipart_body(field: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
  let mut body = Vec::with_capacity(bytes.len() + 256);
  body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
  body.extend_from_slice(
    format!(
      "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
      field, file_name
    )
    .as_bytes(),
  );
  body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
  body.extend_from_slice(bytes);
  body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
  body
}

/// 解析块上传响应：`{"annotated_chunk": "<base64 JPEG>"}`。
fn parse_chunk_response(text: &str) -> Result<Vec<u8>, RemoteError> {
  let value: serde_json::Value = serde_json::from_str(text)
    .map_err(|e| RemoteError::MalformedResponse(format!("响应不是 JSON: {}", e)))?;

  let encoded = value
    .get("annotated_chunk")
    .and_then(|v| v.as_str())
    .ok_or_else(|| {
      RemoteError::MalformedResponse("响应缺少 annotated_chunk 字段".to_string())
    })?;

  base64::engine::general_purpose::STANDARD
    .decode(encoded)
    .map_err(|e| RemoteError::MalformedResponse(format!("base64 解码失败: {}", e)))
}
