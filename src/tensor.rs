// 该文件是 Qianli （千里眼） 项目的一部分。
// src/tensor.rs - 张量定义
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

const RGB_CHANNELS: usize = 3;

/// 模型输入张量：NCHW 布局的稠密 f32 缓冲，像素值已归一化到 [0, 1]。
///
/// 张量由创建它的阶段独占持有，推理网关按值消费，
/// 保证长时间运行的循环中每拍结束即释放。
#[derive(Debug, Clone)]
pub struct InputTensor {
  data: Box<[f32]>,
  shape: [usize; 4],
}

impl InputTensor {
  /// 由数据与形状构造；长度与形状不符视为编程错误。
  pub fn new(data: Vec<f32>, shape: [usize; 4]) -> Self {
    let expected: usize = shape.iter().product();
    if data.len() != expected {
      panic!(
        "数据长度不匹配: 期望长度 {}, 实际长度 {}",
        expected,
        data.len()
      );
    }

    Self {
      data: data.into_boxed_slice(),
      shape,
    }
  }

  /// 全零张量，用于模型装载后的预热推理。
  pub fn zeros(width: usize, height: usize) -> Self {
    let shape = [1, RGB_CHANNELS, height, width];
    let size = shape.iter().product();
    Self {
      data: vec![0.0; size].into_boxed_slice(),
      shape,
    }
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn width(&self) -> usize {
    self.shape[3]
  }

  pub fn height(&self) -> usize {
    self.shape[2]
  }
}

/// 模型原始输出。
///
/// 两种受支持的布局在解码时根据声明的形状一次性判定为
/// 带标签的变体，后续阶段不再做鸭子类型检查。
#[derive(Debug, Clone)]
pub enum RawOutput {
  /// 单个展平的预测张量，按行排布，
  /// 每行为固定数量的特征（框坐标 + 分数 + 类别得分）。
  Flat { data: Vec<f32>, shape: Vec<usize> },
  /// 三个等长的平行数组：框、分数、类别。
  Split {
    boxes: Vec<[f32; 4]>,
    scores: Vec<f32>,
    classes: Vec<u32>,
  },
}
