// 该文件是 Qianli （千里眼） 项目的一部分。
// src/session.rs - 帧循环控制器
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  model::{InferenceGateway, Model},
  output::{OutputError, Render},
  pipeline::{DetectPipeline, PipelineError},
  source::{FrameSource, SourceError, SourceKind},
};

/// 会话状态机：Idle -> Starting -> Running -> Idle。
///
/// 用单一标签变体取代一堆可能互相矛盾的布尔标志。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Idle,
  Starting,
  Running(SourceKind),
}

/// 协作式取消令牌。
///
/// 控制器在采样每一拍之前检查令牌；不抢占在途的拍。
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// 会话错误。到达这里的都是结构性错误：
/// 暂时性的输入源错误已在循环内吞掉重试。
#[derive(Error, Debug)]
pub enum SessionError {
  #[error("模型尚未就绪，无法启动会话")]
  ModelNotReady,
  #[error(transparent)]
  Pipeline(#[from] PipelineError),
  #[error("输入源错误: {0}")]
  Source(#[from] SourceError),
  #[error("渲染错误: {0}")]
  Render(#[from] OutputError),
  #[error("会话线程异常退出")]
  Crashed,
}

/// 会话统计
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionSummary {
  pub frames: u64,
  pub detections: u64,
}

/// 循环配置
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
  /// 最大处理帧数，0 表示无限制
  pub max_frames: u64,
  /// 输入源暂不可用时的重试间隔
  pub poll_interval: Duration,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      max_frames: 0,
      poll_interval: Duration::from_millis(20),
    }
  }
}

/// 检测会话：驱动逐帧处理的帧循环控制器。
///
/// 调度是协作式、单线程的：每一拍完整走完
/// 采样 → 流水线 → 渲染后才采样下一拍，拍与拍不重叠，
/// 不会有两次并发推理竞争同一模型句柄。若推理慢于输入源的
/// 标称帧率，循环自然掉帧而不是排队堆积。
pub struct DetectSession {
  state: SessionState,
  cancel: CancelToken,
  config: SessionConfig,
}

impl DetectSession {
  pub fn new(config: SessionConfig) -> Self {
    Self {
      state: SessionState::Idle,
      cancel: CancelToken::new(),
      config,
    }
  }

  /// 用于从另一线程请求停止的令牌。
  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  /// 运行检测循环，直至取消、输入源耗尽或致命错误。
  ///
  /// 无论以哪种方式退出，状态都回到 `Idle`，之后可以启动
  /// 新的会话。
  pub fn run<M: Model>(
    &mut self,
    source: &mut dyn FrameSource,
    gateway: &InferenceGateway<M>,
    pipeline: &DetectPipeline,
    render: &mut dyn Render,
  ) -> Result<SessionSummary, SessionError> {
    self.state = SessionState::Starting;
    if !gateway.is_ready() {
      error!("模型尚未就绪，会话启动失败");
      self.state = SessionState::Idle;
      return Err(SessionError::ModelNotReady);
    }

    self.state = SessionState::Running(source.kind());
    info!("会话启动: {}", source.kind());

    let result = self.tick_loop(source, gateway, pipeline, render);
    self.state = SessionState::Idle;

    match &result {
      Ok(summary) => info!(
        "会话结束: 共 {} 帧, {} 个检测",
        summary.frames, summary.detections
      ),
      Err(e) => error!("会话异常终止: {}", e),
    }
    result
  }

  fn tick_loop<M: Model>(
    &mut self,
    source: &mut dyn FrameSource,
    gateway: &InferenceGateway<M>,
    pipeline: &DetectPipeline,
    render: &mut dyn Render,
  ) -> Result<SessionSummary, SessionError> {
    // 连续坏帧超过该数目视为输入源已不可救
    const MAX_CONSECUTIVE_BAD_FRAMES: u32 = 30;

    let mut summary = SessionSummary::default();
    let mut bad_frames = 0u32;

    loop {
      // 取消检查先于采样：停止请求在下一拍开始前生效，
      // 在途的拍照常完成并发布
      if self.cancel.is_cancelled() {
        info!("收到停止请求，退出会话循环");
        break;
      }
      if self.config.max_frames > 0 && summary.frames >= self.config.max_frames {
        info!("达到最大帧数 {}, 退出会话循环", self.config.max_frames);
        break;
      }

      let frame = match source.next_frame() {
        Ok(frame) => frame,
        Err(SourceError::Exhausted) => {
          info!("输入源已耗尽");
          break;
        }
        Err(e) if e.is_transient() => {
          debug!("输入源暂不可用，下一拍重试: {}", e);
          thread::sleep(self.config.poll_interval);
          continue;
        }
        Err(e) => {
          // 单个坏帧只记录并跳过，连续坏帧才终止会话
          bad_frames += 1;
          if bad_frames >= MAX_CONSECUTIVE_BAD_FRAMES {
            return Err(e.into());
          }
          warn!("输入源坏帧，跳过本拍: {}", e);
          continue;
        }
      };
      bad_frames = 0;

      let tick_start = Instant::now();
      let boxes = pipeline.process(gateway, &frame, frame.dimensions())?;
      render.render_frame(&frame, &boxes)?;

      summary.frames += 1;
      summary.detections += boxes.len() as u64;
      debug!(
        "帧 {} 处理完成: {} 个检测, 耗时 {:.2?}",
        frame.index,
        boxes.len(),
        tick_start.elapsed()
      );
      // frame 与本拍的全部中间张量在此释放
    }

    render.finish()?;
    Ok(summary)
  }
}

/// 会话管理器：同一时刻至多一个活动会话。
///
/// 切换输入源（例如图片 → 摄像头）必须先停掉旧会话再启动
/// 新会话：会话是独占的，不排队。
#[derive(Default)]
pub struct SessionManager {
  active: Option<ActiveSession>,
}

struct ActiveSession {
  kind: SourceKind,
  cancel: CancelToken,
  handle: thread::JoinHandle<Result<SessionSummary, SessionError>>,
}

impl SessionManager {
  pub fn new() -> Self {
    Self::default()
  }

  /// 当前活动会话的输入源类型。
  pub fn active_kind(&self) -> Option<SourceKind> {
    self.active.as_ref().map(|session| session.kind)
  }

  /// 启动新会话；任何旧会话先被取消并等待其退出。
  ///
  /// 返回新会话的取消令牌。
  pub fn start<M>(
    &mut self,
    config: SessionConfig,
    mut source: Box<dyn FrameSource + Send>,
    gateway: Arc<InferenceGateway<M>>,
    pipeline: DetectPipeline,
    mut render: Box<dyn Render + Send>,
  ) -> CancelToken
  where
    M: Model + Send + Sync + 'static,
  {
    if let Some(old) = self.active.take() {
      info!("切换输入源: 先停止 {} 会话", old.kind);
      if let Err(e) = Self::teardown(old) {
        warn!("旧会话以错误收场: {}", e);
      }
    }

    let kind = source.kind();
    let mut session = DetectSession::new(config);
    let cancel = session.cancel_token();

    let handle = thread::spawn(move || {
      session.run(source.as_mut(), &gateway, &pipeline, render.as_mut())
    });

    self.active = Some(ActiveSession {
      kind,
      cancel: cancel.clone(),
      handle,
    });
    cancel
  }

  /// 停止当前会话并等待其完成在途的拍。
  pub fn stop(&mut self) -> Option<Result<SessionSummary, SessionError>> {
    self.active.take().map(Self::teardown)
  }

  fn teardown(session: ActiveSession) -> Result<SessionSummary, SessionError> {
    session.cancel.cancel();
    match session.handle.join() {
      Ok(result) => result,
      Err(_) => {
        error!("会话线程崩溃");
        Err(SessionError::Crashed)
      }
    }
  }
}

impl Drop for SessionManager {
  fn drop(&mut self) {
    let _ = self.stop();
  }
}
