// 会话控制器场景测试：停止语义、会话互斥、状态机回归 Idle。

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::RgbImage;

use qianli::frame::Frame;
use qianli::model::{InferenceGateway, Model};
use qianli::output::{OutputError, Render};
use qianli::pipeline::{DetectPipeline, PipelineConfig, RenderBox};
use qianli::session::{
  CancelToken, DetectSession, SessionConfig, SessionError, SessionManager, SessionState,
};
use qianli::source::{FrameSource, SourceError, SourceKind};
use qianli::tensor::{InputTensor, RawOutput};

/// 输出恒为空检测集的模型
struct NullModel;

impl Model for NullModel {
  type Error = std::convert::Infallible;

  fn input_size(&self) -> (u32, u32) {
    (64, 64)
  }

  fn infer(&self, _input: &InputTensor) -> Result<RawOutput, Self::Error> {
    Ok(RawOutput::Split {
      boxes: vec![],
      scores: vec![],
      classes: vec![],
    })
  }
}

type EventLog = Arc<Mutex<Vec<String>>>;

/// 可配置类型与帧数上限的测试输入源
struct FakeSource {
  kind: SourceKind,
  tag: &'static str,
  log: EventLog,
  remaining: Option<u64>,
  index: u64,
}

impl FakeSource {
  fn endless(kind: SourceKind, tag: &'static str, log: EventLog) -> Self {
    Self {
      kind,
      tag,
      log,
      remaining: None,
      index: 0,
    }
  }

  fn limited(kind: SourceKind, tag: &'static str, log: EventLog, frames: u64) -> Self {
    Self {
      remaining: Some(frames),
      ..Self::endless(kind, tag, log)
    }
  }
}

impl FrameSource for FakeSource {
  fn kind(&self) -> SourceKind {
    self.kind
  }

  fn dimensions(&self) -> (u32, u32) {
    (64, 64)
  }

  fn fps(&self) -> Option<f64> {
    None
  }

  fn next_frame(&mut self) -> Result<Frame, SourceError> {
    if let Some(remaining) = &mut self.remaining {
      if *remaining == 0 {
        return Err(SourceError::Exhausted);
      }
      *remaining -= 1;
    }

    self
      .log
      .lock()
      .unwrap()
      .push(format!("{}:tick", self.tag));
    // 限速，避免测试日志爆炸
    thread::sleep(Duration::from_millis(1));

    let frame = Frame::new(RgbImage::new(64, 64), self.index, self.index);
    self.index += 1;
    Ok(frame)
  }
}

/// 记录渲染事件的输出；可在指定帧序号的渲染中发出停止请求
struct EventRender {
  tag: &'static str,
  log: EventLog,
  cancel_at: Option<(u64, CancelToken)>,
  rendered: u64,
}

impl EventRender {
  fn new(tag: &'static str, log: EventLog) -> Self {
    Self {
      tag,
      log,
      cancel_at: None,
      rendered: 0,
    }
  }

  fn cancel_at(mut self, frame_index: u64, token: CancelToken) -> Self {
    self.cancel_at = Some((frame_index, token));
    self
  }
}

impl Render for EventRender {
  fn render_frame(&mut self, frame: &Frame, _boxes: &[RenderBox]) -> Result<(), OutputError> {
    self
      .log
      .lock()
      .unwrap()
      .push(format!("{}:render", self.tag));
    self.rendered += 1;

    // 在途拍内发出停止请求：本拍照常发布，之后不再有新拍
    if let Some((at, token)) = &self.cancel_at
      && frame.index == *at
    {
      token.cancel();
    }
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    self
      .log
      .lock()
      .unwrap()
      .push(format!("{}:finish", self.tag));
    Ok(())
  }
}

fn pipeline() -> DetectPipeline {
  DetectPipeline::new(PipelineConfig::default())
}

#[test]
fn stop_request_mid_tick_finishes_tick_but_schedules_no_more() {
  let log: EventLog = Arc::new(Mutex::new(Vec::new()));
  let gateway = InferenceGateway::load(NullModel).unwrap();
  let mut session = DetectSession::new(SessionConfig::default());

  let mut source = FakeSource::endless(SourceKind::Webcam, "cam", log.clone());
  let mut render =
    EventRender::new("cam", log.clone()).cancel_at(2, session.cancel_token());

  let summary = session
    .run(&mut source, &gateway, &pipeline(), &mut render)
    .unwrap();

  // 帧 0、1、2 完成，帧 2 的在途拍照常发布，之后没有新拍
  assert_eq!(summary.frames, 3);
  assert_eq!(render.rendered, 3);
  assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn model_not_ready_fails_start_and_returns_to_idle() {
  let log: EventLog = Arc::new(Mutex::new(Vec::new()));
  let gateway = InferenceGateway::<NullModel>::unloaded();
  let mut session = DetectSession::new(SessionConfig::default());

  let mut source = FakeSource::endless(SourceKind::Webcam, "cam", log.clone());
  let mut render = EventRender::new("cam", log.clone());

  let result = session.run(&mut source, &gateway, &pipeline(), &mut render);
  assert!(matches!(result, Err(SessionError::ModelNotReady)));
  assert_eq!(session.state(), SessionState::Idle);
  assert_eq!(render.rendered, 0);

  // 启动失败不破坏状态机：同一控制器可再次启动
  let gateway = InferenceGateway::load(NullModel).unwrap();
  let mut source = FakeSource::limited(SourceKind::Webcam, "cam", log, 1);
  let summary = session
    .run(&mut source, &gateway, &pipeline(), &mut render)
    .unwrap();
  assert_eq!(summary.frames, 1);
  assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn exhausted_single_shot_source_ends_session_cleanly() {
  let log: EventLog = Arc::new(Mutex::new(Vec::new()));
  let gateway = InferenceGateway::load(NullModel).unwrap();
  let mut session = DetectSession::new(SessionConfig::default());

  let mut source = FakeSource::limited(SourceKind::ImageFile, "img", log.clone(), 1);
  let mut render = EventRender::new("img", log.clone());

  let summary = session
    .run(&mut source, &gateway, &pipeline(), &mut render)
    .unwrap();

  assert_eq!(summary.frames, 1);
  assert_eq!(session.state(), SessionState::Idle);
  let guard = log.lock().unwrap();
  let events: Vec<&str> = guard.iter().map(String::as_str).collect();
  assert_eq!(events, ["img:tick", "img:render", "img:finish"]);
}

#[test]
fn switching_sources_tears_down_old_session_first() {
  let log: EventLog = Arc::new(Mutex::new(Vec::new()));
  let gateway = Arc::new(InferenceGateway::load(NullModel).unwrap());
  let mut manager = SessionManager::new();

  // 图片会话先启动并自然耗尽（空闲但仍被持有）
  let file_source = Box::new(FakeSource::limited(
    SourceKind::ImageFile,
    "a",
    log.clone(),
    1,
  ));
  manager.start(
    SessionConfig::default(),
    file_source,
    gateway.clone(),
    pipeline(),
    Box::new(EventRender::new("a", log.clone())),
  );
  assert_eq!(manager.active_kind(), Some(SourceKind::ImageFile));

  thread::sleep(Duration::from_millis(50));

  // 切到摄像头：旧会话先被拆除，才有新会话的第一拍
  let cam_source = Box::new(FakeSource::endless(SourceKind::Webcam, "b", log.clone()));
  manager.start(
    SessionConfig::default(),
    cam_source,
    gateway.clone(),
    pipeline(),
    Box::new(EventRender::new("b", log.clone())),
  );
  assert_eq!(manager.active_kind(), Some(SourceKind::Webcam));

  thread::sleep(Duration::from_millis(50));
  let result = manager.stop().expect("active session");
  result.expect("webcam session exits cleanly");
  assert_eq!(manager.active_kind(), None);

  let events = log.lock().unwrap().clone();
  let first_b_tick = events
    .iter()
    .position(|e| e == "b:tick")
    .expect("webcam session ticked");

  // 旧会话的收尾在新会话第一拍之前；其后再无旧会话事件
  let a_finish = events
    .iter()
    .position(|e| e == "a:finish")
    .expect("file session finished");
  assert!(a_finish < first_b_tick);
  assert!(
    events[first_b_tick..]
      .iter()
      .all(|e| !e.starts_with("a:"))
  );

  // 摄像头会话也正常收尾
  assert_eq!(events.last().map(String::as_str), Some("b:finish"));
}
