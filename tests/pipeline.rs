//! 采样流水线集成测试
//!
//! 计时器间隔设为 1 小时, tick 由测试手动注入; 假模型在推理时阻塞在闸门通道上,
//! 由测试决定何时放行以及返回什么结果。

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use image::DynamicImage;
use tempfile::TempDir;

use yolo_overlay::error::{InferenceError, LoadError, PipelineError};
use yolo_overlay::input::{FrameSource, PlaybackState, SyntheticSource};
use yolo_overlay::models::{InferenceModel, LoadOptions};
use yolo_overlay::pipeline::TickControl;
use yolo_overlay::{BBox, Detection, Diagnostic, OverlayState, Pipeline, PipelineConfig};

const WAIT: Duration = Duration::from_secs(10);

type GateResult = Result<Vec<Detection>, String>;

struct GatedModel {
    fail_load: bool,
    loads: Arc<AtomicUsize>,
    started: Sender<()>,
    gate: Receiver<GateResult>,
}

impl InferenceModel for GatedModel {
    fn load(&mut self, _options: &LoadOptions) -> Result<(), LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(LoadError::AssetMissing(PathBuf::from("missing.onnx")));
        }
        Ok(())
    }

    fn infer(&mut self, _image: &DynamicImage) -> Result<Vec<Detection>, InferenceError> {
        let _ = self.started.send(());
        match self.gate.recv_timeout(WAIT) {
            Ok(Ok(detections)) => Ok(detections),
            Ok(Err(reason)) => Err(InferenceError::new(reason)),
            Err(_) => Err(InferenceError::new("gate closed")),
        }
    }

    fn name(&self) -> &str {
        "gated"
    }
}

struct Harness {
    source: Arc<SyntheticSource>,
    pipeline: Arc<Pipeline>,
    loads: Arc<AtomicUsize>,
    started: Receiver<()>,
    gate: Sender<GateResult>,
    diagnostics: Receiver<Diagnostic>,
    _dir: TempDir,
}

impl Harness {
    fn new(fail_load: bool, interval_ms: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (started_tx, started) = crossbeam_channel::unbounded();
        let (gate, gate_rx) = crossbeam_channel::unbounded();
        let loads = Arc::new(AtomicUsize::new(0));

        let model = GatedModel {
            fail_load,
            loads: loads.clone(),
            started: started_tx,
            gate: gate_rx,
        };
        let config = PipelineConfig {
            interval_ms,
            frame_dir: dir.path().join("frames"),
            model_path: dir.path().join("model.onnx"),
            retention: 8,
            ..PipelineConfig::default()
        };

        let source = Arc::new(SyntheticSource::new(32, 24, 9));
        let pipeline = Arc::new(Pipeline::from_config(
            source.clone() as Arc<dyn FrameSource>,
            Box::new(model),
            config,
        ));
        let diagnostics = pipeline.diagnostics().unwrap();
        assert!(pipeline.diagnostics().is_none());

        Self {
            source,
            pipeline,
            loads,
            started,
            gate,
            diagnostics,
            _dir: dir,
        }
    }

    fn manual() -> Self {
        Self::new(false, 3_600_000)
    }

    /// 等待满足条件的诊断事件, 跳过其他事件
    fn wait_for(&self, pred: impl Fn(&Diagnostic) -> bool) -> Diagnostic {
        loop {
            let diagnostic = self
                .diagnostics
                .recv_timeout(WAIT)
                .expect("timed out waiting for diagnostic");
            if pred(&diagnostic) {
                return diagnostic;
            }
        }
    }

    fn wait_cycle(&self) -> Diagnostic {
        self.wait_for(|d| matches!(d, Diagnostic::CycleCompleted { .. }))
    }

    /// 注入 tick 并等待推理开始
    fn dispatch(&self) {
        assert_eq!(self.pipeline.inject_tick(), Some(TickControl::Continue));
        self.started.recv_timeout(WAIT).expect("inference never started");
    }

    fn release(&self, detections: Vec<Detection>) {
        self.gate.send(Ok(detections)).unwrap();
    }
}

fn person() -> Detection {
    Detection::new("person", 0.9, BBox::new(10.0, 10.0, 50.0, 80.0))
}

#[test]
fn single_person_reaches_overlay() {
    let h = Harness::manual();
    let seen: Arc<Mutex<Vec<OverlayState>>> = Arc::default();
    let sink = seen.clone();
    h.pipeline
        .on_overlay_updated(move |state| sink.lock().unwrap().push(state.clone()));

    h.source.play();
    h.pipeline.start().unwrap();
    assert!(h.pipeline.is_running());

    h.dispatch();
    h.release(vec![person()]);
    match h.wait_cycle() {
        Diagnostic::CycleCompleted {
            detections, kept, ..
        } => assert_eq!((detections, kept), (1, 1)),
        other => panic!("unexpected {:?}", other),
    }

    let overlay = h.pipeline.overlay();
    assert_eq!(overlay.len(), 1);
    assert_eq!(overlay.rects[0].label, "person");
    assert_eq!(overlay.rects[0].confidence, 0.9);
    assert_eq!(overlay.rects[0].bbox, BBox::new(10.0, 10.0, 50.0, 80.0));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], overlay);

    let cached = h.pipeline.cache().list();
    assert_eq!(cached.len(), 1);
    assert_eq!(overlay.frame_id, Some(cached[0].id()));
    assert!(cached[0].path().exists());
}

#[test]
fn concurrent_ticks_are_skipped_while_cycle_in_flight() {
    let h = Harness::manual();
    h.source.play();
    h.pipeline.start().unwrap();

    h.dispatch();
    for _ in 0..4 {
        assert_eq!(h.pipeline.inject_tick(), Some(TickControl::Continue));
    }
    assert_eq!(h.pipeline.stats().skipped_ticks, 4);
    // 并发 tick 期间手动周期同样被拒绝
    assert!(h.pipeline.run_cycle_now().is_none());

    h.release(vec![person()]);
    h.wait_cycle();
    assert!(h.started.try_recv().is_err());
    assert_eq!(h.pipeline.detector().stats().inferences, 1);
    assert_eq!(h.pipeline.cache().len(), 1);

    // 周期结束后可以派发下一次
    h.dispatch();
    h.release(vec![]);
    h.wait_cycle();
    assert!(h.pipeline.overlay().is_empty());
    assert_eq!(h.pipeline.stats().cycles, 2);
}

#[test]
fn stop_discards_in_flight_result() {
    let h = Harness::manual();
    h.source.play();
    h.pipeline.start().unwrap();

    h.dispatch();
    h.release(vec![person()]);
    h.wait_cycle();
    let before = h.pipeline.overlay();

    h.dispatch();
    h.pipeline.stop();
    assert!(!h.pipeline.is_running());
    h.release(vec![Detection::new("car", 0.8, BBox::new(1.0, 1.0, 5.0, 5.0))]);

    match h.wait_for(|d| matches!(d, Diagnostic::StaleResultDiscarded { .. })) {
        Diagnostic::StaleResultDiscarded { frame_id } => assert!(frame_id.is_some()),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.pipeline.overlay(), before);
    assert_eq!(h.pipeline.stats().stale_discarded, 1);
    assert_eq!(h.pipeline.inject_tick(), None);
}

#[test]
fn pause_halts_session_on_next_tick() {
    let h = Harness::manual();
    h.source.play();
    h.pipeline.start().unwrap();
    let generation = h.pipeline.generation().unwrap();

    h.source.pause();
    assert_eq!(h.pipeline.inject_tick(), Some(TickControl::Halt));
    assert_eq!(
        h.wait_for(|d| matches!(d, Diagnostic::Halted(_))),
        Diagnostic::Halted(PlaybackState::Paused)
    );
    assert!(!h.pipeline.is_running());
    assert!(h.started.try_recv().is_err());

    // 重新开始得到新的会话
    h.source.play();
    h.pipeline.start().unwrap();
    assert!(h.pipeline.is_running());
    assert!(h.pipeline.generation().unwrap() > generation);
    assert_eq!(h.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn start_is_noop_while_running() {
    let h = Harness::manual();
    h.source.play();
    h.pipeline.start().unwrap();
    let generation = h.pipeline.generation();
    h.pipeline.start().unwrap();
    assert_eq!(h.pipeline.generation(), generation);
    assert_eq!(h.pipeline.stats().sessions, 1);
}

#[test]
fn bind_playback_follows_source_state() {
    let h = Harness::manual();
    h.pipeline.bind_playback().unwrap();
    assert!(!h.pipeline.is_running());

    h.source.play();
    assert!(h.pipeline.is_running());

    h.source.pause();
    assert!(!h.pipeline.is_running());

    h.source.play();
    assert!(h.pipeline.is_running());
    assert_eq!(h.pipeline.stats().sessions, 2);

    h.source.set_playback_state(PlaybackState::Stopped);
    assert!(!h.pipeline.is_running());

    h.pipeline.unbind_playback();
    h.source.play();
    assert!(!h.pipeline.is_running());
}

#[test]
fn detector_init_failure_blocks_start() {
    let h = Harness::new(true, 3_600_000);
    h.source.play();

    let err = h.pipeline.start().unwrap_err();
    assert!(matches!(err, PipelineError::DetectorInit(LoadError::AssetMissing(_))));
    assert!(!h.pipeline.is_running());
    assert_eq!(h.pipeline.inject_tick(), None);
    assert!(h.pipeline.cache().is_empty());

    // 通过播放绑定启动时以诊断事件报告
    h.source.pause();
    h.pipeline.bind_playback().unwrap();
    h.source.play();
    assert!(matches!(
        h.wait_for(|d| matches!(d, Diagnostic::StartFailed(_))),
        Diagnostic::StartFailed(_)
    ));
    assert!(h.loads.load(Ordering::SeqCst) >= 2);
}

#[test]
fn bind_while_playing_returns_detector_init_failure() {
    let h = Harness::new(true, 3_600_000);
    h.source.play();

    let err = h.pipeline.bind_playback().unwrap_err();
    assert!(matches!(err, PipelineError::DetectorInit(LoadError::AssetMissing(_))));
    assert!(!h.pipeline.is_running());
    // 错误直接返回给调用方, 不再走诊断通道
    assert!(!h
        .diagnostics
        .try_iter()
        .any(|d| matches!(d, Diagnostic::StartFailed(_))));
    assert_eq!(h.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn restart_does_not_wait_for_discarded_inference() {
    let h = Harness::manual();
    h.source.play();
    h.pipeline.start().unwrap();

    h.dispatch();
    h.pipeline.stop();

    // 旧周期仍阻塞在推理中, 重新启动不应等它
    let (done_tx, done) = crossbeam_channel::bounded(1);
    let pipeline = h.pipeline.clone();
    std::thread::spawn(move || {
        let _ = done_tx.send(pipeline.start().is_ok());
    });
    assert_eq!(done.recv_timeout(Duration::from_secs(2)), Ok(true));
    assert!(h.pipeline.is_running());
    assert_eq!(h.pipeline.stats().sessions, 2);

    h.release(vec![person()]);
    h.wait_for(|d| matches!(d, Diagnostic::StaleResultDiscarded { .. }));
    assert!(h.pipeline.overlay().is_empty());
    assert_eq!(h.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn capture_failure_does_not_stop_scheduler() {
    let h = Harness::manual();
    h.source.play();
    h.pipeline.start().unwrap();

    h.source.set_available(false);
    assert_eq!(h.pipeline.inject_tick(), Some(TickControl::Continue));
    h.wait_for(|d| matches!(d, Diagnostic::CaptureFailed(_)));
    assert!(h.pipeline.is_running());
    assert_eq!(h.pipeline.stats().capture_failures, 1);

    h.source.set_available(true);
    h.dispatch();
    h.release(vec![person()]);
    h.wait_cycle();
    assert_eq!(h.pipeline.overlay().len(), 1);
}

#[test]
fn inference_failure_keeps_previous_overlay() {
    let h = Harness::manual();
    h.source.play();
    h.pipeline.start().unwrap();

    h.dispatch();
    h.release(vec![person()]);
    h.wait_cycle();

    h.dispatch();
    h.gate.send(Err("accelerator busy".into())).unwrap();
    match h.wait_for(|d| matches!(d, Diagnostic::DetectFailed { .. })) {
        Diagnostic::DetectFailed { reason, .. } => assert!(reason.contains("accelerator busy")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.pipeline.overlay().len(), 1);
    assert!(h.pipeline.is_running());
    assert_eq!(h.pipeline.stats().detect_failures, 1);
}

#[test]
fn malformed_detections_are_filtered() {
    let h = Harness::manual();
    h.source.play();
    h.pipeline.start().unwrap();

    h.dispatch();
    h.release(vec![
        person(),
        Detection::new("ghost", 0.7, BBox::new(0.0, 0.0, 0.0, 10.0)),
        Detection::new("", 0.7, BBox::new(0.0, 0.0, 4.0, 4.0)),
        Detection::new("dog", f32::NAN, BBox::new(0.0, 0.0, 4.0, 4.0)),
    ]);
    match h.wait_cycle() {
        Diagnostic::CycleCompleted {
            detections, kept, ..
        } => assert_eq!((detections, kept), (4, 1)),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.pipeline.overlay().rects[0].label, "person");
}

#[test]
fn run_cycle_now_executes_synchronously() {
    let h = Harness::manual();
    assert!(h.pipeline.run_cycle_now().is_none());

    h.source.play();
    h.pipeline.start().unwrap();
    h.release(vec![person()]);
    match h.pipeline.run_cycle_now() {
        Some(Diagnostic::CycleCompleted { kept, .. }) => assert_eq!(kept, 1),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.pipeline.overlay().len(), 1);
}

#[test]
fn timer_drives_cycles_while_playing() {
    let h = Harness::new(false, 20);
    for _ in 0..16 {
        h.release(vec![person()]);
    }
    h.source.play();
    h.pipeline.start().unwrap();

    h.wait_cycle();
    h.wait_cycle();
    h.pipeline.shutdown();
    assert!(!h.pipeline.is_running());

    let cycles = h.pipeline.stats().cycles;
    assert!(cycles >= 2);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.pipeline.stats().cycles, cycles);
    assert!(h.pipeline.cache().len() <= 8);
}

#[test]
fn slow_inference_sheds_timer_ticks() {
    let h = Harness::new(false, 100);
    h.source.play();
    h.pipeline.start().unwrap();

    h.started.recv_timeout(WAIT).expect("inference never started");
    // 推理未放行期间计时器继续触发, 全部被单飞门控放弃
    std::thread::sleep(Duration::from_millis(450));
    assert!(h.started.try_recv().is_err());
    let stats = h.pipeline.stats();
    assert!(stats.skipped_ticks >= 2, "{:?}", stats);
    assert_eq!(stats.cycles, 0);
    assert_eq!(h.pipeline.detector().stats().inferences, 0);

    h.release(vec![person()]);
    h.wait_cycle();
    h.pipeline.stop();
    assert_eq!(h.pipeline.stats().cycles, 1);
    assert_eq!(h.pipeline.overlay().len(), 1);
}
