use super::*;
use crate::config::{DetectorKind, LensFacing, TurbocamConfig};
use crate::detector::{
    BarcodeHit, BarcodeScanner, BoundingBox, DetectionEngine, RecognizedText, Symbology,
    TextBlock, TextRecognizer,
};
use crate::error::{CameraError, DetectorError, ErrorKind, SessionError, TurbocamError};
use crate::events::{ResultSink, ScanEvent};
use crate::frame::Frame;
use crate::permission::StaticPermission;
use crate::source::MockFrameSource;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ScanEvent>>,
}

impl RecordingSink {
    fn barcodes(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ScanEvent::BarcodeDetected { payload } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    fn texts(&self) -> Vec<(String, Vec<TextBlock>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ScanEvent::TextDetected { text, blocks } => Some((text.clone(), blocks.clone())),
                _ => None,
            })
            .collect()
    }

    fn errors(&self) -> Vec<ErrorKind> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ScanEvent::Error { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    fn states(&self) -> Vec<SessionState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ScanEvent::StateChanged { next, .. } => Some(*next),
                _ => None,
            })
            .collect()
    }
}

impl ResultSink for RecordingSink {
    fn on_barcode_detected(&self, payload: &str) {
        self.events.lock().push(ScanEvent::BarcodeDetected {
            payload: payload.to_string(),
        });
    }

    fn on_text_detected(&self, text: &str, blocks: &[TextBlock]) {
        self.events.lock().push(ScanEvent::TextDetected {
            text: text.to_string(),
            blocks: blocks.to_vec(),
        });
    }

    fn on_error(&self, kind: ErrorKind, detail: &str) {
        self.events.lock().push(ScanEvent::Error {
            kind,
            detail: detail.to_string(),
        });
    }

    fn on_state_changed(&self, previous: SessionState, next: SessionState) {
        self.events
            .lock()
            .push(ScanEvent::StateChanged { previous, next });
    }
}

/// Always finds the same codes
struct FixedScanner {
    hits: Vec<BarcodeHit>,
    calls: Arc<AtomicUsize>,
}

impl FixedScanner {
    fn payload(payload: &str) -> Self {
        Self {
            hits: vec![BarcodeHit::decoded(Symbology::QrCode, payload)],
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl BarcodeScanner for FixedScanner {
    fn scan(&self, _frame: &Frame) -> Result<Vec<BarcodeHit>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.clone())
    }
}

/// Blocks inside `scan` until released by the test
struct StalledScanner {
    entered: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
    release: Mutex<std::sync::mpsc::Receiver<()>>,
}

impl BarcodeScanner for StalledScanner {
    fn scan(&self, _frame: &Frame) -> Result<Vec<BarcodeHit>, DetectorError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let _ = self.release.lock().recv_timeout(WAIT);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(vec![BarcodeHit::decoded(Symbology::QrCode, "late")])
    }
}

/// Fails while `failing` is set, otherwise finds nothing
struct FlakyScanner {
    failing: Arc<AtomicBool>,
}

impl BarcodeScanner for FlakyScanner {
    fn scan(&self, _frame: &Frame) -> Result<Vec<BarcodeHit>, DetectorError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DetectorError::failure("inference runtime error"))
        } else {
            Ok(Vec::new())
        }
    }
}

/// Tracks how many scans overlap
struct OverlapScanner {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl BarcodeScanner for OverlapScanner {
    fn scan(&self, _frame: &Frame) -> Result<Vec<BarcodeHit>, DetectorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(2));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

struct ScriptedRecognizer {
    output: RecognizedText,
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(&self, _frame: &Frame) -> Result<RecognizedText, DetectorError> {
        Ok(self.output.clone())
    }
}

fn test_config(one_shot: Option<bool>) -> TurbocamConfig {
    let mut config = TurbocamConfig::default();
    config.detector.one_shot_on_match = one_shot;
    config.session.teardown_timeout_ms = 200;
    config
}

struct Harness {
    controller: SessionController,
    source: MockFrameSource,
    sink: Arc<RecordingSink>,
}

fn harness(
    config: TurbocamConfig,
    engine: DetectionEngine,
    oracle: Arc<StaticPermission>,
) -> Harness {
    let source = MockFrameSource::new();
    let sink = Arc::new(RecordingSink::default());
    let controller =
        SessionController::new(config, Arc::new(source.clone()), engine, oracle, sink.clone())
            .unwrap();

    Harness {
        controller,
        source,
        sink,
    }
}

fn barcode_harness(one_shot: Option<bool>, scanner: impl BarcodeScanner) -> Harness {
    harness(
        test_config(one_shot),
        DetectionEngine::barcode(scanner),
        Arc::new(StaticPermission::granted()),
    )
}

async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn start_running(harness: &Harness) {
    assert_eq!(harness.controller.start().await.unwrap(), StartOutcome::Started);
    harness
        .controller
        .wait_for_state(SessionState::Running, WAIT)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_start_binds_camera_and_stop_releases_it() {
    let h = barcode_harness(Some(false), FixedScanner::payload("x"));

    start_running(&h).await;
    assert_eq!(h.source.open_count(), 1);
    assert_eq!(
        h.source.last_request(),
        Some((LensFacing::Back, (1280, 720)))
    );

    assert_eq!(h.controller.stop().await.unwrap(), StopOutcome::Stopped);
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.source.close_count(), 1);
    assert!(!h.source.is_open());
    assert_eq!(
        h.sink.states(),
        vec![
            SessionState::Starting,
            SessionState::Running,
            SessionState::Stopping,
            SessionState::Idle
        ]
    );
}

#[tokio::test]
async fn test_stop_when_idle_is_idempotent() {
    let h = barcode_harness(None, FixedScanner::payload("x"));

    assert_eq!(h.controller.stop().await.unwrap(), StopOutcome::AlreadyIdle);
    start_running(&h).await;
    assert_eq!(h.controller.stop().await.unwrap(), StopOutcome::Stopped);
    assert_eq!(h.controller.stop().await.unwrap(), StopOutcome::AlreadyIdle);
    assert_eq!(h.source.close_count(), 1);
}

#[tokio::test]
async fn test_double_start_opens_hardware_once() {
    let h = barcode_harness(Some(false), FixedScanner::payload("x"));
    h.source.set_open_delay(Duration::from_millis(30));

    let (first, second) = tokio::join!(h.controller.start(), h.controller.start());
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|outcome| *outcome == StartOutcome::AlreadyActive);
    assert_eq!(
        outcomes,
        vec![StartOutcome::Started, StartOutcome::AlreadyActive]
    );

    h.controller
        .wait_for_state(SessionState::Running, WAIT)
        .await
        .unwrap();
    assert_eq!(
        h.controller.start().await.unwrap(),
        StartOutcome::AlreadyActive
    );
    assert_eq!(h.source.open_attempts(), 1);

    h.controller.stop().await.unwrap();
    assert_eq!(h.source.close_count(), 1);
}

#[tokio::test]
async fn test_one_shot_reports_first_decoded_payload_once_and_stops() {
    let scanner = FixedScanner {
        hits: vec![
            BarcodeHit::undecoded(Symbology::DataMatrix),
            BarcodeHit::decoded(Symbology::QrCode, "https://example.com/a"),
            BarcodeHit::decoded(Symbology::Ean13, "4006381333931"),
        ],
        calls: Arc::new(AtomicUsize::new(0)),
    };
    let h = barcode_harness(None, scanner);
    start_running(&h).await;

    for _ in 0..20 {
        if !h.source.push() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    h.controller
        .wait_for_state(SessionState::Idle, WAIT)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.sink.barcodes(), vec!["https://example.com/a".to_string()]);
    assert_eq!(h.source.close_count(), h.source.open_count());
    assert_eq!(h.controller.stats().detections_forwarded, 1);
    assert_eq!(
        h.sink.states(),
        vec![
            SessionState::Starting,
            SessionState::Running,
            SessionState::Stopping,
            SessionState::Idle
        ]
    );
}

#[tokio::test]
async fn test_continuous_mode_keeps_scanning() {
    let scanner = FixedScanner::payload("repeat");
    let calls = Arc::clone(&scanner.calls);
    let h = barcode_harness(Some(false), scanner);
    start_running(&h).await;

    for expected in 1..=3 {
        assert!(h.source.push());
        let sink = Arc::clone(&h.sink);
        eventually("barcode event", move || sink.barcodes().len() >= expected).await;
    }

    assert_eq!(h.controller.state(), SessionState::Running);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_text_blocks_are_forwarded_unchanged() {
    let blocks = vec![
        TextBlock::new("TOTAL", BoundingBox::new(12, 40, 96, 58)),
        TextBlock::new("12.50", BoundingBox::new(410, 40, 480, 58)),
        TextBlock::new("THANK YOU", BoundingBox::new(150, 600, 330, 624)),
    ];
    let output = RecognizedText {
        text: "TOTAL 12.50\nTHANK YOU".to_string(),
        blocks: blocks.clone(),
    };

    let mut config = test_config(None);
    config.detector.kind = DetectorKind::Text;
    let h = harness(
        config,
        DetectionEngine::text(ScriptedRecognizer { output }),
        Arc::new(StaticPermission::granted()),
    );
    start_running(&h).await;

    assert!(h.source.push());
    let sink = Arc::clone(&h.sink);
    eventually("text event", move || !sink.texts().is_empty()).await;

    let texts = h.sink.texts();
    assert_eq!(texts[0].0, "TOTAL 12.50\nTHANK YOU");
    assert_eq!(texts[0].1.len(), 3);
    assert_eq!(texts[0].1, blocks);

    // Text recognition is continuous unless configured otherwise.
    assert_eq!(h.controller.state(), SessionState::Running);
    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_permission_denied_faults_without_opening() {
    let oracle = Arc::new(StaticPermission::denied());
    let h = harness(
        test_config(None),
        DetectionEngine::barcode(FixedScanner::payload("x")),
        Arc::clone(&oracle),
    );

    assert_eq!(h.controller.start().await.unwrap(), StartOutcome::Started);
    h.controller
        .wait_for_state(SessionState::Faulted, WAIT)
        .await
        .unwrap();

    assert_eq!(h.sink.errors(), vec![ErrorKind::PermissionDenied]);
    assert_eq!(
        h.sink.states(),
        vec![SessionState::AwaitingPermission, SessionState::Faulted]
    );
    assert_eq!(h.source.open_attempts(), 0);
    assert_eq!(oracle.request_count(), 1);
}

#[tokio::test]
async fn test_permission_granted_on_request_starts_session() {
    let oracle =
        Arc::new(StaticPermission::grant_on_request().with_response_delay(Duration::from_millis(20)));
    let h = harness(
        test_config(None),
        DetectionEngine::barcode(FixedScanner::payload("x")),
        Arc::clone(&oracle),
    );

    assert!(!h.controller.check_permission());
    assert_eq!(h.controller.start().await.unwrap(), StartOutcome::Started);
    assert_eq!(h.controller.state(), SessionState::AwaitingPermission);
    assert_eq!(
        h.controller.start().await.unwrap(),
        StartOutcome::AlreadyActive
    );

    h.controller
        .wait_for_state(SessionState::Running, WAIT)
        .await
        .unwrap();
    assert!(h.controller.check_permission());
    assert_eq!(oracle.request_count(), 1);
    assert_eq!(h.source.open_count(), 1);

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_while_awaiting_permission_discards_request() {
    let oracle = Arc::new(
        StaticPermission::grant_on_request().with_response_delay(Duration::from_millis(50)),
    );
    let h = harness(
        test_config(None),
        DetectionEngine::barcode(FixedScanner::payload("x")),
        oracle,
    );

    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::AwaitingPermission);
    assert_eq!(h.controller.stop().await.unwrap(), StopOutcome::Stopped);
    assert_eq!(h.controller.state(), SessionState::Idle);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.source.open_attempts(), 0);
    assert!(h.sink.errors().is_empty());
}

#[tokio::test]
async fn test_stop_while_starting_releases_pending_handle() {
    let h = barcode_harness(None, FixedScanner::payload("x"));
    h.source.set_open_delay(Duration::from_millis(50));

    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Starting);
    assert_eq!(h.controller.stop().await.unwrap(), StopOutcome::Stopped);

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.source.open_count(), 1);
    assert_eq!(h.source.close_count(), 1);
    assert!(!h.sink.states().contains(&SessionState::Running));
}

#[tokio::test]
async fn test_slow_open_is_closed_in_background_after_stop() {
    let mut config = test_config(None);
    config.session.teardown_timeout_ms = 30;
    let h = harness(
        config,
        DetectionEngine::barcode(FixedScanner::payload("x")),
        Arc::new(StaticPermission::granted()),
    );
    h.source.set_open_delay(Duration::from_millis(200));

    h.controller.start().await.unwrap();
    let started = Instant::now();
    h.controller.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(h.controller.state(), SessionState::Idle);

    let source = h.source.clone();
    eventually("background close", move || source.close_count() == 1).await;
    assert_eq!(h.source.open_count(), 1);
    assert!(!h.source.is_open());
}

#[tokio::test]
async fn test_bind_failure_faults_and_restart_recovers() {
    let h = barcode_harness(None, FixedScanner::payload("x"));
    h.source
        .fail_next_open(CameraError::unavailable("camera in use by another app"));

    h.controller.start().await.unwrap();
    h.controller
        .wait_for_state(SessionState::Faulted, WAIT)
        .await
        .unwrap();
    assert_eq!(h.sink.errors(), vec![ErrorKind::HardwareUnavailable]);
    assert_eq!(h.source.open_count(), 0);

    start_running(&h).await;
    let states = h.sink.states();
    assert_eq!(
        &states[states.len() - 4..],
        &[
            SessionState::Faulted,
            SessionState::Idle,
            SessionState::Starting,
            SessionState::Running
        ]
    );

    h.controller.stop().await.unwrap();
    assert_eq!(h.source.close_count(), h.source.open_count());
}

#[tokio::test]
async fn test_hardware_disconnect_is_surfaced_once() {
    let h = barcode_harness(Some(false), FixedScanner::payload("x"));
    start_running(&h).await;

    h.source.disconnect("device removed");
    h.controller
        .wait_for_state(SessionState::Faulted, WAIT)
        .await
        .unwrap();
    h.source.disconnect("device removed");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.sink.errors(), vec![ErrorKind::HardwareUnavailable]);
    assert_eq!(h.source.close_count(), h.source.open_count());
    assert_eq!(h.controller.stop().await.unwrap(), StopOutcome::AlreadyIdle);
}

#[tokio::test]
async fn test_stop_discards_in_flight_detection() {
    for delay_ms in [0u64, 5, 25, 80, 300] {
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let entered = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let scanner = StalledScanner {
            entered: Arc::clone(&entered),
            finished: Arc::clone(&finished),
            release: Mutex::new(release_rx),
        };
        let h = barcode_harness(Some(false), scanner);
        start_running(&h).await;

        assert!(h.source.push());
        eventually("scan to begin", || entered.load(Ordering::SeqCst) == 1).await;

        // The detector finishes `delay_ms` after stop was requested.
        let (stopped, _) = tokio::join!(h.controller.stop(), async {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = release_tx.send(());
        });
        assert_eq!(stopped.unwrap(), StopOutcome::Stopped);

        eventually("scan to finish", || finished.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A frame returned within the teardown timeout goes back to the device;
        // one held past it was invalidated and must not touch the closed device.
        let expected_released = if delay_ms < 200 { 1 } else { 0 };
        assert_eq!(
            h.source.frames_released(),
            expected_released,
            "release count with {}ms detector",
            delay_ms
        );

        assert!(
            h.sink.barcodes().is_empty(),
            "result delivered after stop with {}ms detector",
            delay_ms
        );
        assert_eq!(h.controller.stats().detections_forwarded, 0);
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.source.close_count(), h.source.open_count());
    }
}

#[tokio::test]
async fn test_teardown_with_stalled_detector_is_bounded() {
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let entered = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let scanner = StalledScanner {
        entered: Arc::clone(&entered),
        finished: Arc::clone(&finished),
        release: Mutex::new(release_rx),
    };

    let mut config = test_config(Some(false));
    config.session.teardown_timeout_ms = 50;
    let h = harness(
        config,
        DetectionEngine::barcode(scanner),
        Arc::new(StaticPermission::granted()),
    );
    start_running(&h).await;

    assert!(h.source.push());
    eventually("scanner to stall", || entered.load(Ordering::SeqCst) == 1).await;

    let started = Instant::now();
    assert_eq!(h.controller.stop().await.unwrap(), StopOutcome::Stopped);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(h.source.close_count(), h.source.open_count());
    assert_eq!(h.source.frames_released(), 0);

    release_tx.send(()).unwrap();
    eventually("stalled scan to finish", || finished.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The frame outlived the teardown, so its buffer is not handed back to closed hardware.
    assert_eq!(h.source.frames_released(), 0);
    assert_eq!(h.source.close_count(), 1);
    assert!(h.sink.barcodes().is_empty());
}

#[tokio::test]
async fn test_detector_failure_reported_once_per_streak() {
    let failing = Arc::new(AtomicBool::new(true));
    let h = barcode_harness(
        Some(false),
        FlakyScanner {
            failing: Arc::clone(&failing),
        },
    );
    start_running(&h).await;

    let push_and_wait = |target: fn(&SessionStatsSnapshot) -> u64, expected: u64| {
        let controller = &h.controller;
        let source = &h.source;
        async move {
            assert!(source.push());
            eventually("detection", || target(&controller.stats()) >= expected).await;
        }
    };

    for n in 1..=3 {
        push_and_wait(|s| s.detector_failures, n).await;
    }
    assert_eq!(h.sink.errors(), vec![ErrorKind::DetectorFailure]);
    assert_eq!(h.controller.state(), SessionState::Running);

    failing.store(false, Ordering::SeqCst);
    push_and_wait(|s| s.detections_empty, 1).await;

    failing.store(true, Ordering::SeqCst);
    push_and_wait(|s| s.detector_failures, 4).await;
    assert_eq!(
        h.sink.errors(),
        vec![ErrorKind::DetectorFailure, ErrorKind::DetectorFailure]
    );

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_at_most_one_frame_under_analysis() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let h = barcode_harness(
        Some(false),
        OverlapScanner {
            in_flight,
            max_in_flight: Arc::clone(&max_in_flight),
        },
    );
    start_running(&h).await;

    let producer = {
        let source = h.source.clone();
        std::thread::spawn(move || {
            for _ in 0..200 {
                source.push();
                std::thread::sleep(Duration::from_micros(200));
            }
        })
    };
    while !producer.is_finished() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    producer.join().unwrap();

    h.controller.stop().await.unwrap();

    let stats = h.controller.stats();
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(stats.admission.frames_offered, 200);
    assert_eq!(
        stats.admission.frames_admitted + stats.admission.frames_dropped(),
        200
    );
    assert!(stats.admission.frames_dropped_busy > 0);
    assert_eq!(h.source.frames_released(), h.source.frames_pushed());
}

#[tokio::test]
async fn test_frames_after_stop_are_not_delivered() {
    let h = barcode_harness(Some(false), FixedScanner::payload("x"));
    start_running(&h).await;
    h.controller.stop().await.unwrap();

    assert!(!h.source.push());
    assert_eq!(h.source.frames_released(), 1);
    assert_eq!(h.controller.stats().admission.frames_offered, 0);
}

#[tokio::test]
async fn test_mismatched_engine_is_rejected() {
    let mut config = test_config(None);
    config.detector.kind = DetectorKind::Text;

    let result = SessionController::new(
        config,
        Arc::new(MockFrameSource::new()),
        DetectionEngine::barcode(FixedScanner::payload("x")),
        Arc::new(StaticPermission::granted()),
        Arc::new(RecordingSink::default()),
    );
    assert!(matches!(result, Err(TurbocamError::Component { .. })));
}

#[tokio::test]
async fn test_builder_requires_source_and_sink() {
    let missing_source = SessionController::builder()
        .sink(Arc::new(RecordingSink::default()))
        .build();
    assert!(matches!(missing_source, Err(TurbocamError::System { .. })));

    let missing_sink = SessionController::builder()
        .source(Arc::new(MockFrameSource::new()))
        .build();
    assert!(matches!(missing_sink, Err(TurbocamError::System { .. })));
}

#[tokio::test]
async fn test_builder_with_injected_engine() {
    let source = MockFrameSource::new();
    let controller = SessionController::builder()
        .config(test_config(Some(false)))
        .source(Arc::new(source.clone()))
        .engine(DetectionEngine::barcode(FixedScanner::payload("x")))
        .sink(Arc::new(RecordingSink::default()))
        .build()
        .unwrap();

    controller.start().await.unwrap();
    controller
        .wait_for_state(SessionState::Running, WAIT)
        .await
        .unwrap();
    controller.stop().await.unwrap();
    assert_eq!(source.close_count(), 1);
}

#[tokio::test]
async fn test_wait_for_state_times_out() {
    let h = barcode_harness(None, FixedScanner::payload("x"));
    let result = h
        .controller
        .wait_for_state(SessionState::Running, Duration::from_millis(20))
        .await;
    assert!(matches!(
        result,
        Err(TurbocamError::Session(SessionError::StateTimeout { .. }))
    ));
}

#[tokio::test]
async fn test_shutdown_releases_live_session() {
    let h = barcode_harness(Some(false), FixedScanner::payload("x"));
    start_running(&h).await;

    h.controller.shutdown().await;
    assert_eq!(h.source.close_count(), 1);
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(matches!(
        h.controller.start().await,
        Err(TurbocamError::Session(SessionError::ControllerClosed))
    ));
}

#[tokio::test]
async fn test_dropping_controller_releases_hardware() {
    let h = barcode_harness(Some(false), FixedScanner::payload("x"));
    start_running(&h).await;

    let source = h.source.clone();
    drop(h);
    eventually("hardware release", move || source.close_count() == 1).await;
}

#[tokio::test]
async fn test_is_supported_follows_frame_source() {
    let h = barcode_harness(None, FixedScanner::payload("x"));
    assert!(h.controller.is_supported());

    h.source.set_supported(false);
    assert!(!h.controller.is_supported());

    assert_eq!(h.controller.start().await.unwrap(), StartOutcome::Started);
    h.controller
        .wait_for_state(SessionState::Faulted, WAIT)
        .await
        .unwrap();
    assert_eq!(h.source.open_count(), 0);
    assert_eq!(h.sink.errors(), vec![ErrorKind::HardwareUnavailable]);

    h.source.set_supported(true);
    assert!(h.controller.is_supported());
    start_running(&h).await;
    h.controller.stop().await.unwrap();
    assert_eq!(h.source.close_count(), 1);
}
