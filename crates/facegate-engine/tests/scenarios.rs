//! End-to-end enrollment and verification through the engine thread, with a
//! scripted detector, a scripted embedding model and an in-memory camera.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use facegate_core::{
    CameraFacing, Detection, DetectorError, Embedder, EmbedderError, EmbeddingModel,
    EmbeddingStore, FaceBox, FaceDetector, TensorLayout,
};
use facegate_engine::{
    spawn_engine, CaptureError, CaptureSource, EngineHandle, EnrollOutcome, FaceObservationStream,
    FaceSelection, Pipeline, VerifyOutcome,
};
use facegate_hw::{Frame, FramePool};
use image::RgbImage;
use ndarray::Array4;

const DIM: usize = 128;
const SLOT: &str = "face_data.dat";

struct FakeDetector {
    faces: Vec<Detection>,
    started: Arc<AtomicBool>,
    gate: Option<mpsc::Receiver<()>>,
}

impl FaceDetector for FakeDetector {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        self.started.store(true, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        Ok(self.faces.clone())
    }
}

/// Returns queued vectors in order and counts inference calls.
#[derive(Clone, Default)]
struct FakeModel {
    outputs: Arc<Mutex<VecDeque<Vec<f32>>>>,
    calls: Arc<AtomicUsize>,
}

impl FakeModel {
    fn push(&self, v: Vec<f32>) {
        self.outputs.lock().unwrap().push_back(v);
    }
}

impl EmbeddingModel for FakeModel {
    fn input_size(&self) -> u32 {
        16
    }
    fn layout(&self) -> TensorLayout {
        TensorLayout::Nchw
    }
    fn output_dim(&self) -> usize {
        DIM
    }
    fn infer(&mut self, _input: &Array4<f32>) -> Result<Vec<f32>, EmbedderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EmbedderError::InferenceFailed("no scripted output".into()))
    }
}

struct MemoryCamera {
    pool: FramePool,
    captures: Arc<AtomicUsize>,
    started: Arc<AtomicBool>,
    gate: Option<mpsc::Receiver<()>>,
}

impl CaptureSource for MemoryCamera {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        Ok(self.pool.wrap(RgbImage::new(64, 48), 0)?)
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    data_dir: std::path::PathBuf,
    pool: FramePool,
    stream: FaceObservationStream<FakeDetector>,
    engine: EngineHandle,
    model: FakeModel,
    captures: Arc<AtomicUsize>,
    capture_started: Arc<AtomicBool>,
}

struct Options {
    faces: Vec<Detection>,
    max_age: Duration,
    capture_gate: Option<mpsc::Receiver<()>>,
    detect_gate: Option<mpsc::Receiver<()>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            faces: vec![face()],
            max_age: Duration::from_secs(60),
            capture_gate: None,
            detect_gate: None,
        }
    }
}

fn face() -> Detection {
    Detection {
        bbox: FaceBox::new(8.0, 6.0, 24.0, 18.0),
        confidence: 0.95,
    }
}

fn harness(opts: Options) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().to_path_buf();
    let pool = FramePool::new(4);
    let stream = FaceObservationStream::new(
        FakeDetector {
            faces: opts.faces,
            started: Arc::new(AtomicBool::new(false)),
            gate: opts.detect_gate,
        },
        FaceSelection::FirstReported,
        CameraFacing::Back,
    );

    let model = FakeModel::default();
    let captures = Arc::new(AtomicUsize::new(0));
    let capture_started = Arc::new(AtomicBool::new(false));
    let camera = MemoryCamera {
        pool: pool.clone(),
        captures: Arc::clone(&captures),
        started: Arc::clone(&capture_started),
        gate: opts.capture_gate,
    };
    let pipeline = Pipeline::new(
        Box::new(camera),
        Embedder::new(model.clone()),
        &data_dir,
        0.0,
        CameraFacing::Back,
    )
    .unwrap();
    let engine = spawn_engine(pipeline, stream.subscribe(), opts.max_age);

    Harness {
        _dir: dir,
        data_dir,
        pool,
        stream,
        engine,
        model,
        captures,
        capture_started,
    }
}

impl Harness {
    async fn observe(&self) {
        let frame = self.pool.wrap(RgbImage::new(32, 24), 0).unwrap();
        self.stream.submit(frame).unwrap().await.unwrap();
    }
}

fn e1() -> Vec<f32> {
    (1..=DIM).map(|i| i as f32 * 0.1).collect()
}

/// Orthogonal to `v`: swaps and negates the first two components.
fn orthogonal(v: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; v.len()];
    out[0] = v[1];
    out[1] = -v[0];
    out
}

#[tokio::test]
async fn test_enroll_stores_exact_embedding() {
    let h = harness(Options::default());
    h.observe().await;
    h.model.push(e1());

    let outcome = h.engine.enroll(SLOT).await.unwrap();
    assert_eq!(outcome, EnrollOutcome::Enrolled { dimension: DIM });

    let store = EmbeddingStore::open(&h.data_dir, DIM).unwrap();
    let stored = store.load(SLOT).unwrap().unwrap();
    let expected: Vec<u32> = e1().iter().map(|v| v.to_bits()).collect();
    let actual: Vec<u32> = stored.as_slice().iter().map(|v| v.to_bits()).collect();
    assert_eq!(actual, expected);
    assert_eq!(std::fs::metadata(h.data_dir.join(SLOT)).unwrap().len(), (DIM * 4) as u64);
}

#[tokio::test]
async fn test_verify_same_embedding_matches() {
    let h = harness(Options::default());
    h.observe().await;
    h.model.push(e1());
    h.engine.enroll(SLOT).await.unwrap();

    h.model.push(e1());
    match h.engine.verify(SLOT).await.unwrap() {
        VerifyOutcome::Match { similarity } => assert!((similarity - 1.0).abs() < 1e-5),
        other => panic!("expected match, got {other:?}"),
    }
}

#[tokio::test]
async fn test_verify_orthogonal_embedding_rejects() {
    let h = harness(Options::default());
    h.observe().await;
    h.model.push(e1());
    h.engine.enroll(SLOT).await.unwrap();

    h.model.push(orthogonal(&e1()));
    match h.engine.verify(SLOT).await.unwrap() {
        VerifyOutcome::NoMatch { similarity } => assert_eq!(similarity, 0.0),
        other => panic!("expected no match, got {other:?}"),
    }
}

#[tokio::test]
async fn test_verify_without_enrollment() {
    let h = harness(Options::default());
    h.observe().await;
    h.model.push(e1());
    assert_eq!(h.engine.verify(SLOT).await.unwrap(), VerifyOutcome::NoEnrollment);
}

#[tokio::test]
async fn test_no_face_skips_capture_and_inference() {
    let h = harness(Options {
        faces: vec![],
        ..Options::default()
    });
    h.observe().await;
    assert!(h.stream.latest().is_none());

    assert_eq!(h.engine.enroll(SLOT).await.unwrap(), EnrollOutcome::FaceNotDetected);
    assert_eq!(h.engine.verify(SLOT).await.unwrap(), VerifyOutcome::FaceNotDetected);
    assert_eq!(h.captures.load(Ordering::SeqCst), 0);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    assert!(h.engine.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_observation_counts_as_no_face() {
    let h = harness(Options {
        max_age: Duration::from_millis(1),
        ..Options::default()
    });
    h.observe().await;
    assert!(h.stream.latest().is_some());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.engine.enroll(SLOT).await.unwrap(), EnrollOutcome::FaceNotDetected);
    assert_eq!(h.captures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wrong_length_record_reads_as_absent() {
    let h = harness(Options::default());
    std::fs::write(h.data_dir.join(SLOT), vec![0u8; DIM * 4 - 4]).unwrap();
    h.observe().await;
    h.model.push(e1());

    assert_eq!(h.engine.verify(SLOT).await.unwrap(), VerifyOutcome::NoEnrollment);
    assert!(h.engine.load(SLOT).await.unwrap().is_none());
}

#[tokio::test]
async fn test_overlapping_attempt_is_busy() {
    let (release, gate) = mpsc::channel();
    let h = harness(Options {
        capture_gate: Some(gate),
        ..Options::default()
    });
    h.observe().await;
    h.model.push(e1());

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.enroll(SLOT).await });
    while !h.capture_started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(h.engine.verify(SLOT).await.unwrap(), VerifyOutcome::Busy);
    assert_eq!(h.engine.enroll(SLOT).await.unwrap(), EnrollOutcome::Busy);

    release.send(()).unwrap();
    assert_eq!(
        first.await.unwrap().unwrap(),
        EnrollOutcome::Enrolled { dimension: DIM }
    );
    assert_eq!(h.captures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_abandoned_attempt_stays_busy_until_engine_finishes() {
    let (release, gate) = mpsc::channel();
    let h = harness(Options {
        capture_gate: Some(gate),
        ..Options::default()
    });
    h.observe().await;
    h.model.push(e1());
    h.model.push(e1());

    // The caller gives up while the engine thread is still capturing.
    let first = tokio::time::timeout(Duration::from_millis(50), h.engine.enroll("a")).await;
    assert!(first.is_err());
    while !h.capture_started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(h.engine.enroll("b").await.unwrap(), EnrollOutcome::Busy);
    assert_eq!(h.engine.verify("a").await.unwrap(), VerifyOutcome::Busy);
    assert_eq!(h.captures.load(Ordering::SeqCst), 1);

    release.send(()).unwrap();
    release.send(()).unwrap();
    let outcome = loop {
        match h.engine.enroll("c").await.unwrap() {
            EnrollOutcome::Busy => tokio::time::sleep(Duration::from_millis(1)).await,
            other => break other,
        }
    };
    assert_eq!(outcome, EnrollOutcome::Enrolled { dimension: DIM });
    assert_eq!(h.engine.list().await.unwrap(), vec!["a", "c"]);
    assert_eq!(h.captures.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_frames_return_to_pool() {
    let (release, gate) = mpsc::channel();
    let h = harness(Options {
        detect_gate: Some(gate),
        ..Options::default()
    });

    let running = h
        .stream
        .submit(h.pool.wrap(RgbImage::new(32, 24), 0).unwrap())
        .unwrap();
    while !h.stream.is_detecting() {
        tokio::task::yield_now().await;
    }

    // Detector busy: the second frame is dropped and its slot freed at once.
    let dropped = h.pool.wrap(RgbImage::new(32, 24), 0).unwrap();
    assert!(h.stream.submit(dropped).is_none());
    assert_eq!(h.pool.available(), 3);

    release.send(()).unwrap();
    running.await.unwrap();
    assert_eq!(h.pool.available(), 4);
    assert!(h.stream.latest().is_some());

    // Capture frames are released after the crop as well.
    h.model.push(e1());
    h.engine.enroll(SLOT).await.unwrap();
    assert_eq!(h.pool.available(), 4);
}

#[tokio::test]
async fn test_list_and_remove() {
    let h = harness(Options::default());
    h.observe().await;
    h.model.push(e1());
    h.engine.enroll("alice").await.unwrap();
    h.model.push(e1());
    h.engine.enroll("bob").await.unwrap();

    assert_eq!(h.engine.list().await.unwrap(), vec!["alice", "bob"]);
    assert!(h.engine.remove("alice").await.unwrap());
    assert!(!h.engine.remove("alice").await.unwrap());
    assert_eq!(h.engine.list().await.unwrap(), vec!["bob"]);
}
