//! Mock hardware and inference backends
//!
//! This module provides an in-process video subsystem and inference engine
//! so the whole pipeline can run without a device. Both are deterministic,
//! which is what the integration tests rely on.
//!
//! # Features
//!
//! - **Manual drivers**: `MockHal::emit_*` push one raw frame, JPEG image,
//!   H.264 batch or audio block through the registered capture sink
//! - **Timed generator**: `MockHal::start_generator` emits a synthetic
//!   stream (raw + JPEG + H.264 GOPs) at a fixed rate
//! - **Buffer accounting**: [`RecyclingPool`] counts every hardware buffer
//!   handed out and returned
//! - **Scripted models**: [`MockEngine`] serves [`MockModel`]s whose
//!   outputs, latency and failure cadence are configurable per file stem,
//!   and records every invocation in a shared journal
//!
//! # Example
//!
//! ```ignore
//! use camnode::backend::mock::{MockEngine, MockHal, MockModelSpec};
//!
//! let hal = MockHal::new();
//! let engine = MockEngine::virtual_models()
//!     .with_model("person", MockModelSpec::detector(320, 320));
//! // ... create camera + model nodes, then:
//! hal.emit_raw();
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use super::engine::{
    BBox, Class, InferenceEngine, InputSpec, Keypoints, Model, ModelKind, ModelOption, ModelOutput,
    ModelRun, Perf, Point3, Segment,
};
use super::hal::{CaptureSink, ChannelParams, EncodedPacket, NaluKind, VideoHal};
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::frame::{BufferPool, Channel, FrameRef, HwBuffer, PixelFormat};
use crate::pipeline::worker::Worker;

// ── Buffer pool ──

/// Hands out hardware buffer handles and counts their return.
#[derive(Debug, Default)]
pub struct RecyclingPool {
    next_handle: AtomicU64,
    recycled: AtomicU64,
}

impl RecyclingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `mapping` in a fresh hardware buffer owned by this pool.
    pub fn allocate(self: &Arc<Self>, mapping: Vec<u8>) -> HwBuffer {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let phys_addr = 0x8000_0000 + handle * 0x10_0000;
        let pool: Arc<dyn BufferPool> = self.clone();
        HwBuffer::new(handle, phys_addr, mapping, pool)
    }

    pub fn allocated(&self) -> u64 {
        self.next_handle.load(Ordering::Relaxed)
    }

    pub fn recycled(&self) -> u64 {
        self.recycled.load(Ordering::Relaxed)
    }

    /// Buffers handed out but not yet returned.
    pub fn outstanding(&self) -> u64 {
        self.allocated().saturating_sub(self.recycled())
    }
}

impl BufferPool for RecyclingPool {
    fn recycle(&self, _handle: u64) {
        self.recycled.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Video subsystem ──

#[derive(Default)]
struct HalState {
    initialized: bool,
    capturing: bool,
    channels: [Option<ChannelParams>; Channel::COUNT],
    sink: Option<Arc<dyn CaptureSink>>,
    mirror: bool,
    flip: bool,
    light: bool,
    volume: u8,
}

/// Observable state of a [`MockHal`].
#[derive(Debug, Clone, PartialEq)]
pub struct HalStatus {
    pub initialized: bool,
    pub capturing: bool,
    pub channels: [Option<ChannelParams>; Channel::COUNT],
    pub mirror: bool,
    pub flip: bool,
    pub light: bool,
    pub volume: u8,
}

/// In-process video subsystem.
pub struct MockHal {
    pool: Arc<RecyclingPool>,
    state: Mutex<HalState>,
    fail_init: AtomicBool,
    generator: Mutex<Option<Worker>>,
    raw_seq: AtomicU64,
}

impl Default for MockHal {
    fn default() -> Self {
        Self {
            pool: Arc::new(RecyclingPool::new()),
            state: Mutex::new(HalState::default()),
            fail_init: AtomicBool::new(false),
            generator: Mutex::new(None),
            raw_seq: AtomicU64::new(0),
        }
    }
}

impl MockHal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pool(&self) -> &Arc<RecyclingPool> {
        &self.pool
    }

    /// Make the next `init` fail as if no sensor were attached.
    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::Relaxed);
    }

    pub fn status(&self) -> HalStatus {
        let s = self.lock();
        HalStatus {
            initialized: s.initialized,
            capturing: s.capturing,
            channels: s.channels,
            mirror: s.mirror,
            flip: s.flip,
            light: s.light,
            volume: s.volume,
        }
    }

    /// Sink and params for `channel`, if capturing with that channel set up.
    fn route(&self, channel: Channel) -> Option<(Arc<dyn CaptureSink>, ChannelParams)> {
        let s = self.lock();
        if !s.capturing {
            return None;
        }
        let params = s.channels[channel.index()]?;
        Some((s.sink.clone()?, params))
    }

    /// Emit one raw RGB888 frame. Returns whether a sink received it.
    pub fn emit_raw(&self) -> bool {
        let Some((sink, params)) = self.route(Channel::Raw) else {
            return false;
        };
        let seq = self.raw_seq.fetch_add(1, Ordering::Relaxed);
        let bpp = params.format.bytes_per_pixel().unwrap_or(3);
        let len = params.width as usize * params.height as usize * bpp;
        let mapping: Vec<u8> = (0..len).map(|i| (i as u64 + seq) as u8).collect();
        sink.on_raw(Channel::Raw, self.pool.allocate(mapping), params);
        true
    }

    /// Emit one JPEG image on the JPEG channel.
    pub fn emit_jpeg(&self) -> bool {
        let Some((sink, params)) = self.route(Channel::Jpeg) else {
            return false;
        };
        let mut image = vec![0xFF, 0xD8, 0xFF, 0xE0];
        image.extend_from_slice(&params.width.to_be_bytes());
        image.extend_from_slice(&params.height.to_be_bytes());
        image.extend_from_slice(&[0xFF, 0xD9]);
        sink.on_encoded(Channel::Jpeg, &[EncodedPacket::new(NaluKind::Other, &image)]);
        true
    }

    /// Emit one encoder batch on the H.264 channel.
    pub fn emit_h264(&self, packets: &[(NaluKind, &[u8])]) -> bool {
        let Some((sink, _)) = self.route(Channel::H264) else {
            return false;
        };
        let packets: Vec<EncodedPacket<'_>> = packets
            .iter()
            .map(|(kind, data)| EncodedPacket::new(*kind, data))
            .collect();
        sink.on_encoded(Channel::H264, &packets);
        true
    }

    /// Emit a PCM block on the audio channel.
    pub fn emit_audio(&self, pcm: &[u8]) -> bool {
        let Some((sink, _)) = self.route(Channel::Audio) else {
            return false;
        };
        sink.on_audio(pcm);
        true
    }

    /// Emit synthetic frames at `fps` on a background thread until
    /// [`stop_generator`](Self::stop_generator) is called. A key unit is
    /// produced every `gop` frames.
    pub fn start_generator(self: &Arc<Self>, fps: u32, gop: u32) -> NodeResult<()> {
        let weak: Weak<MockHal> = Arc::downgrade(self);
        let period = Duration::from_millis(1000 / u64::from(fps.clamp(1, 60)));
        let gop = gop.max(1);
        let worker = Worker::spawn("mock-hal-gen", move |token| {
            let mut frame = 0u32;
            while token.is_running() {
                let Some(hal) = weak.upgrade() else {
                    break;
                };
                let started = Instant::now();
                hal.emit_raw();
                hal.emit_jpeg();
                if frame % gop == 0 {
                    hal.emit_h264(&[
                        (NaluKind::Sps, &[0, 0, 0, 1, 0x67]),
                        (NaluKind::Pps, &[0, 0, 0, 1, 0x68]),
                        (NaluKind::Idr, &[0, 0, 0, 1, 0x65, 0x88]),
                    ]);
                } else {
                    hal.emit_h264(&[(NaluKind::PSlice, &[0, 0, 0, 1, 0x41, frame as u8])]);
                }
                hal.emit_audio(&[0u8; 640]);
                drop(hal);
                frame = frame.wrapping_add(1);
                let elapsed = started.elapsed();
                if elapsed < period {
                    token.sleep(period - elapsed, Duration::from_millis(5));
                }
            }
        })?;
        let mut slot = self.generator.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(worker);
        Ok(())
    }

    pub fn stop_generator(&self) {
        let worker = self
            .generator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(worker);
    }
}

impl VideoHal for MockHal {
    fn init(&self) -> NodeResult<()> {
        if self.fail_init.load(Ordering::Relaxed) {
            return Err(NodeError::Hal("no sensor attached".into()));
        }
        self.lock().initialized = true;
        Ok(())
    }

    fn deinit(&self) {
        let mut s = self.lock();
        s.capturing = false;
        s.sink = None;
        s.initialized = false;
    }

    fn configure_channel(&self, channel: Channel, params: &ChannelParams) -> NodeResult<()> {
        let mut s = self.lock();
        if !s.initialized {
            return Err(NodeError::Hal("video subsystem not initialised".into()));
        }
        s.channels[channel.index()] = Some(*params);
        Ok(())
    }

    fn start(&self, sink: Arc<dyn CaptureSink>) -> NodeResult<()> {
        let mut s = self.lock();
        if !s.initialized {
            return Err(NodeError::Hal("video subsystem not initialised".into()));
        }
        s.sink = Some(sink);
        s.capturing = true;
        Ok(())
    }

    fn stop(&self) -> NodeResult<()> {
        let mut s = self.lock();
        s.capturing = false;
        s.sink = None;
        Ok(())
    }

    fn set_mirror(&self, mirror: bool) -> NodeResult<()> {
        self.lock().mirror = mirror;
        Ok(())
    }

    fn set_flip(&self, flip: bool) -> NodeResult<()> {
        self.lock().flip = flip;
        Ok(())
    }

    fn set_light(&self, on: bool) -> NodeResult<()> {
        self.lock().light = on;
        Ok(())
    }

    fn set_volume(&self, volume: u8) -> NodeResult<()> {
        self.lock().volume = volume.min(100);
        Ok(())
    }
}

// ── Inference ──

/// Behaviour of one scripted model.
#[derive(Debug, Clone, PartialEq)]
pub struct MockModelSpec {
    pub kind: ModelKind,
    pub input: InputSpec,
    /// Simulated inference latency.
    pub run_delay: Duration,
    /// Fail every n-th run (0 = never).
    pub fail_every: u32,
    /// Detections per frame for box-producing kinds.
    pub detections: usize,
}

impl MockModelSpec {
    pub fn new(kind: ModelKind, width: u32, height: u32) -> Self {
        Self {
            kind,
            input: InputSpec {
                width,
                height,
                format: PixelFormat::Rgb888,
            },
            run_delay: Duration::ZERO,
            fail_every: 0,
            detections: 1,
        }
    }

    pub fn detector(width: u32, height: u32) -> Self {
        Self::new(ModelKind::Detector, width, height)
    }

    pub fn classifier(width: u32, height: u32) -> Self {
        Self::new(ModelKind::Classifier, width, height)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    pub fn failing_every(mut self, n: u32) -> Self {
        self.fail_every = n;
        self
    }

    pub fn with_detections(mut self, n: usize) -> Self {
        self.detections = n;
        self
    }

    /// Kind guessed from a file stem.
    fn for_stem(stem: &str) -> Self {
        let stem = stem.to_ascii_lowercase();
        let kind = if stem.contains("cls") {
            ModelKind::Classifier
        } else if stem.contains("pose") {
            ModelKind::Pose
        } else if stem.contains("seg") {
            ModelKind::Segmentation
        } else {
            ModelKind::Detector
        };
        Self::new(kind, 640, 640)
    }
}

/// One recorded call to [`Model::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub model: String,
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub at: Instant,
}

pub type Journal = Arc<Mutex<Vec<Invocation>>>;

/// Engine serving [`MockModel`]s.
pub struct MockEngine {
    require_files: bool,
    specs: Mutex<HashMap<String, MockModelSpec>>,
    unsupported: Mutex<HashSet<String>>,
    journal: Journal,
}

impl MockEngine {
    /// Engine that only loads files that exist on disk.
    pub fn new() -> Self {
        Self {
            require_files: true,
            specs: Mutex::new(HashMap::new()),
            unsupported: Mutex::new(HashSet::new()),
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Engine that serves any path, existing or not.
    pub fn virtual_models() -> Self {
        Self {
            require_files: false,
            ..Self::new()
        }
    }

    /// Script the model whose file stem is `stem`.
    pub fn with_model(self, stem: &str, spec: MockModelSpec) -> Self {
        self.specs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(stem.to_string(), spec);
        self
    }

    /// Make loading `stem` fail as an unsupported model family.
    pub fn with_unsupported(self, stem: &str) -> Self {
        self.unsupported
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(stem.to_string());
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl InferenceEngine for MockEngine {
    fn load(&self, path: &Path) -> NodeResult<Box<dyn Model>> {
        if self.require_files && !path.is_file() {
            return Err(NodeError::MissingFile(PathBuf::from(path)));
        }
        let stem = file_stem(path);
        if self
            .unsupported
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&stem)
        {
            return Err(NodeError::NotSupported(format!("model type of {stem}")));
        }
        let spec = self
            .specs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&stem)
            .cloned()
            .unwrap_or_else(|| MockModelSpec::for_stem(&stem));
        tracing::debug!("mock engine loaded {} as {:?}", stem, spec.kind);
        Ok(Box::new(MockModel::new(stem, spec, self.journal.clone())))
    }
}

/// Deterministic model.
pub struct MockModel {
    name: String,
    spec: MockModelSpec,
    threshold: f32,
    nms: f32,
    topk: usize,
    calls: u64,
    journal: Journal,
}

impl MockModel {
    pub fn new(name: impl Into<String>, spec: MockModelSpec, journal: Journal) -> Self {
        Self {
            name: name.into(),
            spec,
            threshold: 0.25,
            nms: 0.45,
            topk: 5,
            calls: 0,
            journal,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn boxes(&self, seq: u64) -> Vec<BBox> {
        (0..self.spec.detections)
            .map(|i| BBox {
                x: 0.2 + 0.3 * (i % 3) as f32,
                y: 0.5,
                w: 0.2,
                h: 0.3,
                score: 0.9 - 0.1 * i as f32,
                target: ((seq as usize + i) % 3) as u32,
            })
            .filter(|b| b.score >= self.threshold)
            .collect()
    }

    fn output(&self, seq: u64) -> ModelOutput {
        match self.spec.kind {
            ModelKind::Detector => ModelOutput::Boxes(self.boxes(seq)),
            ModelKind::Classifier => {
                let mut classes = vec![
                    Class {
                        score: 0.8,
                        target: (seq % 3) as u32,
                    },
                    Class {
                        score: 0.15,
                        target: ((seq + 1) % 3) as u32,
                    },
                ];
                classes.retain(|c| c.score >= self.threshold);
                classes.truncate(self.topk);
                ModelOutput::Classes(classes)
            }
            ModelKind::Pose => ModelOutput::Keypoints(
                self.boxes(seq)
                    .into_iter()
                    .map(|bbox| Keypoints {
                        bbox,
                        points: (0..17)
                            .map(|k| Point3 {
                                x: bbox.x,
                                y: bbox.y - bbox.h / 2.0 + bbox.h * k as f32 / 16.0,
                                z: 0.9,
                            })
                            .collect(),
                    })
                    .collect(),
            ),
            ModelKind::Segmentation => ModelOutput::Segments(
                self.boxes(seq)
                    .into_iter()
                    .map(|bbox| {
                        let (hw, hh) = (bbox.w / 2.0, bbox.h / 2.0);
                        Segment {
                            bbox,
                            contour: vec![
                                (bbox.x - hw, bbox.y - hh),
                                (bbox.x + hw, bbox.y - hh),
                                (bbox.x + hw, bbox.y + hh),
                                (bbox.x - hw, bbox.y + hh),
                            ],
                        }
                    })
                    .collect(),
            ),
        }
    }
}

impl Model for MockModel {
    fn kind(&self) -> ModelKind {
        self.spec.kind
    }

    fn input_spec(&self) -> InputSpec {
        self.spec.input
    }

    fn set_option(&mut self, option: ModelOption, value: f32) -> NodeResult<()> {
        match option {
            ModelOption::Threshold if (0.0..=1.0).contains(&value) => self.threshold = value,
            ModelOption::Nms if (0.0..=1.0).contains(&value) => self.nms = value,
            ModelOption::TopK if value >= 1.0 => self.topk = value as usize,
            _ => {
                return Err(NodeError::InvalidArgument(format!(
                    "{option:?} = {value} for {}",
                    self.name
                )))
            }
        }
        Ok(())
    }

    fn run(&mut self, input: FrameRef) -> NodeResult<ModelRun> {
        let started = Instant::now();
        self.calls += 1;
        let seq = input.seq();
        self.journal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Invocation {
                model: self.name.clone(),
                seq,
                width: input.width(),
                height: input.height(),
                at: started,
            });
        // Preprocessing done: the frame is no longer needed.
        drop(input);
        let preprocess = started.elapsed();

        if self.spec.fail_every > 0 && self.calls % u64::from(self.spec.fail_every) == 0 {
            return Err(NodeError::Engine(format!("{}: scripted failure", self.name)));
        }

        let inference_start = Instant::now();
        if !self.spec.run_delay.is_zero() {
            std::thread::sleep(self.spec.run_delay);
        }
        let inference = inference_start.elapsed();

        let post_start = Instant::now();
        let output = self.output(seq);
        Ok(ModelRun {
            output,
            perf: Perf {
                preprocess,
                inference,
                postprocess: post_start.elapsed(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame::{Frame, FrameInfo};
    use crate::pipeline::error::ErrorCode;

    struct Collect(Mutex<Vec<(u32, u32)>>);

    impl CaptureSink for Collect {
        fn on_encoded(&self, _channel: Channel, _packets: &[EncodedPacket<'_>]) {}
        fn on_raw(&self, _channel: Channel, buffer: HwBuffer, params: ChannelParams) {
            assert_eq!(buffer.as_slice().len(), (params.width * params.height * 3) as usize);
            self.0.lock().unwrap().push((params.width, params.height));
        }
        fn on_audio(&self, _pcm: &[u8]) {}
    }

    #[test]
    fn test_hal_routes_raw_only_when_capturing() {
        let hal = MockHal::new();
        hal.init().unwrap();
        hal.configure_channel(Channel::Raw, &ChannelParams::new(8, 4, 30, PixelFormat::Rgb888))
            .unwrap();
        assert!(!hal.emit_raw());

        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        hal.start(sink.clone()).unwrap();
        assert!(hal.emit_raw());
        assert!(!hal.emit_jpeg());
        assert_eq!(*sink.0.lock().unwrap(), vec![(8, 4)]);
        assert_eq!(hal.pool().outstanding(), 0);
    }

    #[test]
    fn test_hal_init_failure() {
        let hal = MockHal::new();
        hal.fail_init(true);
        assert_eq!(hal.init().unwrap_err().code(), ErrorCode::Io);
        assert!(hal.start(Arc::new(Collect(Mutex::new(Vec::new())))).is_err());
    }

    #[test]
    fn test_engine_missing_and_unsupported() {
        let engine = MockEngine::new();
        let err = engine.load(Path::new("/nonexistent/model.bin")).err().unwrap();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let engine = MockEngine::virtual_models().with_unsupported("llm");
        assert!(matches!(
            engine.load(Path::new("llm.bin")).err().unwrap(),
            NodeError::NotSupported(_)
        ));
        let model = engine.load(Path::new("yolo_cls.bin")).unwrap();
        assert_eq!(model.kind(), ModelKind::Classifier);
    }

    #[test]
    fn test_model_releases_input_and_journals() {
        let engine = MockEngine::virtual_models().with_model("det", MockModelSpec::detector(4, 4));
        let journal = engine.journal();
        let mut model = engine.load(Path::new("det.bin")).unwrap();
        let frame: FrameRef = Arc::new(Frame::heap(
            FrameInfo::new(Channel::Raw, 4, 4, PixelFormat::Rgb888).with_seq(9),
            vec![0u8; 48],
        ));
        let weak = Arc::downgrade(&frame);
        let run = model.run(frame).unwrap();
        assert!(weak.upgrade().is_none());
        assert!(matches!(run.output, ModelOutput::Boxes(ref b) if b.len() == 1));
        let journal = journal.lock().unwrap();
        assert_eq!(journal[0].model, "det");
        assert_eq!(journal[0].seq, 9);
    }

    #[test]
    fn test_model_threshold_filters_boxes() {
        let mut model = MockModel::new(
            "det",
            MockModelSpec::detector(4, 4).with_detections(3),
            Arc::new(Mutex::new(Vec::new())),
        );
        model.set_option(ModelOption::Threshold, 0.75).unwrap();
        assert!(model.set_option(ModelOption::Threshold, 1.5).is_err());
        match model.output(0) {
            ModelOutput::Boxes(b) => assert_eq!(b.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
