//! Model node: runs one or more inference models against camera frames.
//!
//! # Topologies
//!
//! - **Parallel** (default): one worker per model. Workers pull from the
//!   node's shared camera mailboxes independently and never interact.
//! - **Serial**: one worker drives the whole chain per captured frame.
//!   After each stage, the frame (or, behind a detector, a crop of its best
//!   detection) is handed to the next stage through a capacity-1 channel.
//!   A frame leaves the last stage before the next capture is fetched.
//!
//! Every invocation publishes an `invoke` event carrying an
//! [`InvokeResult`]: boxes, classes, keypoints or segments mapped back to
//! source pixels, optional track ids and line-crossing counts, timings,
//! and, in debug mode, the matching JPEG preview as base64.
//!
//! # Example
//!
//! ```ignore
//! factory.create(
//!     NodeRequest::new("model0", "model")
//!         .with_config(json!({
//!             "mode": "serial",
//!             "models": [
//!                 { "uri": "/userdata/MODEL/person.cvimodel", "tscore": 0.5 },
//!                 { "uri": "/userdata/MODEL/face_cls.cvimodel" },
//!             ],
//!         }))
//!         .depends_on("camera0"),
//! )?;
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::camera::{CameraNode, ChannelRequest};
use crate::analysis::{crop_resize, Letterbox, LineCounter, PixelBox, Tracker};
use crate::backend::engine::{
    InferenceEngine, InputSpec, Model, ModelKind, ModelOption, ModelOutput, Perf,
};
use crate::config::PipelineSettings;
use crate::pipeline::bridge::{ControlReply, Responder};
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::frame::{Channel, FrameRef, PixelFormat};
use crate::pipeline::mailbox::Mailbox;
use crate::pipeline::node::{Node, NodeCore, NodeState, StartContext};
use crate::pipeline::node_type::NodeType;
use crate::pipeline::worker::{CancelToken, Worker};

/// Model loaded when a configuration names none.
pub const DEFAULT_MODEL: &str = "/userdata/MODEL/model.cvimodel";

// ── Configuration ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Parallel,
    Serial,
}

/// Settings for one model in the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<PathBuf>,
    /// Labels used when the model has no sidecar metadata.
    pub classes: Vec<String>,
    pub tscore: Option<f32>,
    pub tiou: Option<f32>,
    pub topk: Option<u32>,
    pub trace: bool,
    pub counting: bool,
    pub splitter: Option<Vec<i16>>,
}

/// Model node configuration. Either the single-model fields at the top
/// level, or a `models` list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelNodeConfig {
    pub mode: RunMode,
    pub debug: bool,
    pub models: Vec<InstanceConfig>,
    #[serde(flatten)]
    pub single: InstanceConfig,
}

impl ModelNodeConfig {
    pub fn from_value(config: &Value) -> NodeResult<Self> {
        if config.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(config.clone())
            .map_err(|e| NodeError::InvalidArgument(format!("model config: {e}")))
    }

    /// Per-model settings in declaration order.
    pub fn instances(&self) -> Vec<InstanceConfig> {
        if self.models.is_empty() {
            vec![self.single.clone()]
        } else {
            self.models.clone()
        }
    }
}

// ── Results ──

/// `[x, y, w, h, score%, target]` in source pixels, box centre first.
pub type BoxEntry = [i32; 6];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeypointEntry {
    #[serde(rename = "box")]
    pub bbox: BoxEntry,
    /// `[x, y, score%]` per point.
    pub points: Vec<[i32; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentEntry {
    #[serde(rename = "box")]
    pub bbox: BoxEntry,
    pub points: Vec<[i32; 2]>,
}

/// Payload of one `invoke` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvokeResult {
    /// Node-wide invocation counter, starting at 1.
    pub count: u64,
    /// Position of the model within the node.
    pub index: usize,
    pub resolution: [u32; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boxes: Option<Vec<BoxEntry>>,
    /// `[score%, target]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<[i32; 2]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<Vec<KeypointEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentEntry>>,
    /// One label per entry, in entry order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<[u32; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<[i16; 4]>,
    /// Pre-process, inference and post-process time in milliseconds.
    pub perf: [u64; 3],
    pub image: String,
}

fn box_entry(b: &PixelBox) -> BoxEntry {
    [
        b.cx.round() as i32,
        b.cy.round() as i32,
        b.w.round() as i32,
        b.h.round() as i32,
        (b.score * 100.0).round() as i32,
        b.target as i32,
    ]
}

fn empty_output(kind: ModelKind) -> ModelOutput {
    match kind {
        ModelKind::Detector => ModelOutput::Boxes(Vec::new()),
        ModelKind::Classifier => ModelOutput::Classes(Vec::new()),
        ModelKind::Pose => ModelOutput::Keypoints(Vec::new()),
        ModelKind::Segmentation => ModelOutput::Segments(Vec::new()),
    }
}

// ── Model instances ──

struct ModelInstance {
    index: usize,
    uri: PathBuf,
    model: Box<dyn Model>,
    labels: Vec<String>,
    trace: bool,
    counting: bool,
    tracker: Tracker,
    counter: LineCounter,
}

/// What one stage produced for one frame.
struct Outcome {
    result: InvokeResult,
    handoff: Option<FrameRef>,
    failed: bool,
}

/// Metadata next to a model file (`model.cvimodel` → `model.json`).
fn read_sidecar(uri: &Path) -> NodeResult<Value> {
    let path = uri.with_extension("json");
    if !path.is_file() {
        return Ok(Value::Null);
    }
    let text = std::fs::read_to_string(&path)?;
    serde_json::from_str(&text)
        .map_err(|e| NodeError::InvalidArgument(format!("{}: {e}", path.display())))
}

impl ModelInstance {
    fn load(engine: &dyn InferenceEngine, index: usize, config: &InstanceConfig) -> NodeResult<Self> {
        let uri = config
            .uri
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL));
        let mut model = engine.load(&uri)?;

        let info = read_sidecar(&uri)?;
        let mut labels: Vec<String> = info
            .get("classes")
            .and_then(Value::as_array)
            .map(|classes| {
                classes
                    .iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if labels.is_empty() {
            labels = config.classes.clone();
        }

        if let Some(tscore) = config.tscore {
            model.set_option(ModelOption::Threshold, tscore)?;
        }
        if let Some(tiou) = config.tiou {
            model.set_option(ModelOption::Nms, tiou)?;
        }
        if let Some(topk) = config.topk {
            model.set_option(ModelOption::TopK, topk as f32)?;
        }
        let mut counter = LineCounter::default();
        if let Some(splitter) = &config.splitter {
            counter.set_splitter(splitter)?;
        }

        tracing::info!(
            "model[{}]: {} ({:?}, {} labels)",
            index,
            uri.display(),
            model.kind(),
            labels.len()
        );
        Ok(Self {
            index,
            uri,
            model,
            labels,
            trace: config.trace,
            counting: config.counting,
            tracker: Tracker::default(),
            counter,
        })
    }

    fn input_spec(&self) -> InputSpec {
        self.model.input_spec()
    }

    fn label(&self, target: u32) -> String {
        self.labels
            .get(target as usize)
            .cloned()
            .unwrap_or_else(|| format!("N/A-{target}"))
    }

    fn describe(&self) -> Value {
        let input = self.input_spec();
        json!({
            "index": self.index,
            "uri": self.uri,
            "kind": self.model.kind(),
            "input": [input.width, input.height],
            "classes": self.labels,
        })
    }

    /// Apply runtime settings from a `config` control.
    fn apply(&mut self, data: &Map<String, Value>) -> NodeResult<()> {
        if let Some(tscore) = data.get("tscore").and_then(Value::as_f64) {
            self.model.set_option(ModelOption::Threshold, tscore as f32)?;
        }
        if let Some(tiou) = data.get("tiou").and_then(Value::as_f64) {
            self.model.set_option(ModelOption::Nms, tiou as f32)?;
        }
        if let Some(topk) = data.get("topk").and_then(Value::as_u64) {
            self.model.set_option(ModelOption::TopK, topk as f32)?;
        }
        if let Some(trace) = data.get("trace").and_then(Value::as_bool) {
            self.trace = trace;
            self.tracker.clear();
        }
        if let Some(counting) = data.get("counting").and_then(Value::as_bool) {
            self.counting = counting;
            self.counter.clear();
        }
        if let Some(splitter) = data.get("splitter") {
            let values: Vec<i16> = serde_json::from_value(splitter.clone())
                .map_err(|e| NodeError::InvalidArgument(format!("splitter: {e}")))?;
            self.counter.set_splitter(&values)?;
        }
        Ok(())
    }

    /// Run the model on `frame` and build its result. With `next` set, also
    /// produce the input for the following stage.
    fn infer(&mut self, frame: FrameRef, next: Option<InputSpec>) -> Outcome {
        let input = self.input_spec();
        let letterbox = Letterbox::new((frame.width(), frame.height()), (input.width, input.height));
        let mut result = InvokeResult {
            index: self.index,
            resolution: [frame.width(), frame.height()],
            ..InvokeResult::default()
        };
        let source = next.map(|_| FrameRef::clone(&frame));

        // The model releases the frame once preprocessing is done.
        let (output, perf, failed) = match self.model.run(frame) {
            Ok(run) => (run.output, run.perf, false),
            Err(e) => {
                tracing::warn!("model[{}] {}: {}", self.index, self.uri.display(), e);
                (empty_output(self.model.kind()), Perf::default(), true)
            }
        };
        result.perf = perf.as_millis();

        let handoff = match (source, next) {
            (Some(source), Some(spec)) if !failed => self.handoff(source, &output, &letterbox, spec),
            _ => None,
        };
        self.fill(&mut result, output, &letterbox);
        Outcome {
            result,
            handoff,
            failed,
        }
    }

    fn fill(&mut self, result: &mut InvokeResult, output: ModelOutput, letterbox: &Letterbox) {
        let point = |x: f32, y: f32| {
            let (px, py) = letterbox.to_source(x, y);
            (px.round() as i32, py.round() as i32)
        };
        match output {
            ModelOutput::Boxes(boxes) => {
                let mapped: Vec<PixelBox> = boxes.iter().map(|b| letterbox.map_box(b)).collect();
                result.labels = mapped.iter().map(|b| self.label(b.target)).collect();
                result.boxes = Some(mapped.iter().map(box_entry).collect());
                if self.trace {
                    let tracks = self.tracker.update(&mapped);
                    if self.counting {
                        let (sw, sh) = letterbox.source_size();
                        let centres: Vec<(u32, f32, f32)> = tracks
                            .iter()
                            .zip(&mapped)
                            .map(|(id, b)| (*id, b.cx / sw * 100.0, b.cy / sh * 100.0))
                            .collect();
                        self.counter.update(&centres);
                    }
                    result.tracks = Some(tracks);
                }
            }
            ModelOutput::Classes(classes) => {
                result.labels = classes.iter().map(|c| self.label(c.target)).collect();
                result.classes = Some(
                    classes
                        .iter()
                        .map(|c| [(c.score * 100.0).round() as i32, c.target as i32])
                        .collect(),
                );
            }
            ModelOutput::Keypoints(list) => {
                result.labels = list.iter().map(|k| self.label(k.bbox.target)).collect();
                result.keypoints = Some(
                    list.iter()
                        .map(|k| KeypointEntry {
                            bbox: box_entry(&letterbox.map_box(&k.bbox)),
                            points: k
                                .points
                                .iter()
                                .map(|p| {
                                    let (x, y) = point(p.x, p.y);
                                    [x, y, (p.z * 100.0).round() as i32]
                                })
                                .collect(),
                        })
                        .collect(),
                );
            }
            ModelOutput::Segments(list) => {
                result.labels = list.iter().map(|s| self.label(s.bbox.target)).collect();
                result.segments = Some(
                    list.iter()
                        .map(|s| SegmentEntry {
                            bbox: box_entry(&letterbox.map_box(&s.bbox)),
                            points: s
                                .contour
                                .iter()
                                .map(|&(x, y)| {
                                    let (px, py) = point(x, y);
                                    [px, py]
                                })
                                .collect(),
                        })
                        .collect(),
                );
            }
        }
        if self.counting {
            result.counts = Some(self.counter.counts());
            result.lines = Some(self.counter.splitter());
        }
    }

    /// Input for the next stage: behind a detector, the best detection
    /// cropped to the next model's input; otherwise the frame itself.
    fn handoff(
        &self,
        source: FrameRef,
        output: &ModelOutput,
        letterbox: &Letterbox,
        next: InputSpec,
    ) -> Option<FrameRef> {
        if self.model.kind() != ModelKind::Detector {
            return Some(source);
        }
        let best = output.best_box()?;
        let region = letterbox.map_box(&best);
        crop_resize(&source, &region, (next.width, next.height)).map(Arc::new)
    }
}

impl Drop for ModelInstance {
    fn drop(&mut self) {
        tracing::debug!("model[{}]: unloaded {}", self.index, self.uri.display());
    }
}

fn lock_instance(instance: &Mutex<ModelInstance>) -> MutexGuard<'_, ModelInstance> {
    instance.lock().unwrap_or_else(|e| e.into_inner())
}

/// Load every model in order. On failure, models already loaded are
/// released newest first before the error is returned.
fn load_instances(
    engine: &dyn InferenceEngine,
    configs: &[InstanceConfig],
) -> NodeResult<Vec<ModelInstance>> {
    let mut loaded: Vec<ModelInstance> = Vec::with_capacity(configs.len());
    for (index, config) in configs.iter().enumerate() {
        match ModelInstance::load(engine, index, config) {
            Ok(instance) => loaded.push(instance),
            Err(e) => {
                while let Some(instance) = loaded.pop() {
                    drop(instance);
                }
                return Err(e);
            }
        }
    }
    Ok(loaded)
}

// ── Workers ──

#[derive(Debug)]
struct ModelFlags {
    enabled: AtomicBool,
    /// Preview frames are attached and fetched alongside raw frames.
    debug: AtomicBool,
    count: AtomicU64,
    failures: AtomicU64,
}

#[derive(Clone)]
struct WorkerContext {
    id: String,
    responder: Responder,
    flags: Arc<ModelFlags>,
    raw: Arc<Mailbox>,
    jpeg: Arc<Mailbox>,
    fetch_timeout: Duration,
    handoff_slice: Duration,
    debug_spacing: Duration,
}

impl WorkerContext {
    /// A raw frame and, in debug mode, a preview. Both or neither.
    fn fetch(&self) -> Option<(FrameRef, Option<FrameRef>)> {
        let raw = self.raw.fetch(self.fetch_timeout).ok()?;
        if !self.flags.debug.load(Ordering::Acquire) {
            return Some((raw, None));
        }
        let preview = self.jpeg.fetch(self.fetch_timeout).ok()?;
        Some((raw, Some(preview)))
    }

    fn is_enabled(&self) -> bool {
        self.flags.enabled.load(Ordering::Acquire)
    }

    fn publish(&self, outcome: Outcome, image: &str) -> Option<FrameRef> {
        if outcome.failed {
            self.flags.failures.fetch_add(1, Ordering::Relaxed);
        }
        let mut result = outcome.result;
        result.count = self.flags.count.fetch_add(1, Ordering::AcqRel) + 1;
        result.image = image.to_string();
        match serde_json::to_value(&result) {
            Ok(data) => {
                self.responder
                    .publish(&self.id, ControlReply::event("invoke", data));
            }
            Err(e) => tracing::warn!("model#{}: result not serialisable: {}", self.id, e),
        }
        outcome.handoff
    }

    /// In debug mode, keep iterations at least `debug_spacing` apart.
    fn pace(&self, token: &CancelToken, started: Instant) {
        if !self.flags.debug.load(Ordering::Acquire) {
            return;
        }
        let elapsed = started.elapsed();
        if elapsed < self.debug_spacing {
            token.sleep(self.debug_spacing - elapsed, self.handoff_slice);
        }
    }
}

fn encode_preview(preview: Option<FrameRef>) -> String {
    preview
        .map(|frame| STANDARD.encode(frame.data()))
        .unwrap_or_default()
}

fn run_parallel(ctx: &WorkerContext, instance: &Mutex<ModelInstance>, token: &CancelToken) {
    while token.is_running() {
        let Some((raw, preview)) = ctx.fetch() else {
            continue;
        };
        if !ctx.is_enabled() {
            continue;
        }
        let started = Instant::now();
        let outcome = lock_instance(instance).infer(raw, None);
        let image = encode_preview(preview);
        ctx.publish(outcome, &image);
        ctx.pace(token, started);
    }
}

/// Wait for the previous stage's output, re-checking cancellation between
/// slices. `None` means the worker is shutting down.
fn wait_handoff(
    slot: &Receiver<Option<FrameRef>>,
    token: &CancelToken,
    slice: Duration,
) -> Option<Option<FrameRef>> {
    while token.is_running() {
        match slot.recv_timeout(slice) {
            Ok(input) => return Some(input),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
    None
}

fn run_serial(ctx: &WorkerContext, chain: &[Arc<Mutex<ModelInstance>>], token: &CancelToken) {
    // One slot in front of every stage but the first.
    let slots: Vec<(Sender<Option<FrameRef>>, Receiver<Option<FrameRef>>)> =
        (1..chain.len()).map(|_| bounded(1)).collect();
    let next_inputs: Vec<Option<InputSpec>> = (0..chain.len())
        .map(|i| chain.get(i + 1).map(|next| lock_instance(next).input_spec()))
        .collect();

    while token.is_running() {
        let Some((raw, preview)) = ctx.fetch() else {
            continue;
        };
        if !ctx.is_enabled() {
            continue;
        }
        let started = Instant::now();
        let image = encode_preview(preview);

        let mut input = Some(raw);
        for (stage, instance) in chain.iter().enumerate() {
            if stage > 0 {
                match wait_handoff(&slots[stage - 1].1, token, ctx.handoff_slice) {
                    Some(handed) => input = handed,
                    None => break,
                }
            }
            // Nothing for this stage to look at.
            let Some(frame) = input.take() else {
                break;
            };
            let outcome = lock_instance(instance).infer(frame, next_inputs[stage]);
            let handoff = ctx.publish(outcome, &image);
            if let Some((slot, _)) = slots.get(stage) {
                if slot.try_send(handoff).is_err() {
                    tracing::warn!("model#{}: stage {} slot occupied", ctx.id, stage + 1);
                }
            }
        }
        for (_, slot) in &slots {
            while slot.try_recv().is_ok() {}
        }
        ctx.pace(token, started);
    }
}

// ── Node ──

#[derive(Default)]
struct ModelState {
    mode: RunMode,
    /// Debug output requested by configuration.
    debug: bool,
    instances: Vec<Arc<Mutex<ModelInstance>>>,
    camera: Option<Arc<CameraNode>>,
    workers: Vec<Worker>,
}

/// Inference stage.
pub struct ModelNode {
    core: NodeCore,
    engine: Arc<dyn InferenceEngine>,
    settings: PipelineSettings,
    flags: Arc<ModelFlags>,
    raw: Arc<Mailbox>,
    jpeg: Arc<Mailbox>,
    state: Mutex<ModelState>,
}

impl ModelNode {
    pub fn new(
        id: &str,
        responder: Responder,
        engine: Arc<dyn InferenceEngine>,
        settings: PipelineSettings,
    ) -> Self {
        let core = NodeCore::new(id, NodeType::Model.type_name(), responder);
        let raw = Arc::new(Mailbox::new(
            format!("{}-raw", core.label()),
            settings.model_capacity,
        ));
        let jpeg = Arc::new(Mailbox::new(
            format!("{}-jpeg", core.label()),
            settings.model_capacity,
        ));
        Self {
            core,
            engine,
            settings,
            flags: Arc::new(ModelFlags {
                enabled: AtomicBool::new(true),
                debug: AtomicBool::new(false),
                count: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            raw,
            jpeg,
            state: Mutex::new(ModelState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Results published so far.
    pub fn invocations(&self) -> u64 {
        self.flags.count.load(Ordering::Acquire)
    }

    /// Model runs that failed.
    pub fn failures(&self) -> u64 {
        self.flags.failures.load(Ordering::Relaxed)
    }

    pub fn mode(&self) -> RunMode {
        self.lock_state().mode
    }

    pub fn model_count(&self) -> usize {
        self.lock_state().instances.len()
    }

    /// Whether preview frames are currently being fetched.
    pub fn is_debug(&self) -> bool {
        self.flags.debug.load(Ordering::Acquire)
    }

    fn first_input(state: &ModelState) -> NodeResult<InputSpec> {
        state
            .instances
            .first()
            .map(|instance| lock_instance(instance).input_spec())
            .ok_or_else(|| NodeError::Config("no model loaded".into()))
    }

    /// Configure and attach the JPEG preview. A busy channel is shared as
    /// it is.
    fn attach_preview(&self, camera: &CameraNode, input: InputSpec) -> bool {
        let request = ChannelRequest::default()
            .size(input.width, input.height)
            .fps(self.settings.model_fps)
            .format(PixelFormat::Jpeg);
        match camera.config(Channel::Jpeg as u32, request) {
            Ok(_) => {}
            Err(NodeError::Busy(msg)) => {
                tracing::warn!("{}: sharing preview channel: {}", self.core.label(), msg);
            }
            Err(e) => {
                tracing::warn!("{}: no preview: {}", self.core.label(), e);
                return false;
            }
        }
        camera.attach(Channel::Jpeg, &self.jpeg)
    }

    fn set_debug(&self, state: &mut ModelState, debug: bool) -> NodeResult<()> {
        state.debug = debug;
        let Some(camera) = state.camera.clone() else {
            return Ok(());
        };
        if debug {
            let attached = self.attach_preview(&camera, Self::first_input(state)?);
            self.flags.debug.store(attached, Ordering::Release);
        } else {
            self.flags.debug.store(false, Ordering::Release);
            camera.detach(Channel::Jpeg, &self.jpeg);
            self.jpeg.drain();
        }
        Ok(())
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            id: self.core.id().to_string(),
            responder: self.core.responder().clone(),
            flags: self.flags.clone(),
            raw: self.raw.clone(),
            jpeg: self.jpeg.clone(),
            fetch_timeout: self.settings.fetch_timeout(),
            handoff_slice: self.settings.handoff_slice(),
            debug_spacing: self.settings.debug_spacing(),
        }
    }

    fn spawn_workers(&self, state: &ModelState) -> NodeResult<Vec<Worker>> {
        let label = self.core.label();
        match state.mode {
            RunMode::Parallel => state
                .instances
                .iter()
                .enumerate()
                .map(|(index, instance)| {
                    let ctx = self.worker_context();
                    let instance = instance.clone();
                    Worker::spawn(format!("{label}[{index}]"), move |token| {
                        run_parallel(&ctx, &instance, &token)
                    })
                })
                .collect(),
            RunMode::Serial => {
                let ctx = self.worker_context();
                let chain = state.instances.clone();
                let worker = Worker::spawn(format!("{label}-chain"), move |token| {
                    run_serial(&ctx, &chain, &token)
                })?;
                Ok(vec![worker])
            }
        }
    }

    fn detach_all(&self, camera: &CameraNode) {
        camera.detach(Channel::Raw, &self.raw);
        camera.detach(Channel::Jpeg, &self.jpeg);
        self.raw.drain();
        self.jpeg.drain();
    }

    fn apply_config(&self, data: &Value) -> NodeResult<Value> {
        let fields = data
            .as_object()
            .ok_or_else(|| NodeError::InvalidArgument("config expects an object".into()))?;
        let mut state = self.lock_state();
        let targets = match fields.get("index") {
            Some(index) => {
                let index = index
                    .as_u64()
                    .ok_or_else(|| NodeError::InvalidArgument("index must be a number".into()))?;
                let instance = state.instances.get(index as usize).ok_or_else(|| {
                    NodeError::InvalidArgument(format!("no model at index {index}"))
                })?;
                vec![instance.clone()]
            }
            None => state.instances.clone(),
        };
        for instance in &targets {
            lock_instance(instance).apply(fields)?;
        }
        if let Some(debug) = fields.get("debug").and_then(Value::as_bool) {
            self.set_debug(&mut state, debug)?;
        }
        Ok(data.clone())
    }
}

impl Node for ModelNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn on_create(&self, config: &Value) -> NodeResult<()> {
        let config = ModelNodeConfig::from_value(config)?;
        let instances = load_instances(self.engine.as_ref(), &config.instances())?;
        let models: Vec<Value> = instances.iter().map(ModelInstance::describe).collect();
        tracing::info!(
            "{}: {} model(s), {:?} mode",
            self.core.label(),
            instances.len(),
            config.mode
        );

        let mut state = self.lock_state();
        state.mode = config.mode;
        state.debug = config.debug;
        state.instances = instances
            .into_iter()
            .map(|instance| Arc::new(Mutex::new(instance)))
            .collect();
        drop(state);

        self.core.reply(ControlReply::ok(
            "create",
            json!({ "mode": config.mode, "debug": config.debug, "models": models }),
        ));
        Ok(())
    }

    fn on_start(&self, ctx: &StartContext) -> NodeResult<()> {
        if self.core.is_started() {
            return Ok(());
        }
        let camera = ctx
            .dependency::<CameraNode>(NodeType::Camera.type_name())
            .ok_or_else(|| {
                NodeError::NotSupported(format!("{}: no camera dependency", self.core.label()))
            })?;

        let mut state = self.lock_state();
        let input = Self::first_input(&state)?;
        camera.config(
            Channel::Raw as u32,
            ChannelRequest::default()
                .size(input.width, input.height)
                .fps(self.settings.model_fps)
                .format(input.format),
        )?;
        if !camera.attach(Channel::Raw, &self.raw) {
            return Err(NodeError::NotSupported(format!(
                "{}: raw channel disabled",
                self.core.label()
            )));
        }
        let preview_on = state.debug && self.attach_preview(&camera, input);
        self.flags.debug.store(preview_on, Ordering::Release);

        let workers = match self.spawn_workers(&state) {
            Ok(workers) => workers,
            Err(e) => {
                self.detach_all(&camera);
                return Err(e);
            }
        };
        tracing::info!(
            "{}: {} worker(s), debug = {}",
            self.core.label(),
            workers.len(),
            preview_on
        );
        state.workers = workers;
        state.camera = Some(camera);
        drop(state);
        self.core.transition(NodeState::Started)
    }

    fn on_control(&self, name: &str, data: &Value) -> ControlReply {
        match name {
            "config" => ControlReply::from_result(name, self.apply_config(data)),
            "enabled" => {
                let Some(enabled) = data.as_bool() else {
                    return ControlReply::error(
                        name,
                        &NodeError::InvalidArgument("enabled expects a bool".into()),
                    );
                };
                self.flags.enabled.store(enabled, Ordering::Release);
                self.core.set_enabled(enabled);
                ControlReply::ok(name, json!({ "enabled": enabled }))
            }
            _ => ControlReply::error(name, &NodeError::NotSupportedControl(name.to_string())),
        }
    }

    fn on_stop(&self) -> NodeResult<()> {
        if !self.core.is_started() {
            return Ok(());
        }
        let (workers, camera) = {
            let mut state = self.lock_state();
            (std::mem::take(&mut state.workers), state.camera.take())
        };
        for worker in &workers {
            worker.token().cancel();
        }
        drop(workers);
        if let Some(camera) = camera {
            self.detach_all(&camera);
        }
        self.flags.debug.store(false, Ordering::Release);
        self.core.transition(NodeState::Stopped)
    }

    fn on_destroy(&self) -> NodeResult<()> {
        self.on_stop()?;
        let mut instances = std::mem::take(&mut self.lock_state().instances);
        while let Some(instance) = instances.pop() {
            drop(instance);
        }
        self.core.transition(NodeState::Destroyed)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
