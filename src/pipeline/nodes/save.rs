//! Recorder node: writes the camera's H.264 elementary stream to disk.
//!
//! Recording is split into segments named after their local start time
//! (`20260118_142501.h264`). A new segment only ever starts on a key unit,
//! so every file is decodable on its own. The storage directory is kept
//! under the configured byte budget by deleting the oldest recordings.

use chrono::Local;
use serde_json::{json, Value};
use std::any::Any;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::camera::{CameraNode, ChannelRequest};
use crate::config::{PipelineSettings, StorageSettings};
use crate::pipeline::bridge::{ControlReply, Responder};
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::frame::{Channel, Frame};
use crate::pipeline::mailbox::Mailbox;
use crate::pipeline::node::{Node, NodeCore, NodeState, StartContext};
use crate::pipeline::node_type::NodeType;
use crate::pipeline::worker::{CancelToken, Worker};

pub const DEFAULT_SLICE_SECS: u64 = 300;
const SEGMENT_EXTENSION: &str = "h264";

#[derive(Debug, Clone, PartialEq)]
pub struct SaveOptions {
    pub storage: PathBuf,
    /// Segment length. Zero keeps one file for the whole recording.
    pub slice: Duration,
    /// Stop recording after this long.
    pub duration: Option<Duration>,
    pub enabled: bool,
}

impl SaveOptions {
    /// `storage` is `"local"`, `"external"` or a directory path.
    pub fn from_config(config: &Value, storage: &StorageSettings) -> NodeResult<Self> {
        let invalid = |what: &str| NodeError::InvalidArgument(format!("save config: {what}"));
        if !config.is_object() && !config.is_null() {
            return Err(invalid("expected an object"));
        }
        let dir = match config.get("storage") {
            None => storage.local.clone(),
            Some(Value::String(s)) if s == "local" => storage.local.clone(),
            Some(Value::String(s)) if s == "external" => storage.external.clone(),
            Some(Value::String(s)) if !s.is_empty() => PathBuf::from(s),
            Some(_) => return Err(invalid("invalid storage")),
        };
        let slice = match config.get("slice") {
            None => DEFAULT_SLICE_SECS,
            Some(v) => v.as_u64().ok_or_else(|| invalid("slice must be seconds"))?,
        };
        let duration = match config.get("duration") {
            None => None,
            Some(v) => v
                .as_i64()
                .ok_or_else(|| invalid("duration must be seconds"))
                .map(|secs| (secs > 0).then(|| Duration::from_secs(secs as u64)))?,
        };
        let enabled = match config.get("enabled") {
            None => true,
            Some(v) => v.as_bool().ok_or_else(|| invalid("enabled must be a bool"))?,
        };
        Ok(Self {
            storage: dir,
            slice: Duration::from_secs(slice),
            duration,
            enabled,
        })
    }
}

// ── Recorder ──

struct Segment {
    path: PathBuf,
    writer: BufWriter<File>,
    opened: Instant,
}

/// What one write did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// No segment open and the unit is not a key unit.
    Skipped,
    Written,
    /// First segment of a recording was opened.
    Started(PathBuf),
    /// A new segment replaced the previous one.
    Rotated(PathBuf),
    /// The recording reached its duration and was closed.
    Finished,
}

/// Segment writer. Owned by the recording thread.
pub struct Recorder {
    dir: PathBuf,
    slice: Duration,
    duration: Option<Duration>,
    max_bytes: u64,
    segment: Option<Segment>,
    began: Option<Instant>,
    /// Bytes in `dir` as of the last scan plus writes since.
    usage: u64,
}

fn segment_files(dir: &Path) -> NodeResult<Vec<(PathBuf, u64, std::time::SystemTime)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            files.push((entry.path(), meta.len(), modified));
        }
    }
    files.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));
    Ok(files)
}

impl Recorder {
    pub fn new(dir: impl Into<PathBuf>, slice: Duration, duration: Option<Duration>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            slice,
            duration,
            max_bytes,
            segment: None,
            began: None,
            usage: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.segment.is_some()
    }

    pub fn current(&self) -> Option<&Path> {
        self.segment.as_ref().map(|s| s.path.as_path())
    }

    fn next_path(&self) -> PathBuf {
        let stem = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = self.dir.join(format!("{stem}.{SEGMENT_EXTENSION}"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{stem}-{n}.{SEGMENT_EXTENSION}"));
            n += 1;
        }
        path
    }

    fn open(&mut self) -> NodeResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.next_path();
        let file = File::create(&path)?;
        tracing::info!("save to {}", path.display());
        self.usage = segment_files(&self.dir)?.iter().map(|f| f.1).sum();
        self.segment = Some(Segment {
            path: path.clone(),
            writer: BufWriter::new(file),
            opened: Instant::now(),
        });
        Ok(path)
    }

    /// Flush and close the open segment, if any.
    pub fn close(&mut self) {
        if let Some(mut segment) = self.segment.take() {
            if let Err(e) = segment.writer.flush() {
                tracing::warn!("flush {} failed: {}", segment.path.display(), e);
            }
        }
    }

    /// Delete the oldest recordings until `incoming` more bytes fit the
    /// budget. The open segment is never deleted.
    pub fn recycle(&mut self, incoming: u64) -> NodeResult<()> {
        if self.usage + incoming <= self.max_bytes {
            return Ok(());
        }
        let files = segment_files(&self.dir)?;
        self.usage = files.iter().map(|f| f.1).sum();
        let current = self.current().map(Path::to_path_buf);
        for (path, size, _) in files {
            if self.usage + incoming <= self.max_bytes {
                break;
            }
            if current.as_ref() == Some(&path) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!("recycle {}", path.display());
                    self.usage = self.usage.saturating_sub(size);
                }
                Err(e) => tracing::warn!("recycle {} failed: {}", path.display(), e),
            }
        }
        if self.usage + incoming > self.max_bytes {
            return Err(NodeError::OutOfMemory("No space left on device".into()));
        }
        Ok(())
    }

    pub fn write(&mut self, frame: &Frame) -> NodeResult<Step> {
        let mut step = Step::Written;
        if frame.is_key() {
            let rotate = match &self.segment {
                None => true,
                Some(segment) => !self.slice.is_zero() && segment.opened.elapsed() >= self.slice,
            };
            if rotate {
                let starting = self.segment.is_none();
                self.close();
                let path = self.open()?;
                step = if starting {
                    self.began = Some(Instant::now());
                    tracing::info!("start recording");
                    Step::Started(path)
                } else {
                    Step::Rotated(path)
                };
            }
        }
        if self.segment.is_none() {
            return Ok(Step::Skipped);
        }

        let len = frame.len() as u64;
        self.recycle(len)?;
        if let Some(segment) = self.segment.as_mut() {
            for block in frame.blocks() {
                segment.writer.write_all(block)?;
            }
        }
        self.usage += len;

        if let (Some(duration), Some(began)) = (self.duration, self.began) {
            if began.elapsed() >= duration {
                self.close();
                self.began = None;
                tracing::info!("stop recording");
                return Ok(Step::Finished);
            }
        }
        Ok(step)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Node ──

#[derive(Debug, Default)]
struct SaveStats {
    enabled: AtomicBool,
    segments: AtomicU64,
    bytes: AtomicU64,
}

/// H.264 recorder.
pub struct SaveNode {
    core: NodeCore,
    settings: PipelineSettings,
    stats: Arc<SaveStats>,
    mailbox: Arc<Mailbox>,
    options: Mutex<Option<SaveOptions>>,
    camera: Mutex<Option<Arc<CameraNode>>>,
    worker: Mutex<Option<Worker>>,
}

impl SaveNode {
    pub fn new(id: &str, responder: Responder, settings: PipelineSettings) -> Self {
        let core = NodeCore::new(id, NodeType::Save.type_name(), responder);
        let mailbox = Arc::new(Mailbox::new(
            format!("{}-h264", core.label()),
            settings.encoded_capacity,
        ));
        Self {
            core,
            settings,
            stats: Arc::new(SaveStats::default()),
            mailbox,
            options: Mutex::new(None),
            camera: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    fn options(&self) -> MutexGuard<'_, Option<SaveOptions>> {
        self.options.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Segments opened so far.
    pub fn segments(&self) -> u64 {
        self.stats.segments.load(Ordering::Acquire)
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.stats.bytes.load(Ordering::Acquire)
    }

    pub fn is_recording_enabled(&self) -> bool {
        self.stats.enabled.load(Ordering::Acquire)
    }

    pub fn storage(&self) -> Option<PathBuf> {
        self.options().as_ref().map(|o| o.storage.clone())
    }

    fn set_enabled(&self, enabled: bool) {
        self.stats.enabled.store(enabled, Ordering::Release);
        self.core.set_enabled(enabled);
    }
}

fn record_loop(
    token: &CancelToken,
    mailbox: &Mailbox,
    mut recorder: Recorder,
    stats: &SaveStats,
    responder: &Responder,
    id: &str,
    fetch_timeout: Duration,
) {
    while token.is_running() {
        let Ok(frame) = mailbox.fetch(fetch_timeout) else {
            continue;
        };
        if !stats.enabled.load(Ordering::Acquire) {
            recorder.close();
            continue;
        }
        match recorder.write(&frame) {
            Ok(Step::Skipped) => {}
            Ok(Step::Written) => {
                stats.bytes.fetch_add(frame.len() as u64, Ordering::AcqRel);
            }
            Ok(Step::Started(path)) => {
                stats.segments.fetch_add(1, Ordering::AcqRel);
                stats.bytes.fetch_add(frame.len() as u64, Ordering::AcqRel);
                responder.publish(id, ControlReply::ok("start", json!({ "file": path })));
            }
            Ok(Step::Rotated(_)) => {
                stats.segments.fetch_add(1, Ordering::AcqRel);
                stats.bytes.fetch_add(frame.len() as u64, Ordering::AcqRel);
            }
            Ok(Step::Finished) => {
                stats.bytes.fetch_add(frame.len() as u64, Ordering::AcqRel);
                stats.enabled.store(false, Ordering::Release);
                responder.publish(id, ControlReply::ok("stop", Value::Null));
            }
            Err(e) => {
                tracing::warn!("save#{}: {}", id, e);
                recorder.close();
                stats.enabled.store(false, Ordering::Release);
                responder.publish(id, ControlReply::error("save", &e));
            }
        }
    }
    recorder.close();
}

impl Node for SaveNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn on_create(&self, config: &Value) -> NodeResult<()> {
        let options = SaveOptions::from_config(config, &self.settings.storage)?;
        fs::create_dir_all(&options.storage).map_err(|e| {
            NodeError::InvalidArgument(format!("storage {}: {e}", options.storage.display()))
        })?;
        let used: u64 = segment_files(&options.storage)?.iter().map(|f| f.1).sum();
        let available = self.settings.storage.max_bytes.saturating_sub(used) / 1024;
        tracing::info!(
            "{}: storage {}, slice {:?}, duration {:?}, available {}KB",
            self.core.label(),
            options.storage.display(),
            options.slice,
            options.duration,
            available
        );
        self.set_enabled(options.enabled);
        self.core.reply(ControlReply::ok(
            "create",
            json!({
                "storage": options.storage,
                "slice": options.slice.as_secs(),
                "duration": options.duration.map_or(-1, |d| d.as_secs() as i64),
                "available": available,
            }),
        ));
        *self.options() = Some(options);
        Ok(())
    }

    fn on_start(&self, ctx: &StartContext) -> NodeResult<()> {
        if self.core.is_started() {
            return Ok(());
        }
        let camera = ctx
            .dependency::<CameraNode>(NodeType::Camera.type_name())
            .ok_or_else(|| NodeError::NotSupported(format!("{}: camera not found", self.core.label())))?;
        let options = self
            .options()
            .clone()
            .ok_or_else(|| NodeError::Config(format!("{}: not created", self.core.label())))?;

        camera.config(Channel::H264 as u32, ChannelRequest::default())?;
        if !camera.attach(Channel::H264, &self.mailbox) {
            return Err(NodeError::NotSupported(format!(
                "{}: H.264 channel disabled",
                self.core.label()
            )));
        }

        let mut recorder = Recorder::new(
            &options.storage,
            options.slice,
            options.duration,
            self.settings.storage.max_bytes,
        );
        if let Err(e) = recorder.recycle(0) {
            tracing::warn!("{}: {}", self.core.label(), e);
        }
        let mailbox = self.mailbox.clone();
        let stats = self.stats.clone();
        let responder = self.core.responder().clone();
        let id = self.core.id().to_string();
        let fetch_timeout = self.settings.fetch_timeout();
        let worker = match Worker::spawn(self.core.label(), move |token| {
            record_loop(&token, &mailbox, recorder, &stats, &responder, &id, fetch_timeout)
        }) {
            Ok(worker) => worker,
            Err(e) => {
                camera.detach(Channel::H264, &self.mailbox);
                return Err(e);
            }
        };
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(worker);
        *self.camera.lock().unwrap_or_else(|e| e.into_inner()) = Some(camera);
        self.core.transition(NodeState::Started)
    }

    fn on_control(&self, name: &str, data: &Value) -> ControlReply {
        match name {
            "enable" => {
                self.set_enabled(true);
                ControlReply::ok(name, Value::Null)
            }
            "disable" => {
                self.set_enabled(false);
                ControlReply::ok(name, Value::Null)
            }
            "enabled" => match data.as_bool() {
                Some(enabled) => {
                    self.set_enabled(enabled);
                    ControlReply::ok(name, json!({ "enabled": enabled }))
                }
                None => ControlReply::error(
                    name,
                    &NodeError::InvalidArgument("enabled expects a bool".into()),
                ),
            },
            _ => ControlReply::error(name, &NodeError::NotSupportedControl(name.to_string())),
        }
    }

    fn on_stop(&self) -> NodeResult<()> {
        if !self.core.is_started() {
            return Ok(());
        }
        // Joining the worker closes the open segment.
        drop(self.worker.lock().unwrap_or_else(|e| e.into_inner()).take());
        if let Some(camera) = self.camera.lock().unwrap_or_else(|e| e.into_inner()).take() {
            camera.detach(Channel::H264, &self.mailbox);
        }
        self.mailbox.drain();
        self.core.transition(NodeState::Stopped)
    }

    fn on_destroy(&self) -> NodeResult<()> {
        self.on_stop()?;
        self.core.transition(NodeState::Destroyed)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
