//! Camera node: the single producer of every frame in the pipeline.
//!
//! Consumers never pull from the camera. They configure a channel, attach
//! their own [`Mailbox`], and the hardware callbacks push frames into every
//! mailbox attached to that channel at the moment the frame is published.
//!
//! # Channels
//!
//! - **Raw**: hardware buffers shared without copying, short post timeout,
//!   full mailboxes are skipped
//! - **JPEG / H.264**: encoder output copied into heap frames, post timeout
//!   of one frame interval
//! - **Audio**: PCM blocks copied into heap frames
//!
//! # Key-frame gating
//!
//! H.264 parameter sets and intra slices arrive as separate packets, and a
//! key unit may be split across encoder callbacks. Key packets are held back
//! until the first non-key packet shows the run is complete, then published
//! as one key frame whose blocks keep the packet boundaries. When a post
//! fails, non-key frames are discarded until the next key frame, since a
//! decoder cannot use them without it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::any::Any;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::backend::hal::{CaptureSink, ChannelParams, EncodedPacket, NaluKind, VideoHal};
use crate::config::PipelineSettings;
use crate::pipeline::bridge::{ControlReply, Responder};
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::frame::{fan_out, Channel, Frame, FrameInfo, HwBuffer, PixelFormat};
use crate::pipeline::mailbox::Mailbox;
use crate::pipeline::node::{Node, NodeCore, NodeState, StartContext};
use crate::pipeline::node_type::NodeType;
use crate::pipeline::worker::{CancelToken, Worker};

/// Encoded resolutions selectable with the `option` setting.
const RESOLUTIONS: [(u32, u32); 3] = [(1920, 1080), (1280, 720), (640, 480)];

const DEFAULT_FPS: u32 = 30;
const MAX_FPS: u32 = 30;

/// Volume used when audio is enabled with `true`.
const DEFAULT_VOLUME: u8 = 80;

/// A key run is flushed once it holds this many packets or bytes.
const MAX_KEY_RUN_BLOCKS: usize = 32;
const MAX_KEY_RUN_BYTES: usize = 4 << 20;

fn default_params(channel: Channel) -> ChannelParams {
    match channel {
        Channel::Raw => ChannelParams::new(1920, 1080, DEFAULT_FPS, PixelFormat::Rgb888),
        Channel::Jpeg => ChannelParams::new(1920, 1080, DEFAULT_FPS, PixelFormat::Jpeg),
        Channel::H264 => ChannelParams::new(1920, 1080, DEFAULT_FPS, PixelFormat::H264),
        Channel::Audio => ChannelParams::new(0, 0, 0, PixelFormat::Pcm16),
    }
}

// ── Channel requests ──

/// What a consumer asks of a channel. `None` fields accept whatever the
/// channel is already set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub format: Option<PixelFormat>,
    pub enabled: bool,
}

impl Default for ChannelRequest {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            fps: None,
            format: None,
            enabled: true,
        }
    }
}

impl ChannelRequest {
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn format(mut self, format: PixelFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn conflicts_with(&self, params: &ChannelParams) -> bool {
        self.width.is_some_and(|w| w != params.width)
            || self.height.is_some_and(|h| h != params.height)
            || self.fps.is_some_and(|f| f != params.fps)
            || self.format.is_some_and(|f| f != params.format)
    }

    fn apply(&self, params: ChannelParams) -> ChannelParams {
        ChannelParams {
            width: self.width.filter(|&w| w > 0).unwrap_or(params.width),
            height: self.height.filter(|&h| h > 0).unwrap_or(params.height),
            fps: self.fps.filter(|&f| f > 0).unwrap_or(params.fps),
            format: self.format.unwrap_or(params.format),
        }
    }
}

// ── Options ──

#[derive(Debug, Clone, PartialEq)]
struct CameraOptions {
    resolution: usize,
    fps: u32,
    volume: u8,
    light: i64,
    mirror: bool,
    flip: bool,
    preview: bool,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            resolution: 0,
            fps: DEFAULT_FPS,
            volume: DEFAULT_VOLUME,
            light: 0,
            mirror: false,
            flip: false,
            preview: false,
        }
    }
}

impl CameraOptions {
    fn from_config(config: &Value) -> NodeResult<Self> {
        if !(config.is_object() || config.is_null()) {
            return Err(NodeError::InvalidArgument(
                "camera config must be an object".into(),
            ));
        }
        let mut options = Self::default();
        match config.get("option") {
            Some(Value::String(name)) => {
                options.resolution = if name.contains("720p") {
                    1
                } else if name.contains("480p") || name.contains("360p") {
                    2
                } else {
                    0
                };
            }
            Some(Value::Number(n)) => {
                let index = n.as_u64().unwrap_or(0) as usize;
                options.resolution = if index < RESOLUTIONS.len() { index } else { 0 };
            }
            _ => {}
        }
        if let Some(fps) = config.get("fps").and_then(Value::as_i64) {
            options.fps = fps.clamp(1, i64::from(MAX_FPS)) as u32;
        }
        match config.get("audio") {
            Some(Value::Bool(on)) => options.volume = if *on { DEFAULT_VOLUME } else { 0 },
            Some(Value::Number(n)) => {
                options.volume = n.as_i64().unwrap_or(0).clamp(0, 100) as u8;
            }
            _ => {}
        }
        if let Some(light) = config.get("light").and_then(Value::as_i64) {
            options.light = light;
        }
        if let Some(mirror) = config.get("mirror").and_then(Value::as_bool) {
            options.mirror = mirror;
        }
        if let Some(flip) = config.get("flip").and_then(Value::as_bool) {
            options.flip = flip;
        }
        if let Some(preview) = config.get("preview").and_then(Value::as_bool) {
            options.preview = preview;
        }
        Ok(options)
    }
}

// ── Per-channel state ──

/// Key packets seen since the last published key frame.
#[derive(Debug, Default)]
struct KeyRun {
    data: Vec<u8>,
    blocks: Vec<Range<usize>>,
    /// An IDR or I slice is already in the run.
    has_slice: bool,
}

impl KeyRun {
    fn push(&mut self, kind: NaluKind, bytes: &[u8]) {
        let start = self.data.len();
        self.data.extend_from_slice(bytes);
        self.blocks.push(start..self.data.len());
        self.has_slice |= matches!(kind, NaluKind::Idr | NaluKind::ISlice);
    }

    /// A parameter set after a slice opens the next access unit.
    fn completed_by(&self, kind: NaluKind) -> bool {
        self.has_slice && matches!(kind, NaluKind::Sps | NaluKind::Pps | NaluKind::Sei)
    }

    fn is_full(&self) -> bool {
        self.blocks.len() >= MAX_KEY_RUN_BLOCKS || self.data.len() >= MAX_KEY_RUN_BYTES
    }

    fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn clear(&mut self) {
        self.data.clear();
        self.blocks.clear();
        self.has_slice = false;
    }

    fn take(&mut self) -> Unit {
        self.has_slice = false;
        Unit {
            data: std::mem::take(&mut self.data),
            blocks: std::mem::take(&mut self.blocks),
            key: true,
        }
    }
}

/// One access unit ready to become a frame.
struct Unit {
    data: Vec<u8>,
    blocks: Vec<Range<usize>>,
    key: bool,
}

impl Unit {
    fn single(bytes: &[u8], key: bool) -> Self {
        Self {
            data: bytes.to_vec(),
            blocks: vec![0..bytes.len()],
            key,
        }
    }
}

#[derive(Debug)]
struct ChannelState {
    params: ChannelParams,
    configured: bool,
    enabled: bool,
    /// A post failed; non-key H.264 frames are discarded until a key frame.
    dropped: bool,
    seq: u64,
    mailboxes: Vec<Arc<Mailbox>>,
    pending: KeyRun,
}

impl ChannelState {
    fn new(channel: Channel) -> Self {
        Self {
            params: default_params(channel),
            configured: false,
            enabled: false,
            dropped: false,
            seq: 0,
            mailboxes: Vec::new(),
            pending: KeyRun::default(),
        }
    }

    /// Split a packet batch into access units, merging key runs.
    fn collect_units(&mut self, channel: Channel, packets: &[EncodedPacket<'_>]) -> Vec<Unit> {
        let mut units = Vec::new();
        for packet in packets {
            if channel == Channel::H264 && packet.kind.is_key() {
                if self.pending.completed_by(packet.kind) {
                    units.push(self.pending.take());
                }
                self.pending.push(packet.kind, packet.data);
                if self.pending.is_full() {
                    tracing::warn!("{}: key run exceeds bounds, flushing", channel);
                    units.push(self.pending.take());
                }
                continue;
            }
            if !self.pending.is_empty() {
                units.push(self.pending.take());
            }
            // Every JPEG image stands alone.
            units.push(Unit::single(packet.data, channel != Channel::H264));
        }
        units
    }
}

// ── Capture sink ──

/// State shared with the hardware callback threads.
struct CameraShared {
    label: String,
    started: AtomicBool,
    enabled: AtomicBool,
    channels: Mutex<[ChannelState; Channel::COUNT]>,
    raw_post_timeout: Duration,
    audio_post_timeout: Duration,
}

impl CameraShared {
    fn lock(&self) -> MutexGuard<'_, [ChannelState; Channel::COUNT]> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[inline]
    fn is_live(&self) -> bool {
        self.started.load(Ordering::Acquire) && self.enabled.load(Ordering::Acquire)
    }

    /// Share `frame` with every mailbox. Returns `false` if any post failed.
    fn publish(&self, frame: Frame, mailboxes: &[Arc<Mailbox>], timeout: Duration) -> bool {
        let mut delivered = true;
        let channel = frame.channel();
        for (mailbox, handle) in mailboxes.iter().zip(fan_out(frame, mailboxes.len())) {
            if mailbox.post(handle, timeout).is_err() {
                tracing::debug!("{}: {} frame dropped for {}", self.label, channel, mailbox.name());
                delivered = false;
            }
        }
        delivered
    }
}

impl CaptureSink for CameraShared {
    fn on_encoded(&self, channel: Channel, packets: &[EncodedPacket<'_>]) {
        if !self.is_live() {
            return;
        }
        if !matches!(channel, Channel::Jpeg | Channel::H264) {
            tracing::warn!("{}: encoded data on {} channel ignored", self.label, channel);
            return;
        }

        let (units, mailboxes, params, mut dropped, mut seq) = {
            let mut channels = self.lock();
            let state = &mut channels[channel.index()];
            if state.mailboxes.is_empty() {
                state.pending.clear();
                return;
            }
            let units = state.collect_units(channel, packets);
            (
                units,
                state.mailboxes.clone(),
                state.params,
                state.dropped,
                state.seq,
            )
        };

        let timeout = PipelineSettings::encoded_post_timeout(params.fps);
        for unit in units {
            if unit.key {
                dropped = false;
            } else if channel == Channel::H264 && dropped {
                continue;
            }
            let info = FrameInfo::new(channel, params.width, params.height, params.format)
                .with_fps(params.fps)
                .with_key(unit.key)
                .with_seq(seq);
            seq += 1;
            if !self.publish(Frame::with_blocks(info, unit.data, unit.blocks), &mailboxes, timeout) {
                dropped = true;
            }
        }

        let mut channels = self.lock();
        let state = &mut channels[channel.index()];
        state.dropped = dropped;
        state.seq = seq;
    }

    fn on_raw(&self, channel: Channel, buffer: HwBuffer, params: ChannelParams) {
        if !self.is_live() {
            return;
        }
        let (mailboxes, seq) = {
            let mut channels = self.lock();
            let state = &mut channels[channel.index()];
            if state.mailboxes.is_empty() {
                return;
            }
            state.seq += 1;
            (state.mailboxes.clone(), state.seq - 1)
        };

        let info = FrameInfo::new(channel, params.width, params.height, params.format)
            .with_fps(params.fps)
            .with_key(true)
            .with_seq(seq);
        let frame = Frame::hardware(info, buffer);
        for (mailbox, handle) in mailboxes.iter().zip(fan_out(frame, mailboxes.len())) {
            let posted = if mailbox.is_full() {
                mailbox.try_post(handle)
            } else {
                mailbox.post(handle, self.raw_post_timeout)
            };
            if posted.is_err() {
                tracing::trace!("{}: raw frame {} skipped for {}", self.label, seq, mailbox.name());
            }
        }
    }

    fn on_audio(&self, pcm: &[u8]) {
        if !self.is_live() {
            return;
        }
        let (mailboxes, seq) = {
            let mut channels = self.lock();
            let state = &mut channels[Channel::Audio.index()];
            if state.mailboxes.is_empty() {
                return;
            }
            state.seq += 1;
            (state.mailboxes.clone(), state.seq - 1)
        };

        let mut info = FrameInfo::new(Channel::Audio, 0, 0, PixelFormat::Pcm16)
            .with_key(true)
            .with_seq(seq);
        info.samples = (pcm.len() / 2) as u32;
        self.publish(Frame::heap(info, pcm.to_vec()), &mailboxes, self.audio_post_timeout);
    }
}

// ── Node ──

/// The camera. A singleton: there is one sensor.
pub struct CameraNode {
    core: NodeCore,
    hal: Arc<dyn VideoHal>,
    settings: PipelineSettings,
    shared: Arc<CameraShared>,
    options: Mutex<CameraOptions>,
    preview_box: Arc<Mailbox>,
    preview: Mutex<Option<Worker>>,
}

impl CameraNode {
    pub fn new(
        id: &str,
        responder: Responder,
        hal: Arc<dyn VideoHal>,
        settings: PipelineSettings,
    ) -> Self {
        let core = NodeCore::new(id, NodeType::Camera.type_name(), responder);
        let shared = Arc::new(CameraShared {
            label: core.label(),
            started: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            channels: Mutex::new(Channel::ALL.map(ChannelState::new)),
            raw_post_timeout: settings.raw_post_timeout(),
            audio_post_timeout: settings.audio_post_timeout(),
        });
        let preview_box = Arc::new(Mailbox::new(
            format!("{}-preview", core.label()),
            settings.preview_capacity,
        ));
        Self {
            core,
            hal,
            settings,
            shared,
            options: Mutex::new(CameraOptions::default()),
            preview_box,
            preview: Mutex::new(None),
        }
    }

    fn options(&self) -> MutexGuard<'_, CameraOptions> {
        self.options.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sink(&self) -> Arc<dyn CaptureSink> {
        self.shared.clone()
    }

    // ── Channel API used by consumers ──

    /// Set up `channel` for a consumer.
    ///
    /// Unspecified request fields keep the channel's current value. Once a
    /// channel feeds at least one mailbox, a request that disagrees with its
    /// parameters fails with `Busy`. A running camera pushes the new
    /// parameters to the hardware immediately.
    pub fn config(&self, channel: u32, request: ChannelRequest) -> NodeResult<ChannelParams> {
        let channel = Channel::try_from(channel)?;
        let params = {
            let mut channels = self.shared.lock();
            let state = &mut channels[channel.index()];
            if state.configured && !state.mailboxes.is_empty() && request.conflicts_with(&state.params)
            {
                return Err(NodeError::Busy(format!(
                    "{}: {} channel already set to {}x{}@{} {:?}",
                    self.shared.label,
                    channel,
                    state.params.width,
                    state.params.height,
                    state.params.fps,
                    state.params.format
                )));
            }
            state.params = request.apply(state.params);
            state.configured = true;
            state.enabled = request.enabled || !state.mailboxes.is_empty();
            if !state.enabled {
                return Ok(state.params);
            }
            state.params
        };

        tracing::info!(
            "{}: config {} channel {}x{}@{} {:?}",
            self.shared.label,
            channel,
            params.width,
            params.height,
            params.fps,
            params.format
        );
        if self.shared.started.load(Ordering::Acquire) {
            self.hal.configure_channel(channel, &params)?;
        }
        Ok(params)
    }

    /// Start delivering `channel` frames to `mailbox`. Returns `false`
    /// (and does nothing) while the channel is disabled.
    pub fn attach(&self, channel: Channel, mailbox: &Arc<Mailbox>) -> bool {
        let mut channels = self.shared.lock();
        let state = &mut channels[channel.index()];
        if !state.enabled {
            tracing::debug!(
                "{}: attach {} to disabled {} channel ignored",
                self.shared.label,
                mailbox.name(),
                channel
            );
            return false;
        }
        if !state.mailboxes.iter().any(|m| Arc::ptr_eq(m, mailbox)) {
            tracing::info!("{}: attach {} to {}", self.shared.label, mailbox.name(), channel);
            state.mailboxes.push(mailbox.clone());
        }
        true
    }

    /// Stop delivering to `mailbox`. Frames already queued stay with it.
    pub fn detach(&self, channel: Channel, mailbox: &Arc<Mailbox>) -> bool {
        let mut channels = self.shared.lock();
        let state = &mut channels[channel.index()];
        let before = state.mailboxes.len();
        state.mailboxes.retain(|m| !Arc::ptr_eq(m, mailbox));
        let detached = state.mailboxes.len() != before;
        if detached {
            tracing::info!("{}: detach {} from {}", self.shared.label, mailbox.name(), channel);
        }
        detached
    }

    /// Current parameters of a configured channel.
    pub fn channel_params(&self, channel: Channel) -> Option<ChannelParams> {
        let channels = self.shared.lock();
        let state = &channels[channel.index()];
        state.configured.then_some(state.params)
    }

    /// Number of mailboxes attached to `channel`.
    pub fn attached(&self, channel: Channel) -> usize {
        self.shared.lock()[channel.index()].mailboxes.len()
    }

    // ── Capture control ──

    fn set_capturing(&self, enabled: bool) -> NodeResult<()> {
        self.shared.enabled.store(enabled, Ordering::Release);
        self.core.set_enabled(enabled);
        if !self.shared.started.load(Ordering::Acquire) {
            return Ok(());
        }
        if enabled {
            self.hal.start(self.sink())
        } else {
            self.hal.stop()
        }
    }

    fn set_preview(&self, preview: bool) -> NodeResult<()> {
        if preview {
            self.config(Channel::Jpeg as u32, ChannelRequest::default())?;
            self.attach(Channel::Jpeg, &self.preview_box);
        } else {
            self.detach(Channel::Jpeg, &self.preview_box);
            self.preview_box.drain();
        }
        self.options().preview = preview;
        Ok(())
    }

    fn spawn_preview(&self) -> NodeResult<()> {
        let mailbox = self.preview_box.clone();
        let responder = self.core.responder().clone();
        let id = self.core.id().to_string();
        let fetch_timeout = self.settings.fetch_timeout();
        let interval = self.settings.preview_interval();
        let worker = Worker::spawn(format!("{}-preview", self.core.label()), move |token| {
            preview_loop(&token, &mailbox, &responder, &id, fetch_timeout, interval)
        })?;
        *self.preview.lock().unwrap_or_else(|e| e.into_inner()) = Some(worker);
        Ok(())
    }

    fn setup(&self, options: &CameraOptions) -> NodeResult<()> {
        self.hal.set_mirror(options.mirror)?;
        self.hal.set_flip(options.flip)?;
        {
            let mut channels = self.shared.lock();
            let (width, height) = RESOLUTIONS[options.resolution];
            for channel in [Channel::H264, Channel::Jpeg] {
                let params = &mut channels[channel.index()].params;
                params.width = width;
                params.height = height;
            }
            for channel in [Channel::Raw, Channel::Jpeg, Channel::H264] {
                channels[channel.index()].params.fps = options.fps;
            }
            if options.volume > 0 {
                let audio = &mut channels[Channel::Audio.index()];
                audio.configured = true;
                audio.enabled = true;
            }
        }
        if options.preview {
            self.set_preview(true)?;
        }
        Ok(())
    }
}

fn preview_loop(
    token: &CancelToken,
    mailbox: &Mailbox,
    responder: &Responder,
    id: &str,
    fetch_timeout: Duration,
    interval: Duration,
) {
    let mut last: Option<Instant> = None;
    let mut count: u64 = 0;
    while token.is_running() {
        let Ok(frame) = mailbox.fetch(fetch_timeout) else {
            continue;
        };
        if last.is_some_and(|t| t.elapsed() < interval) {
            continue;
        }
        count += 1;
        let image = STANDARD.encode(frame.data());
        drop(frame);
        responder.publish(
            id,
            ControlReply::event("sample", json!({ "count": count, "image": image })),
        );
        last = Some(Instant::now());
    }
}

impl Node for CameraNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn on_create(&self, config: &Value) -> NodeResult<()> {
        let options = CameraOptions::from_config(config)?;
        self.hal.init()?;
        if let Err(e) = self.setup(&options) {
            self.hal.deinit();
            return Err(e);
        }
        *self.options() = options;

        let h264 = self.shared.lock()[Channel::H264.index()].params;
        tracing::info!(
            "{}: created {}x{}@{}",
            self.core.label(),
            h264.width,
            h264.height,
            h264.fps
        );
        self.core.reply(ControlReply::ok(
            "create",
            json!({ "width": h264.width, "height": h264.height, "fps": h264.fps }),
        ));
        Ok(())
    }

    fn on_start(&self, _ctx: &StartContext) -> NodeResult<()> {
        if self.core.is_started() {
            return Ok(());
        }
        let options = self.options().clone();
        self.hal.set_light(options.light != 0)?;
        self.hal.set_volume(options.volume)?;

        let active: Vec<(Channel, ChannelParams)> = {
            let channels = self.shared.lock();
            Channel::ALL
                .iter()
                .filter(|ch| {
                    let state = &channels[ch.index()];
                    state.configured && state.enabled
                })
                .map(|ch| (*ch, channels[ch.index()].params))
                .collect()
        };
        if active.is_empty() {
            tracing::warn!("{}: no channel enabled yet", self.core.label());
        }
        for (channel, params) in &active {
            self.hal.configure_channel(*channel, params)?;
        }

        self.shared.started.store(true, Ordering::Release);
        if self.shared.enabled.load(Ordering::Acquire) {
            if let Err(e) = self.hal.start(self.sink()) {
                self.shared.started.store(false, Ordering::Release);
                return Err(e);
            }
        }
        if let Err(e) = self.spawn_preview() {
            self.shared.started.store(false, Ordering::Release);
            let _ = self.hal.stop();
            return Err(e);
        }
        self.core.transition(NodeState::Started)
    }

    fn on_control(&self, name: &str, data: &Value) -> ControlReply {
        match name {
            "preview" => {
                let Some(preview) = data.as_bool() else {
                    return ControlReply::error(
                        name,
                        &NodeError::InvalidArgument("preview expects a bool".into()),
                    );
                };
                let result = if preview != self.options().preview {
                    self.set_preview(preview)
                } else {
                    Ok(())
                };
                ControlReply::from_result(name, result.map(|()| json!({ "preview": preview })))
            }
            "light" => {
                let Some(light) = data.as_i64() else {
                    return ControlReply::error(
                        name,
                        &NodeError::InvalidArgument("light expects a number".into()),
                    );
                };
                self.options().light = light;
                let result = self.hal.set_light(light != 0);
                ControlReply::from_result(name, result.map(|()| json!({ "light": light })))
            }
            "enabled" => {
                let Some(enabled) = data.as_bool() else {
                    return ControlReply::error(
                        name,
                        &NodeError::InvalidArgument("enabled expects a bool".into()),
                    );
                };
                let result = if enabled != self.shared.enabled.load(Ordering::Acquire) {
                    tracing::info!("{}: capture enabled = {}", self.core.label(), enabled);
                    self.set_capturing(enabled)
                } else {
                    Ok(())
                };
                ControlReply::from_result(name, result.map(|()| json!({ "enabled": enabled })))
            }
            _ => ControlReply::error(name, &NodeError::NotSupportedControl(name.to_string())),
        }
    }

    fn on_stop(&self) -> NodeResult<()> {
        if !self.core.is_started() {
            return Ok(());
        }
        self.shared.started.store(false, Ordering::Release);
        if let Err(e) = self.hal.stop() {
            tracing::warn!("{}: stop capture: {}", self.core.label(), e);
        }
        let worker = self.preview.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(worker);
        self.preview_box.drain();
        for state in self.shared.lock().iter_mut() {
            state.pending.clear();
            state.dropped = false;
        }
        self.core.transition(NodeState::Stopped)
    }

    fn on_destroy(&self) -> NodeResult<()> {
        self.on_stop()?;
        for state in self.shared.lock().iter_mut() {
            state.mailboxes.clear();
        }
        self.hal.deinit();
        self.core.transition(NodeState::Destroyed)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
