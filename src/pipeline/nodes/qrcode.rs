//! QR code scanner node.
//!
//! Pulls raw RGB888 frames, converts them to 8-bit luma and runs the
//! plugged-in [`QrDecoder`]. Each scan publishes a `qrcode` event, found
//! codes or not; scans are spaced by the configured interval.

use serde_json::{json, Value};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::camera::{CameraNode, ChannelRequest};
use crate::backend::sinks::QrDecoder;
use crate::config::PipelineSettings;
use crate::pipeline::bridge::{ControlReply, Responder};
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::frame::{Channel, Frame, PixelFormat};
use crate::pipeline::mailbox::Mailbox;
use crate::pipeline::node::{Node, NodeCore, NodeState, StartContext};
use crate::pipeline::node_type::NodeType;
use crate::pipeline::worker::{CancelToken, Worker};

/// BT.601 luma of a packed RGB888 image.
pub fn rgb_to_gray(rgb: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
    let pixels = width as usize * height as usize;
    if rgb.len() < pixels * 3 {
        return None;
    }
    Some(
        rgb.chunks_exact(3)
            .take(pixels)
            .map(|p| (0.299 * f32::from(p[0]) + 0.587 * f32::from(p[1]) + 0.114 * f32::from(p[2])) as u8)
            .collect(),
    )
}

#[derive(Debug)]
struct ScanState {
    enabled: AtomicBool,
    scans: AtomicU64,
}

pub struct QrCodeNode {
    core: NodeCore,
    decoder: Arc<dyn QrDecoder>,
    settings: PipelineSettings,
    mailbox: Arc<Mailbox>,
    state: Arc<ScanState>,
    camera: Mutex<Option<Arc<CameraNode>>>,
    worker: Mutex<Option<Worker>>,
}

impl QrCodeNode {
    pub fn new(
        id: &str,
        responder: Responder,
        decoder: Arc<dyn QrDecoder>,
        settings: PipelineSettings,
    ) -> Self {
        let core = NodeCore::new(id, NodeType::QrCode.type_name(), responder);
        let mailbox = Arc::new(Mailbox::new(format!("{}-raw", core.label()), 1));
        Self {
            core,
            decoder,
            settings,
            mailbox,
            state: Arc::new(ScanState {
                enabled: AtomicBool::new(true),
                scans: AtomicU64::new(0),
            }),
            camera: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Frames scanned so far.
    pub fn scans(&self) -> u64 {
        self.state.scans.load(Ordering::Acquire)
    }
}

fn scan(decoder: &dyn QrDecoder, frame: &Frame) -> Option<Value> {
    if frame.format() != PixelFormat::Rgb888 {
        tracing::warn!("qrcode: {:?} frame skipped", frame.format());
        return None;
    }
    let (width, height) = (frame.width(), frame.height());
    let gray = rgb_to_gray(frame.data(), width, height)?;
    let codes = decoder.decode(&gray, width, height);
    Some(json!({
        "count": codes.len(),
        "codes": codes,
        "resolution": [width, height],
    }))
}

#[allow(clippy::too_many_arguments)]
fn scan_loop(
    token: &CancelToken,
    mailbox: &Mailbox,
    decoder: &dyn QrDecoder,
    state: &ScanState,
    responder: &Responder,
    id: &str,
    fetch_timeout: Duration,
    interval: Duration,
) {
    responder.publish(
        id,
        ControlReply::ok("enabled", json!(state.enabled.load(Ordering::Acquire))),
    );
    while token.is_running() {
        let Ok(frame) = mailbox.fetch(fetch_timeout) else {
            continue;
        };
        if !state.enabled.load(Ordering::Acquire) {
            continue;
        }
        let result = scan(decoder, &frame);
        drop(frame);
        if let Some(data) = result {
            state.scans.fetch_add(1, Ordering::AcqRel);
            responder.publish(id, ControlReply::event("qrcode", data));
        }
        if !interval.is_zero() {
            token.sleep(interval, fetch_timeout);
        }
    }
}

impl Node for QrCodeNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn on_create(&self, _config: &Value) -> NodeResult<()> {
        self.core
            .reply(ControlReply::ok("create", json!({ "status": "initialized" })));
        Ok(())
    }

    fn on_start(&self, ctx: &StartContext) -> NodeResult<()> {
        if self.core.is_started() {
            return Ok(());
        }
        let camera = ctx
            .dependency::<CameraNode>(NodeType::Camera.type_name())
            .ok_or_else(|| NodeError::NotSupported(format!("{}: no camera node found", self.core.label())))?;
        camera.config(
            Channel::Raw as u32,
            ChannelRequest::default().format(PixelFormat::Rgb888),
        )?;
        if !camera.attach(Channel::Raw, &self.mailbox) {
            return Err(NodeError::NotSupported(format!(
                "{}: raw channel disabled",
                self.core.label()
            )));
        }

        let mailbox = self.mailbox.clone();
        let decoder = self.decoder.clone();
        let state = self.state.clone();
        let responder = self.core.responder().clone();
        let id = self.core.id().to_string();
        let fetch_timeout = self.settings.fetch_timeout();
        let interval = self.settings.qrcode_interval();
        let worker = Worker::spawn(self.core.label(), move |token| {
            scan_loop(
                &token,
                &mailbox,
                decoder.as_ref(),
                &state,
                &responder,
                &id,
                fetch_timeout,
                interval,
            )
        });
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                camera.detach(Channel::Raw, &self.mailbox);
                return Err(e);
            }
        };
        tracing::info!("{}: started", self.core.label());
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(worker);
        *self.camera.lock().unwrap_or_else(|e| e.into_inner()) = Some(camera);
        self.core.transition(NodeState::Started)
    }

    fn on_control(&self, name: &str, data: &Value) -> ControlReply {
        match (name, data) {
            ("enabled", Value::Bool(enabled)) => {
                self.state.enabled.store(*enabled, Ordering::Release);
                self.core.set_enabled(*enabled);
                ControlReply::ok(name, json!(enabled))
            }
            ("config", _) => ControlReply::ok(name, data.clone()),
            _ => ControlReply::error(name, &NodeError::NotSupportedControl(name.to_string())),
        }
    }

    fn on_stop(&self) -> NodeResult<()> {
        if !self.core.is_started() {
            return Ok(());
        }
        drop(self.worker.lock().unwrap_or_else(|e| e.into_inner()).take());
        if let Some(camera) = self.camera.lock().unwrap_or_else(|e| e.into_inner()).take() {
            camera.detach(Channel::Raw, &self.mailbox);
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
