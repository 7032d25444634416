//! Built-in node implementations.
//!
//! Each node type is constructed through [`build`], which hands it the
//! collaborators it needs from [`Backends`] and the shared timing settings.
//!
//! | Type | Node | Consumes |
//! |------|------|----------|
//! | `camera` | [`CameraNode`] | video hardware |
//! | `model` | [`ModelNode`] | raw (+ JPEG in debug mode) |
//! | `save` | [`SaveNode`] | H.264 |
//! | `stream` | [`StreamNode`] | H.264 |
//! | `qrcode` | [`QrCodeNode`] | raw |

pub mod camera;
pub mod model;
pub mod qrcode;
pub mod save;
pub mod stream;

pub use camera::{CameraNode, ChannelRequest};
pub use model::{InvokeResult, ModelNode, ModelNodeConfig, RunMode};
pub use qrcode::QrCodeNode;
pub use save::SaveNode;
pub use stream::StreamNode;

use std::sync::Arc;

use super::bridge::Responder;
use super::node::NodeHandle;
use super::node_type::NodeType;
use crate::backend::engine::InferenceEngine;
use crate::backend::hal::VideoHal;
use crate::backend::sinks::{CountingStreamSink, QrDecoder, RqrrDecoder, StreamSink};
use crate::config::PipelineSettings;

/// External collaborators shared by every node built from one registry.
#[derive(Clone)]
pub struct Backends {
    pub hal: Arc<dyn VideoHal>,
    pub engine: Arc<dyn InferenceEngine>,
    pub stream: Arc<dyn StreamSink>,
    pub qr: Arc<dyn QrDecoder>,
}

impl Backends {
    /// Video and inference backends, with the counting stream sink and the
    /// `rqrr` QR decoder.
    pub fn new(hal: Arc<dyn VideoHal>, engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            hal,
            engine,
            stream: Arc::new(CountingStreamSink::new()),
            qr: Arc::new(RqrrDecoder),
        }
    }

    pub fn with_stream(mut self, stream: Arc<dyn StreamSink>) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_qr_decoder(mut self, qr: Arc<dyn QrDecoder>) -> Self {
        self.qr = qr;
        self
    }
}

/// Construct a node of type `ty`. The node is inert until `on_create`.
pub fn build(
    ty: NodeType,
    id: &str,
    responder: Responder,
    backends: &Backends,
    settings: &PipelineSettings,
) -> NodeHandle {
    match ty {
        NodeType::Camera => Arc::new(CameraNode::new(
            id,
            responder,
            backends.hal.clone(),
            settings.clone(),
        )),
        NodeType::Model => Arc::new(ModelNode::new(
            id,
            responder,
            backends.engine.clone(),
            settings.clone(),
        )),
        NodeType::Save => Arc::new(SaveNode::new(id, responder, settings.clone())),
        NodeType::Stream => Arc::new(StreamNode::new(
            id,
            responder,
            backends.stream.clone(),
            settings.clone(),
        )),
        NodeType::QrCode => Arc::new(QrCodeNode::new(
            id,
            responder,
            backends.qr.clone(),
            settings.clone(),
        )),
    }
}
