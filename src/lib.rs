//! # camnode: media pipeline orchestrator for embedded cameras
//!
//! A small in-process runtime that wires a fixed set of stages (sensor
//! capture, inference, recording, streaming, QR decoding) into a dependency
//! graph, starts and stops them in order, and routes video and audio
//! frames between them through bounded, backpressure-aware queues.
//!
//! ## Architecture
//!
//! - **Pipeline**: node lifecycle, the dependency scheduler, frames,
//!   mailboxes and the control-plane bridge
//! - **Backend**: traits for the video hardware, inference engine,
//!   streaming transport and QR decoder, plus in-process mocks
//! - **Analysis**: letterbox mapping, tracking, line counting and cropping
//!   used by the model node
//! - **Communication**: crossbeam channels between the control plane and
//!   the node server thread
//!
//! ## Example
//!
//! ```ignore
//! use camnode::{
//!     backend::{MockEngine, MockHal},
//!     pipeline::{Backends, NodeBridge, NodeFactory, NodeRegistry, NodeRequest, NodeServer},
//!     config::PipelineSettings,
//! };
//! use std::sync::Arc;
//!
//! let (bridge, cmd_rx, responder) = NodeBridge::new();
//! let backends = Backends::new(MockHal::new(), Arc::new(MockEngine::virtual_models()));
//! let registry = NodeRegistry::with_builtins(backends, PipelineSettings::default());
//! let factory = Arc::new(NodeFactory::new(registry, responder));
//! let server = NodeServer::new(factory, cmd_rx).spawn()?;
//!
//! bridge.create(NodeRequest::new("camera0", "camera"));
//! bridge.create(NodeRequest::new("model0", "model").depends_on("camera0"));
//! ```

pub mod analysis;
pub mod backend;
pub mod config;
pub mod error;
pub mod pipeline;

// Re-export commonly used types
pub use config::{AppConfig, PipelineSettings};
pub use error::{CamNodeError, Result};
pub use pipeline::{NodeBridge, NodeFactory, NodeRegistry, NodeRequest, NodeServer};
