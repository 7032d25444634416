//! In-process media pipeline.
//!
//! Nodes are created by id and type, declare which nodes they depend on,
//! and are started by the [`NodeFactory`] once every dependency is up.
//! Media moves from the camera to its consumers as reference-counted
//! [`Frame`]s through bounded [`Mailbox`]es; a full mailbox drops the new
//! frame instead of stalling capture.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──► [model]  raw (+ jpeg in debug mode)
//! [hal] ──► [camera] ──┼──► [save]   h264
//!                      ├──► [stream] h264
//!                      └──► [qrcode] raw
//!
//! [NodeBridge] ──commands──► [NodeServer] ──► [NodeFactory]
//!      ▲                                           │
//!      └────────── replies + node events ◄─────────┘
//! ```
//!
//! # Design
//!
//! - **Explicit scheduler context**: the factory owns the node table; there
//!   is no global registry.
//! - **Drop, don't block**: producers post with short bounded waits.
//! - **Exactly-once release**: a frame's buffer goes back to its pool when
//!   the last [`FrameRef`] is dropped.
//! - **Cancellable workers**: every consumer thread polls a
//!   [`CancelToken`] between bounded waits.

pub mod bridge;
pub mod error;
pub mod factory;
pub mod frame;
pub mod mailbox;
pub mod node;
pub mod node_type;
pub mod nodes;
pub mod server;
pub mod worker;

pub use bridge::{
    ControlReply, NodeBridge, NodeCommand, NodeMessage, NodeRequest, ReplyKind, Responder,
};
pub use error::{ErrorCode, NodeError, NodeResult};
pub use factory::{CreateReport, NodeFactory, NodeRegistry, NodeSnapshot};
pub use frame::{fan_out, Channel, Frame, FrameInfo, FrameRef, PixelFormat};
pub use mailbox::{Mailbox, PostError};
pub use node::{Node, NodeCore, NodeHandle, NodeState, StartContext};
pub use node_type::NodeType;
pub use nodes::Backends;
pub use server::NodeServer;
pub use worker::{CancelToken, Worker};
