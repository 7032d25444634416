//! Thread boundary between the node server and whoever drives it.
//!
//! Commands flow in as [`NodeCommand`]s; replies and node events flow back
//! as [`NodeMessage`]s. Nodes publish through a cloned [`Responder`], so
//! events from worker threads share the same outbound queue as command
//! replies.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::error::{ErrorCode, NodeError};

/// Whether a reply answers a command or reports something unsolicited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    Resp,
    Evt,
}

/// Structured reply published on the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    #[serde(rename = "type")]
    pub kind: ReplyKind,
    pub name: String,
    pub code: i32,
    pub data: Value,
}

impl ControlReply {
    pub fn ok(name: impl Into<String>, data: Value) -> Self {
        Self {
            kind: ReplyKind::Resp,
            name: name.into(),
            code: ErrorCode::Ok.as_i32(),
            data,
        }
    }

    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self {
            kind: ReplyKind::Evt,
            name: name.into(),
            code: ErrorCode::Ok.as_i32(),
            data,
        }
    }

    pub fn error(name: impl Into<String>, err: &NodeError) -> Self {
        Self {
            kind: ReplyKind::Resp,
            name: name.into(),
            code: err.code().as_i32(),
            data: Value::String(err.to_string()),
        }
    }

    /// Build a response from a node operation's result.
    pub fn from_result(name: impl Into<String>, result: Result<Value, NodeError>) -> Self {
        match result {
            Ok(data) => Self::ok(name, data),
            Err(err) => Self::error(name, &err),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == ErrorCode::Ok.as_i32()
    }
}

/// A reply tagged with the node it concerns. Empty id = server-level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMessage {
    pub node_id: String,
    pub reply: ControlReply,
}

/// Cheap, cloneable publishing handle handed to every node.
#[derive(Debug, Clone, Default)]
pub struct Responder {
    tx: Option<Sender<NodeMessage>>,
}

impl Responder {
    pub fn new(tx: Sender<NodeMessage>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A responder that discards everything.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    /// Publish without blocking. A full or closed queue drops the message.
    pub fn publish(&self, node_id: &str, reply: ControlReply) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(NodeMessage {
            node_id: node_id.to_string(),
            reply,
        }) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                tracing::debug!("reply queue full, dropping {} from {}", msg.reply.name, node_id);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Declarative request to instantiate a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub dependents: Vec<String>,
}

impl NodeRequest {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: Value::Object(Default::default()),
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn with_dependent(mut self, id: impl Into<String>) -> Self {
        self.dependents.push(id.into());
        self
    }
}

/// Commands processed by the node server thread.
#[derive(Debug, Clone)]
pub enum NodeCommand {
    /// Instantiate a node and run the readiness pass.
    Create(NodeRequest),
    /// Stop and destroy a node (and stop whatever depends on it).
    Destroy(String),
    /// Destroy every node, dependents first.
    Clear,
    /// Forward a control to a node's `on_control`.
    Control {
        node_id: String,
        name: String,
        data: Value,
    },
    /// Report every live node and its state.
    Health,
    /// Shut down the server thread.
    Shutdown,
}

impl NodeCommand {
    /// Map a firmware-style `(name, node id, data)` command onto a variant.
    ///
    /// `create` expects `data` to carry `type`, `config`, `dependencies`
    /// and `dependents`; any unrecognised name is a node control.
    pub fn parse(name: &str, node_id: &str, data: Value) -> Result<Self, NodeError> {
        match name.to_ascii_lowercase().as_str() {
            "create" => {
                let mut request: CreatePayload = serde_json::from_value(data)
                    .map_err(|e| NodeError::InvalidArgument(format!("create payload: {e}")))?;
                if request.node_type.is_empty() {
                    return Err(NodeError::InvalidArgument("create payload: missing type".into()));
                }
                request.node_type.make_ascii_lowercase();
                Ok(NodeCommand::Create(NodeRequest {
                    id: node_id.to_string(),
                    node_type: request.node_type,
                    config: request.config,
                    dependencies: request.dependencies,
                    dependents: request.dependents,
                }))
            }
            "destroy" => Ok(NodeCommand::Destroy(node_id.to_string())),
            "clear" => Ok(NodeCommand::Clear),
            "health" => Ok(NodeCommand::Health),
            _ => Ok(NodeCommand::Control {
                node_id: node_id.to_string(),
                name: name.to_string(),
                data,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatePayload {
    #[serde(rename = "type", default)]
    node_type: String,
    #[serde(default)]
    config: Value,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    dependents: Vec<String>,
}

/// Channel capacity for commands (client → server).
const CMD_CHANNEL_CAPACITY: usize = 256;
/// Channel capacity for replies and events (server/nodes → client).
/// Per-frame events are dropped rather than blocking when this fills.
const MSG_CHANNEL_CAPACITY: usize = 4096;

/// Client-side handle for talking to the node server thread.
pub struct NodeBridge {
    pub cmd_tx: Sender<NodeCommand>,
    pub msg_rx: Receiver<NodeMessage>,
}

impl NodeBridge {
    /// Create a new bridge pair: `(bridge_for_client, cmd_rx, responder)`.
    ///
    /// The server thread owns `cmd_rx`; the responder is cloned into nodes.
    pub fn new() -> (Self, Receiver<NodeCommand>, Responder) {
        Self::with_capacity(CMD_CHANNEL_CAPACITY, MSG_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(
        commands: usize,
        messages: usize,
    ) -> (Self, Receiver<NodeCommand>, Responder) {
        let (cmd_tx, cmd_rx) = bounded(commands.max(1));
        let (msg_tx, msg_rx) = bounded(messages.max(1));
        (Self { cmd_tx, msg_rx }, cmd_rx, Responder::new(msg_tx))
    }

    /// Drain all pending messages.
    pub fn drain(&self) -> Vec<NodeMessage> {
        self.msg_rx.try_iter().collect()
    }

    pub fn try_recv(&self) -> Option<NodeMessage> {
        self.msg_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<NodeMessage> {
        match self.msg_rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn send_command(&self, cmd: NodeCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn create(&self, request: NodeRequest) {
        let _ = self.cmd_tx.send(NodeCommand::Create(request));
    }

    pub fn destroy(&self, node_id: impl Into<String>) {
        let _ = self.cmd_tx.send(NodeCommand::Destroy(node_id.into()));
    }

    pub fn clear(&self) {
        let _ = self.cmd_tx.send(NodeCommand::Clear);
    }

    pub fn control(&self, node_id: impl Into<String>, name: impl Into<String>, data: Value) {
        let _ = self.cmd_tx.send(NodeCommand::Control {
            node_id: node_id.into(),
            name: name.into(),
            data,
        });
    }

    pub fn health(&self) {
        let _ = self.cmd_tx.send(NodeCommand::Health);
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(NodeCommand::Shutdown);
    }
}
