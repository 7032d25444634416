//! Node abstraction for the pipeline.
//!
//! Every node is a trait object shared as [`NodeHandle`]. Lifecycle hooks
//! take `&self`: a node guards its own mutable state behind its own lock,
//! while the factory serialises lifecycle calls across nodes under the
//! registry lock.
//!
//! The shared bookkeeping every node carries (id, type, state machine,
//! `enabled` flag, publishing handle) lives in [`NodeCore`].

use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::bridge::{ControlReply, Responder};
use super::error::{NodeError, NodeResult};

/// Shared handle to a live node.
pub type NodeHandle = Arc<dyn Node>;

/// Lifecycle state. `Created → Started ⇄ Stopped → Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Created,
    Started,
    Stopped,
    Destroyed,
}

impl NodeState {
    pub fn can_transition(self, to: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, to),
            (Created, Started)
                | (Started, Stopped)
                | (Stopped, Started)
                | (Created, Destroyed)
                | (Stopped, Destroyed)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Created => "created",
            NodeState::Started => "started",
            NodeState::Stopped => "stopped",
            NodeState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Bookkeeping shared by every node implementation.
pub struct NodeCore {
    id: String,
    node_type: String,
    state: Mutex<NodeState>,
    enabled: AtomicBool,
    responder: Responder,
}

impl NodeCore {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, responder: Responder) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            state: Mutex::new(NodeState::Created),
            enabled: AtomicBool::new(true),
            responder,
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// `type#id`, used in log lines.
    pub fn label(&self) -> String {
        format!("{}#{}", self.node_type, self.id)
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.state() == NodeState::Started
    }

    /// Move to `to`. Invalid transitions are rejected and leave the state
    /// untouched.
    pub fn transition(&self, to: NodeState) -> NodeResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == to {
            return Ok(());
        }
        if !state.can_transition(to) {
            return Err(NodeError::Busy(format!(
                "{}#{}: cannot go from {} to {}",
                self.node_type, self.id, *state, to
            )));
        }
        tracing::debug!("{}#{}: {} -> {}", self.node_type, self.id, *state, to);
        *state = to;
        Ok(())
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    /// Publish a response tagged with this node's id.
    pub fn reply(&self, reply: ControlReply) {
        self.responder.publish(&self.id, reply);
    }

    /// Publish an unsolicited event tagged with this node's id.
    pub fn event(&self, name: &str, data: Value) {
        self.responder.publish(&self.id, ControlReply::event(name, data));
    }
}

impl fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCore")
            .field("id", &self.id)
            .field("type", &self.node_type)
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// What a node can see of the graph when it starts.
#[derive(Default)]
pub struct StartContext {
    /// Resolved dependency nodes, in declaration order.
    pub dependencies: Vec<NodeHandle>,
    /// Resolved declared dependents, in declaration order.
    pub dependents: Vec<NodeHandle>,
}

impl StartContext {
    /// First dependency of the given registry type.
    pub fn dependency_of_type(&self, node_type: &str) -> Option<&NodeHandle> {
        self.dependencies
            .iter()
            .find(|n| n.node_type().eq_ignore_ascii_case(node_type))
    }

    /// First dependency of the given type, downcast to its concrete node.
    pub fn dependency<T: Node>(&self, node_type: &str) -> Option<Arc<T>> {
        self.dependency_of_type(node_type).and_then(downcast_node::<T>)
    }
}

/// Trait implemented by every pipeline node.
pub trait Node: Send + Sync + 'static {
    fn core(&self) -> &NodeCore;

    /// Parse configuration and acquire resources. On error the node is
    /// discarded and never registered.
    fn on_create(&self, config: &Value) -> NodeResult<()>;

    /// Begin producing/consuming. Called at most once while started.
    fn on_start(&self, ctx: &StartContext) -> NodeResult<()>;

    /// Runtime command. Unknown names must reply `NotSupportedControl`.
    fn on_control(&self, name: &str, _data: &Value) -> ControlReply {
        ControlReply::error(name, &NodeError::NotSupportedControl(name.to_string()))
    }

    /// Quiesce workers and detach from producers.
    fn on_stop(&self) -> NodeResult<()>;

    /// Release everything acquired in `on_create`.
    fn on_destroy(&self) -> NodeResult<()>;

    /// Upcast for downcasting to a concrete node type.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn id(&self) -> &str {
        self.core().id()
    }

    fn node_type(&self) -> &str {
        self.core().node_type()
    }

    fn state(&self) -> NodeState {
        self.core().state()
    }

    fn is_started(&self) -> bool {
        self.core().is_started()
    }
}

/// Downcast a shared node to its concrete type.
pub fn downcast_node<T: Node>(node: &NodeHandle) -> Option<Arc<T>> {
    Arc::clone(node).into_any().downcast::<T>().ok()
}
