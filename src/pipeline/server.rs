//! Command loop that drives a [`NodeFactory`] from a [`NodeBridge`].
//!
//! The server thread owns the command receiver. Every command produces one
//! reply on the bridge's message queue; node events share that queue.
//!
//! [`NodeBridge`]: super::bridge::NodeBridge

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::bridge::{ControlReply, NodeCommand, NodeRequest, Responder};
use super::factory::NodeFactory;

/// How long the loop waits for a command before re-checking `running`.
const COMMAND_POLL: Duration = Duration::from_millis(100);

/// Control-plane server for one factory.
pub struct NodeServer {
    factory: Arc<NodeFactory>,
    cmd_rx: Receiver<NodeCommand>,
    responder: Responder,
    running: Arc<AtomicBool>,
}

impl NodeServer {
    pub fn new(factory: Arc<NodeFactory>, cmd_rx: Receiver<NodeCommand>) -> Self {
        let responder = factory.responder().clone();
        Self {
            factory,
            cmd_rx,
            responder,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag that keeps the loop alive; clearing it stops the server.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("node-server".into())
            .spawn(move || self.run())
    }

    // ── Main run loop ──

    pub fn run(self) {
        tracing::info!("node server started");

        while self.running.load(Ordering::Relaxed) {
            match self.cmd_rx.recv_timeout(COMMAND_POLL) {
                Ok(NodeCommand::Shutdown) => break,
                Ok(cmd) => self.handle(cmd),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.factory.clear();
        self.responder
            .publish("", ControlReply::event("shutdown", Value::Null));
        tracing::info!("node server exiting");
    }

    fn handle(&self, cmd: NodeCommand) {
        match cmd {
            NodeCommand::Create(request) => self.handle_create(request),
            NodeCommand::Destroy(id) => {
                let reply = ControlReply::from_result(
                    "destroy",
                    self.factory.destroy(&id).map(|()| Value::Null),
                );
                self.responder.publish(&id, reply);
            }
            NodeCommand::Clear => {
                self.factory.clear();
                self.responder.publish("", ControlReply::ok("clear", Value::Null));
            }
            NodeCommand::Control {
                node_id,
                name,
                data,
            } => {
                let reply = self.factory.control(&node_id, &name, &data);
                if !reply.is_ok() {
                    tracing::debug!("control {}({}) -> code {}", name, node_id, reply.code);
                }
                self.responder.publish(&node_id, reply);
            }
            NodeCommand::Health => {
                let nodes = serde_json::to_value(self.factory.snapshot()).unwrap_or(Value::Null);
                self.responder
                    .publish("", ControlReply::ok("health", json!({ "nodes": nodes })));
            }
            NodeCommand::Shutdown => self.running.store(false, Ordering::Relaxed),
        }
    }

    fn handle_create(&self, request: NodeRequest) {
        let id = request.id.clone();
        match self.factory.create(request) {
            Ok(report) => {
                for (failed, err) in &report.failed {
                    self.responder.publish(failed, ControlReply::error("start", err));
                }
                let started: Vec<&str> = report.started.iter().map(String::as_str).collect();
                tracing::debug!("create {}: started {:?}", id, started);
            }
            Err(err) => {
                tracing::warn!("create {} failed: {}", id, err);
                self.responder.publish(&id, ControlReply::error("create", &err));
            }
        }
    }
}
