//! Command/reply traffic between a client bridge and the node server

mod common;

use camnode::backend::{MockEngine, MockModelSpec};
use camnode::pipeline::{ErrorCode, NodeCommand, NodeMessage, NodeServer, ReplyKind};
use camnode::NodeRequest;
use common::mock_helpers::TestRig;
use common::{test_timeout, wait_for_message};
use serde_json::json;
use std::sync::Arc;
use std::thread::JoinHandle;

fn serve() -> (TestRig, JoinHandle<()>) {
    let engine = MockEngine::virtual_models().with_model("det", MockModelSpec::detector(64, 64));
    let mut rig = TestRig::new(Arc::new(engine));
    let commands = rig.commands.take().unwrap();
    let server = NodeServer::new(rig.factory.clone(), commands).spawn().unwrap();
    (rig, server)
}

fn reply(rig: &TestRig, node_id: &str, name: &str) -> NodeMessage {
    wait_for_message(&rig.bridge, test_timeout(), |m| {
        m.node_id == node_id && m.reply.name == name && m.reply.kind == ReplyKind::Resp
    })
    .unwrap_or_else(|| panic!("no {name} reply from {node_id:?}"))
}

#[test]
fn test_create_control_health_roundtrip() {
    let (rig, server) = serve();

    let cmd = NodeCommand::parse("create", "camera0", json!({ "type": "Camera" })).unwrap();
    assert!(rig.bridge.send_command(cmd));
    let created = reply(&rig, "camera0", "create");
    assert!(created.reply.is_ok());
    assert_eq!(created.reply.data["fps"], 30);

    rig.bridge.control("camera0", "enabled", json!(false));
    let control = reply(&rig, "camera0", "enabled");
    assert_eq!(control.reply.data, json!({ "enabled": false }));
    assert!(!rig.hal.status().capturing);

    rig.bridge.control("camera0", "zoom", json!(2));
    let unsupported = reply(&rig, "camera0", "zoom");
    assert_eq!(unsupported.reply.code, ErrorCode::NotSupported.as_i32());

    rig.bridge.health();
    let health = reply(&rig, "", "health");
    let nodes = health.reply.data["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["id"], "camera0");
    assert_eq!(nodes[0]["type"], "camera");
    assert_eq!(nodes[0]["state"], "started");
    assert_eq!(nodes[0]["enabled"], false);

    rig.bridge.shutdown();
    server.join().unwrap();
}

#[test]
fn test_errors_carry_codes() {
    let (rig, server) = serve();

    rig.bridge.destroy("ghost");
    let destroyed = reply(&rig, "ghost", "destroy");
    assert_eq!(destroyed.reply.code, ErrorCode::NotFound.as_i32());

    rig.bridge.control("ghost", "enabled", json!(true));
    assert_eq!(
        reply(&rig, "ghost", "enabled").reply.code,
        ErrorCode::NotFound.as_i32()
    );

    rig.hal.fail_init(true);
    rig.bridge.create(NodeRequest::new("camera0", "camera"));
    assert_eq!(
        reply(&rig, "camera0", "create").reply.code,
        ErrorCode::Io.as_i32()
    );
    rig.bridge.create(NodeRequest::new("x0", "lidar"));
    assert_eq!(
        reply(&rig, "x0", "create").reply.code,
        ErrorCode::NotSupported.as_i32()
    );
    assert!(rig.factory.is_empty());

    // A model with nothing to read from fails to start, not to create.
    rig.bridge.create(
        NodeRequest::new("model0", "model").with_config(json!({ "uri": "/models/det.cvimodel" })),
    );
    assert!(reply(&rig, "model0", "create").reply.is_ok());
    let start = reply(&rig, "model0", "start");
    assert_eq!(start.reply.code, ErrorCode::NotSupported.as_i32());

    rig.bridge.shutdown();
    server.join().unwrap();
}

#[test]
fn test_shutdown_destroys_nodes_and_announces() {
    let (rig, server) = serve();
    rig.bridge.create(NodeRequest::new("camera0", "camera"));
    rig.bridge.create(
        NodeRequest::new("model0", "model")
            .with_config(json!({ "uri": "/models/det.cvimodel" }))
            .depends_on("camera0"),
    );
    reply(&rig, "model0", "create");
    for _ in 0..3 {
        rig.hal.emit_raw();
    }

    rig.bridge.shutdown();
    let bye = wait_for_message(&rig.bridge, test_timeout(), |m| m.reply.name == "shutdown")
        .expect("no shutdown event");
    assert_eq!(bye.node_id, "");
    assert_eq!(bye.reply.kind, ReplyKind::Evt);
    server.join().unwrap();

    assert!(rig.factory.is_empty());
    assert!(!rig.hal.status().initialized);
    assert_eq!(rig.hal.pool().outstanding(), 0);
}

#[test]
fn test_dropping_bridge_stops_server() {
    let (rig, server) = serve();
    rig.bridge.create(NodeRequest::new("camera0", "camera"));
    reply(&rig, "camera0", "create");

    let TestRig { factory, bridge, .. } = rig;
    drop(bridge);
    server.join().unwrap();
    assert!(factory.is_empty());
}

#[test]
fn test_clearing_running_flag_stops_server() {
    let engine = MockEngine::virtual_models();
    let mut rig = TestRig::new(Arc::new(engine));
    let server = NodeServer::new(rig.factory.clone(), rig.commands.take().unwrap());
    let running = server.running_flag();
    let handle = server.spawn().unwrap();

    rig.bridge.create(NodeRequest::new("camera0", "camera"));
    reply(&rig, "camera0", "create");
    running.store(false, std::sync::atomic::Ordering::Relaxed);
    handle.join().unwrap();
    assert!(rig.factory.is_empty());
}
