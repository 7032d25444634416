//! Dependency scheduling and frame flow through a full node graph
//!
//! Camera, model, recorder and streamer are created through the factory
//! against mock backends and driven by emitting frames from the mock HAL.

mod common;

use camnode::backend::sinks::QrCode;
use camnode::backend::{MockEngine, MockModelSpec, NaluKind, QrDecoder};
use camnode::config::PipelineSettings;
use camnode::pipeline::node::downcast_node;
use camnode::pipeline::nodes::{ModelNode, SaveNode, StreamNode};
use camnode::pipeline::{
    Backends, Channel, NodeBridge, NodeError, NodeFactory, NodeRegistry, NodeState, ReplyKind,
};
use common::builders::{self, CAMERA};
use common::mock_helpers::TestRig;
use common::{test_timeout, wait_for_message, wait_until};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn rig() -> TestRig {
    let engine = MockEngine::virtual_models().with_model("det", MockModelSpec::detector(64, 64));
    TestRig::new(Arc::new(engine))
}

fn state(rig: &TestRig, id: &str) -> NodeState {
    rig.factory.find(id).map(|n| n.state()).unwrap()
}

// ── Scheduling ──

#[test]
fn test_model_created_before_camera_starts_with_it() {
    let rig = rig();
    let report = rig
        .factory
        .create(builders::model("model0", "parallel", &["/models/det.cvimodel"]))
        .unwrap();
    assert!(report.started.is_empty());
    assert_eq!(state(&rig, "model0"), NodeState::Created);

    let report = rig.factory.create(builders::camera()).unwrap();
    assert_eq!(report.started, vec![CAMERA.to_string(), "model0".to_string()]);
    assert!(report.failed.is_empty());
    assert_eq!(state(&rig, "model0"), NodeState::Started);

    // The model asked for its own input size on the raw channel.
    let raw = rig.hal.status().channels[Channel::Raw.index()].unwrap();
    assert_eq!((raw.width, raw.height), (64, 64));
}

#[test]
fn test_missing_dependency_leaves_others_running() {
    let rig = rig();
    rig.factory.create(builders::camera()).unwrap();
    let report = rig
        .factory
        .create(builders::stream("stream0").depends_on("mic0"))
        .unwrap();
    assert!(report.started.is_empty());

    let report = rig.factory.create(builders::qrcode("qr0")).unwrap();
    assert_eq!(report.started, vec!["qr0".to_string()]);
    assert_eq!(state(&rig, "stream0"), NodeState::Created);

    let snapshot = rig.factory.snapshot();
    let stream = snapshot.iter().find(|s| s.id == "stream0").unwrap();
    assert_eq!(
        stream.dependencies,
        vec![(CAMERA.to_string(), true), ("mic0".to_string(), false)]
    );
}

#[test]
fn test_second_camera_rejected() {
    let rig = rig();
    rig.factory.create(builders::camera()).unwrap();
    let err = rig
        .factory
        .create(camnode::NodeRequest::new("camera1", "camera"))
        .unwrap_err();
    assert!(matches!(err, NodeError::SingletonConflict(_)));
    assert_eq!(rig.factory.len(), 1);
}

// ── Frame flow ──

#[test]
fn test_frames_reach_every_consumer() {
    let rig = rig();
    let dir = tempfile::tempdir().unwrap();
    rig.factory.create(builders::camera()).unwrap();
    rig.factory
        .create(builders::model("model0", "parallel", &["/models/det.cvimodel"]))
        .unwrap();
    rig.factory.create(builders::save("save0", dir.path())).unwrap();
    rig.factory.create(builders::stream("stream0")).unwrap();

    assert!(rig.hal.emit_raw());
    let invoke = wait_for_message(&rig.bridge, test_timeout(), |m| {
        m.node_id == "model0" && m.reply.name == "invoke"
    })
    .expect("no invoke event");
    assert_eq!(invoke.reply.kind, ReplyKind::Evt);
    assert_eq!(invoke.reply.data["count"], 1);
    assert_eq!(invoke.reply.data["resolution"], serde_json::json!([64, 64]));
    assert_eq!(invoke.reply.data["boxes"].as_array().unwrap().len(), 1);

    rig.hal.emit_h264(&[
        (NaluKind::Sps, &[0, 0, 0, 1, 0x67]),
        (NaluKind::Pps, &[0, 0, 0, 1, 0x68]),
        (NaluKind::Idr, &[0, 0, 0, 1, 0x65]),
        (NaluKind::PSlice, &[0, 0, 0, 1, 0x41]),
    ]);

    let stream = downcast_node::<StreamNode>(&rig.factory.find("stream0").unwrap()).unwrap();
    assert!(wait_until(test_timeout(), || stream.units_sent() == 4));
    assert_eq!(rig.stream.bytes(), 20);

    let save = downcast_node::<SaveNode>(&rig.factory.find("save0").unwrap()).unwrap();
    assert!(wait_until(test_timeout(), || save.bytes_written() == 20));
    assert_eq!(save.segments(), 1);

    let model = downcast_node::<ModelNode>(&rig.factory.find("model0").unwrap()).unwrap();
    assert_eq!(model.invocations(), 1);
    assert_eq!(model.failures(), 0);
}

#[test]
fn test_parallel_models_each_publish_and_join_on_destroy() {
    let delay = Duration::from_millis(30);
    let engine = MockEngine::virtual_models()
        .with_model("det", MockModelSpec::detector(64, 64).with_delay(delay))
        .with_model("pose", MockModelSpec::detector(64, 64).with_delay(delay));
    let rig = TestRig::new(Arc::new(engine));
    rig.factory.create(builders::camera()).unwrap();
    rig.factory
        .create(builders::model(
            "model0",
            "parallel",
            &["/models/det.cvimodel", "/models/pose.cvimodel"],
        ))
        .unwrap();
    assert_eq!(state(&rig, "model0"), NodeState::Started);

    // Both instances pull from the same mailbox; a busy one leaves the
    // next frame to the other.
    let mut indices = BTreeSet::new();
    let deadline = Instant::now() + test_timeout();
    while indices.len() < 2 && Instant::now() < deadline {
        rig.hal.emit_raw();
        while let Some(msg) = rig.bridge.recv_timeout(Duration::from_millis(10)) {
            if msg.node_id == "model0" && msg.reply.name == "invoke" {
                indices.insert(msg.reply.data["index"].as_u64().unwrap());
            }
        }
    }
    assert_eq!(indices.into_iter().collect::<Vec<_>>(), vec![0, 1]);

    rig.hal.emit_raw();
    let started = Instant::now();
    rig.factory.destroy("model0").unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(rig.factory.find("model0").is_none());
    assert!(wait_until(test_timeout(), || rig.hal.pool().outstanding() == 0));
}

#[test]
fn test_destroying_camera_stops_dependents_and_releases_frames() {
    let rig = rig();
    rig.factory.create(builders::camera()).unwrap();
    rig.factory
        .create(builders::model("model0", "parallel", &["/models/det.cvimodel"]))
        .unwrap();
    rig.factory.create(builders::qrcode("qr0")).unwrap();

    for _ in 0..5 {
        rig.hal.emit_raw();
    }
    rig.factory.destroy(CAMERA).unwrap();

    assert_eq!(state(&rig, "model0"), NodeState::Stopped);
    assert_eq!(state(&rig, "qr0"), NodeState::Stopped);
    assert!(!rig.hal.status().capturing);
    assert!(wait_until(test_timeout(), || rig.hal.pool().outstanding() == 0));

    // A new camera brings the waiting dependents back.
    let report = rig.factory.create(builders::camera()).unwrap();
    assert_eq!(report.started.len(), 3);
    assert_eq!(state(&rig, "model0"), NodeState::Started);
}

#[test]
fn test_clear_destroys_everything() {
    let rig = rig();
    rig.factory.create(builders::camera()).unwrap();
    rig.factory.create(builders::stream("stream0")).unwrap();
    rig.factory.create(builders::qrcode("qr0")).unwrap();

    rig.factory.clear();
    assert!(rig.factory.is_empty());
    assert!(!rig.hal.status().initialized);
}

/// Finds one code in every frame.
struct AlwaysFinds;

impl QrDecoder for AlwaysFinds {
    fn decode(&self, _gray: &[u8], width: u32, height: u32) -> Vec<QrCode> {
        let (w, h) = (width as i32, height as i32);
        vec![QrCode {
            payload: "WIFI:S:camnode;;".into(),
            version: 2,
            ecc_level: 1,
            mask: 0,
            corners: [[0, 0], [w, 0], [w, h], [0, h]],
        }]
    }
}

#[test]
fn test_qrcode_uses_configured_decoder() {
    let hal = camnode::backend::MockHal::new();
    let (bridge, _commands, responder) = NodeBridge::new();
    let backends = Backends::new(hal.clone(), Arc::new(MockEngine::virtual_models()))
        .with_qr_decoder(Arc::new(AlwaysFinds));
    let factory = NodeFactory::new(
        NodeRegistry::with_builtins(backends, PipelineSettings::fast()),
        responder,
    );
    factory.create(builders::camera()).unwrap();
    factory.create(builders::qrcode("qr0")).unwrap();

    assert!(hal.emit_raw());
    let event = wait_for_message(&bridge, test_timeout(), |m| m.reply.name == "qrcode")
        .expect("no qrcode event");
    assert_eq!(event.reply.data["count"], 1);
    assert_eq!(event.reply.data["codes"][0]["payload"], "WIFI:S:camnode;;");
    assert_eq!(event.reply.data["resolution"], serde_json::json!([1920, 1080]));

    let err = factory.create(builders::qrcode("qr1")).unwrap_err();
    assert!(matches!(err, NodeError::SingletonConflict(_)));
    factory.clear();
}
