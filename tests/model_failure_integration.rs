//! Model node behaviour against a scripted engine

mod common;

use camnode::backend::engine::{InputSpec, ModelKind, ModelOption};
use camnode::backend::Model;
use camnode::pipeline::node::downcast_node;
use camnode::pipeline::nodes::ModelNode;
use camnode::pipeline::{ErrorCode, Node, NodeError, NodeRequest, NodeState, PixelFormat};
use common::builders;
use common::mock_helpers::{MockStub, QueuedEngine, TestRig};
use common::{test_timeout, wait_for_message, wait_until};
use mockall::predicate::eq;
use serde_json::json;
use std::sync::Arc;

fn stub(kind: ModelKind, width: u32, height: u32) -> MockStub {
    let mut model = MockStub::new();
    model.expect_kind().return_const(kind);
    model.expect_input_spec().return_const(InputSpec {
        width,
        height,
        format: PixelFormat::Rgb888,
    });
    model
}

fn engine(models: Vec<MockStub>) -> Arc<QueuedEngine> {
    Arc::new(QueuedEngine::new(
        models
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn Model>)
            .collect(),
    ))
}

#[test]
fn test_failed_runs_publish_empty_results() {
    let mut model = stub(ModelKind::Detector, 32, 32);
    model
        .expect_run()
        .returning(|_| Err(NodeError::Engine("npu fault".into())));
    let rig = TestRig::new(engine(vec![model]));
    rig.factory.create(builders::camera()).unwrap();
    rig.factory
        .create(builders::model("model0", "parallel", &["/models/a.cvimodel"]))
        .unwrap();
    let node = downcast_node::<ModelNode>(&rig.factory.find("model0").unwrap()).unwrap();

    for run in 1..=3 {
        assert!(rig.hal.emit_raw());
        assert!(wait_until(test_timeout(), || node.failures() == run));
    }

    let event = wait_for_message(&rig.bridge, test_timeout(), |m| m.reply.name == "invoke")
        .expect("no invoke event");
    assert_eq!(event.reply.data["boxes"], json!([]));
    assert_eq!(node.invocations(), 3);
    assert_eq!(node.state(), NodeState::Started);
    // The frame went to the failing run and was dropped there.
    assert!(wait_until(test_timeout(), || rig.hal.pool().outstanding() == 0));
}

#[test]
fn test_threshold_applied_at_load() {
    let mut model = stub(ModelKind::Detector, 32, 32);
    model
        .expect_set_option()
        .with(eq(ModelOption::Threshold), eq(0.6f32))
        .times(1)
        .returning(|_, _| Ok(()));
    let rig = TestRig::new(engine(vec![model]));

    rig.factory
        .create(NodeRequest::new("model0", "model").with_config(json!({
            "models": [{ "uri": "/models/a.cvimodel", "tscore": 0.6 }]
        })))
        .unwrap();
    // Verifies the expectation when the stub is dropped.
    rig.factory.destroy("model0").unwrap();
}

#[test]
fn test_rejected_option_unloads_earlier_models() {
    let first = stub(ModelKind::Detector, 32, 32);
    let mut second = stub(ModelKind::Classifier, 8, 8);
    second
        .expect_set_option()
        .returning(|_, _| Err(NodeError::NotSupported("nms on a classifier".into())));
    let rig = TestRig::new(engine(vec![first, second]));

    let err = rig
        .factory
        .create(NodeRequest::new("model0", "model").with_config(json!({
            "mode": "serial",
            "models": [
                { "uri": "/models/a.cvimodel" },
                { "uri": "/models/b.cvimodel", "tiou": 0.5 },
            ]
        })))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotSupported);
    assert!(rig.factory.is_empty());
}

#[test]
fn test_start_without_camera_reports_failure() {
    let rig = TestRig::new(engine(vec![stub(ModelKind::Detector, 32, 32)]));
    let report = rig
        .factory
        .create(NodeRequest::new("model0", "model").with_config(json!({ "uri": "/models/a.cvimodel" })))
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].1.code(), ErrorCode::NotSupported);

    let snapshot = rig.factory.snapshot();
    assert!(snapshot[0].start_failed);
    assert_eq!(snapshot[0].state, NodeState::Created);
}
