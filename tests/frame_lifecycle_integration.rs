//! Buffer ownership: every hardware buffer goes back to its pool exactly once

mod common;

use camnode::backend::{MockEngine, NaluKind, RecyclingPool, StreamSink};
use camnode::config::PipelineSettings;
use camnode::pipeline::{
    fan_out, Backends, Channel, Frame, FrameInfo, NodeFactory, NodeRegistry, NodeResult,
    PixelFormat, Responder,
};
use common::builders;
use common::mock_helpers::TestRig;
use common::{test_timeout, wait_until};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

fn raw_frame(pool: &Arc<RecyclingPool>) -> Frame {
    let info = FrameInfo::new(Channel::Raw, 2, 2, PixelFormat::Rgb888);
    Frame::hardware(info, pool.allocate(vec![0u8; 12]))
}

proptest! {
    #[test]
    fn prop_last_handle_recycles(consumers in 1usize..8, order in proptest::collection::vec(any::<u8>(), 8)) {
        let pool = Arc::new(RecyclingPool::new());
        let mut handles = fan_out(raw_frame(&pool), consumers);
        prop_assert_eq!(handles.len(), consumers);

        // Release in an arbitrary order.
        let mut released = 0;
        while !handles.is_empty() {
            let pick = order[released % order.len()] as usize % handles.len();
            drop(handles.swap_remove(pick));
            released += 1;
            let expected = u64::from(handles.is_empty());
            prop_assert_eq!(pool.recycled(), expected);
        }
        prop_assert_eq!(pool.outstanding(), 0);
    }
}

#[test]
fn test_fan_out_to_nobody_recycles_at_once() {
    let pool = Arc::new(RecyclingPool::new());
    assert!(fan_out(raw_frame(&pool), 0).is_empty());
    assert_eq!(pool.recycled(), 1);
}

#[test]
fn test_generator_under_load_returns_every_buffer() {
    let rig = TestRig::new(Arc::new(MockEngine::virtual_models()));
    let dir = tempfile::tempdir().unwrap();
    rig.factory.create(builders::camera()).unwrap();
    rig.factory
        .create(builders::model("model0", "serial", &["/models/det.cvimodel", "/models/cls.cvimodel"]))
        .unwrap();
    rig.factory.create(builders::qrcode("qr0")).unwrap();
    rig.factory.create(builders::save("save0", dir.path())).unwrap();
    rig.factory.create(builders::stream("stream0")).unwrap();

    rig.hal.start_generator(60, 10).unwrap();
    assert!(wait_until(test_timeout(), || rig.stream.units() > 10));
    rig.factory.clear();
    rig.hal.stop_generator();

    assert!(rig.hal.pool().allocated() > 0);
    assert!(wait_until(test_timeout(), || rig.hal.pool().outstanding() == 0));
}

/// Records the key flag of every unit it is sent.
#[derive(Default)]
struct KeyLog {
    units: Mutex<Vec<(Vec<u8>, bool)>>,
}

impl StreamSink for KeyLog {
    fn open(&self, _session: &str) -> NodeResult<()> {
        Ok(())
    }

    fn send(&self, _session: &str, unit: &[u8], key: bool) -> NodeResult<()> {
        self.units.lock().unwrap().push((unit.to_vec(), key));
        Ok(())
    }

    fn close(&self, _session: &str) {}
}

#[test]
fn test_parameter_sets_travel_with_the_key_unit() {
    let hal = camnode::backend::MockHal::new();
    let log = Arc::new(KeyLog::default());
    let backends =
        Backends::new(hal.clone(), Arc::new(MockEngine::virtual_models())).with_stream(log.clone());
    let factory = NodeFactory::new(
        NodeRegistry::with_builtins(backends, PipelineSettings::fast()),
        Responder::disconnected(),
    );
    factory.create(builders::camera()).unwrap();
    factory.create(builders::stream("stream0")).unwrap();

    hal.emit_h264(&[(NaluKind::Sps, &[0x67]), (NaluKind::Pps, &[0x68])]);
    hal.emit_h264(&[(NaluKind::Idr, &[0x65]), (NaluKind::PSlice, &[0x41])]);
    hal.emit_h264(&[(NaluKind::PSlice, &[0x41, 1])]);

    assert!(wait_until(test_timeout(), || log.units.lock().unwrap().len() == 5));
    let units = log.units.lock().unwrap().clone();
    assert_eq!(
        units,
        vec![
            (vec![0x67], true),
            (vec![0x68], true),
            (vec![0x65], true),
            (vec![0x41], false),
            (vec![0x41, 1], false),
        ]
    );
    factory.clear();
    assert!(!hal.status().initialized);
}
