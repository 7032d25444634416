//! Mock construction helpers

use camnode::backend::engine::{InferenceEngine, InputSpec, Model, ModelKind, ModelOption, ModelRun};
use camnode::backend::{CountingStreamSink, MockHal, QrCode, QrDecoder};
use camnode::config::PipelineSettings;
use camnode::pipeline::{
    Backends, FrameRef, NodeBridge, NodeCommand, NodeError, NodeFactory, NodeRegistry, NodeResult,
};
use crossbeam_channel::Receiver;
use mockall::mock;
use std::path::Path;
use std::sync::{Arc, Mutex};

mock! {
    pub Stub {}

    impl Model for Stub {
        fn kind(&self) -> ModelKind;
        fn input_spec(&self) -> InputSpec;
        fn set_option(&mut self, option: ModelOption, value: f32) -> NodeResult<()>;
        fn run(&mut self, input: FrameRef) -> NodeResult<ModelRun>;
    }
}

/// Engine handing out pre-built models in load order.
pub struct QueuedEngine {
    models: Mutex<Vec<Box<dyn Model>>>,
}

impl QueuedEngine {
    pub fn new(models: Vec<Box<dyn Model>>) -> Self {
        let mut models = models;
        models.reverse();
        Self {
            models: Mutex::new(models),
        }
    }
}

impl InferenceEngine for QueuedEngine {
    fn load(&self, path: &Path) -> NodeResult<Box<dyn Model>> {
        self.models
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| NodeError::MissingFile(path.to_path_buf()))
    }
}

/// QR decoder that skips the scan, keeping worker iterations short.
pub struct NoCodes;

impl QrDecoder for NoCodes {
    fn decode(&self, _gray: &[u8], _width: u32, _height: u32) -> Vec<QrCode> {
        Vec::new()
    }
}

/// A factory wired to mock backends, plus the client end of its bridge.
pub struct TestRig {
    pub hal: Arc<MockHal>,
    pub stream: Arc<CountingStreamSink>,
    pub factory: Arc<NodeFactory>,
    pub bridge: NodeBridge,
    pub commands: Option<Receiver<NodeCommand>>,
}

impl TestRig {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        let hal = MockHal::new();
        let stream = Arc::new(CountingStreamSink::new());
        let (bridge, commands, responder) = NodeBridge::new();
        let backends = Backends::new(hal.clone(), engine)
            .with_stream(stream.clone())
            .with_qr_decoder(Arc::new(NoCodes));
        let registry = NodeRegistry::with_builtins(backends, PipelineSettings::fast());
        Self {
            hal,
            stream,
            factory: Arc::new(NodeFactory::new(registry, responder)),
            bridge,
            commands: Some(commands),
        }
    }
}
