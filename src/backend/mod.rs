//! Collaborators the pipeline drives but does not implement.
//!
//! - [`hal`]: the video subsystem (capture, encoders, sensor controls)
//! - [`engine`]: the inference engine and loaded models
//! - [`sinks`]: streaming transport and QR decoder seams
//! - [`mock`]: deterministic in-process stand-ins for all of the above

pub mod engine;
pub mod hal;
pub mod mock;
pub mod sinks;

pub use engine::{InferenceEngine, Model, ModelKind, ModelOutput, ModelRun};
pub use hal::{CaptureSink, ChannelParams, EncodedPacket, NaluKind, VideoHal};
pub use mock::{MockEngine, MockHal, MockModelSpec, RecyclingPool};
pub use sinks::{CountingStreamSink, QrCode, QrDecoder, RqrrDecoder, StreamSink};
