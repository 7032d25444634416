//! Inference engine abstraction.
//!
//! An [`InferenceEngine`] turns a model file into a runnable [`Model`].
//! Models report coordinates normalised to their own input tensor
//! (`0.0..=1.0`, box centre plus size); mapping back to camera pixels is
//! the model node's job.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::pipeline::error::NodeResult;
use crate::pipeline::frame::{FrameRef, PixelFormat};

/// Family of a loaded model, which decides the output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Detector,
    Classifier,
    Pose,
    Segmentation,
}

/// Shape of the model's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Post-processing knobs a model may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelOption {
    /// Score threshold, 0.0..=1.0.
    Threshold,
    /// NMS IoU threshold, 0.0..=1.0.
    Nms,
    /// Keep at most this many results (classifiers).
    TopK,
}

/// Normalised detection box (centre + size).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub score: f32,
    pub target: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub score: f32,
    pub target: u32,
}

/// Normalised keypoint; `z` is the point confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoints {
    pub bbox: BBox,
    pub points: Vec<Point3>,
}

/// Normalised instance mask outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub bbox: BBox,
    pub contour: Vec<(f32, f32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Boxes(Vec<BBox>),
    Classes(Vec<Class>),
    Keypoints(Vec<Keypoints>),
    Segments(Vec<Segment>),
}

impl ModelOutput {
    pub fn is_empty(&self) -> bool {
        match self {
            ModelOutput::Boxes(v) => v.is_empty(),
            ModelOutput::Classes(v) => v.is_empty(),
            ModelOutput::Keypoints(v) => v.is_empty(),
            ModelOutput::Segments(v) => v.is_empty(),
        }
    }

    /// Highest-scoring box, for detector-like outputs.
    pub fn best_box(&self) -> Option<BBox> {
        let boxes: Vec<BBox> = match self {
            ModelOutput::Boxes(v) => v.clone(),
            ModelOutput::Keypoints(v) => v.iter().map(|k| k.bbox).collect(),
            ModelOutput::Segments(v) => v.iter().map(|s| s.bbox).collect(),
            ModelOutput::Classes(_) => return None,
        };
        boxes
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// Stage timings of one inference.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Perf {
    pub preprocess: Duration,
    pub inference: Duration,
    pub postprocess: Duration,
}

impl Perf {
    /// `[pre, inf, post]` in whole milliseconds.
    pub fn as_millis(&self) -> [u64; 3] {
        [
            self.preprocess.as_millis() as u64,
            self.inference.as_millis() as u64,
            self.postprocess.as_millis() as u64,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRun {
    pub output: ModelOutput,
    pub perf: Perf,
}

/// A loaded, runnable model.
pub trait Model: Send {
    fn kind(&self) -> ModelKind;

    fn input_spec(&self) -> InputSpec;

    fn set_option(&mut self, option: ModelOption, value: f32) -> NodeResult<()>;

    /// Run one inference. The model drops `input` as soon as preprocessing
    /// has copied what it needs, releasing the frame before inference.
    fn run(&mut self, input: FrameRef) -> NodeResult<ModelRun>;
}

/// Loads model files.
pub trait InferenceEngine: Send + Sync {
    /// Load a model. A missing file is `NodeError::MissingFile`, an
    /// unsupported model family is `NodeError::NotSupported`.
    fn load(&self, path: &Path) -> NodeResult<Box<dyn Model>>;
}
