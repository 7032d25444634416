//! Request builders for the usual node graph

use camnode::pipeline::NodeRequest;
use serde_json::{json, Value};

pub const CAMERA: &str = "camera0";

pub fn camera() -> NodeRequest {
    NodeRequest::new(CAMERA, "camera")
}

/// A model node on the camera running the given model files.
pub fn model(id: &str, mode: &str, uris: &[&str]) -> NodeRequest {
    let models: Vec<Value> = uris.iter().map(|uri| json!({ "uri": uri })).collect();
    NodeRequest::new(id, "model")
        .with_config(json!({ "mode": mode, "models": models }))
        .depends_on(CAMERA)
}

pub fn save(id: &str, dir: &std::path::Path) -> NodeRequest {
    NodeRequest::new(id, "save")
        .with_config(json!({ "storage": dir, "slice": 60 }))
        .depends_on(CAMERA)
}

pub fn stream(id: &str) -> NodeRequest {
    NodeRequest::new(id, "stream")
        .with_config(json!({ "host": "camnode.local" }))
        .depends_on(CAMERA)
}

pub fn qrcode(id: &str) -> NodeRequest {
    NodeRequest::new(id, "qrcode").depends_on(CAMERA)
}
