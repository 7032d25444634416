//! Built-in node types.
//!
//! This module names the node kinds the registry knows out of the box and
//! the per-type facts the factory needs (registry name, singleton flag).

use serde::{Deserialize, Serialize};

/// Types of nodes that ship with the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// The capture source. One per device.
    Camera,
    /// Runs one or more inference models over camera frames.
    Model,
    /// Records the H.264 stream into time-sliced files.
    Save,
    /// Hands the H.264 stream to a streaming transport.
    Stream,
    /// Decodes QR codes from raw frames. One per device.
    #[serde(rename = "qrcode")]
    QrCode,
}

impl NodeType {
    /// Registry key (always lower-case).
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeType::Camera => "camera",
            NodeType::Model => "model",
            NodeType::Save => "save",
            NodeType::Stream => "stream",
            NodeType::QrCode => "qrcode",
        }
    }

    /// Get all built-in node types.
    pub fn all() -> &'static [NodeType] {
        &[
            NodeType::Camera,
            NodeType::Model,
            NodeType::Save,
            NodeType::Stream,
            NodeType::QrCode,
        ]
    }

    /// At most one live instance of a singleton type may exist.
    pub fn is_singleton(&self) -> bool {
        matches!(self, NodeType::Camera | NodeType::QrCode)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singletons() {
        let singletons: Vec<_> = NodeType::all().iter().filter(|t| t.is_singleton()).collect();
        assert_eq!(singletons, vec![&NodeType::Camera, &NodeType::QrCode]);
    }

    #[test]
    fn test_serde_names_match_registry_keys() {
        for ty in NodeType::all() {
            let json = serde_json::to_string(ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.type_name()));
        }
    }
}
