//! Pipeline-specific error types.
//!
//! Every failure a node or the factory can report maps onto one of the
//! numeric codes the control plane speaks (see [`ErrorCode`]).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Numeric status codes carried in control-plane replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Again = 1,
    Timeout = 3,
    Io = 4,
    InvalidArgument = 5,
    NoMemory = 6,
    Busy = 7,
    NotSupported = 8,
    NotFound = 10,
    Exists = 11,
}

impl ErrorCode {
    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Errors that can occur within the node pipeline.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("node already exists: {0}")]
    AlreadyExists(String),

    #[error("node not found: {0}")]
    NotFound(String),

    #[error("unknown node type: {0}")]
    UnknownType(String),

    #[error("singleton node type already instantiated: {0}")]
    SingletonConflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A bounded wait elapsed. Callers treat this as "try again".
    #[error("operation would block")]
    WouldBlock,

    #[error("unsupported control: {0}")]
    NotSupportedControl(String),

    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("hardware error: {0}")]
    Hal(String),

    #[error("inference engine error: {0}")]
    Engine(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Control-plane status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            NodeError::AlreadyExists(_) | NodeError::SingletonConflict(_) => ErrorCode::Exists,
            NodeError::NotFound(_) | NodeError::MissingFile(_) => ErrorCode::NotFound,
            NodeError::UnknownType(_)
            | NodeError::NotSupported(_)
            | NodeError::NotSupportedControl(_) => ErrorCode::NotSupported,
            NodeError::InvalidArgument(_) | NodeError::Config(_) => ErrorCode::InvalidArgument,
            NodeError::Busy(_) => ErrorCode::Busy,
            NodeError::OutOfMemory(_) => ErrorCode::NoMemory,
            NodeError::WouldBlock => ErrorCode::Again,
            NodeError::Hal(_) | NodeError::Engine(_) | NodeError::Io(_) => ErrorCode::Io,
        }
    }

    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(self, NodeError::WouldBlock)
    }
}

pub type NodeResult<T> = std::result::Result<T, NodeError>;
