//! Errors that reach the controller runtime.

use std::io;

use thiserror::Error;

use crate::ofp_controller::DatapathId;
use crate::ofp_message::OfpSerializationError;

/// Connection-level failures.
///
/// Classification and directory errors never surface here; the forwarding
/// engine turns them into a flood or a drop.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("OpenFlow codec error: {0}")]
    Serialization(#[from] OfpSerializationError),

    #[error("connection to switch {0} is closed")]
    ConnectionClosed(DatapathId),

    #[error("handshake failed: {0}")]
    Handshake(String),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
