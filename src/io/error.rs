// src/io/error.rs
//
// Typed errors for adapter, discovery and FIFO I/O.
// Every variant names the device or path it concerns so a log line is
// self-explanatory without the surrounding context.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum IoError {
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    #[error("{device}: protocol error: {message}")]
    Protocol { device: String, message: String },

    #[error("{device}: read failed: {message}")]
    Read { device: String, message: String },

    #[error("{device}: write failed: {message}")]
    Write { device: String, message: String },

    #[error("{device}: timed out during {operation}")]
    Timeout { device: String, operation: String },

    #[error("{device}: invalid configuration: {message}")]
    Configuration { device: String, message: String },
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn protocol(device: &str, message: impl Into<String>) -> Self {
        IoError::Protocol {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(device: &str, operation: impl Into<String>) -> Self {
        IoError::Timeout {
            device: device.to_string(),
            operation: operation.into(),
        }
    }

    pub fn configuration(device: &str, message: impl Into<String>) -> Self {
        IoError::Configuration {
            device: device.to_string(),
            message: message.into(),
        }
    }
}
