use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MsrpError {
    #[error("parse error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("data container error: {source}")]
    Container {
        #[from]
        source: ContainerError,
    },

    #[error("illegal use: {reason}")]
    IllegalUse { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl MsrpError {
    pub fn illegal_use<S: ToString>(str: S) -> Self {
        Self::IllegalUse { reason: str.to_string() }
    }

    pub fn internal<S: ToString>(str: S) -> Self {
        Self::Internal { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid start line: {reason}")]
    InvalidStartLine { reason: String },

    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid transaction id: {0:?}")]
    InvalidTransactionId(String),

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn invalid_start_line<S: ToString>(str: S) -> Self {
        Self::InvalidStartLine { reason: str.to_string() }
    }

    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("not enough data, requested {requested} bytes at offset {offset}, available {available}")]
    NotEnoughData { offset: u64, requested: u64, available: u64 },

    #[error("not enough storage, required {required} bytes exceed the capacity {capacity}")]
    NotEnoughStorage { required: u64, capacity: u64 },

    #[error("data container already disposed")]
    Disposed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ContainerError {
    pub fn not_enough_data(offset: u64, requested: u64, available: u64) -> Self {
        Self::NotEnoughData { offset, requested, available }
    }

    pub fn not_enough_storage(required: u64, capacity: u64) -> Self {
        Self::NotEnoughStorage { required, capacity }
    }
}
