// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    Checksum, CompressionType,
};

/// Represents errors that can occur during a clustering compaction
#[derive(Debug)]
pub enum Error {
    /// I/O error (object store download or upload failed)
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Decompression failed
    Decompress(CompressionType),

    /// Invalid checksum value (got, expected)
    InvalidChecksum((Checksum, Checksum)),

    /// The compaction plan is malformed (wrong type, bad schema, empty inputs, ...)
    IllegalPlan(String),

    /// The ID allocator failed to produce a segment or log ID
    Alloc(String),

    /// The task was cancelled or ran into its deadline
    Cancelled(&'static str),

    /// Invariant violation inside the engine
    Internal(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompactionError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Compaction result
pub type Result<T> = std::result::Result<T, Error>;
