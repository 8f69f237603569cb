// Libriforge - DRM-free audiobook conversion pipeline
// Copyright (C) 2025 Libriforge contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Error types for libriforge.
//!
//! Errors fall into five domains mirroring where a conversion run can
//! break: argument validation (before any I/O), the network probe, the
//! external ffmpeg/ffprobe tools, the container tag rewrite, and plain
//! filesystem work. Mid-run pipeline steps report failure through their
//! boolean step result; these errors carry the diagnostic context that
//! gets logged when that happens. Only construction-time validation
//! surfaces an `Err` to the caller before the pipeline starts.

use thiserror::Error;

/// Result type alias using [`LiberationError`].
pub type Result<T> = std::result::Result<T, LiberationError>;

/// Error type for every fallible operation in the conversion pipeline.
#[derive(Error, Debug)]
pub enum LiberationError {
    // ===== Validation (fails fast, before any I/O) =====

    /// Caller-supplied argument is missing or malformed.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The license is missing or carries unusable key material.
    #[error("Invalid license: {0}")]
    InvalidLicense(String),

    // ===== Network =====

    /// Metadata probe or source fetch failed.
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// HTTP status code if the server answered at all.
        status_code: Option<u16>,
    },

    /// The server answered a ranged request without partial content.
    ///
    /// Random access over HTTP is a hard requirement of the metadata
    /// probe; there is no sequential-buffering fallback.
    #[error("Server does not honor range requests: {0}")]
    RangeNotSupported(String),

    // ===== External tool =====

    /// ffmpeg or ffprobe exited nonzero or produced unusable output.
    #[error("External tool error: {0}")]
    ExternalTool(String),

    /// ffmpeg/ffprobe binary not found in PATH.
    #[error("FFmpeg not found. Install FFmpeg and ensure it is in your PATH.")]
    FfmpegNotFound,

    // ===== Container metadata =====

    /// The MPEG-4 container could not be parsed.
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    /// Writing restored tags to the destination file failed.
    ///
    /// The audio at the destination is playable but carries no tags;
    /// this is surfaced loudly rather than shipped silently.
    #[error("Metadata write failed: {path}: {message}")]
    MetadataWrite { path: String, message: String },

    // ===== Filesystem =====

    /// Directory creation, stale-output removal or sidecar write failed.
    #[error("Filesystem error: {path}: {message}")]
    FileSystem { path: String, message: String },

    // ===== General =====

    /// The run was cancelled cooperatively.
    #[error("Operation cancelled")]
    Cancelled,

    // ===== External library conversions =====

    /// HTTP client error from reqwest.
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// JSON error parsing ffprobe output.
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LiberationError {
    /// Create a [`LiberationError::Validation`] error.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        LiberationError::Validation(message.into())
    }

    /// Create a [`LiberationError::Network`] error.
    pub fn network<S: Into<String>>(message: S, status_code: Option<u16>) -> Self {
        LiberationError::Network {
            message: message.into(),
            status_code,
        }
    }

    /// Create a [`LiberationError::MetadataWrite`] error for `path`.
    pub fn metadata_write<S: Into<String>>(path: &std::path::Path, message: S) -> Self {
        LiberationError::MetadataWrite {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// Create a [`LiberationError::FileSystem`] error for `path`.
    pub fn filesystem<S: Into<String>>(path: &std::path::Path, message: S) -> Self {
        LiberationError::FileSystem {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// True for errors raised before the pipeline has done any work.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LiberationError::Validation(_) | LiberationError::InvalidLicense(_)
        )
    }
}
