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


//! MPEG-4 container tag access.
//!
//! This is deliberately not a general-purpose MP4 editing API. It does
//! exactly two things the pipeline needs:
//!
//! 1. **Snapshot** ([`reader`]): walk the box tree of the remote
//!    source file far enough to read `moov.mvhd` (duration) and every
//!    child of `moov.udta.meta.ilst` — the Apple-style tag list — as
//!    raw `(identifier, payload)` pairs, plus the handful of fields
//!    the pipeline itself interprets (title, author, narrator, cover).
//! 2. **Restore** ([`writer`]): after the transcode has stripped the
//!    tags, write the snapshot back onto the finished local file.
//!
//! Tags are modeled as an *ordered mapping from [`FourCc`] to opaque
//! bytes*, never a closed enumeration. Atoms this crate has no
//! vocabulary for (vendor atoms, freeform `----` atoms, future
//! additions) round-trip byte-exactly without code changes.
//!
//! Chapter timing is not part of any of this: this container family
//! stores chapters as a timed-text track, not as a tag atom, so the
//! chapter table travels through the transcode override and the
//! sidecar files instead.

mod boxes;
pub mod reader;
pub mod writer;

pub use boxes::FourCc;

use bytes::Bytes;
use std::time::Duration;

/// Ordered raw tag atoms: `ilst` children as (identifier, payload).
pub type TagAtoms = Vec<(FourCc, Bytes)>;

/// Read-only snapshot of the source container's metadata, taken over
/// HTTP before the transcode starts.
#[derive(Debug, Clone)]
pub struct ContainerMetadata {
    /// Book title, with the " (Unabridged)" suffix stripped.
    pub title: String,

    /// First performer, or "[unknown]".
    pub author: String,

    /// Narrator, empty when the source carries none.
    pub narrator: String,

    /// Total duration from `mvhd`.
    pub duration: Duration,

    /// Embedded cover art, if any.
    pub cover_art: Option<Bytes>,

    /// Every `ilst` child, in file order, parsed or not.
    pub atoms: TagAtoms,
}
