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


//! Random-access reads over an HTTP resource.
//!
//! The metadata probe needs to walk MPEG-4 box headers of a remote
//! file that may be several gigabytes, without downloading the
//! payload. [`RemoteFile`] presents `read(offset, len)` on top of a
//! [`RangeSource`], translating reads into HTTP partial-content
//! requests with a small read-ahead cache so clustered header reads
//! collapse into one round trip.
//!
//! Servers that ignore `Range` and answer `200 OK` are rejected up
//! front: random access is a hard requirement here, and sequentially
//! buffering a multi-gigabyte asset just to read its tags would be
//! worse than failing loudly.
//!
//! The probe connection is used single-threaded, once, before the
//! transcode step opens its own separate connection to the same URL.

mod remote;

pub use remote::{HttpRangeSource, RangeSource, RemoteFile};

#[cfg(test)]
pub(crate) use remote::MemorySource;
