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


//! Sidecar file generators.
//!
//! Pure string builders for the two files written next to the
//! finished `.m4b`: a cue sheet mapping chapters to player track
//! marks, and a human-readable nfo report. The pipeline steps own the
//! actual file writes, so both generators stay trivially testable.

pub mod cue;
pub mod nfo;
