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


//! Nfo report rendering.
//!
//! Plain text for humans browsing the library directory; nothing
//! parses it back.

use crate::chapters::ChapterInfo;
use crate::mp4::ContainerMetadata;
use std::fmt::Write;
use std::time::Duration;

/// Render the nfo report. Field order is fixed: title, author,
/// narrator, duration, then the chapter list.
pub fn contents(app_name: &str, metadata: &ContainerMetadata, chapters: &ChapterInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Converted with {app_name}");
    let _ = writeln!(out);
    let _ = writeln!(out, "Title:    {}", metadata.title);
    let _ = writeln!(out, "Author:   {}", metadata.author);
    if !metadata.narrator.is_empty() {
        let _ = writeln!(out, "Narrator: {}", metadata.narrator);
    }
    let _ = writeln!(out, "Duration: {}", clock(metadata.duration));
    let _ = writeln!(out);
    let _ = writeln!(out, "Chapters ({}):", chapters.count());
    for chapter in chapters.chapters() {
        let _ = writeln!(out, "  {}  {}", clock(chapter.start), chapter.title);
    }
    out
}

fn clock(d: Duration) -> String {
    let total = d.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60
    )
}
