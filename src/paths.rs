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


//! Filesystem-safe naming for derived output paths.
//!
//! The default output layout is `<out_dir>/<author>/<title>.m4b`, with
//! author and title coming straight from the remote container tags.
//! Those values routinely contain characters that are path syntax on
//! one platform or another, so each is sanitized as a single component
//! before joining.

use std::path::{Path, PathBuf};

/// Longest sanitized component, in bytes. The common limit across the
/// supported filesystems.
const MAX_COMPONENT_LENGTH: usize = 255;

/// Sanitize one path component (an author directory or a file stem).
///
/// Path separators and characters reserved on Windows are replaced
/// with a space, control characters dropped, runs of whitespace
/// collapsed, and trailing dots trimmed. An input that sanitizes to
/// nothing becomes `"_"` so the join still produces a usable path.
pub fn sanitize_component(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => result.push(' '),
            c if c.is_control() => {}
            c => result.push(c),
        }
    }

    let collapsed: String = result.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches('.').trim();

    let mut out = if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    };
    truncate_component(&mut out, MAX_COMPONENT_LENGTH);
    out
}

/// Truncate to at most `max` bytes on a char boundary.
fn truncate_component(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// Derive the default output path `<out_dir>/<author>/<title>.m4b`.
pub fn default_book_path(out_dir: &Path, author: &str, title: &str) -> PathBuf {
    let mut path = out_dir.join(sanitize_component(author));
    path.push(format!("{}.m4b", sanitize_component(title)));
    path
}
