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


//! Cue sheet rendering.
//!
//! One FILE entry, one TRACK per chapter, INDEX 01 at the chapter
//! start. Cue time is `MM:SS:FF` with 75 frames per second; minutes
//! run past 99 for long books, which every player that matters
//! accepts.

use crate::chapters::ChapterInfo;
use std::fmt::Write;
use std::time::Duration;

/// Frames per second in cue INDEX timestamps.
const FRAMES_PER_SECOND: u128 = 75;

/// Render the cue sheet for `file_name` (the sibling `.m4b`, name
/// only, no directory).
pub fn contents(file_name: &str, chapters: &ChapterInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "FILE \"{}\" MP4", quote_safe(file_name));
    for (index, chapter) in chapters.chapters().iter().enumerate() {
        let _ = writeln!(out, "TRACK {:02} AUDIO", index + 1);
        let _ = writeln!(out, "  TITLE \"{}\"", quote_safe(&chapter.title));
        let _ = writeln!(out, "  INDEX 01 {}", timestamp(chapter.start));
    }
    out
}

/// `MM:SS:FF`, the sub-second remainder floored to whole frames.
fn timestamp(position: Duration) -> String {
    let ms = position.as_millis();
    let minutes = ms / 60_000;
    let seconds = (ms / 1000) % 60;
    let frames = (ms % 1000) * FRAMES_PER_SECOND / 1000;
    format!("{minutes:02}:{seconds:02}:{frames:02}")
}

/// The cue grammar has no escape sequence inside quoted strings, so an
/// embedded double quote becomes a single quote.
fn quote_safe(value: &str) -> String {
    value.replace('"', "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapters::Chapter;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_two_chapter_sheet() {
        let chapters = ChapterInfo::new(vec![
            Chapter::new("Opening Credits", secs(0), secs(60)),
            Chapter::new("Chapter 1", secs(60), secs(3725)),
        ])
        .unwrap();

        let sheet = contents("Foo.m4b", &chapters);
        assert_eq!(
            sheet,
            "FILE \"Foo.m4b\" MP4\n\
             TRACK 01 AUDIO\n\
             \x20 TITLE \"Opening Credits\"\n\
             \x20 INDEX 01 00:00:00\n\
             TRACK 02 AUDIO\n\
             \x20 TITLE \"Chapter 1\"\n\
             \x20 INDEX 01 01:00:00\n"
        );
    }

    #[test]
    fn test_half_second_is_37_frames() {
        assert_eq!(timestamp(Duration::from_millis(500)), "00:00:37");
    }

    #[test]
    fn test_minutes_run_past_an_hour() {
        assert_eq!(timestamp(secs(3725)), "62:05:00");
    }

    #[test]
    fn test_embedded_quotes_neutralized() {
        let chapters = ChapterInfo::new(vec![Chapter::new(
            "The \"Truth\"",
            secs(0),
            secs(10),
        )])
        .unwrap();
        let sheet = contents("a.m4b", &chapters);
        assert!(sheet.contains("TITLE \"The 'Truth'\""));
        assert!(!sheet.contains("\"The \"Truth\"\""));
    }
}
