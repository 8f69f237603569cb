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


//! Chapter table for one audiobook.
//!
//! Chapters form an ordered, contiguous, non-overlapping cover of the
//! full duration: the first starts at zero, each ends where the next
//! begins, and the last ends at the total duration. [`ChapterInfo`]
//! enforces that shape at construction so every downstream consumer
//! (ffmetadata override, cue sheet, nfo report) can rely on it.
//!
//! MPEG-4 containers do not carry chapter timing as a tag atom, so the
//! chapter table travels outside the tag restore: either the caller
//! supplies it (written into the transcode via an ffmetadata file) or
//! it is read back from the finished output with ffprobe.

use crate::error::{LiberationError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// A named, contiguous time range within the audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub title: String,
    pub start: Duration,
    pub end: Duration,
}

impl Chapter {
    pub fn new(title: impl Into<String>, start: Duration, end: Duration) -> Self {
        Self {
            title: title.into(),
            start,
            end,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Validated ordered sequence of chapters covering the full duration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterInfo {
    chapters: Vec<Chapter>,
}

impl ChapterInfo {
    /// Build a chapter table, checking the cover invariants.
    pub fn new(chapters: Vec<Chapter>) -> Result<Self> {
        if chapters.is_empty() {
            return Err(LiberationError::validation("chapter list is empty"));
        }
        if chapters[0].start != Duration::ZERO {
            return Err(LiberationError::validation(
                "first chapter must start at 00:00",
            ));
        }
        for chapter in &chapters {
            if chapter.end <= chapter.start {
                return Err(LiberationError::validation(format!(
                    "chapter '{}' has non-positive duration",
                    chapter.title
                )));
            }
        }
        for pair in chapters.windows(2) {
            if pair[0].end != pair[1].start {
                return Err(LiberationError::validation(format!(
                    "chapters '{}' and '{}' are not contiguous",
                    pair[0].title, pair[1].title
                )));
            }
        }
        Ok(Self { chapters })
    }

    /// A single chapter spanning the whole book.
    pub fn single(total_duration: Duration) -> Result<Self> {
        Self::new(vec![Chapter::new("Chapter 1", Duration::ZERO, total_duration)])
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn count(&self) -> usize {
        self.chapters.len()
    }

    /// Total duration covered, i.e. the last chapter's end.
    pub fn total_duration(&self) -> Duration {
        self.chapters.last().map(|c| c.end).unwrap_or_default()
    }

    /// Render the chapter table as an ffmetadata file.
    ///
    /// Only chapter boundaries are emitted. Passing this to the
    /// transcode wipes every other tag in the output as a side effect
    /// of re-encapsulation; those tags are restored afterwards from
    /// the remote snapshot, keeping caller-supplied chapters and
    /// restored tags from clobbering each other.
    pub fn to_ffmeta(&self) -> String {
        let mut content = String::from(";FFMETADATA1\n");
        for chapter in &self.chapters {
            content.push_str("\n[CHAPTER]\n");
            content.push_str("TIMEBASE=1/1000\n");
            content.push_str(&format!("START={}\n", chapter.start.as_millis()));
            content.push_str(&format!("END={}\n", chapter.end.as_millis()));
            content.push_str(&format!("title={}\n", escape_ffmeta(&chapter.title)));
        }
        content
    }

    /// Read the chapter table back from a finished audio file.
    ///
    /// Uses `ffprobe -show_chapters -show_format`. A file without a
    /// chapter table yields a single chapter covering the whole
    /// duration so the sidecar generators always have something to
    /// render.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let output = Command::new("ffprobe")
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_chapters")
            .arg("-show_format")
            .arg(path.as_os_str())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    LiberationError::FfmpegNotFound
                } else {
                    LiberationError::ExternalTool(format!("failed to execute ffprobe: {e}"))
                }
            })?;

        if !output.status.success() {
            return Err(LiberationError::ExternalTool(format!(
                "ffprobe exited with {} for {}",
                output.status,
                path.display()
            )));
        }

        let probe: ChapterProbe = serde_json::from_slice(&output.stdout)?;

        let chapters: Vec<Chapter> = probe
            .chapters
            .unwrap_or_default()
            .into_iter()
            .map(|c| {
                let start = c.start_time.parse::<f64>().unwrap_or(0.0);
                let end = c.end_time.parse::<f64>().unwrap_or(0.0);
                Chapter {
                    title: c
                        .tags
                        .and_then(|t| t.get("title").cloned())
                        .unwrap_or_else(|| format!("Chapter {}", c.id + 1)),
                    start: Duration::from_secs_f64(start.max(0.0)),
                    end: Duration::from_secs_f64(end.max(0.0)),
                }
            })
            .collect();

        if chapters.is_empty() {
            let duration = probe
                .format
                .and_then(|f| f.duration)
                .and_then(|d| d.parse::<f64>().ok())
                .ok_or_else(|| {
                    LiberationError::ExternalTool(format!(
                        "ffprobe reported no chapters and no duration for {}",
                        path.display()
                    ))
                })?;
            return Self::single(Duration::from_secs_f64(duration));
        }

        Self::new(chapters)
    }
}

/// Escape ffmetadata special characters in a tag value.
fn escape_ffmeta(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Deserialize)]
struct ChapterProbe {
    chapters: Option<Vec<ChapterProbeEntry>>,
    format: Option<FormatProbe>,
}

#[derive(Debug, Deserialize)]
struct ChapterProbeEntry {
    id: i64,
    start_time: String,
    end_time: String,
    tags: Option<std::collections::HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct FormatProbe {
    duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn two_chapters() -> ChapterInfo {
        ChapterInfo::new(vec![
            Chapter::new("Ch1", secs(0), secs(60)),
            Chapter::new("Ch2", secs(60), secs(125)),
        ])
        .unwrap()
    }

    #[test]
    fn test_valid_table() {
        let info = two_chapters();
        assert_eq!(info.count(), 2);
        assert_eq!(info.total_duration(), secs(125));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(ChapterInfo::new(vec![]).is_err());
    }

    #[test]
    fn test_rejects_nonzero_start() {
        let result = ChapterInfo::new(vec![Chapter::new("Ch1", secs(5), secs(60))]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_gap() {
        let result = ChapterInfo::new(vec![
            Chapter::new("Ch1", secs(0), secs(60)),
            Chapter::new("Ch2", secs(61), secs(120)),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_overlap() {
        let result = ChapterInfo::new(vec![
            Chapter::new("Ch1", secs(0), secs(60)),
            Chapter::new("Ch2", secs(59), secs(120)),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_length_chapter() {
        let result = ChapterInfo::new(vec![Chapter::new("Ch1", secs(0), secs(0))]);
        assert!(result.is_err());
    }

    #[test]
    fn test_ffmeta_rendering() {
        let meta = two_chapters().to_ffmeta();
        assert!(meta.starts_with(";FFMETADATA1\n"));
        assert!(meta.contains("[CHAPTER]"));
        assert!(meta.contains("TIMEBASE=1/1000"));
        assert!(meta.contains("START=0\n"));
        assert!(meta.contains("END=60000\n"));
        assert!(meta.contains("title=Ch1"));
        assert!(meta.contains("START=60000\n"));
        assert!(meta.contains("END=125000\n"));
    }

    #[test]
    fn test_ffmeta_escaping() {
        let info = ChapterInfo::new(vec![Chapter::new("A=B;C", secs(0), secs(10))]).unwrap();
        assert!(info.to_ffmeta().contains("title=A\\=B\\;C"));
    }

    #[test]
    fn test_single_chapter() {
        let info = ChapterInfo::single(secs(3600)).unwrap();
        assert_eq!(info.count(), 1);
        assert_eq!(info.chapters()[0].title, "Chapter 1");
        assert_eq!(info.total_duration(), secs(3600));
    }
}
