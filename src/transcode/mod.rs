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


//! Download, decrypt and combine via ffmpeg.
//!
//! ffmpeg does the heavy lifting in a single invocation: it fetches
//! the encrypted asset from the CDN itself, decrypts it with the
//! license key material, and remuxes the audio stream unmodified
//! (`-c copy`) into the output container. This module spawns the
//! process, feeds progress positions from `-progress pipe:1` to the
//! reporter, and enforces cooperative cancellation at the subprocess
//! boundary.
//!
//! Tool failure is an outcome, not a panic or an early return: the
//! pipeline reads `succeeded` and stops, the diagnostic goes to the
//! log.

use crate::error::{LiberationError, Result};
use crate::license::DownloadLicense;
use crate::progress::ProgressReporter;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines of ffmpeg stderr retained for the failure diagnostic.
const STDERR_TAIL_LINES: usize = 20;

/// Result of one transcode run. Never an `Err`: a failed tool is an
/// expected outcome the pipeline inspects.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub succeeded: bool,

    /// Failure context for the log; `None` on success.
    pub diagnostic: Option<String>,
}

impl ProcessOutcome {
    fn success() -> Self {
        Self {
            succeeded: true,
            diagnostic: None,
        }
    }

    fn failure(diagnostic: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// One-shot ffmpeg runner for a single book.
pub struct FfmpegProcessor {
    license: DownloadLicense,
    reporter: ProgressReporter,
    cancel: CancellationToken,
}

impl FfmpegProcessor {
    pub fn new(
        license: DownloadLicense,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            license,
            reporter,
            cancel,
        }
    }

    /// Run the full download+decrypt+combine into `output`.
    ///
    /// `override_metadata` names an ffmetadata file carrying chapter
    /// boundaries only; mapping it replaces the container metadata
    /// wholesale, which is why the tag snapshot is restored in a later
    /// step rather than passed through here.
    ///
    /// A cancelled run deletes its partial output. Any other failure
    /// leaves the partial file on disk for inspection; the next run
    /// removes it as a stale output.
    pub async fn process_book(
        &mut self,
        output: &Path,
        override_metadata: Option<&Path>,
    ) -> ProcessOutcome {
        info!(
            content_id = %self.license.content_id,
            output = %output.display(),
            "starting decrypt/transcode"
        );

        let result = self.run_ffmpeg(output, override_metadata).await;
        self.reporter.report_percent(0);

        match result {
            Ok(()) => {
                info!(output = %output.display(), "transcode complete");
                ProcessOutcome::success()
            }
            Err(e @ LiberationError::Cancelled) => {
                warn!("transcode cancelled, removing partial output");
                if let Err(rm) = tokio::fs::remove_file(output).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(error = %rm, "could not remove partial output");
                    }
                }
                ProcessOutcome::failure(e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "transcode failed, partial output left in place");
                ProcessOutcome::failure(e.to_string())
            }
        }
    }

    async fn run_ffmpeg(&mut self, output: &Path, override_metadata: Option<&Path>) -> Result<()> {
        let mut command = self.build_command(output, override_metadata);
        debug!(?command, "spawning ffmpeg");

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LiberationError::FfmpegNotFound
            } else {
                LiberationError::ExternalTool(format!("failed to execute ffmpeg: {e}"))
            }
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            LiberationError::ExternalTool("failed to capture ffmpeg stdout".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            LiberationError::ExternalTool("failed to capture ffmpeg stderr".into())
        })?;

        // Retain only the tail of stderr for the diagnostic.
        let stderr_task = tokio::spawn(async move {
            let mut tail: Vec<String> = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut last_position = Duration::ZERO;

        let run_result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("cancellation observed, killing ffmpeg");
                    let _ = child.kill().await;
                    break Err(LiberationError::Cancelled);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(position) = parse_progress_line(&line) {
                            // ffmpeg occasionally reports backwards
                            // around stream boundaries.
                            if position > last_position {
                                last_position = position;
                                self.reporter.report(position);
                            }
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => {
                        let _ = child.kill().await;
                        break Err(LiberationError::Io(e));
                    }
                }
            }
        };

        let status = child
            .wait()
            .await
            .map_err(|e| LiberationError::ExternalTool(format!("ffmpeg process failed: {e}")))?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        run_result?;

        if !status.success() {
            return Err(LiberationError::ExternalTool(format!(
                "ffmpeg exited with {status}: {}",
                stderr_tail.join(" | ")
            )));
        }
        Ok(())
    }

    fn build_command(&self, output: &Path, override_metadata: Option<&Path>) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-nostdin")
            .arg("-y")
            .args(["-loglevel", "error"])
            .args(["-audible_key", &self.license.audible_key])
            .args(["-audible_iv", &self.license.audible_iv])
            .args(["-user_agent", &self.license.user_agent]);

        if !self.license.request_headers.is_empty() {
            let mut headers = String::new();
            for (name, value) in &self.license.request_headers {
                headers.push_str(&format!("{name}: {value}\r\n"));
            }
            cmd.args(["-headers", &headers]);
        }

        cmd.args(["-i", &self.license.download_url]);

        if let Some(meta) = override_metadata {
            cmd.args(["-f", "ffmetadata"]);
            cmd.arg("-i").arg(meta);
            cmd.args(["-map_metadata", "1"]);
        }

        cmd.args(["-c", "copy"])
            .args(["-f", "ipod"])
            .args(["-progress", "pipe:1"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Extract a processed position from one `-progress pipe:1` line.
///
/// `out_time_us` carries microseconds. `out_time_ms` also carries
/// microseconds despite its name (long-standing ffmpeg quirk); both
/// keys appear in each progress block, so either alone is enough.
fn parse_progress_line(line: &str) -> Option<Duration> {
    let (key, value) = line.split_once('=')?;
    match key.trim() {
        "out_time_us" | "out_time_ms" => {
            let micros = value.trim().parse::<i64>().ok()?;
            if micros < 0 {
                return None;
            }
            Some(Duration::from_micros(micros as u64))
        }
        _ => None,
    }
}
