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


//! The concrete audiobook conversion run.
//!
//! Five steps over one shared context:
//!
//! 1. create the output directory
//! 2. download + decrypt + combine via ffmpeg, with optional
//!    caller-supplied chapters written in through the metadata override
//! 3. restore the container tags from the remote snapshot
//! 4. write the cue sheet
//! 5. write the nfo report
//!
//! Construction does everything that can fail fast: argument and
//! license validation, the one-shot remote metadata probe, output path
//! derivation and stale-output removal. After that, `run()` only ever
//! reports, it never unwinds.
//!
//! Cancellation flows exclusively into step 2 (the only long-running
//! step); once the transcode has finished, the remaining steps are
//! quick local work and always run to completion.

use crate::chapters::ChapterInfo;
use crate::error::{LiberationError, Result};
use crate::license::DownloadLicense;
use crate::mp4::{self, ContainerMetadata};
use crate::net::{HttpRangeSource, RemoteFile};
use crate::paths;
use crate::pipeline::steps::StepSequence;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::sidecar;
use crate::transcode::FfmpegProcessor;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of a full conversion run.
#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub succeeded: bool,

    /// Wall-clock time across all executed steps.
    pub elapsed: Duration,

    /// Realtime multiple on success: book duration over elapsed time.
    pub speedup: Option<f64>,

    /// Index and name of the failing step, if any.
    pub failed_step: Option<(usize, &'static str)>,

    /// Final audio path (written only on success).
    pub output_path: PathBuf,
}

/// One audiobook conversion, constructed per book.
pub struct AaxcConverter {
    context: ConvertContext,
    cancel: CancellationToken,
}

impl AaxcConverter {
    /// Validate arguments, probe the remote container and prepare the
    /// output location.
    ///
    /// `chapters` overrides the source chapter table; pass `None` to
    /// keep the source's own chapters. The returned receiver delivers
    /// progress events during step 2.
    pub async fn new(
        license: DownloadLicense,
        out_dir: &Path,
        chapters: Option<ChapterInfo>,
    ) -> Result<(Self, mpsc::Receiver<ProgressEvent>)> {
        if out_dir.as_os_str().is_empty() {
            return Err(LiberationError::validation("output directory is empty"));
        }
        license.validate()?;
        let dir_meta = fs::metadata(out_dir).await.map_err(|_| {
            LiberationError::validation(format!(
                "output directory does not exist: {}",
                out_dir.display()
            ))
        })?;
        if !dir_meta.is_dir() {
            return Err(LiberationError::validation(format!(
                "output path is not a directory: {}",
                out_dir.display()
            )));
        }

        // One-shot metadata probe; the transcode opens its own
        // connection later.
        let metadata = {
            let source = HttpRangeSource::open(&license).await?;
            let mut file = RemoteFile::new(source);
            mp4::reader::probe(&mut file).await?
        };
        info!(
            title = %metadata.title,
            author = %metadata.author,
            duration_secs = metadata.duration.as_secs(),
            "remote metadata probed"
        );

        Self::from_parts(license, out_dir, metadata, chapters).await
    }

    /// Assemble a converter around an already-taken metadata snapshot.
    pub(crate) async fn from_parts(
        license: DownloadLicense,
        out_dir: &Path,
        metadata: ContainerMetadata,
        chapters: Option<ChapterInfo>,
    ) -> Result<(Self, mpsc::Receiver<ProgressEvent>)> {
        if let Some(ch) = &chapters {
            if ch.total_duration() != metadata.duration {
                warn!(
                    chapters_secs = ch.total_duration().as_secs(),
                    book_secs = metadata.duration.as_secs(),
                    "supplied chapter table does not cover the exact book duration"
                );
            }
        }

        let output_path = paths::default_book_path(out_dir, &metadata.author, &metadata.title);
        if fs::metadata(&output_path).await.is_ok() {
            info!(path = %output_path.display(), "removing stale previous output");
            fs::remove_file(&output_path)
                .await
                .map_err(|e| LiberationError::filesystem(&output_path, e.to_string()))?;
        }

        let (reporter, receiver) = ProgressReporter::new(metadata.duration);
        let cancel = CancellationToken::new();
        let converter = Self {
            context: ConvertContext {
                license,
                metadata,
                chapters,
                output_path,
                reporter: Some(reporter),
                cancel: cancel.clone(),
                #[cfg(test)]
                transcode_stub: None,
            },
            cancel,
        };
        Ok((converter, receiver))
    }

    /// Path the finished audio will land at.
    pub fn output_path(&self) -> &Path {
        &self.context.output_path
    }

    /// Override the derived output path before running. A stale file
    /// already at the new path is removed, as at construction.
    pub async fn set_output_path(&mut self, path: PathBuf) -> Result<()> {
        if fs::metadata(&path).await.is_ok() {
            info!(path = %path.display(), "removing stale previous output");
            fs::remove_file(&path)
                .await
                .map_err(|e| LiberationError::filesystem(&path, e.to_string()))?;
        }
        self.context.output_path = path;
        Ok(())
    }

    /// The remote metadata snapshot taken at construction.
    pub fn metadata(&self) -> &ContainerMetadata {
        &self.context.metadata
    }

    /// Handle for cancelling the run from another task. Cancellation
    /// is observed by the transcode step only.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replace the ffmpeg invocation with `stub`, which must write the
    /// output file itself. Every other step runs for real.
    #[cfg(test)]
    pub(crate) fn stub_transcode(&mut self, stub: TranscodeStub) {
        self.context.transcode_stub = Some(stub);
    }

    /// Execute the five steps, stopping at the first failure.
    pub async fn run(&mut self) -> ConversionReport {
        let mut sequence: StepSequence<ConvertContext> = StepSequence::new("aaxc conversion");
        sequence.add_step("create output directory", step_create_output_dir);
        sequence.add_step("download and decrypt", step_transcode);
        sequence.add_step("restore container tags", step_restore_tags);
        sequence.add_step("write cue sheet", step_write_cue);
        sequence.add_step("write nfo report", step_write_nfo);

        let report = sequence.run(&mut self.context).await;

        let speedup = report.succeeded.then(|| {
            self.context.metadata.duration.as_secs_f64() / report.elapsed.as_secs_f64().max(1e-9)
        });
        if report.succeeded {
            info!(
                output = %self.context.output_path.display(),
                elapsed = ?report.elapsed,
                speedup = speedup.unwrap_or(0.0),
                "conversion complete"
            );
        }

        ConversionReport {
            succeeded: report.succeeded,
            elapsed: report.elapsed,
            speedup,
            failed_step: report.failed_step,
            output_path: self.context.output_path.clone(),
        }
    }
}

fn step_create_output_dir(ctx: &mut ConvertContext) -> BoxFuture<'_, bool> {
    ctx.create_output_dir().boxed()
}

fn step_transcode(ctx: &mut ConvertContext) -> BoxFuture<'_, bool> {
    ctx.transcode().boxed()
}

fn step_restore_tags(ctx: &mut ConvertContext) -> BoxFuture<'_, bool> {
    ctx.restore_tags().boxed()
}

fn step_write_cue(ctx: &mut ConvertContext) -> BoxFuture<'_, bool> {
    ctx.write_cue().boxed()
}

fn step_write_nfo(ctx: &mut ConvertContext) -> BoxFuture<'_, bool> {
    ctx.write_nfo().boxed()
}

/// Stand-in for the ffmpeg invocation; writes the output file itself.
#[cfg(test)]
type TranscodeStub = Box<dyn FnOnce(&Path) -> bool + Send>;

/// Shared state the steps operate on.
struct ConvertContext {
    license: DownloadLicense,
    metadata: ContainerMetadata,
    /// Caller-supplied before step 2; always present after it.
    chapters: Option<ChapterInfo>,
    output_path: PathBuf,
    /// Consumed by the transcode step.
    reporter: Option<ProgressReporter>,
    cancel: CancellationToken,
    #[cfg(test)]
    transcode_stub: Option<TranscodeStub>,
}

impl ConvertContext {
    async fn create_output_dir(&mut self) -> bool {
        let Some(parent) = self.output_path.parent() else {
            error!(path = %self.output_path.display(), "output path has no parent");
            return false;
        };
        if let Err(e) = fs::create_dir_all(parent).await {
            error!(path = %parent.display(), error = %e, "could not create output directory");
            return false;
        }
        true
    }

    async fn transcode(&mut self) -> bool {
        let override_path = match &self.chapters {
            Some(chapters) => {
                let path = self.output_path.with_extension("ffmeta.tmp");
                if let Err(e) = fs::write(&path, chapters.to_ffmeta()).await {
                    error!(path = %path.display(), error = %e, "could not write chapter override");
                    return false;
                }
                Some(path)
            }
            None => None,
        };

        #[cfg(test)]
        if let Some(stub) = self.transcode_stub.take() {
            let ok = stub(&self.output_path);
            if let Some(path) = &override_path {
                let _ = fs::remove_file(path).await;
            }
            if !ok {
                return false;
            }
            if self.chapters.is_none() {
                self.chapters = ChapterInfo::single(self.metadata.duration).ok();
            }
            return self.chapters.is_some();
        }

        let Some(reporter) = self.reporter.take() else {
            error!("transcode step ran twice");
            return false;
        };
        let mut processor =
            FfmpegProcessor::new(self.license.clone(), reporter, self.cancel.clone());
        let outcome = processor
            .process_book(&self.output_path, override_path.as_deref())
            .await;

        if let Some(path) = override_path {
            let _ = fs::remove_file(&path).await;
        }

        if !outcome.succeeded {
            error!(
                diagnostic = outcome.diagnostic.as_deref().unwrap_or("none"),
                "decrypt/transcode failed"
            );
            return false;
        }

        // No caller-supplied chapters: read the source's own table
        // back from the finished file so the sidecars have one.
        if self.chapters.is_none() {
            self.chapters = match ChapterInfo::from_file(&self.output_path).await {
                Ok(chapters) => Some(chapters),
                Err(e) => {
                    warn!(error = %e, "chapter readback failed, using a single chapter");
                    match ChapterInfo::single(self.metadata.duration) {
                        Ok(chapters) => Some(chapters),
                        Err(e) => {
                            error!(error = %e, "cannot build fallback chapter table");
                            return false;
                        }
                    }
                }
            };
        }
        true
    }

    async fn restore_tags(&mut self) -> bool {
        match mp4::writer::restore_tags(&self.output_path, &self.metadata.atoms).await {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.output_path.display(), error = %e, "tag restore failed");
                false
            }
        }
    }

    async fn write_cue(&mut self) -> bool {
        let Some(chapters) = &self.chapters else {
            error!("cue step reached without a chapter table");
            return false;
        };
        let file_name = self
            .output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = self.output_path.with_extension("cue");
        let contents = sidecar::cue::contents(&file_name, chapters);
        if let Err(e) = fs::write(&path, contents).await {
            error!(path = %path.display(), error = %e, "could not write cue sheet");
            return false;
        }
        debug!(path = %path.display(), "cue sheet written");
        true
    }

    async fn write_nfo(&mut self) -> bool {
        let Some(chapters) = &self.chapters else {
            error!("nfo step reached without a chapter table");
            return false;
        };
        let app_name = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));
        let path = self.output_path.with_extension("nfo");
        let contents = sidecar::nfo::contents(app_name, &self.metadata, chapters);
        if let Err(e) = fs::write(&path, contents).await {
            error!(path = %path.display(), error = %e, "could not write nfo report");
            return false;
        }
        debug!(path = %path.display(), "nfo report written");
        true
    }
}
