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


//! Libriforge converts a DRM-protected remote audiobook asset into a
//! local, fully tagged `.m4b` with `.cue` and `.nfo` sidecars.
//!
//! The pipeline runs in five sequential steps per book: prepare the
//! output directory, download/decrypt/combine through ffmpeg, restore
//! the container tags from a snapshot taken off the remote file before
//! the transcode, then write the two sidecars. See
//! [`pipeline::AaxcConverter`] for the entry point:
//!
//! ```no_run
//! use libriforge::license::DownloadLicense;
//! use libriforge::pipeline::AaxcConverter;
//! use std::path::Path;
//!
//! # async fn demo() -> libriforge::error::Result<()> {
//! let license = DownloadLicense::new(
//!     "https://cds.example.com/book.aaxc",
//!     "Audible/671 CFNetwork/1240.0.4 Darwin/20.6.0",
//!     "0f0e0d0c0b0a09080706050403020100",
//!     "000102030405060708090a0b0c0d0e0f",
//!     "BK_EXAMPLE",
//! )?;
//!
//! let (mut converter, mut progress) =
//!     AaxcConverter::new(license, Path::new("/library"), None).await?;
//! tokio::spawn(async move {
//!     while let Some(event) = progress.recv().await {
//!         println!("{event:?}");
//!     }
//! });
//! let report = converter.run().await;
//! assert!(report.succeeded);
//! # Ok(())
//! # }
//! ```
//!
//! Out of scope by design: authentication and license acquisition
//! (callers supply a ready [`license::DownloadLicense`]), library
//! cataloging, retry/resume logic and any UI.

pub mod chapters;
pub mod error;
pub mod license;
pub mod mp4;
pub mod net;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod sidecar;
pub mod transcode;

pub use chapters::{Chapter, ChapterInfo};
pub use error::{LiberationError, Result};
pub use license::DownloadLicense;
pub use mp4::{ContainerMetadata, FourCc, TagAtoms};
pub use pipeline::{AaxcConverter, ConversionReport};
pub use progress::ProgressEvent;
