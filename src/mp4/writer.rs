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


//! Tag restoration on the finished local file.
//!
//! The transcode writes a clean container whose `moov` carries no tag
//! list (chapters went in through the metadata override instead).
//! [`restore_tags`] splices the snapshot's atoms back in: it rebuilds
//! `moov` with a fresh `udta.meta.ilst`, patches the chunk-offset
//! tables if the `moov` resize moved the audio payload, and replaces
//! the file atomically via a temporary sibling and rename.
//!
//! Everything outside `moov` is copied through byte-exact.

use crate::error::{LiberationError, Result};
use crate::mp4::boxes::{self, FourCc, META_VERFLAGS_LEN};
use crate::mp4::{reader, TagAtoms};
use crate::net::{RangeSource, RemoteFile};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

/// Local-file implementation of [`RangeSource`], so the same box walk
/// serves both the HTTP probe and the on-disk rewrite.
pub struct FileSource {
    file: fs::File,
    len: u64,
}

impl FileSource {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)
            .await
            .map_err(|e| LiberationError::filesystem(path, e.to_string()))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| LiberationError::filesystem(path, e.to_string()))?
            .len();
        Ok(Self { file, len })
    }
}

#[async_trait]
impl RangeSource for FileSource {
    async fn read_range(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact(&mut buf).await?;
        Ok(buf.into())
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Write the tag atoms onto `path`, replacing any existing tag list.
pub async fn restore_tags(path: &Path, atoms: &TagAtoms) -> Result<()> {
    let mut file = RemoteFile::new(FileSource::open(path).await?);
    let file_len = file.len();
    let moov = reader::locate_moov(&mut file).await?;
    drop(file);

    let mut payload = rebuild_moov_payload(&moov.payload, atoms)?;
    let new_moov = {
        // Serialized with a 32-bit size header regardless of what the
        // source used; the delta below accounts for the difference.
        let new_total = payload.len() as u64 + 8;
        let delta = new_total as i64 - moov.total_size as i64;
        if delta != 0 {
            let old_moov_end = moov.file_offset + moov.total_size;
            let patched = patch_chunk_offsets(&mut payload, old_moov_end, delta)?;
            debug!(delta, patched, "moov resized, chunk offsets shifted");
        }
        boxes::build_box(FourCc::MOOV, &payload)?
    };

    splice(path, moov.file_offset, moov.total_size, &new_moov, file_len).await?;
    info!(path = %path.display(), atoms = atoms.len(), "tags restored");
    Ok(())
}

/// Read the tag atoms currently on `path`.
pub async fn read_tags(path: &Path) -> Result<TagAtoms> {
    let mut file = RemoteFile::new(FileSource::open(path).await?);
    let moov = reader::locate_moov(&mut file).await?;
    reader::parse_ilst_atoms(&moov.payload)
}

/// Copy the moov children, swapping the tag list for a fresh one. An
/// existing `udta` keeps its non-`meta` children; a file with no
/// `udta` gets one appended.
fn rebuild_moov_payload(old: &[u8], atoms: &TagAtoms) -> Result<Vec<u8>> {
    let meta_box = build_meta_box(atoms)?;
    let mut out = Vec::with_capacity(old.len() + meta_box.len());
    let mut saw_udta = false;

    for child in boxes::children(old)? {
        if child.kind == FourCc::UDTA {
            saw_udta = true;
            let mut udta_payload = Vec::new();
            for grand in boxes::children(child.payload)? {
                if grand.kind != FourCc::META {
                    udta_payload.extend_from_slice(grand.raw);
                }
            }
            udta_payload.extend_from_slice(&meta_box);
            out.extend(boxes::build_box(FourCc::UDTA, &udta_payload)?);
        } else {
            out.extend_from_slice(child.raw);
        }
    }
    if !saw_udta {
        out.extend(boxes::build_box(FourCc::UDTA, &meta_box)?);
    }
    Ok(out)
}

/// `meta` full box: version/flags, an Apple item-list `hdlr`, then the
/// `ilst` holding the atoms in snapshot order.
pub(crate) fn build_meta_box(atoms: &TagAtoms) -> Result<Vec<u8>> {
    let mut hdlr_payload = Vec::with_capacity(25);
    hdlr_payload.extend_from_slice(&[0u8; 8]);
    hdlr_payload.extend_from_slice(b"mdir");
    hdlr_payload.extend_from_slice(b"appl");
    hdlr_payload.extend_from_slice(&[0u8; 9]);

    let mut ilst_payload = Vec::new();
    for (kind, payload) in atoms {
        ilst_payload.extend(boxes::build_box(*kind, payload)?);
    }

    let mut meta_payload = vec![0u8; META_VERFLAGS_LEN];
    meta_payload.extend(boxes::build_box(FourCc::HDLR, &hdlr_payload)?);
    meta_payload.extend(boxes::build_box(FourCc::ILST, &ilst_payload)?);
    boxes::build_box(FourCc::META, &meta_payload)
}

/// Containers to descend through when hunting chunk-offset tables.
const OFFSET_TABLE_PATH: [FourCc; 4] = [FourCc::TRAK, FourCc::MDIA, FourCc::MINF, FourCc::STBL];

/// Shift every `stco`/`co64` entry at or past `threshold` by `delta`.
///
/// Entries below the threshold point at data before the old moov end
/// and do not move. Returns the number of entries rewritten.
fn patch_chunk_offsets(buf: &mut [u8], threshold: u64, delta: i64) -> Result<usize> {
    let mut patched = 0usize;
    let mut pos = 0usize;
    while pos < buf.len() {
        let header = boxes::parse_header(buf, pos)?;
        let start = pos + header.header_len;
        let end = pos + header.total_size as usize;

        if OFFSET_TABLE_PATH.contains(&header.kind) {
            patched += patch_chunk_offsets(&mut buf[start..end], threshold, delta)?;
        } else if header.kind == FourCc::STCO {
            patched += patch_stco(&mut buf[start..end], threshold, delta)?;
        } else if header.kind == FourCc::CO64 {
            patched += patch_co64(&mut buf[start..end], threshold, delta)?;
        }
        pos = end;
    }
    Ok(patched)
}

fn patch_stco(payload: &mut [u8], threshold: u64, delta: i64) -> Result<usize> {
    let count = offset_table_count(payload, 4)?;
    let entries = &mut payload[8..];
    let mut patched = 0usize;
    for i in 0..count {
        let at = i * 4;
        let offset = u32::from_be_bytes(entries[at..at + 4].try_into().unwrap());
        if u64::from(offset) >= threshold {
            let shifted = i64::from(offset) + delta;
            let shifted = u32::try_from(shifted).map_err(|_| {
                LiberationError::InvalidContainer(format!(
                    "stco entry {offset} shifts out of 32-bit range"
                ))
            })?;
            entries[at..at + 4].copy_from_slice(&shifted.to_be_bytes());
            patched += 1;
        }
    }
    Ok(patched)
}

fn patch_co64(payload: &mut [u8], threshold: u64, delta: i64) -> Result<usize> {
    let count = offset_table_count(payload, 8)?;
    let entries = &mut payload[8..];
    let mut patched = 0usize;
    for i in 0..count {
        let at = i * 8;
        let offset = u64::from_be_bytes(entries[at..at + 8].try_into().unwrap());
        if offset >= threshold {
            let shifted = offset.checked_add_signed(delta).ok_or_else(|| {
                LiberationError::InvalidContainer(format!(
                    "co64 entry {offset} shifts out of range"
                ))
            })?;
            entries[at..at + 8].copy_from_slice(&shifted.to_be_bytes());
            patched += 1;
        }
    }
    Ok(patched)
}

/// Validate a chunk-offset full box and return its entry count.
fn offset_table_count(payload: &[u8], entry_width: usize) -> Result<usize> {
    if payload.len() < 8 {
        return Err(LiberationError::InvalidContainer(
            "truncated chunk-offset table".into(),
        ));
    }
    let count = u32::from_be_bytes(payload[4..8].try_into().unwrap()) as usize;
    if payload.len() < 8 + count * entry_width {
        return Err(LiberationError::InvalidContainer(format!(
            "chunk-offset table claims {count} entries, payload too short"
        )));
    }
    Ok(count)
}

/// Rewrite the file with `new_moov` in place of the old one: prefix
/// and suffix stream-copied, then an atomic rename over the original.
async fn splice(
    path: &Path,
    moov_offset: u64,
    old_moov_size: u64,
    new_moov: &[u8],
    file_len: u64,
) -> Result<()> {
    let tmp_path = sibling_temp_path(path);

    let result = splice_into(path, &tmp_path, moov_offset, old_moov_size, new_moov).await;
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| LiberationError::metadata_write(path, e.to_string()))?;

    debug!(
        old_len = file_len,
        new_len = file_len - old_moov_size + new_moov.len() as u64,
        "container rewritten"
    );
    Ok(())
}

async fn splice_into(
    path: &Path,
    tmp_path: &Path,
    moov_offset: u64,
    old_moov_size: u64,
    new_moov: &[u8],
) -> Result<()> {
    let mut src = fs::File::open(path)
        .await
        .map_err(|e| LiberationError::filesystem(path, e.to_string()))?;
    let mut dst = fs::File::create(tmp_path)
        .await
        .map_err(|e| LiberationError::metadata_write(tmp_path, e.to_string()))?;

    let mut prefix = (&mut src).take(moov_offset);
    tokio::io::copy(&mut prefix, &mut dst).await?;

    dst.write_all(new_moov).await?;

    src.seek(SeekFrom::Start(moov_offset + old_moov_size)).await?;
    tokio::io::copy(&mut src, &mut dst).await?;

    dst.sync_all()
        .await
        .map_err(|e| LiberationError::metadata_write(tmp_path, e.to_string()))?;
    Ok(())
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".retag.tmp");
    path.with_file_name(name)
}
