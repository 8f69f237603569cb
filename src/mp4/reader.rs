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


//! Container metadata snapshot.
//!
//! Walks the top-level box sequence of a (possibly remote) MPEG-4
//! file until it finds `moov`, buffers that one box, and parses
//! duration and the tag list out of it. Only the `moov` box is ever
//! downloaded; the audio payload (`mdat`) is skipped over by its size
//! header, which is what makes probing a multi-gigabyte remote asset
//! cheap.

use crate::error::{LiberationError, Result};
use crate::mp4::boxes::{self, FourCc, META_VERFLAGS_LEN};
use crate::mp4::{ContainerMetadata, TagAtoms};
use crate::net::{RangeSource, RemoteFile};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Upper bound on a buffered `moov`. Real audiobook moov boxes are a
/// few megabytes (cover art included); anything past this is a parse
/// gone wrong, not a bigger book.
const MAX_MOOV_SIZE: u64 = 512 * 1024 * 1024;

/// A located, fully buffered `moov` box.
#[derive(Debug)]
pub(crate) struct Moov {
    /// Offset of the box header within the file.
    pub file_offset: u64,

    /// Total box size including header.
    pub total_size: u64,

    /// 8, or 16 for a 64-bit size header.
    pub header_len: u64,

    /// Payload bytes (children of `moov`).
    pub payload: Vec<u8>,
}

/// Scan top-level boxes and buffer the `moov` payload.
pub(crate) async fn locate_moov<S: RangeSource>(file: &mut RemoteFile<S>) -> Result<Moov> {
    let file_len = file.len();
    let mut pos = 0u64;

    while pos < file_len {
        if file_len - pos < 8 {
            return Err(LiberationError::InvalidContainer(format!(
                "trailing garbage at offset {pos}"
            )));
        }
        let head = file.read(pos, 8).await?;
        let size32 = u32::from_be_bytes(head[0..4].try_into().unwrap());
        let kind = FourCc(head[4..8].try_into().unwrap());

        let (header_len, total_size) = match size32 {
            0 => (8u64, file_len - pos),
            1 => {
                let large = file.read(pos + 8, 8).await?;
                (16u64, u64::from_be_bytes(large[0..8].try_into().unwrap()))
            }
            n => (8u64, u64::from(n)),
        };

        // A 64-bit size from the wire can be anything; the sum must
        // stay within the file without wrapping.
        let box_end = pos
            .checked_add(total_size)
            .filter(|end| *end <= file_len && total_size >= header_len)
            .ok_or_else(|| {
                LiberationError::InvalidContainer(format!(
                    "box '{kind}' at offset {pos} has invalid size {total_size}"
                ))
            })?;

        if kind == FourCc::MOOV {
            let payload_len = total_size - header_len;
            if payload_len > MAX_MOOV_SIZE {
                return Err(LiberationError::InvalidContainer(format!(
                    "moov box implausibly large: {payload_len} bytes"
                )));
            }
            debug!(offset = pos, size = total_size, "found moov");
            let payload = file.read(pos + header_len, payload_len).await?.to_vec();
            return Ok(Moov {
                file_offset: pos,
                total_size,
                header_len,
                payload,
            });
        }

        pos = box_end;
    }

    Err(LiberationError::InvalidContainer(
        "no moov box in file".into(),
    ))
}

/// Take the metadata snapshot the pipeline runs on.
pub async fn probe<S: RangeSource>(file: &mut RemoteFile<S>) -> Result<ContainerMetadata> {
    let moov = locate_moov(file).await?;
    snapshot_from_moov(&moov.payload)
}

/// Build the snapshot from a buffered `moov` payload.
pub(crate) fn snapshot_from_moov(moov_payload: &[u8]) -> Result<ContainerMetadata> {
    let duration = parse_mvhd_duration(moov_payload)?;
    let atoms = parse_ilst_atoms(moov_payload)?;

    let raw_title = text_atom(&atoms, FourCc::TITLE);
    let title = raw_title
        .map(|t| t.replace(" (Unabridged)", ""))
        .unwrap_or_else(|| "[unknown]".to_string());
    let author = text_atom(&atoms, FourCc::ARTIST).unwrap_or_else(|| "[unknown]".to_string());
    let narrator = text_atom(&atoms, FourCc::NARRATOR).unwrap_or_default();
    let cover_art = binary_atom(&atoms, FourCc::COVER);

    Ok(ContainerMetadata {
        title,
        author,
        narrator,
        duration,
        cover_art,
        atoms,
    })
}

/// Duration from `mvhd`: version 0 packs timescale/duration as u32,
/// version 1 widens duration (and the timestamps before it) to u64.
fn parse_mvhd_duration(moov_payload: &[u8]) -> Result<Duration> {
    let mvhd = boxes::find_child(moov_payload, FourCc::MVHD)?
        .ok_or_else(|| LiberationError::InvalidContainer("moov has no mvhd".into()))?;
    let p = mvhd.payload;
    if p.is_empty() {
        return Err(LiberationError::InvalidContainer("empty mvhd".into()));
    }

    let (timescale, duration) = match p[0] {
        0 if p.len() >= 20 => {
            let timescale = u32::from_be_bytes(p[12..16].try_into().unwrap());
            let duration = u64::from(u32::from_be_bytes(p[16..20].try_into().unwrap()));
            (timescale, duration)
        }
        1 if p.len() >= 32 => {
            let timescale = u32::from_be_bytes(p[20..24].try_into().unwrap());
            let duration = u64::from_be_bytes(p[24..32].try_into().unwrap());
            (timescale, duration)
        }
        v => {
            return Err(LiberationError::InvalidContainer(format!(
                "mvhd version {v} with {} payload bytes",
                p.len()
            )))
        }
    };

    if timescale == 0 {
        return Err(LiberationError::InvalidContainer(
            "mvhd timescale is zero".into(),
        ));
    }
    Ok(Duration::from_secs_f64(
        duration as f64 / f64::from(timescale),
    ))
}

/// Collect `ilst` children as raw atoms. A file without a tag list
/// yields an empty mapping, not an error.
pub(crate) fn parse_ilst_atoms(moov_payload: &[u8]) -> Result<TagAtoms> {
    let Some(udta) = boxes::find_child(moov_payload, FourCc::UDTA)? else {
        return Ok(Vec::new());
    };
    let Some(meta) = boxes::find_child(udta.payload, FourCc::META)? else {
        return Ok(Vec::new());
    };
    if meta.payload.len() < META_VERFLAGS_LEN {
        return Err(LiberationError::InvalidContainer("truncated meta".into()));
    }
    let Some(ilst) = boxes::find_child(&meta.payload[META_VERFLAGS_LEN..], FourCc::ILST)? else {
        return Ok(Vec::new());
    };

    let mut atoms = TagAtoms::new();
    for child in boxes::children(ilst.payload)? {
        atoms.push((child.kind, Bytes::copy_from_slice(child.payload)));
    }
    Ok(atoms)
}

/// Value bytes of the first `data` box inside a tag atom payload.
///
/// The `data` payload carries a 4-byte type indicator and a 4-byte
/// locale before the value.
fn data_value(atom_payload: &[u8]) -> Option<Bytes> {
    let data = boxes::find_child(atom_payload, FourCc::DATA).ok()??;
    if data.payload.len() < 8 {
        return None;
    }
    Some(Bytes::copy_from_slice(&data.payload[8..]))
}

fn text_atom(atoms: &TagAtoms, kind: FourCc) -> Option<String> {
    let (_, payload) = atoms.iter().find(|(k, _)| *k == kind)?;
    let value = data_value(payload)?;
    Some(String::from_utf8_lossy(&value).into_owned())
}

fn binary_atom(atoms: &TagAtoms, kind: FourCc) -> Option<Bytes> {
    let (_, payload) = atoms.iter().find(|(k, _)| *k == kind)?;
    data_value(payload)
}
