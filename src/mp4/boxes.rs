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


//! Box-level primitives shared by the reader and writer.
//!
//! An MPEG-4 box is `[u32 size][4-byte type][payload]`; `size == 1`
//! switches to a 64-bit size following the type, `size == 0` extends
//! the box to the end of its container. Sizes include the header.

use crate::error::{LiberationError, Result};
use std::fmt;

/// Four-character box/atom identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const MOOV: FourCc = FourCc(*b"moov");
    pub const MVHD: FourCc = FourCc(*b"mvhd");
    pub const UDTA: FourCc = FourCc(*b"udta");
    pub const META: FourCc = FourCc(*b"meta");
    pub const HDLR: FourCc = FourCc(*b"hdlr");
    pub const ILST: FourCc = FourCc(*b"ilst");
    pub const DATA: FourCc = FourCc(*b"data");
    pub const TRAK: FourCc = FourCc(*b"trak");
    pub const MDIA: FourCc = FourCc(*b"mdia");
    pub const MINF: FourCc = FourCc(*b"minf");
    pub const STBL: FourCc = FourCc(*b"stbl");
    pub const STCO: FourCc = FourCc(*b"stco");
    pub const CO64: FourCc = FourCc(*b"co64");

    /// `©nam` — title.
    pub const TITLE: FourCc = FourCc([0xa9, b'n', b'a', b'm']);
    /// `©ART` — performer/author.
    pub const ARTIST: FourCc = FourCc([0xa9, b'A', b'R', b'T']);
    /// `©nrt` — narrator.
    pub const NARRATOR: FourCc = FourCc([0xa9, b'n', b'r', b't']);
    /// `covr` — cover art.
    pub const COVER: FourCc = FourCc(*b"covr");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

/// Parsed box header at the start of a byte slice.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoxHeader {
    pub kind: FourCc,
    /// Header length: 8, or 16 with a 64-bit size.
    pub header_len: usize,
    /// Total box size including the header.
    pub total_size: u64,
}

/// Parse the box header at `buf[pos..]`, where the enclosing container
/// ends at `buf.len()`.
pub(crate) fn parse_header(buf: &[u8], pos: usize) -> Result<BoxHeader> {
    let remaining = buf.len() - pos;
    if remaining < 8 {
        return Err(LiberationError::InvalidContainer(format!(
            "truncated box header: {remaining} bytes left"
        )));
    }
    let size32 = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
    let kind = FourCc(buf[pos + 4..pos + 8].try_into().unwrap());

    let (header_len, total_size) = match size32 {
        0 => (8, remaining as u64),
        1 => {
            if remaining < 16 {
                return Err(LiberationError::InvalidContainer(
                    "truncated 64-bit box size".into(),
                ));
            }
            let size64 = u64::from_be_bytes(buf[pos + 8..pos + 16].try_into().unwrap());
            (16, size64)
        }
        n => (8, n as u64),
    };

    if total_size < header_len as u64 || total_size > remaining as u64 {
        return Err(LiberationError::InvalidContainer(format!(
            "box '{kind}' size {total_size} exceeds container ({remaining} bytes left)"
        )));
    }

    Ok(BoxHeader {
        kind,
        header_len,
        total_size,
    })
}

/// A child box within a parsed container payload.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Child<'a> {
    pub kind: FourCc,
    /// Full box bytes, header included.
    pub raw: &'a [u8],
    /// Payload bytes after the header.
    pub payload: &'a [u8],
    /// Offset of the box start within the container payload.
    pub offset: usize,
}

/// Enumerate the child boxes of a container payload.
pub(crate) fn children(buf: &[u8]) -> Result<Vec<Child<'_>>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        let header = parse_header(buf, pos)?;
        let end = pos + header.total_size as usize;
        out.push(Child {
            kind: header.kind,
            raw: &buf[pos..end],
            payload: &buf[pos + header.header_len..end],
            offset: pos,
        });
        pos = end;
    }
    Ok(out)
}

/// Find the first child of `kind` in a container payload.
pub(crate) fn find_child<'a>(buf: &'a [u8], kind: FourCc) -> Result<Option<Child<'a>>> {
    Ok(children(buf)?.into_iter().find(|c| c.kind == kind))
}

/// Serialize a box with a 32-bit size header.
pub(crate) fn build_box(kind: FourCc, payload: &[u8]) -> Result<Vec<u8>> {
    let total = payload.len() as u64 + 8;
    let size = u32::try_from(total).map_err(|_| {
        LiberationError::InvalidContainer(format!("box '{kind}' too large: {total} bytes"))
    })?;
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(kind.as_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// The `meta` box is a full box: its payload starts with four
/// version/flags bytes before any children.
pub(crate) const META_VERFLAGS_LEN: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse_roundtrip() {
        let raw = build_box(FourCc(*b"test"), b"payload").unwrap();
        let header = parse_header(&raw, 0).unwrap();
        assert_eq!(header.kind, FourCc(*b"test"));
        assert_eq!(header.total_size, 15);
        assert_eq!(header.header_len, 8);
    }

    #[test]
    fn test_children_enumeration() {
        let mut buf = build_box(FourCc(*b"aaaa"), b"one").unwrap();
        buf.extend(build_box(FourCc(*b"bbbb"), b"second").unwrap());

        let kids = children(&buf).unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].kind, FourCc(*b"aaaa"));
        assert_eq!(kids[0].payload, b"one");
        assert_eq!(kids[1].kind, FourCc(*b"bbbb"));
        assert_eq!(kids[1].payload, b"second");
        assert_eq!(kids[1].offset, 11);
    }

    #[test]
    fn test_zero_size_extends_to_container_end() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(b"last");
        buf.extend_from_slice(b"trailing payload");

        let header = parse_header(&buf, 0).unwrap();
        assert_eq!(header.total_size, buf.len() as u64);
    }

    #[test]
    fn test_oversized_box_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(b"huge");
        assert!(parse_header(&buf, 0).is_err());
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(parse_header(&[0, 0, 0], 0).is_err());
    }

    #[test]
    fn test_fourcc_display() {
        assert_eq!(FourCc(*b"moov").to_string(), "moov");
        assert_eq!(FourCc::TITLE.to_string(), "\\xa9nam");
    }
}
