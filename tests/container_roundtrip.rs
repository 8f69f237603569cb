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

//! End-to-end container metadata flow through the public API: probe a
//! source over a range source, transcode-shaped output on disk, tag
//! restore, read back.

use async_trait::async_trait;
use bytes::Bytes;
use libriforge::mp4::{reader, writer, FourCc, TagAtoms};
use libriforge::net::{RangeSource, RemoteFile};
use libriforge::Result;
use std::time::Duration;

/// Route tracing output through the test harness; `RUST_LOG` selects
/// the level. Safe to call from every test, only the first wins.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory stand-in for the CDN.
struct MemSource(Vec<u8>);

#[async_trait]
impl RangeSource for MemSource {
    async fn read_range(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        let start = offset as usize;
        Ok(Bytes::copy_from_slice(&self.0[start..start + len as usize]))
    }

    fn len(&self) -> u64 {
        self.0.len() as u64
    }
}

fn build_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn text_data(value: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(value.as_bytes());
    build_box(b"data", &payload)
}

fn tag_atom(kind: FourCc, data_box: &[u8]) -> Vec<u8> {
    build_box(kind.as_bytes(), data_box)
}

/// ftyp + mdat + moov(mvhd, udta.meta.ilst) with a millisecond
/// timescale mvhd.
fn source_file(duration_secs: u32, atoms: &[Vec<u8>]) -> Vec<u8> {
    let mut mvhd_payload = vec![0u8; 12];
    mvhd_payload.extend_from_slice(&1000u32.to_be_bytes());
    mvhd_payload.extend_from_slice(&(duration_secs * 1000).to_be_bytes());
    mvhd_payload.extend_from_slice(&[0u8; 80]);
    let mvhd = build_box(b"mvhd", &mvhd_payload);

    let ilst = build_box(b"ilst", &atoms.concat());
    let mut hdlr_payload = vec![0u8; 8];
    hdlr_payload.extend_from_slice(b"mdirappl");
    hdlr_payload.extend_from_slice(&[0u8; 9]);
    let hdlr = build_box(b"hdlr", &hdlr_payload);
    let mut meta_payload = vec![0u8; 4];
    meta_payload.extend_from_slice(&hdlr);
    meta_payload.extend_from_slice(&ilst);
    let meta = build_box(b"meta", &meta_payload);
    let udta = build_box(b"udta", &meta);

    let mut moov_payload = mvhd;
    moov_payload.extend_from_slice(&udta);

    let mut out = build_box(b"ftyp", b"M4A \x00\x00\x02\x00isomiso2");
    out.extend(build_box(b"mdat", &vec![0x5a; 16384]));
    out.extend(build_box(b"moov", &moov_payload));
    out
}

#[tokio::test]
async fn probe_then_restore_round_trips_every_atom() {
    init_logging();
    let vendor = FourCc(*b"xVND");
    let source_atoms = vec![
        tag_atom(FourCc::TITLE, &text_data("Long Story (Unabridged)")),
        tag_atom(FourCc::ARTIST, &text_data("Jane Writer")),
        tag_atom(FourCc::NARRATOR, &text_data("John Reader")),
        tag_atom(vendor, b"\x00\x07opaque"),
    ];
    let remote = source_file(5400, &source_atoms);

    // Probe over the range source, as the pipeline does pre-transcode.
    let mut file = RemoteFile::new(MemSource(remote));
    let snapshot = reader::probe(&mut file).await.unwrap();
    assert_eq!(snapshot.title, "Long Story");
    assert_eq!(snapshot.author, "Jane Writer");
    assert_eq!(snapshot.narrator, "John Reader");
    assert_eq!(snapshot.duration, Duration::from_secs(5400));
    assert_eq!(snapshot.atoms.len(), 4);

    // The "transcoded" local output: same layout, no tags at all.
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("Long Story.m4b");
    tokio::fs::write(&output, source_file(5400, &[]))
        .await
        .unwrap();

    writer::restore_tags(&output, &snapshot.atoms).await.unwrap();

    let restored: TagAtoms = writer::read_tags(&output).await.unwrap();
    assert_eq!(restored, snapshot.atoms);
    let (kind, payload) = &restored[3];
    assert_eq!(*kind, vendor);
    assert_eq!(&payload[..], b"\x00\x07opaque");
}

#[tokio::test]
async fn restore_is_idempotent_for_same_atoms() {
    init_logging();
    let atoms: TagAtoms = vec![(FourCc::TITLE, Bytes::from(text_data("Twice")))];

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("book.m4b");
    tokio::fs::write(&output, source_file(60, &[])).await.unwrap();

    writer::restore_tags(&output, &atoms).await.unwrap();
    let first = tokio::fs::read(&output).await.unwrap();
    writer::restore_tags(&output, &atoms).await.unwrap();
    let second = tokio::fs::read(&output).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(writer::read_tags(&output).await.unwrap(), atoms);
}
