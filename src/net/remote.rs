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

use crate::error::{LiberationError, Result};
use crate::license::DownloadLicense;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Bytes fetched beyond a requested read. MPEG-4 box headers cluster,
/// so one ranged request usually serves many parser reads.
const READAHEAD: u64 = 64 * 1024;

/// Request timeout for each range request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Byte-range access to a fixed-length resource.
///
/// The production implementation is [`HttpRangeSource`]; tests use an
/// in-memory source.
#[async_trait]
pub trait RangeSource: Send {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// `offset + len` must not exceed [`RangeSource::len`]. A zero
    /// `len` yields an empty buffer without touching the resource.
    async fn read_range(&mut self, offset: u64, len: u64) -> Result<Bytes>;

    /// Total size of the resource in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HTTP partial-content implementation of [`RangeSource`].
pub struct HttpRangeSource {
    client: Client,
    url: String,
    headers: Vec<(String, String)>,
    content_length: u64,
}

impl HttpRangeSource {
    /// Open the resource named by the license's download URL.
    ///
    /// Probes total length with a one-byte ranged request. A server
    /// that answers `200 OK` instead of `206 Partial Content` does not
    /// honor ranges and is rejected with
    /// [`LiberationError::RangeNotSupported`].
    pub async fn open(license: &DownloadLicense) -> Result<Self> {
        let mut headers = vec![("User-Agent".to_string(), license.user_agent.clone())];
        for (name, value) in &license.request_headers {
            if !name.eq_ignore_ascii_case("range") {
                headers.push((name.clone(), value.clone()));
            }
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let mut source = Self {
            client,
            url: license.download_url.clone(),
            headers,
            content_length: 0,
        };
        source.content_length = source.probe_length().await?;
        debug!(
            url = %source.url,
            content_length = source.content_length,
            "opened remote file"
        );
        Ok(source)
    }

    /// Discover total size via `Range: bytes=0-0` and `Content-Range`.
    async fn probe_length(&self) -> Result<u64> {
        let response = self.ranged_request(0, 1).await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let content_range = response
                    .headers()
                    .get("content-range")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        LiberationError::network("206 response without Content-Range", Some(206))
                    })?;
                // Content-Range: bytes 0-0/123456
                content_range
                    .rsplit('/')
                    .next()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| {
                        LiberationError::network(
                            format!("unparseable Content-Range '{content_range}'"),
                            Some(206),
                        )
                    })
            }
            StatusCode::OK => Err(LiberationError::RangeNotSupported(self.url.clone())),
            status => Err(LiberationError::network(
                format!("probe request failed with status {status}"),
                Some(status.as_u16()),
            )),
        }
    }

    async fn ranged_request(&self, offset: u64, len: u64) -> Result<reqwest::Response> {
        let mut request = self.client.get(&self.url);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        let end = offset + len - 1;
        request = request.header("Range", format!("bytes={offset}-{end}"));
        Ok(request.send().await?)
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn read_range(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        // The Range header form is inclusive; an empty span has no
        // representation, so answer it locally.
        if len == 0 {
            return Ok(Bytes::new());
        }
        let response = self.ranged_request(offset, len).await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let body = response.bytes().await?;
                if body.len() as u64 != len {
                    return Err(LiberationError::network(
                        format!(
                            "short range read: wanted {len} bytes at {offset}, got {}",
                            body.len()
                        ),
                        Some(206),
                    ));
                }
                Ok(body)
            }
            StatusCode::OK => Err(LiberationError::RangeNotSupported(self.url.clone())),
            status => Err(LiberationError::network(
                format!("range request failed with status {status}"),
                Some(status.as_u16()),
            )),
        }
    }

    fn len(&self) -> u64 {
        self.content_length
    }
}

/// Positioned reader over a [`RangeSource`] with a read-ahead cache.
///
/// Holds at most one cached window. Container parsing reads headers in
/// ascending clusters, so a single window is enough to keep the number
/// of HTTP round trips proportional to the number of distinct regions
/// touched, not the number of `read` calls.
pub struct RemoteFile<S: RangeSource> {
    source: S,
    cache_offset: u64,
    cache: Bytes,
}

impl<S: RangeSource> RemoteFile<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache_offset: 0,
            cache: Bytes::new(),
        }
    }

    /// Total resource size in bytes.
    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    /// Read exactly `len` bytes at `offset`, from cache when possible.
    pub async fn read(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        if offset + len > self.len() {
            return Err(LiberationError::network(
                format!(
                    "read past end: {offset}+{len} > {total}",
                    total = self.len()
                ),
                None,
            ));
        }

        let cache_end = self.cache_offset + self.cache.len() as u64;
        if offset >= self.cache_offset && offset + len <= cache_end {
            let start = (offset - self.cache_offset) as usize;
            return Ok(self.cache.slice(start..start + len as usize));
        }

        // Cache miss: fetch the requested span plus read-ahead,
        // clamped to the end of the resource.
        let fetch_len = len.max(READAHEAD).min(self.len() - offset);
        let fetched = self.source.read_range(offset, fetch_len).await?;
        self.cache_offset = offset;
        self.cache = fetched;

        Ok(self.cache.slice(0..len as usize))
    }
}

/// In-memory range source for tests, counting issued fetches.
#[cfg(test)]
pub(crate) struct MemorySource {
    data: Vec<u8>,
    pub(crate) fetches: usize,
}

#[cfg(test)]
impl MemorySource {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self { data, fetches: 0 }
    }
}

#[cfg(test)]
#[async_trait]
impl RangeSource for MemorySource {
    async fn read_range(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        self.fetches += 1;
        let start = offset as usize;
        let end = start + len as usize;
        if end > self.data.len() {
            return Err(LiberationError::network("range past end", Some(416)));
        }
        Ok(Bytes::copy_from_slice(&self.data[start..end]))
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_nonoverlapping_ranges_cover_resource() {
        let data = fixture(200_000);
        let mut file = RemoteFile::new(MemorySource::new(data.clone()));

        // Uneven chunk sizes, together covering the whole resource.
        let mut collected = Vec::new();
        let mut offset = 0u64;
        for chunk in [1u64, 7, 4096, 65_536, 100_000, 30_360] {
            let bytes = file.read(offset, chunk).await.unwrap();
            collected.extend_from_slice(&bytes);
            offset += chunk;
        }
        assert_eq!(offset, data.len() as u64);
        assert_eq!(collected, data);
    }

    #[tokio::test]
    async fn test_clustered_reads_share_one_fetch() {
        let data = fixture(200_000);
        let mut file = RemoteFile::new(MemorySource::new(data));

        file.read(1000, 8).await.unwrap();
        file.read(1008, 8).await.unwrap();
        file.read(2000, 100).await.unwrap();
        assert_eq!(file.source.fetches, 1);

        // Outside the read-ahead window: second fetch.
        file.read(150_000, 8).await.unwrap();
        assert_eq!(file.source.fetches, 2);
    }

    #[tokio::test]
    async fn test_read_near_end_clamps_readahead() {
        let data = fixture(1000);
        let mut file = RemoteFile::new(MemorySource::new(data.clone()));

        let bytes = file.read(990, 10).await.unwrap();
        assert_eq!(&bytes[..], &data[990..]);
    }

    #[tokio::test]
    async fn test_read_past_end_fails() {
        let mut file = RemoteFile::new(MemorySource::new(fixture(100)));
        assert!(file.read(90, 20).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_length_read() {
        let mut file = RemoteFile::new(MemorySource::new(fixture(100)));
        let bytes = file.read(50, 0).await.unwrap();
        assert!(bytes.is_empty());
        assert_eq!(file.source.fetches, 0);
    }

    #[tokio::test]
    async fn test_zero_length_source_read() {
        // The trait contract: len 0 is answered with an empty buffer,
        // even at offset 0 where an inclusive Range end would wrap.
        let mut source = MemorySource::new(fixture(100));
        let bytes = source.read_range(0, 0).await.unwrap();
        assert!(bytes.is_empty());
    }
}
