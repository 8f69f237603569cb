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


//! Download license supplied by the authorization collaborator.
//!
//! The license bundles everything needed to fetch and decrypt a single
//! audiobook asset: the CDN URL, the request headers the CDN expects,
//! and the AES key/IV pair ffmpeg consumes as `-audible_key` and
//! `-audible_iv`. It is created once by the caller and consumed
//! read-only by both the metadata probe and the transcode step.

use crate::error::{LiberationError, Result};
use std::collections::HashMap;
use url::Url;

/// Immutable license for one audiobook asset.
#[derive(Debug, Clone)]
pub struct DownloadLicense {
    /// CDN download URL for the encrypted asset.
    pub download_url: String,

    /// User-Agent the CDN expects on every request.
    pub user_agent: String,

    /// Additional request headers (cookies, tokens).
    pub request_headers: HashMap<String, String>,

    /// Hex-encoded AES content key.
    pub audible_key: String,

    /// Hex-encoded AES IV.
    pub audible_iv: String,

    /// Vendor content identifier, used for diagnostics only.
    pub content_id: String,
}

impl DownloadLicense {
    /// Create a license and validate it.
    pub fn new(
        download_url: impl Into<String>,
        user_agent: impl Into<String>,
        audible_key: impl Into<String>,
        audible_iv: impl Into<String>,
        content_id: impl Into<String>,
    ) -> Result<Self> {
        let license = Self {
            download_url: download_url.into(),
            user_agent: user_agent.into(),
            request_headers: HashMap::new(),
            audible_key: audible_key.into(),
            audible_iv: audible_iv.into(),
            content_id: content_id.into(),
        };
        license.validate()?;
        Ok(license)
    }

    /// Add an extra request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    /// Validate URL and key material. Runs before any I/O.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.download_url)
            .map_err(|e| LiberationError::InvalidLicense(format!("download URL: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(LiberationError::InvalidLicense(format!(
                "download URL must be http(s), got '{}'",
                url.scheme()
            )));
        }

        // ffmpeg takes the key/IV as hex strings; catch garbage here
        // rather than as an opaque decrypt failure mid-run.
        hex::decode(&self.audible_key)
            .map_err(|_| LiberationError::InvalidLicense("audible_key is not valid hex".into()))?;
        hex::decode(&self.audible_iv)
            .map_err(|_| LiberationError::InvalidLicense("audible_iv is not valid hex".into()))?;
        if self.audible_key.is_empty() || self.audible_iv.is_empty() {
            return Err(LiberationError::InvalidLicense(
                "audible_key and audible_iv must be non-empty".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_license() -> DownloadLicense {
        DownloadLicense::new(
            "https://cds.example.com/book.aaxc",
            "Audible/671 CFNetwork/1240.0.4 Darwin/20.6.0",
            "0f0e0d0c0b0a09080706050403020100",
            "000102030405060708090a0b0c0d0e0f",
            "BK_TEST_000001",
        )
        .unwrap()
    }

    #[test]
    fn test_valid_license_passes() {
        valid_license();
    }

    #[test]
    fn test_rejects_bad_url_scheme() {
        let result = DownloadLicense::new(
            "ftp://cds.example.com/book.aaxc",
            "ua",
            "00ff",
            "00ff",
            "id",
        );
        assert!(matches!(result, Err(LiberationError::InvalidLicense(_))));
    }

    #[test]
    fn test_rejects_non_hex_key() {
        let result =
            DownloadLicense::new("https://cds.example.com/a", "ua", "not-hex!", "00ff", "id");
        assert!(matches!(result, Err(LiberationError::InvalidLicense(_))));
    }

    #[test]
    fn test_rejects_empty_iv() {
        let result = DownloadLicense::new("https://cds.example.com/a", "ua", "00ff", "", "id");
        assert!(matches!(result, Err(LiberationError::InvalidLicense(_))));
    }

    #[test]
    fn test_extra_headers() {
        let license = valid_license().with_header("Cookie", "session=abc");
        assert_eq!(
            license.request_headers.get("Cookie").map(String::as_str),
            Some("session=abc")
        );
    }
}
