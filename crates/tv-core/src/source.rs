//! Source-string micro-syntax: `<url>?|key1=value1&key2=value2`.
//!
//! Parsing is pure and knows nothing about decoders, so every rule here can
//! be exercised without a media stack.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Separator between the URL and the parameter block.
pub const SOURCE_SEPARATOR: &str = "?|";
/// URL-encoded form of `SOURCE_SEPARATOR`.
const ENCODED_SEPARATOR: &str = "%3f%7c";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source string is empty")]
    Empty,
    #[error("source has a parameter block but no URL")]
    MissingUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrmError {
    #[error("unsupported DRM scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("DRM scheme {0:?} given without a license")]
    MissingLicense(String),
    #[error("license must be keyId:key, got {0} segment(s)")]
    SegmentCount(usize),
    #[error("license segment is not valid hex: {0}")]
    InvalidHex(String),
}

/// Typed view of a decomposed source string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSpec {
    pub base_url: String,
    pub drm_scheme: Option<String>,
    pub drm_license: Option<String>,
    pub user_agent: Option<String>,
    pub cookie: Option<String>,
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub forwarded_for: Option<String>,
}

impl SourceSpec {
    /// True when the source carried any DRM parameter at all.
    pub fn has_drm_block(&self) -> bool {
        self.drm_scheme.is_some() || self.drm_license.is_some()
    }

    /// Wire header pairs for the parameters that map onto HTTP headers.
    pub fn header_pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("Cookie", self.cookie.as_deref()),
            ("Referer", self.referer.as_deref()),
            ("Origin", self.origin.as_deref()),
            ("X-Forwarded-For", self.forwarded_for.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }

    /// Decode the DRM block.  `Ok(None)` means no DRM was requested.
    pub fn clearkey(&self) -> Result<Option<ClearKey>, DrmError> {
        let Some(scheme) = self.drm_scheme.as_deref() else {
            return match &self.drm_license {
                // A bare license is taken as ClearKey, the only scheme carried inline.
                Some(license) => ClearKey::parse_license(license).map(Some),
                None => Ok(None),
            };
        };
        if !scheme.eq_ignore_ascii_case("clearkey") {
            return Err(DrmError::UnsupportedScheme(scheme.to_string()));
        }
        match &self.drm_license {
            Some(license) => ClearKey::parse_license(license).map(Some),
            None => Err(DrmError::MissingLicense(scheme.to_string())),
        }
    }
}

/// Split `source` into its URL and parameter block and parse the block.
pub fn parse_source(source: &str) -> Result<SourceSpec, SourceError> {
    let source = source.trim();
    if source.is_empty() {
        return Err(SourceError::Empty);
    }

    let (base, block) = split_source(source);
    if base.is_empty() {
        return Err(SourceError::MissingUrl);
    }

    let mut spec = SourceSpec {
        base_url: base.to_string(),
        ..SourceSpec::default()
    };

    for pair in block.unwrap_or("").split('&') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            debug!("source: ignoring parameter without value: {}", pair);
            continue;
        };
        let value = unescape(value.trim());
        let slot = match key.trim().to_ascii_lowercase().as_str() {
            "drmscheme" => &mut spec.drm_scheme,
            "drmlicense" => &mut spec.drm_license,
            "user-agent" => &mut spec.user_agent,
            "cookie" => &mut spec.cookie,
            "referer" | "referrer" => &mut spec.referer,
            "origin" => &mut spec.origin,
            "x-forwarded-for" => &mut spec.forwarded_for,
            other => {
                debug!("source: ignoring unknown parameter {}", other);
                continue;
            }
        };
        if !value.is_empty() {
            *slot = Some(value);
        }
    }

    Ok(spec)
}

fn split_source(source: &str) -> (&str, Option<&str>) {
    if let Some((base, block)) = source.split_once(SOURCE_SEPARATOR) {
        return (base.trim(), Some(block));
    }
    // The encoded separator is ASCII, so a lowercase copy has identical offsets.
    let lower = source.to_ascii_lowercase();
    if let Some(pos) = lower.find(ENCODED_SEPARATOR) {
        let block = &source[pos + ENCODED_SEPARATOR.len()..];
        return (source[..pos].trim(), Some(block));
    }
    (source, None)
}

fn unescape(value: &str) -> String {
    let spaced = value.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// ClearKey key-id / key pair decoded from `hexKeyId:hexKey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearKey {
    pub key_id: Vec<u8>,
    pub key: Vec<u8>,
}

impl ClearKey {
    pub fn parse_license(license: &str) -> Result<Self, DrmError> {
        let segments: Vec<&str> = license.trim().split(':').collect();
        let [kid, key] = segments.as_slice() else {
            return Err(DrmError::SegmentCount(segments.len()));
        };
        Ok(Self {
            key_id: decode_hex(kid)?,
            key: decode_hex(key)?,
        })
    }

    /// W3C ClearKey license response (JSON Web Key set) for this pair.
    pub fn jwk_license(&self) -> String {
        serde_json::json!({
            "keys": [{
                "kty": "oct",
                "kid": URL_SAFE_NO_PAD.encode(&self.key_id),
                "k": URL_SAFE_NO_PAD.encode(&self.key),
            }],
            "type": "temporary",
        })
        .to_string()
    }
}

fn decode_hex(segment: &str) -> Result<Vec<u8>, DrmError> {
    let segment = segment.trim();
    if segment.is_empty() {
        return Err(DrmError::InvalidHex(segment.to_string()));
    }
    hex::decode(segment).map_err(|_| DrmError::InvalidHex(segment.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_url_has_no_block() {
        let spec = parse_source("https://cdn.example/live/index.m3u8").unwrap();
        assert_eq!(spec.base_url, "https://cdn.example/live/index.m3u8");
        assert!(!spec.has_drm_block());
        assert!(spec.header_pairs().is_empty());
    }

    #[test]
    fn test_keys_are_case_insensitive_and_unescaped() {
        let spec = parse_source(
            "https://cdn.example/a.mpd?|DRMSCHEME=clearkey&User-Agent=My%20Player&Referer=https%3A%2F%2Fsite.example%2F",
        )
        .unwrap();
        assert_eq!(spec.base_url, "https://cdn.example/a.mpd");
        assert_eq!(spec.drm_scheme.as_deref(), Some("clearkey"));
        assert_eq!(spec.user_agent.as_deref(), Some("My Player"));
        assert_eq!(spec.referer.as_deref(), Some("https://site.example/"));
    }

    #[test]
    fn test_encoded_separator() {
        let spec = parse_source("http://x.example/s.ts%3F%7Ccookie=a%3Db&origin=http://o").unwrap();
        assert_eq!(spec.base_url, "http://x.example/s.ts");
        assert_eq!(spec.cookie.as_deref(), Some("a=b"));
        assert_eq!(spec.origin.as_deref(), Some("http://o"));
    }

    #[test]
    fn test_unknown_and_valueless_keys_ignored() {
        let spec = parse_source("http://x/a.m3u8?|foo=bar&novalue&x-forwarded-for=1.2.3.4").unwrap();
        assert_eq!(spec.forwarded_for.as_deref(), Some("1.2.3.4"));
        assert_eq!(
            spec.header_pairs(),
            vec![("X-Forwarded-For", "1.2.3.4")]
        );
    }

    #[test]
    fn test_empty_and_missing_url() {
        assert_eq!(parse_source("   "), Err(SourceError::Empty));
        assert_eq!(parse_source("?|cookie=a"), Err(SourceError::MissingUrl));
    }

    #[test]
    fn test_clearkey_license_decodes() {
        let spec = parse_source("http://x/a.mpd?|drmScheme=clearkey&drmLicense=aabbcc:112233").unwrap();
        let drm = spec.clearkey().unwrap().unwrap();
        assert_eq!(drm.key_id, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(drm.key, vec![0x11, 0x22, 0x33]);
    }

    #[test]
    fn test_malformed_licenses() {
        assert_eq!(
            ClearKey::parse_license("aabbcc"),
            Err(DrmError::SegmentCount(1))
        );
        assert_eq!(
            ClearKey::parse_license("aa:bb:cc"),
            Err(DrmError::SegmentCount(3))
        );
        assert!(matches!(
            ClearKey::parse_license("zz11:2233"),
            Err(DrmError::InvalidHex(_))
        ));
        assert!(matches!(
            ClearKey::parse_license("abc:2233"),
            Err(DrmError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_other_scheme_is_unsupported() {
        let spec = parse_source("http://x/a.mpd?|drmScheme=widevine&drmLicense=http://lic").unwrap();
        assert!(matches!(
            spec.clearkey(),
            Err(DrmError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_jwk_license_is_base64url() {
        let drm = ClearKey::parse_license("aabbcc:112233").unwrap();
        let jwk: serde_json::Value = serde_json::from_str(&drm.jwk_license()).unwrap();
        assert_eq!(jwk["keys"][0]["kid"], "qrvM");
        assert_eq!(jwk["keys"][0]["k"], "ESIz");
        assert_eq!(jwk["type"], "temporary");
    }
}
