//! Portal table and manifest extractors.
//!
//! Adding a site is a new row in `PortalTable::builtin`, not a new code path.

use regex::Regex;
use reqwest::Url;

/// Video portals that hide the stream behind a JavaScript player.
pub const BUILTIN_PORTALS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "dailymotion.com",
    "ok.ru",
    "rumble.com",
    "vimeo.com",
    "twitch.tv",
];

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

/// True when `host` is `domain` or a subdomain of it.
pub fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Which portal hosts an extractor runs for.
#[derive(Debug, Clone)]
pub enum HostFilter {
    AnyPortal,
    Domains(Vec<String>),
}

impl HostFilter {
    fn accepts(&self, host: &str) -> bool {
        match self {
            Self::AnyPortal => true,
            Self::Domains(domains) => domains.iter().any(|d| host_matches(host, d)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    pub name: &'static str,
    pub hosts: HostFilter,
    /// First capture group is the manifest URL.
    pub pattern: Regex,
}

impl Extractor {
    fn new(name: &'static str, hosts: HostFilter, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            hosts,
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn applies(&self, host: &str) -> bool {
        self.hosts.accepts(host)
    }

    pub fn extract(&self, body: &str) -> Option<String> {
        self.pattern
            .captures(body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PortalTable {
    portals: Vec<String>,
    extractors: Vec<Extractor>,
}

impl PortalTable {
    /// Built-in portals plus `extra_hosts`, with the built-in extractor chain:
    /// site-specific rows first, generic ones after.
    pub fn builtin(extra_hosts: &[String]) -> Result<Self, regex::Error> {
        let mut portals: Vec<String> = BUILTIN_PORTALS.iter().map(|s| s.to_string()).collect();
        for host in extra_hosts {
            let host = host.trim().to_ascii_lowercase();
            if !host.is_empty() && !portals.contains(&host) {
                portals.push(host);
            }
        }

        let youtube = HostFilter::Domains(YOUTUBE_HOSTS.iter().map(|s| s.to_string()).collect());
        let extractors = vec![
            Extractor::new(
                "youtube-hls-manifest",
                youtube,
                r#""hlsManifestUrl"\s*:\s*"([^"]+)""#,
            )?,
            Extractor::new(
                "file-attribute",
                HostFilter::AnyPortal,
                r#"\bfile\s*:\s*["']([^"']+?\.m3u8[^"']*)["']"#,
            )?,
            Extractor::new(
                "source-assignment",
                HostFilter::AnyPortal,
                r#"\bsource\s*[:=]\s*["']([^"']+?\.m3u8[^"']*)["']"#,
            )?,
            Extractor::new(
                "m3u8-string-literal",
                HostFilter::AnyPortal,
                r#"["']((?:https?:)?(?:\\?/){2}[^"'\s]+?\.m3u8[^"'\s]*)["']"#,
            )?,
        ];

        Ok(Self {
            portals,
            extractors,
        })
    }

    pub fn portals(&self) -> &[String] {
        &self.portals
    }

    pub fn extractors(&self) -> &[Extractor] {
        &self.extractors
    }

    pub fn is_portal(&self, host: &str) -> bool {
        self.portals.iter().any(|p| host_matches(host, p))
    }

    /// Run every applicable extractor in order; the first hit wins.
    /// Returns the extractor name and the cleaned, absolute manifest URL.
    pub fn extract(&self, page: &Url, body: &str) -> Option<(&'static str, String)> {
        let host = page.host_str().unwrap_or_default();
        self.extractors
            .iter()
            .filter(|e| e.applies(host))
            .find_map(|e| {
                let raw = e.extract(body)?;
                absolutize(page, &unescape_js(&raw)).map(|url| (e.name, url))
            })
    }
}

/// Undo the escaping a manifest URL picks up inside JS/JSON/HTML.
pub fn unescape_js(raw: &str) -> String {
    raw.replace("\\/", "/")
        .replace("\\u0026", "&")
        .replace("\\u003d", "=")
        .replace("&amp;", "&")
}

fn absolutize(page: &Url, candidate: &str) -> Option<String> {
    page.join(candidate).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PortalTable {
        PortalTable::builtin(&["Example.TV".to_string()]).unwrap()
    }

    #[test]
    fn test_portal_matching() {
        let t = table();
        assert!(t.is_portal("www.youtube.com"));
        assert!(t.is_portal("youtu.be"));
        assert!(t.is_portal("live.example.tv"));
        assert!(!t.is_portal("notyoutube.com"));
        assert!(!t.is_portal("cdn.example.com"));
    }

    #[test]
    fn test_youtube_manifest_field() {
        let page = Url::parse("https://www.youtube.com/watch?v=abc").unwrap();
        let body = r#"var ytInitialPlayerResponse = {"streamingData":{"hlsManifestUrl":"https:\/\/manifest.googlevideo.com\/api\/manifest\/hls_variant\/id\/abc\/file\/index.m3u8?a=1&b=2"}};"#;
        let (name, url) = table().extract(&page, body).unwrap();
        assert_eq!(name, "youtube-hls-manifest");
        assert_eq!(
            url,
            "https://manifest.googlevideo.com/api/manifest/hls_variant/id/abc/file/index.m3u8?a=1&b=2"
        );
    }

    #[test]
    fn test_youtube_extractor_skipped_for_other_hosts() {
        let page = Url::parse("https://www.dailymotion.com/video/x1").unwrap();
        let body = r#"{"hlsManifestUrl":"https://m.example/a.m3u8"}"#;
        // Only the generic literal extractor fires here.
        let (name, _) = table().extract(&page, body).unwrap();
        assert_eq!(name, "m3u8-string-literal");
    }

    #[test]
    fn test_file_and_source_patterns() {
        let page = Url::parse("https://ok.ru/live/1").unwrap();
        let (name, url) = table()
            .extract(&page, r#"jwplayer("p").setup({file:"/hls/live/master.m3u8", autostart: true});"#)
            .unwrap();
        assert_eq!(name, "file-attribute");
        assert_eq!(url, "https://ok.ru/hls/live/master.m3u8");

        let (name, url) = table()
            .extract(&page, "player.src({ source: 'https://cdn.ok.ru/x/index.m3u8?t=9' })")
            .unwrap();
        assert_eq!(name, "source-assignment");
        assert_eq!(url, "https://cdn.ok.ru/x/index.m3u8?t=9");
    }

    #[test]
    fn test_protocol_relative_literal() {
        let page = Url::parse("https://rumble.com/v1").unwrap();
        let (_, url) = table()
            .extract(&page, r#"var u = '//hls.rumble.cloud/live/abc.m3u8';"#)
            .unwrap();
        assert_eq!(url, "https://hls.rumble.cloud/live/abc.m3u8");
    }

    #[test]
    fn test_no_match() {
        let page = Url::parse("https://vimeo.com/1").unwrap();
        assert!(table()
            .extract(&page, "<html><video src=\"movie.mp4\"></video></html>")
            .is_none());
    }
}
