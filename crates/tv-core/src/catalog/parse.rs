//! Channel-list parsing: the JSON list format and extended M3U.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;

use crate::channel::ChannelRecord;

/// Category given to entries without a group.
pub const DEFAULT_GROUP: &str = "Other";

/// Result of parsing a whole source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCatalog {
    pub records: Vec<ChannelRecord>,
    /// Entries that could not be turned into a channel.
    pub skipped: usize,
}

/// One element of the JSON channel list.  Every field is optional so that a
/// single odd entry does not reject the whole list.
#[derive(Debug, Deserialize)]
struct JsonEntry {
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    logo: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uris: Vec<String>,
}

/// Parse a source body, sniffing JSON vs M3U from its first non-blank bytes.
pub fn parse_catalog(content: &str) -> Result<ParsedCatalog, String> {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("#EXTM3U") || trimmed.starts_with("#EXTINF") {
        return Ok(parse_m3u(trimmed));
    }
    parse_json(trimmed)
}

pub fn parse_json(content: &str) -> Result<ParsedCatalog, String> {
    let items: Vec<serde_json::Value> =
        serde_json::from_str(content).map_err(|e| format!("expected a JSON array: {e}"))?;

    let mut parsed = ParsedCatalog::default();
    for (idx, item) in items.into_iter().enumerate() {
        let entry = match serde_json::from_value::<JsonEntry>(item) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("catalog: skipping entry {}: {}", idx, e);
                parsed.skipped += 1;
                continue;
            }
        };
        match record_from_entry(entry) {
            Some(record) => parsed.records.push(record),
            None => {
                debug!("catalog: skipping entry {} without a usable source", idx);
                parsed.skipped += 1;
            }
        }
    }
    Ok(parsed)
}

fn record_from_entry(entry: JsonEntry) -> Option<ChannelRecord> {
    let sources: Vec<String> = entry
        .uris
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    let first = sources.first()?.clone();

    let title = non_empty(entry.title)
        .or_else(|| non_empty(entry.name))
        .unwrap_or(first);

    Some(ChannelRecord {
        title,
        logo: non_empty(entry.logo).unwrap_or_default(),
        category: non_empty(entry.group).unwrap_or_else(|| DEFAULT_GROUP.to_string()),
        sources,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([A-Za-z0-9_-]+)="([^"]*)""#).expect("valid attribute regex"))
}

/// Extended M3U: `#EXTINF:-1 tvg-logo="…" group-title="…",Name` followed by
/// the URL line.  `#EXTVLCOPT:http-user-agent=` / `http-referrer=` options
/// are folded into the source micro-syntax.
pub fn parse_m3u(content: &str) -> ParsedCatalog {
    let mut parsed = ParsedCatalog::default();
    let mut pending: Option<(String, String, String)> = None;
    let mut options: Vec<(String, String)> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if pending.is_some() {
                // Previous #EXTINF never got a URL line.
                parsed.skipped += 1;
            }
            options.clear();
            // Attribute values may contain commas and names may contain
            // quotes: the name starts at the first comma outside the
            // leading run of `key="value"` attributes.
            let mut attrs_end = 0;
            for m in attr_regex().find_iter(rest) {
                if rest[attrs_end..m.start()].contains(',') {
                    break;
                }
                attrs_end = m.end();
            }
            let (attrs, name) = match rest[attrs_end..].find(',') {
                Some(offset) => {
                    let comma_idx = attrs_end + offset;
                    (&rest[..comma_idx], rest[comma_idx + 1..].trim())
                }
                None => (rest, ""),
            };
            let mut group = String::new();
            let mut logo = String::new();
            for caps in attr_regex().captures_iter(attrs) {
                match &caps[1] {
                    "group-title" => group = caps[2].trim().to_string(),
                    "tvg-logo" => logo = caps[2].trim().to_string(),
                    _ => {}
                }
            }
            pending = Some((name.to_string(), logo, group));
            continue;
        }

        if let Some(opt) = line.strip_prefix("#EXTVLCOPT:") {
            if let Some((key, value)) = opt.split_once('=') {
                let mapped = match key.trim() {
                    "http-user-agent" => Some("user-agent"),
                    "http-referrer" | "http-referer" => Some("referer"),
                    "http-origin" => Some("origin"),
                    _ => None,
                };
                if let Some(mapped) = mapped {
                    options.push((mapped.to_string(), value.trim().to_string()));
                }
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let url = with_options(line, &options);
        options.clear();
        let (name, logo, group) = pending.take().unwrap_or_default();
        let title = if name.is_empty() { line.to_string() } else { name };
        parsed.records.push(ChannelRecord {
            title,
            logo,
            category: if group.is_empty() {
                DEFAULT_GROUP.to_string()
            } else {
                group
            },
            sources: vec![url],
        });
    }

    if pending.is_some() {
        parsed.skipped += 1;
    }
    parsed
}

fn with_options(url: &str, options: &[(String, String)]) -> String {
    if options.is_empty() || url.contains(crate::source::SOURCE_SEPARATOR) {
        return url.to_string();
    }
    let block = options
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                k,
                percent_encoding::utf8_percent_encode(v, percent_encoding::NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{}{}{}", url, crate::source::SOURCE_SEPARATOR, block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse_source;

    #[test]
    fn test_json_entries_and_skips() {
        let json = r#"[
            {"group": "News", "logo": "http://l/1.png", "name": "One", "uris": ["http://a/1.m3u8"]},
            {"group": "News", "title": "Two", "name": "ignored", "uris": ["http://a/2.m3u8", "http://b/2.m3u8"]},
            {"group": "Sports", "name": "No source", "uris": []},
            {"group": 42, "uris": ["http://a/3.m3u8"]},
            "not an object",
            {"uris": ["  http://a/4.m3u8 "]}
        ]"#;
        let parsed = parse_catalog(json).unwrap();
        assert_eq!(parsed.skipped, 3);
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(parsed.records[0].title, "One");
        assert_eq!(parsed.records[1].title, "Two");
        assert_eq!(parsed.records[1].sources.len(), 2);
        assert_eq!(parsed.records[2].title, "http://a/4.m3u8");
        assert_eq!(parsed.records[2].category, DEFAULT_GROUP);
    }

    #[test]
    fn test_top_level_must_be_array() {
        assert!(parse_catalog(r#"{"channels": []}"#).is_err());
        assert!(parse_catalog("<html>").is_err());
    }

    #[test]
    fn test_m3u_attributes_and_options() {
        let m3u = "#EXTM3U\n\
            #EXTINF:-1 tvg-logo=\"http://l/a.png\" group-title=\"News, World\",Alpha, Live\n\
            #EXTVLCOPT:http-user-agent=Kodi/20\n\
            #EXTVLCOPT:http-referrer=https://ref.example/\n\
            http://a/alpha.m3u8\n\
            #EXTINF:-1,Beta\n\
            http://a/beta.ts\n\
            #EXTINF:-1 group-title=\"Dangling\",Gamma\n";
        let parsed = parse_m3u(m3u);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped, 1);

        let alpha = &parsed.records[0];
        assert_eq!(alpha.title, "Alpha, Live");
        assert_eq!(alpha.category, "News, World");
        assert_eq!(alpha.logo, "http://l/a.png");
        let spec = parse_source(&alpha.sources[0]).unwrap();
        assert_eq!(spec.base_url, "http://a/alpha.m3u8");
        assert_eq!(spec.user_agent.as_deref(), Some("Kodi/20"));
        assert_eq!(spec.referer.as_deref(), Some("https://ref.example/"));

        assert_eq!(parsed.records[1].category, DEFAULT_GROUP);
        assert_eq!(parsed.records[1].sources, vec!["http://a/beta.ts".to_string()]);
    }

    #[test]
    fn test_m3u_name_may_contain_quotes() {
        let m3u = "#EXTM3U\n\
            #EXTINF:-1 group-title=\"News\",The \"Best\" Show\n\
            http://a/best.m3u8\n\
            #EXTINF:-1 group-title=\"Kids\",Say tag=\"hi\"\n\
            http://a/hi.m3u8\n";
        let parsed = parse_m3u(m3u);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].title, "The \"Best\" Show");
        assert_eq!(parsed.records[0].category, "News");
        assert_eq!(parsed.records[1].title, "Say tag=\"hi\"");
        assert_eq!(parsed.records[1].category, "Kids");
    }
}
