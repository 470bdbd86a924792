use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tv_core::config::ResolverConfig;

pub const CHANNEL_LIST: &str = r#"[
    {"group": "News", "name": "Alpha News", "uris": ["http://cdn.example/alpha.m3u8"]},
    {"group": "News", "name": "Beta News", "uris": ["http://cdn.example/beta.m3u8"]},
    {"group": "Sports", "name": "Gamma Sport", "uris": ["http://cdn.example/gamma.mpd?|drmScheme=clearkey&drmLicense=aabbcc:112233"]},
    {"group": "Sports", "name": "Broken entry", "uris": []}
]"#;

/// Local HTTP server standing in for video portals and list hosts.
pub struct MockServer {
    pub base: String,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router()).await;
        });
        Self {
            base: format!("http://{addr}"),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Resolver settings that treat this server as a portal.
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            scrape_timeout_secs: 1,
            extra_portal_hosts: vec!["127.0.0.1".to_string()],
            ..ResolverConfig::default()
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router() -> Router {
    Router::new()
        .route("/live/player", get(player_page))
        .route("/live/escaped", get(escaped_page))
        .route("/live/plain", get(plain_page))
        .route("/live/slow", get(slow_page))
        .route("/live/gone", get(|| async { StatusCode::NOT_FOUND }))
        .route("/live/needs-cookie", get(cookie_page))
        .route("/live/padded", get(padded_page))
        .route("/lists/channels.json", get(channel_list))
        .route("/lists/broken.json", get(|| async { "{\"channels\": 3}" }))
        .route(
            "/lists/forbidden.json",
            get(|| async { StatusCode::FORBIDDEN }),
        )
}

async fn player_page() -> Html<&'static str> {
    Html(
        r#"<html><body><div id="p"></div><script>
        jwplayer("p").setup({ file: "/hls/ch1/index.m3u8", autostart: true });
        </script></body></html>"#,
    )
}

async fn escaped_page() -> Html<&'static str> {
    Html(r#"<script>var cfg = {"stream":"https:\/\/edge.example\/live\/master.m3u8?a=1&b=2"};</script>"#)
}

async fn plain_page() -> Html<&'static str> {
    Html("<html><body><iframe src=\"/embed/1\"></iframe></body></html>")
}

async fn slow_page() -> Html<&'static str> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Html(r#"<script>setup({file: "/hls/slow/index.m3u8"});</script>"#)
}

async fn cookie_page(headers: HeaderMap) -> impl IntoResponse {
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if cookie == "sid=42" {
        Html(r#"<script>player.load({source: "/hls/private/index.m3u8"});</script>"#).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn padded_page() -> Html<String> {
    let mut body = "<!-- padding -->".repeat(4096);
    body.push_str(r#"<script>setup({file: "/hls/late/index.m3u8"});</script>"#);
    Html(body)
}

async fn channel_list() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], CHANNEL_LIST)
}
