//! Web tools: SSRF-guarded fetch and keyword search.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{Tool, ToolCtx, ToolResult};

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
const MAX_EXTRACT_CHARS: usize = 8_000;

/// Reject any address the bot must never reach from a model-supplied URL:
/// loopback, RFC1918, link-local, CGNAT, and the IPv6 equivalents
/// (loopback, ULA, link-local, v4-mapped private).
pub fn is_private_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // CGNAT 100.64.0.0/10
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0b1100_0000) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_address(&IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                // ULA fc00::/7
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // link-local fe80::/10
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Validate scheme and resolve the host, rejecting private destinations.
pub async fn check_url(url: &str) -> Result<reqwest::Url, String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("scheme '{other}' is not allowed")),
    }

    let Some(host) = parsed.host_str() else {
        return Err("URL has no host".to_string());
    };

    // Literal IPs are checked directly; hostnames are resolved and every
    // address must be public.
    if let Ok(ip) = host.trim_matches(&['[', ']'][..]).parse::<IpAddr>() {
        if is_private_address(&ip) {
            return Err(format!("address {ip} is not reachable"));
        }
        return Ok(parsed);
    }

    let port = parsed.port_or_known_default().unwrap_or(443);
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| format!("cannot resolve '{host}': {e}"))?;

    let mut any = false;
    for addr in addrs {
        any = true;
        if is_private_address(&addr.ip()) {
            return Err(format!("'{host}' resolves to a private address"));
        }
    }
    if !any {
        return Err(format!("'{host}' did not resolve"));
    }

    Ok(parsed)
}

/// Fetch a page and reduce it to `title + text`, truncated.
pub async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let checked = check_url(url).await?;

    let resp = client
        .get(checked)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| format!("fetch failed: {e}"))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(format!("fetch returned HTTP {status}"));
    }

    let body = resp
        .bytes()
        .await
        .map_err(|e| format!("body read failed: {e}"))?;
    let body = &body[..body.len().min(MAX_BODY_BYTES)];
    let html = String::from_utf8_lossy(body);

    Ok(extract_text(&html))
}

/// Strip scripts/styles/tags and pull out the title.
fn extract_text(html: &str) -> String {
    let title = Regex::new(r"(?is)<title[^>]*>(.*?)</title>")
        .expect("title pattern compiles")
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let no_scripts = Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
        .expect("script pattern compiles")
        .replace_all(html, " ");
    let no_tags = Regex::new(r"(?s)<[^>]+>")
        .expect("tag pattern compiles")
        .replace_all(&no_scripts, " ");
    let collapsed = Regex::new(r"\s+")
        .expect("whitespace pattern compiles")
        .replace_all(&no_tags, " ");
    let text = collapsed.trim();

    let mut out = String::new();
    if !title.is_empty() {
        out.push_str(&format!("# {title}\n\n"));
    }
    let mut cut = text.len().min(MAX_EXTRACT_CHARS);
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    out.push_str(&text[..cut]);
    out
}

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a public http(s) URL and return its title and text content."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to fetch." }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, _ctx: &ToolCtx, input: serde_json::Value) -> ToolResult {
        let Some(url) = input.get("url").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: url");
        };
        match fetch_page(&self.client, url).await {
            Ok(text) => ToolResult::success(text),
            Err(e) => ToolResult::error(e),
        }
    }
}

pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: Option<Arc<String>>,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client, api_key: Option<Arc<String>>) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return titles, URLs, and snippets for the top results."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query." }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _ctx: &ToolCtx, input: serde_json::Value) -> ToolResult {
        let Some(query) = input.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: query");
        };
        let Some(key) = &self.api_key else {
            return ToolResult::error("web search is not configured (missing brave-api-key)");
        };

        debug!(query, "web search");
        let resp = match self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query), ("count", "5")])
            .header("X-Subscription-Token", key.as_str())
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("search failed: {e}")),
        };

        if !resp.status().is_success() {
            return ToolResult::error(format!("search returned HTTP {}", resp.status()));
        }

        let body: serde_json::Value = match resp.json().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("search response parse failed: {e}")),
        };

        let empty = Vec::new();
        let results = body["web"]["results"].as_array().unwrap_or(&empty);
        if results.is_empty() {
            return ToolResult::success("No results.");
        }

        let lines: Vec<String> = results
            .iter()
            .take(5)
            .map(|r| {
                format!(
                    "- {} — {}\n  {}",
                    r["title"].as_str().unwrap_or("(untitled)"),
                    r["url"].as_str().unwrap_or(""),
                    r["description"].as_str().unwrap_or(""),
                )
            })
            .collect();
        ToolResult::success(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn loopback_and_private_ranges_are_rejected() {
        for addr in [
            "127.0.0.1",
            "10.0.0.5",
            "172.16.3.4",
            "192.168.1.1",
            "169.254.1.1",
            "100.64.0.1",
            "100.127.255.254",
            "0.0.0.0",
            "::1",
            "fc00::1",
            "fd12::9",
            "fe80::1",
            "::ffff:192.168.0.1",
        ] {
            assert!(is_private_address(&ip(addr)), "{addr} should be private");
        }
    }

    #[test]
    fn public_addresses_are_allowed() {
        for addr in ["8.8.8.8", "1.1.1.1", "93.184.216.34", "2606:4700::1111", "100.128.0.1"] {
            assert!(!is_private_address(&ip(addr)), "{addr} should be public");
        }
    }

    #[tokio::test]
    async fn non_http_schemes_are_rejected() {
        assert!(check_url("ftp://example.com/x").await.is_err());
        assert!(check_url("file:///etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn literal_private_ip_urls_are_rejected() {
        assert!(check_url("http://127.0.0.1:8080/admin").await.is_err());
        assert!(check_url("http://192.168.0.1/").await.is_err());
        assert!(check_url("http://[::1]/").await.is_err());
    }

    #[test]
    fn extract_text_pulls_title_and_strips_tags() {
        let html = "<html><head><title>Tea Guide</title><script>var x=1;</script></head>\
                    <body><h1>Brewing</h1><p>Steep for three minutes.</p></body></html>";
        let text = extract_text(html);
        assert!(text.starts_with("# Tea Guide"));
        assert!(text.contains("Steep for three minutes."));
        assert!(!text.contains("var x"));
        assert!(!text.contains("<p>"));
    }

    #[tokio::test]
    async fn search_without_key_is_a_config_error() {
        let tool = WebSearchTool::new(reqwest::Client::new(), None);
        let result = tool
            .execute(&ToolCtx { chat_id: 1 }, serde_json::json!({"query": "tea"}))
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("not configured"));
    }
}
