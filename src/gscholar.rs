//! Google Scholar citation lookups.
//!
//! Plain HTTP scraping of the Scholar results page: the first hit is taken as
//! the match for a title and its "Cited by N" link supplies the count.

use crate::cookies::CookieStore;
use crate::error::{CitedByError, Result};
use crate::lookup::{LookupClient, LookupOutcome};
use crate::title::normalize_title;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default Google Scholar URL
pub const DEFAULT_SCHOLAR_URL: &str = "https://scholar.google.com";

/// User agents rotated across requests
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
];

/// Markers of Scholar's bot-check interstitial
const CAPTCHA_MARKERS: &[&str] = &[
    "Solving the above CAPTCHA",
    "unusual traffic",
    "id=\"gs_captcha_ccl\"",
    "id=\"captcha-form\"",
];

/// Scholar client options
#[derive(Debug, Clone)]
pub struct ScholarConfig {
    /// Custom base URL for mirror sites
    pub base_url: Option<String>,
    /// Proxy URLs (e.g., "http://127.0.0.1:7890"), rotated per request
    pub proxies: Vec<String>,
    /// File with one proxy URL per line
    pub proxy_file: Option<PathBuf>,
    /// Pick a random User-Agent for every request
    pub rotate_user_agent: bool,
    /// Cookie file; `None` uses the default location
    pub cookie_file: Option<PathBuf>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ScholarConfig {
    pub fn proxy_enabled(&self) -> bool {
        !self.proxies.is_empty() || self.proxy_file.is_some()
    }
}

impl Default for ScholarConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            proxies: Vec::new(),
            proxy_file: None,
            rotate_user_agent: true,
            cookie_file: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// One entry of a Scholar results page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScholarHit {
    pub title: String,
    /// `None` when the entry has no "Cited by" link
    pub citations: Option<u64>,
}

struct Route {
    proxy: Option<String>,
    client: reqwest::Client,
}

/// [`LookupClient`] backed by Google Scholar
pub struct ScholarClient {
    base_url: String,
    routes: Vec<Route>,
    next_route: AtomicUsize,
    rotate_user_agent: bool,
    cookie_header: String,
}

impl ScholarClient {
    /// Build the client.
    ///
    /// Unusable proxies and cookie files are logged and skipped; only a
    /// failure to build the HTTP client itself is an error.
    pub fn new(config: &ScholarConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_SCHOLAR_URL.to_string());
        Url::parse(&base_url)
            .map_err(|e| CitedByError::Config(format!("Invalid base URL '{}': {}", base_url, e)))?;

        let mut routes = Vec::new();
        for proxy_url in collect_proxies(config) {
            let proxy = match reqwest::Proxy::all(proxy_url.as_str()) {
                Ok(proxy) => proxy,
                Err(e) => {
                    warn!(proxy = %proxy_url, error = %e, "Skipping invalid proxy");
                    continue;
                }
            };
            routes.push(Route {
                client: build_http_client(config.timeout, Some(proxy))?,
                proxy: Some(proxy_url),
            });
        }

        if routes.is_empty() {
            if config.proxy_enabled() {
                warn!("No usable proxy. Continuing without proxy.");
            }
            routes.push(Route {
                proxy: None,
                client: build_http_client(config.timeout, None)?,
            });
        } else {
            info!(count = routes.len(), "Successfully set up proxies");
        }

        let cookies = match &config.cookie_file {
            Some(path) => CookieStore::with_path(path),
            None => CookieStore::open_default(),
        };
        let cookie_header = cookies.header_for("google");
        if cookie_header.is_empty() {
            warn!("No cookies loaded. Run 'rustcitedby cookies import' to supply browser cookies.");
        }

        Ok(Self {
            base_url,
            routes,
            next_route: AtomicUsize::new(0),
            rotate_user_agent: config.rotate_user_agent,
            cookie_header,
        })
    }

    /// Number of proxies in rotation (0 when connecting directly)
    pub fn proxy_count(&self) -> usize {
        self.routes.iter().filter(|r| r.proxy.is_some()).count()
    }

    fn next_route(&self) -> &Route {
        let idx = self.next_route.fetch_add(1, Ordering::Relaxed) % self.routes.len();
        &self.routes[idx]
    }

    fn pick_user_agent(&self) -> Option<&'static str> {
        if !self.rotate_user_agent {
            return None;
        }
        USER_AGENTS.choose(&mut rand::thread_rng()).copied()
    }

    async fn fetch_page(
        &self,
        route: &Route,
        url: &Url,
    ) -> std::result::Result<String, LookupOutcome> {
        let mut request = route
            .client
            .get(url.as_str())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9");

        if let Some(agent) = self.pick_user_agent() {
            request = request.header(reqwest::header::USER_AGENT, agent);
        }
        if !self.cookie_header.is_empty() {
            request = request.header(reqwest::header::COOKIE, self.cookie_header.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| LookupOutcome::Transient(format!("request failed: {}", e)))?;

        // Blocked clients get redirected to google.com/sorry/...
        if response.url().path().starts_with("/sorry") {
            return Err(LookupOutcome::Blocked("redirected to /sorry".to_string()));
        }

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            return Err(LookupOutcome::Blocked(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(LookupOutcome::Transient(format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| LookupOutcome::Transient(format!("failed to read body: {}", e)))
    }
}

#[async_trait]
impl LookupClient for ScholarClient {
    async fn lookup(&self, title: &str) -> LookupOutcome {
        let query = normalize_title(title);
        let url = match build_search_url(&self.base_url, &query) {
            Ok(url) => url,
            Err(e) => return LookupOutcome::Transient(e.to_string()),
        };

        let route = self.next_route();
        debug!(url = %url, proxy = ?route.proxy, "Searching Google Scholar");

        let html = match self.fetch_page(route, &url).await {
            Ok(html) => html,
            Err(outcome) => return outcome,
        };

        if is_captcha_page(&html) {
            return LookupOutcome::Blocked("CAPTCHA detected".to_string());
        }

        match parse_result_items(&html) {
            Ok(hits) => match hits.into_iter().next() {
                Some(hit) => {
                    debug!(matched = %hit.title, citations = ?hit.citations, "First result");
                    LookupOutcome::Count(hit.citations.unwrap_or(0))
                }
                None => LookupOutcome::NotFound,
            },
            Err(e) => LookupOutcome::Transient(e.to_string()),
        }
    }
}

/// Proxies from the config list followed by those in the proxy file.
fn collect_proxies(config: &ScholarConfig) -> Vec<String> {
    let mut proxies: Vec<String> = config.proxies.clone();

    if let Some(path) = &config.proxy_file {
        match std::fs::read_to_string(path) {
            Ok(content) => proxies.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(String::from),
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to read proxy file"),
        }
    }

    proxies
}

fn build_http_client(timeout: Duration, proxy: Option<reqwest::Proxy>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENTS[0])
        .timeout(timeout)
        .cookie_store(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| CitedByError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Build Google Scholar search URL
fn build_search_url(base_url: &str, query: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/scholar", base_url))
        .map_err(|e| CitedByError::Config(format!("Invalid base URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("hl", "en")
        .append_pair("q", query);

    Ok(url)
}

/// Whether `html` is Scholar's bot-check page rather than results.
pub fn is_captcha_page(html: &str) -> bool {
    CAPTCHA_MARKERS.iter().any(|marker| html.contains(marker))
}

/// Parse a Google Scholar results page into hits, in page order.
pub fn parse_result_items(html: &str) -> Result<Vec<ScholarHit>> {
    let document = Html::parse_document(html);

    let item_selector =
        Selector::parse("div.gs_r.gs_or.gs_scl").map_err(|e| CitedByError::Parse(e.to_string()))?;
    let title_selector =
        Selector::parse("h3.gs_rt").map_err(|e| CitedByError::Parse(e.to_string()))?;
    let cite_selector =
        Selector::parse("div.gs_fl a").map_err(|e| CitedByError::Parse(e.to_string()))?;

    // English ("Cited by X") and Chinese ("被引用 X 次") layouts
    let cite_regex = Regex::new(r"(?:Cited by\s*|被引用\s*)(\d+)")
        .map_err(|e| CitedByError::Parse(e.to_string()))?;

    let mut hits = Vec::new();

    for item in document.select(&item_selector) {
        let title = match item.select(&title_selector).next() {
            Some(elem) => normalize_title(&elem.text().collect::<String>()),
            None => continue,
        };
        if title.is_empty() {
            continue;
        }

        let citations = item
            .select(&cite_selector)
            .filter(|link| link.value().attr("href").unwrap_or("").contains("cites="))
            .find_map(|link| {
                let text = link.text().collect::<String>();
                cite_regex
                    .captures(&text)
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| m.as_str().parse::<u64>().ok())
            });

        hits.push(ScholarHit { title, citations });
    }

    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const RESULTS_PAGE: &str = r#"
<html><body><div id="gs_res_ccl_mid">
  <div class="gs_r gs_or gs_scl" data-cid="a1">
    <div class="gs_ri">
      <h3 class="gs_rt"><a href="https://example.org/dl">Deep learning survey</a></h3>
      <div class="gs_a">A Author, B Author - Nature, 2015 - nature.com</div>
      <div class="gs_fl gs_flb">
        <a href="/scholar?q=related:a1">Related articles</a>
        <a href="/scholar?cites=123&amp;hl=en">Cited by 4217</a>
        <a href="/scholar?cluster=123">All 12 versions</a>
      </div>
    </div>
  </div>
  <div class="gs_r gs_or gs_scl" data-cid="b2">
    <div class="gs_ri">
      <h3 class="gs_rt"><span class="gs_ctc">[CITATION]</span> Deep learning notes</h3>
      <div class="gs_fl gs_flb"><a href="/scholar?q=related:b2">Related articles</a></div>
    </div>
  </div>
</div></body></html>
"#;

    #[test]
    fn test_build_search_url() {
        let url = build_search_url("https://scholar.google.com", "deep learning: a survey")
            .expect("Failed to build URL");
        assert_eq!(url.path(), "/scholar");
        assert!(url.as_str().contains("q=deep+learning%3A+a+survey"));
        assert!(url.as_str().contains("hl=en"));
    }

    #[test]
    fn test_parse_results_page() {
        let hits = parse_result_items(RESULTS_PAGE).expect("Parse failed");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Deep learning survey");
        assert_eq!(hits[0].citations, Some(4217));
        assert_eq!(hits[1].title, "[CITATION] Deep learning notes");
        assert_eq!(hits[1].citations, None);
    }

    #[test]
    fn test_parse_empty_html() {
        let hits = parse_result_items("<html><body></body></html>").expect("Parse failed");
        assert!(hits.is_empty());
    }

    #[test]
    fn test_captcha_detection() {
        let page = r#"<html><body><form id="captcha-form">Our systems have detected unusual traffic</form></body></html>"#;
        assert!(is_captcha_page(page));
        assert!(!is_captcha_page(RESULTS_PAGE));
    }

    #[test]
    fn test_invalid_proxy_is_not_fatal() -> Result<()> {
        let config = ScholarConfig {
            proxies: vec!["http://[::1".to_string()],
            proxy_file: Some(PathBuf::from("/nonexistent/proxies.txt")),
            cookie_file: Some(PathBuf::from("/nonexistent/cookies.json")),
            ..Default::default()
        };
        let client = ScholarClient::new(&config)?;
        assert_eq!(client.proxy_count(), 0);
        Ok(())
    }

    #[test]
    fn test_proxies_rotate() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let proxy_file = dir.path().join("proxies.txt");
        std::fs::write(&proxy_file, "# pool\nhttp://127.0.0.1:8081\n\nhttp://127.0.0.1:8082\n")?;

        let config = ScholarConfig {
            proxies: vec!["http://127.0.0.1:8080".to_string()],
            proxy_file: Some(proxy_file),
            cookie_file: Some(dir.path().join("cookies.json")),
            ..Default::default()
        };
        let client = ScholarClient::new(&config)?;
        assert_eq!(client.proxy_count(), 3);

        let order: Vec<_> = (0..4)
            .map(|_| client.next_route().proxy.clone().unwrap_or_default())
            .collect();
        assert_eq!(
            order,
            [
                "http://127.0.0.1:8080",
                "http://127.0.0.1:8081",
                "http://127.0.0.1:8082",
                "http://127.0.0.1:8080",
            ]
        );
        Ok(())
    }

    /// Raw HTTP/1.1 response with a close-delimited connection.
    fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!("HTTP/1.1 {}\r\nContent-Length: {}\r\n", status, body.len());
        out.push_str("Content-Type: text/html; charset=utf-8\r\nConnection: close\r\n");
        for (name, value) in headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    /// Serve canned responses chosen by request path prefix on a local port.
    /// Returns the base URL to use as a mirror.
    async fn serve(routes: Vec<(&'static str, String)>) -> std::io::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 16 * 1024];
                    let mut len = 0;
                    while !buf[..len].windows(4).any(|w| w == b"\r\n\r\n") && len < buf.len() {
                        match stream.read(&mut buf[len..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => len += n,
                        }
                    }

                    let request = String::from_utf8_lossy(&buf[..len]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/");
                    let response = routes
                        .iter()
                        .find(|(prefix, _)| path.starts_with(prefix))
                        .map(|(_, response)| response.clone())
                        .unwrap_or_else(|| http_response("404 Not Found", &[], ""));

                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Ok(format!("http://{}", addr))
    }

    fn mirror_client(base_url: String) -> Result<ScholarClient> {
        ScholarClient::new(&ScholarConfig {
            base_url: Some(base_url),
            cookie_file: Some(PathBuf::from("/nonexistent/cookies.json")),
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
    }

    async fn lookup_against(routes: Vec<(&'static str, String)>) -> Result<LookupOutcome> {
        let client = mirror_client(serve(routes).await?)?;
        Ok(client.lookup("Deep learning survey").await)
    }

    #[tokio::test]
    async fn test_rate_limit_and_forbidden_are_blocked() -> Result<()> {
        for status in ["429 Too Many Requests", "403 Forbidden"] {
            let outcome =
                lookup_against(vec![("/scholar", http_response(status, &[], "slow down"))]).await?;
            assert!(
                matches!(&outcome, LookupOutcome::Blocked(reason) if reason.contains(&status[..3])),
                "{status}: {outcome:?}"
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_sorry_redirect_is_blocked() -> Result<()> {
        let outcome = lookup_against(vec![
            (
                "/scholar",
                http_response("302 Found", &[("Location", "/sorry/index?continue=x")], ""),
            ),
            ("/sorry", http_response("200 OK", &[], "<html>sorry</html>")),
        ])
        .await?;
        assert!(matches!(outcome, LookupOutcome::Blocked(_)), "{outcome:?}");
        Ok(())
    }

    #[tokio::test]
    async fn test_captcha_page_is_blocked() -> Result<()> {
        let page = r#"<html><form id="captcha-form">unusual traffic</form></html>"#;
        let outcome = lookup_against(vec![("/scholar", http_response("200 OK", &[], page))]).await?;
        assert_eq!(outcome, LookupOutcome::Blocked("CAPTCHA detected".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_server_error_is_transient() -> Result<()> {
        let outcome =
            lookup_against(vec![("/scholar", http_response("503 Service Unavailable", &[], ""))])
                .await?;
        assert!(
            matches!(&outcome, LookupOutcome::Transient(reason) if reason.contains("503")),
            "{outcome:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_first_hit_supplies_count() -> Result<()> {
        let outcome =
            lookup_against(vec![("/scholar", http_response("200 OK", &[], RESULTS_PAGE))]).await?;
        assert_eq!(outcome, LookupOutcome::Count(4217));
        Ok(())
    }

    #[tokio::test]
    async fn test_first_hit_without_cited_by_counts_zero() -> Result<()> {
        let page = r#"<html><body>
  <div class="gs_r gs_or gs_scl">
    <h3 class="gs_rt"><a href="https://example.org/x">Deep learning survey</a></h3>
    <div class="gs_fl"><a href="/scholar?q=related:x">Related articles</a></div>
  </div>
</body></html>"#;
        let outcome = lookup_against(vec![("/scholar", http_response("200 OK", &[], page))]).await?;
        assert_eq!(outcome, LookupOutcome::Count(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_results_page_is_not_found() -> Result<()> {
        let page = "<html><body><div id=\"gs_res_ccl_mid\"></div></body></html>";
        let outcome = lookup_against(vec![("/scholar", http_response("200 OK", &[], page))]).await?;
        assert_eq!(outcome, LookupOutcome::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient() -> Result<()> {
        // Bind then drop to get a port nothing listens on
        let addr = TcpListener::bind("127.0.0.1:0").await?.local_addr()?;
        let client = mirror_client(format!("http://{}", addr))?;
        let outcome = client.lookup("Deep learning survey").await;
        assert!(matches!(outcome, LookupOutcome::Transient(_)), "{outcome:?}");
        Ok(())
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let config = ScholarConfig {
            base_url: Some("not a url".to_string()),
            cookie_file: Some(PathBuf::from("/nonexistent/cookies.json")),
            ..Default::default()
        };
        assert!(matches!(ScholarClient::new(&config), Err(CitedByError::Config(_))));
    }
}
