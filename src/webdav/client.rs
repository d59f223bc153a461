//! The WebDAV HTTP client.
//!
//! Built on hyper 1.x + rustls with HTTP/2 and connection pooling. The
//! client follows redirects itself (hyper does not), preserving the
//! `Authorization` header to same-origin targets always and to cross-host
//! targets only when the provider quirks allow the target host; iCloud
//! relies on that to reach its `p*-caldav.icloud.com` partition servers.
//! Transient failures (network, 429, 5xx) are retried twice with
//! exponential backoff, honoring `Retry-After`.

use anyhow::anyhow;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{HeaderMap, Method, Request, Response, Uri, header};
use tokio::time::{Duration, sleep, timeout};
use tracing::{debug, warn};

use crate::common::compression::{BodyError, add_accept_encoding, decompress_body, detect_encoding};
use crate::common::http::{HyperClient, build_hyper_client};
use crate::quirks::ServerQuirks;
use crate::webdav::types::{Authorization, DavError, DavResult, Depth, Multistatus};
use crate::webdav::xml::parse_multistatus;

/// Responses larger than this are rejected instead of parsed, so a
/// pathological server cannot balloon memory.
const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

const MAX_REDIRECTS: usize = 5;
const MAX_RETRIES: u32 = 2;
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(2);

/// Read-path timeout (PROPFIND/REPORT aggregation can be slow on large
/// collections).
const READ_TIMEOUT: Duration = Duration::from_secs(300);
/// Write-path timeout (PUT/DELETE).
const WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of a successful `PUT`.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub status: u16,
    pub etag: Option<String>,
}

/// WebDAV primitive client. Cloning is cheap and reuses the connection
/// pool.
#[derive(Clone)]
pub struct DavClient {
    base: Uri,
    client: HyperClient,
    auth: Authorization,
    quirks: ServerQuirks,
}

impl DavClient {
    /// Create a client from a base URL (collection or home-set) and an
    /// authorization scheme.
    pub fn new(base_url: &str, auth: Authorization) -> DavResult<Self> {
        let base: Uri = base_url
            .parse()
            .map_err(|e| DavError::parse(format!("invalid base URL {base_url:?}: {e}")))?;
        let client = build_hyper_client().map_err(DavError::Network)?;
        Ok(Self {
            base,
            client,
            auth,
            quirks: ServerQuirks::default(),
        })
    }

    /// Install the provider quirk set. Redirects leaving the original
    /// host only keep the `Authorization` header when
    /// [`ServerQuirks::allows_redirect_auth_to`] accepts the target; the
    /// default set never does.
    pub fn with_quirks(mut self, quirks: ServerQuirks) -> Self {
        self.quirks = quirks;
        self
    }

    pub fn base(&self) -> &Uri {
        &self.base
    }

    /// Resolve a path (absolute URL, absolute path, or relative to the
    /// base) into a request URI.
    pub fn build_uri(&self, path: &str) -> DavResult<Uri> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path
                .parse()
                .map_err(|e| DavError::parse(format!("invalid URL {path:?}: {e}")));
        }

        let mut parts = self.base.clone().into_parts();
        let existing_path = parts
            .path_and_query
            .as_ref()
            .map(|pq| pq.path())
            .unwrap_or("/");

        let (path_only, query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };

        let mut combined = if path_only.is_empty() {
            existing_path.to_string()
        } else if path_only.starts_with('/') {
            path_only.to_string()
        } else {
            let mut base = existing_path.trim_end_matches('/').to_string();
            base.push('/');
            base.push_str(path_only);
            base
        };

        if combined.is_empty() {
            combined.push('/');
        }

        let path_and_query = match query {
            Some(q) => format!("{combined}?{q}"),
            None => combined,
        };
        parts.path_and_query = Some(
            path_and_query
                .parse()
                .map_err(|e| DavError::parse(format!("invalid path {path:?}: {e}")))?,
        );
        Uri::from_parts(parts).map_err(|e| DavError::parse(format!("invalid URI: {e}")))
    }

    fn auth_header(&self) -> DavResult<Option<header::HeaderValue>> {
        let value = match &self.auth {
            Authorization::None => return Ok(None),
            Authorization::Basic { username, password } => {
                format!("Basic {}", B64.encode(format!("{username}:{password}")))
            }
            Authorization::Bearer(token) => format!("Bearer {token}"),
        };
        header::HeaderValue::from_str(&value)
            .map(Some)
            .map_err(|e| DavError::parse(format!("credentials not header-safe: {e}")))
    }

    fn same_origin(&self, target: &Uri) -> bool {
        self.base.scheme() == target.scheme()
            && self.base.host() == target.host()
            && self.base.port_u16() == target.port_u16()
    }

    /// Send once, following redirects. Returns the final decompressed
    /// response without status interpretation.
    async fn send_once(
        &self,
        method: &Method,
        uri: Uri,
        headers: &HeaderMap,
        body: Option<&Bytes>,
        per_req_timeout: Duration,
    ) -> DavResult<Response<Bytes>> {
        let auth = self.auth_header()?;
        let mut uri = uri;

        for _hop in 0..=MAX_REDIRECTS {
            let mut req_builder = Request::builder().method(method.clone()).uri(uri.clone());

            let attach_auth = self.same_origin(&uri)
                || self
                    .quirks
                    .allows_redirect_auth_to(uri.host().unwrap_or(""));
            if attach_auth && let Some(auth) = &auth {
                req_builder = req_builder.header(header::AUTHORIZATION, auth);
            }

            let mut h = headers.clone();
            add_accept_encoding(&mut h);
            for (k, v) in h.iter() {
                req_builder = req_builder.header(k, v);
            }

            let req = match body {
                Some(b) => req_builder.body(Full::new(b.clone())),
                None => req_builder.body(Full::new(Bytes::new())),
            }
            .map_err(|e| DavError::Network(anyhow!("request build failed: {e}")))?;

            let resp = timeout(per_req_timeout, self.client.request(req))
                .await
                .map_err(|_| DavError::Network(anyhow!("request timed out")))?
                .map_err(|e| DavError::Network(anyhow!(e)))?;

            if matches!(resp.status().as_u16(), 301 | 302 | 303 | 307 | 308) {
                let Some(location) = resp
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                else {
                    return Err(DavError::http(
                        resp.status().as_u16(),
                        "redirect without Location header",
                    ));
                };
                debug!(%location, status = resp.status().as_u16(), "following redirect");
                uri = resolve_location(&uri, location)?;
                continue;
            }

            let encoding = detect_encoding(resp.headers());
            let (parts, incoming) = resp.into_parts();
            let decompressed = decompress_body(incoming, encoding, MAX_RESPONSE_BYTES)
                .await
                .map_err(|err| match err {
                    BodyError::TooLarge { limit } => {
                        DavError::parse(format!("response exceeds the {limit} byte cap"))
                    }
                    BodyError::Io(err) => DavError::Network(anyhow!(err)),
                })?;
            return Ok(Response::from_parts(parts, decompressed));
        }

        Err(DavError::Network(anyhow!("too many redirects")))
    }

    /// Send with the retry policy: network errors, 429 and 5xx retried
    /// twice with exponential backoff; `Retry-After` honored on 429.
    async fn send_with_retry(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: Option<Bytes>,
        per_req_timeout: Duration,
    ) -> DavResult<Response<Bytes>> {
        let uri = self.build_uri(path)?;
        let mut attempt: u32 = 0;
        loop {
            let result = self
                .send_once(&method, uri.clone(), &headers, body.as_ref(), per_req_timeout)
                .await;

            let retry_in = match &result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if status == 429 || (500..600).contains(&status) {
                        Some(
                            retry_after(resp.headers())
                                .unwrap_or_else(|| backoff_delay(attempt)),
                        )
                    } else {
                        None
                    }
                }
                Err(DavError::Network(_)) => Some(backoff_delay(attempt)),
                Err(_) => None,
            };

            match retry_in {
                Some(delay) if attempt < MAX_RETRIES => {
                    warn!(
                        %method,
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                _ => return result,
            }
        }
    }

    /// Interpret a response as multistatus, converting failure statuses
    /// into [`DavError::Http`].
    fn expect_multistatus(resp: Response<Bytes>) -> DavResult<Multistatus> {
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(DavError::http(status, body_snippet(resp.body())));
        }
        parse_multistatus(resp.body())
    }

    /// Send a WebDAV `PROPFIND` and parse the multistatus response.
    pub async fn propfind(&self, path: &str, depth: Depth, xml_body: &str) -> DavResult<Multistatus> {
        let mut h = HeaderMap::new();
        h.insert(
            "Depth",
            header::HeaderValue::from_str(depth.as_str())
                .map_err(|e| DavError::parse(format!("bad depth header: {e}")))?,
        );
        h.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        let resp = self
            .send_with_retry(
                Method::from_bytes(b"PROPFIND").expect("valid method"),
                path,
                h,
                Some(Bytes::from(xml_body.to_owned())),
                READ_TIMEOUT,
            )
            .await?;
        Self::expect_multistatus(resp)
    }

    /// Send a CalDAV `REPORT` (calendar-query, calendar-multiget,
    /// sync-collection) and parse the multistatus response.
    pub async fn report(&self, path: &str, depth: Depth, xml_body: &str) -> DavResult<Multistatus> {
        let mut h = HeaderMap::new();
        h.insert(
            "Depth",
            header::HeaderValue::from_str(depth.as_str())
                .map_err(|e| DavError::parse(format!("bad depth header: {e}")))?,
        );
        h.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        let resp = self
            .send_with_retry(
                Method::from_bytes(b"REPORT").expect("valid method"),
                path,
                h,
                Some(Bytes::from(xml_body.to_owned())),
                READ_TIMEOUT,
            )
            .await?;
        Self::expect_multistatus(resp)
    }

    /// `PUT` an iCalendar body. `if_match` guards updates,
    /// `if_none_match_any` turns the request into a strict create
    /// (`If-None-Match: *`).
    pub async fn put(
        &self,
        path: &str,
        ical_body: Bytes,
        if_match: Option<&str>,
        if_none_match_any: bool,
    ) -> DavResult<PutOutcome> {
        let mut h = HeaderMap::new();
        h.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/calendar; charset=utf-8"),
        );
        if let Some(etag) = if_match {
            h.insert(
                header::IF_MATCH,
                header::HeaderValue::from_str(etag)
                    .map_err(|e| DavError::parse(format!("etag not header-safe: {e}")))?,
            );
        }
        if if_none_match_any {
            h.insert(header::IF_NONE_MATCH, header::HeaderValue::from_static("*"));
        }

        let resp = self
            .send_with_retry(Method::PUT, path, h, Some(ical_body), WRITE_TIMEOUT)
            .await?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(DavError::http(status, body_snippet(resp.body())));
        }
        Ok(PutOutcome {
            status,
            etag: etag_from_headers(resp.headers()),
        })
    }

    /// `DELETE` a resource, optionally guarded by `If-Match`.
    pub async fn delete(&self, path: &str, if_match: Option<&str>) -> DavResult<()> {
        let mut h = HeaderMap::new();
        if let Some(etag) = if_match {
            h.insert(
                header::IF_MATCH,
                header::HeaderValue::from_str(etag)
                    .map_err(|e| DavError::parse(format!("etag not header-safe: {e}")))?,
            );
        }
        let resp = self
            .send_with_retry(Method::DELETE, path, h, None, WRITE_TIMEOUT)
            .await?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(DavError::http(status, body_snippet(resp.body())));
        }
        Ok(())
    }
}

/// Extract the `ETag` from a response header map, if present.
pub fn etag_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn backoff_delay(attempt: u32) -> Duration {
    RETRY_BASE.saturating_mul(2u32.saturating_pow(attempt)).min(RETRY_CAP)
}

/// `Retry-After` as seconds or an HTTP-date.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs.min(300)));
    }
    let when = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = when.signed_duration_since(chrono::Utc::now());
    let secs = delta.num_seconds().clamp(0, 300) as u64;
    Some(Duration::from_secs(secs))
}

fn resolve_location(current: &Uri, location: &str) -> DavResult<Uri> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location
            .parse()
            .map_err(|e| DavError::parse(format!("invalid redirect target {location:?}: {e}")));
    }
    let mut parts = current.clone().into_parts();
    let target = if location.starts_with('/') {
        location.to_string()
    } else {
        // Relative redirect: resolve against the current directory.
        let path = current.path();
        let dir = &path[..path.rfind('/').map(|i| i + 1).unwrap_or(0)];
        format!("{dir}{location}")
    };
    parts.path_and_query = Some(
        target
            .parse()
            .map_err(|e| DavError::parse(format!("invalid redirect target {location:?}: {e}")))?,
    );
    Uri::from_parts(parts).map_err(|e| DavError::parse(format!("invalid redirect URI: {e}")))
}

fn body_snippet(body: &Bytes) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "no response body".to_string();
    }
    let mut snippet: String = trimmed.chars().take(200).collect();
    if snippet.len() < trimmed.len() {
        snippet.push('…');
    }
    snippet
}
