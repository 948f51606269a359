// src/ingest/fetch.rs
//! Retrying HTTP fetcher shared by feed, scrape and enrichment paths.
//!
//! One GET per attempt with a hard 15s timeout. 429 responses honor
//! `Retry-After` (integer seconds or an HTTP date); other 4xx fail without
//! retrying; 5xx and network-level failures retry with exponential backoff.
//! Nothing escapes this boundary as an error — callers branch on
//! [`FetchOutcome::ok`].

use std::time::Duration;

use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;
use tracing::debug;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

/// UA for scrape-style fetches; several agency sites serve bot UAs a 403.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Shared client with connect + request timeouts.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("reg-news-scanner/0.1")
        .connect_timeout(Duration::from_secs(10))
        .timeout(ATTEMPT_TIMEOUT)
        .build()
        .expect("reqwest client")
}

/// Terminal result of a fetch chain. `body` is present iff the fetch
/// ultimately succeeded; `error` carries the last failure observed.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub body: Option<String>,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl FetchOutcome {
    pub fn ok(&self) -> bool {
        self.body.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Success,
    RateLimited,
    Fatal,
    Transient,
}

/// 2xx succeed; 429 is rate limiting; other 3xx/4xx are permanent client
/// errors (not transient, never retried); 5xx and the rest retry.
pub(crate) fn classify_status(status: u16) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        429 => Disposition::RateLimited,
        300..=499 => Disposition::Fatal,
        _ => Disposition::Transient,
    }
}

/// Backoff schedule: 1s, 2s, 4s for attempts 0, 1, 2.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(6))
}

/// Parse a `Retry-After` header value: integer seconds, or an HTTP date
/// (clamped to zero when already in the past).
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    let v = value.trim();
    if let Ok(secs) = v.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP dates use obsolete zone names; Rfc2822 parsing wants an offset.
    let normalized = v.replace(" GMT", " +0000").replace(" UTC", " +0000");
    let retry_at = OffsetDateTime::parse(&normalized, &Rfc2822).ok()?;
    let now = OffsetDateTime::now_utc();
    let secs = (retry_at - now).whole_seconds().max(0) as u64;
    Some(Duration::from_secs(secs))
}

/// Fetch `url` with up to `max_retries` attempts. Extra headers are applied
/// verbatim on every attempt.
pub async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
    max_retries: u32,
) -> FetchOutcome {
    let max_attempts = max_retries.max(1);
    let mut last_error: Option<String> = None;
    let mut last_status: Option<u16> = None;

    for attempt in 0..max_attempts {
        let mut req = client.get(url).timeout(ATTEMPT_TIMEOUT);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }

        match req.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                last_status = Some(status);
                match classify_status(status) {
                    Disposition::Success => match resp.text().await {
                        Ok(body) => {
                            return FetchOutcome {
                                body: Some(body),
                                status: Some(status),
                                error: None,
                                attempts: attempt + 1,
                            }
                        }
                        Err(e) => {
                            last_error = Some(format!("reading body from {url}: {e}"));
                        }
                    },
                    Disposition::RateLimited => {
                        let delay = resp
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(parse_retry_after)
                            .unwrap_or_else(|| backoff_delay(attempt));
                        last_error = Some(format!("rate limited (429) by {url}"));
                        if attempt + 1 < max_attempts {
                            debug!(%url, delay_secs = delay.as_secs(), "429, honoring Retry-After");
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }
                    Disposition::Fatal => {
                        return FetchOutcome {
                            body: None,
                            status: Some(status),
                            error: Some(format!("client error {status} from {url}")),
                            attempts: attempt + 1,
                        }
                    }
                    Disposition::Transient => {
                        last_error = Some(format!("server error {status} from {url}"));
                    }
                }
            }
            Err(e) => {
                last_error = Some(format!("request to {url} failed: {e}"));
            }
        }

        if attempt + 1 < max_attempts {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }

    FetchOutcome {
        body: None,
        status: last_status,
        error: last_error,
        attempts: max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(200), Disposition::Success);
        assert_eq!(classify_status(204), Disposition::Success);
        assert_eq!(classify_status(429), Disposition::RateLimited);
        assert_eq!(classify_status(404), Disposition::Fatal);
        assert_eq!(classify_status(403), Disposition::Fatal);
        assert_eq!(classify_status(500), Disposition::Transient);
        assert_eq!(classify_status(503), Disposition::Transient);
    }

    #[test]
    fn backoff_is_exponential() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn retry_after_integer_seconds() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 10 "), Some(Duration::from_secs(10)));
    }

    #[test]
    fn retry_after_past_date_clamps_to_zero() {
        // Far in the past: delay clamps to zero rather than going negative.
        let d = parse_retry_after("Mon, 01 Jan 2001 00:00:00 GMT").expect("parse http date");
        assert_eq!(d, Duration::from_secs(0));
    }

    #[test]
    fn retry_after_garbage_is_none() {
        assert_eq!(parse_retry_after("soon"), None);
    }
}
