//! Job posting retrieval
//!
//! Fetches a posting URL and reduces the HTML to readable text. Script
//! and style blocks are dropped before tags are stripped; entities that
//! commonly appear in postings are decoded.

use crate::errors::{AppError, Result};
use regex_lite::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

fn script_style_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript|head)\b.*?</(script|style|noscript|head)>")
            .expect("script/style pattern is valid")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"))
}

/// Fetch a job posting and return its visible text
pub async fn fetch_posting(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(AppError::InvalidParameter {
            message: format!("posting URL must be http(s): {url}"),
        });
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .user_agent(USER_AGENT)
        .build()?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::ExternalService {
            service: "job-posting".to_string(),
            message: format!("failed to fetch {url}: {e}"),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::ExternalService {
            service: "job-posting".to_string(),
            message: format!("posting fetch returned {status} for {url}"),
        });
    }

    let html = response.text().await.map_err(|e| AppError::ExternalService {
        service: "job-posting".to_string(),
        message: format!("unreadable posting body: {e}"),
    })?;

    let text = html_to_text(&html);
    debug!(url, chars = text.len(), "Job posting fetched");

    if text.is_empty() {
        return Err(AppError::ExternalService {
            service: "job-posting".to_string(),
            message: format!("posting at {url} contained no readable text"),
        });
    }

    Ok(text)
}

/// Reduce HTML to whitespace-normalized visible text
pub fn html_to_text(html: &str) -> String {
    let without_blocks = script_style_regex().replace_all(html, " ");
    let without_tags = tag_regex().replace_all(&without_blocks, " ");
    let decoded = decode_entities(&without_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text_strips_tags() {
        let html = "<html><body><h1>Senior Rust Engineer</h1><p>Remote &amp; onsite</p></body></html>";
        assert_eq!(html_to_text(html), "Senior Rust Engineer Remote & onsite");
    }

    #[test]
    fn test_html_to_text_drops_scripts() {
        let html = "<head><title>x</title></head><body><script>var a = 1;</script><style>p{}</style>Job details here</body>";
        assert_eq!(html_to_text(html), "Job details here");
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http_url() {
        let err = fetch_posting("ftp://example.com/job").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidParameter { .. }));
    }
}
