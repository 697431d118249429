//! Symbol summaries
//!
//! Summaries are the only text the vector index ever sees. A remote
//! summarizer is optional; when it is absent or fails, the heuristic takes
//! over: doc comment first, else the first non-blank non-comment body line,
//! else `{name} implementation`.

use async_trait::async_trait;
use mnemograph_core::{Error, Result};
use serde::Deserialize;

#[async_trait]
pub trait Summarize: Send + Sync {
    fn available(&self) -> bool;
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// No remote endpoint configured; callers fall through to the heuristic.
pub struct NoSummarizer;

#[async_trait]
impl Summarize for NoSummarizer {
    fn available(&self) -> bool {
        false
    }

    async fn summarize(&self, _text: &str) -> Result<String> {
        Err(Error::internal("no summarizer configured"))
    }
}

/// POSTs `{ "text": ... }` to the configured endpoint and expects
/// `{ "summary": ... }` back.
pub struct HttpSummarizer {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

impl HttpSummarizer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Summarize for HttpSummarizer {
    fn available(&self) -> bool {
        true
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| Error::internal(format!("summarizer request failed: {}", e)))?;
        let body: SummaryResponse = response
            .json()
            .await
            .map_err(|e| Error::internal(format!("summarizer response invalid: {}", e)))?;
        let summary = body.summary.trim().to_string();
        if summary.is_empty() {
            return Err(Error::internal("summarizer returned an empty summary"));
        }
        Ok(summary)
    }
}

/// Deterministic fallback summary for a symbol.
pub fn heuristic_summary(name: &str, doc: Option<&str>, body: &str) -> String {
    if let Some(doc) = doc {
        let doc = doc.trim();
        if !doc.is_empty() {
            return doc.to_string();
        }
    }
    for line in body.lines().skip(1) {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*')
            || trimmed.starts_with('#')
            || trimmed == "{"
            || trimmed == "}"
        {
            continue;
        }
        return format!("{}: {}", name, trimmed);
    }
    format!("{} implementation", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_prefers_doc() {
        assert_eq!(
            heuristic_summary("f", Some("Does the thing."), "fn f() {}"),
            "Does the thing."
        );
    }

    #[test]
    fn heuristic_falls_back_to_first_body_line() {
        let body = "fn f() {\n    let x = compute();\n}";
        assert_eq!(heuristic_summary("f", None, body), "f: let x = compute();");
    }

    #[test]
    fn heuristic_last_resort_is_name() {
        assert_eq!(heuristic_summary("f", None, "fn f() {}"), "f implementation");
    }
}
