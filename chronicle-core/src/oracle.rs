//! The text oracle seam.
//!
//! Every model call in the crate goes through [`Oracle`], a cheap cloneable
//! handle around a [`TextOracle`] implementation. The handle logs prompts and
//! outputs and turns error-flagged replies into [`OracleError::Flagged`].

use async_trait::async_trait;
use claude::{Claude, Request};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Prefix some oracle backends return instead of raising.
pub const ERROR_SENTINEL: &str = "Error in chat_";

/// Maximum characters of a prompt or reply written to debug logs.
const LOG_TRUNCATE: usize = 800;

/// Errors from oracle calls.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Claude API error: {0:?}")]
    Api(#[from] claude::Error),

    #[error("oracle returned an error reply for {label}: {reply}")]
    Flagged { label: String, reply: String },
}

/// Anything that turns a prompt into free-form text.
#[async_trait]
pub trait TextOracle: Send + Sync {
    /// Ask once. `label` names the call site for logs and scripted tests.
    async fn ask(&self, prompt: &str, system_prompt: &str, label: &str)
        -> Result<String, OracleError>;
}

#[async_trait]
impl TextOracle for Claude {
    async fn ask(
        &self,
        prompt: &str,
        system_prompt: &str,
        label: &str,
    ) -> Result<String, OracleError> {
        debug!(label, model = self.model(), "claude request");
        let mut request = Request::new(prompt).with_temperature(0.2);
        if !system_prompt.trim().is_empty() {
            request = request.with_system(system_prompt);
        }
        let response = self.complete(request).await?;
        Ok(response.text())
    }
}

/// Shared handle to the configured oracle.
#[derive(Clone)]
pub struct Oracle {
    inner: Arc<dyn TextOracle>,
}

impl Oracle {
    pub fn new(inner: impl TextOracle + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Create an oracle backed by Claude, configured from the environment.
    pub fn from_env() -> Result<Self, OracleError> {
        Ok(Self::new(Claude::from_env()?))
    }

    /// Ask the oracle, treating sentinel-prefixed replies as failures.
    pub async fn ask(
        &self,
        prompt: &str,
        system_prompt: &str,
        label: &str,
    ) -> Result<String, OracleError> {
        debug!(label, prompt = %truncate(prompt, LOG_TRUNCATE), "oracle input");
        let output = self.inner.ask(prompt, system_prompt, label).await?;
        debug!(label, output = %truncate(&output, LOG_TRUNCATE), "oracle output");

        if output.trim_start().starts_with(ERROR_SENTINEL) {
            return Err(OracleError::Flagged {
                label: label.to_string(),
                reply: output,
            });
        }
        Ok(output)
    }
}

impl std::fmt::Debug for Oracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Oracle").finish_non_exhaustive()
    }
}

/// Truncate to `limit` characters, marking how much was cut.
pub fn truncate(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{head}...<truncated {} chars>", total - limit)
}

/// Collapse runs of whitespace into single spaces.
pub fn compact(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl TextOracle for Fixed {
        async fn ask(&self, _: &str, _: &str, _: &str) -> Result<String, OracleError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_sentinel_reply_is_an_error() {
        let oracle = Oracle::new(Fixed("Error in chat_once: timeout"));
        let err = oracle.ask("p", "s", "GAME_DECIDE").await.unwrap_err();
        match err {
            OracleError::Flagged { label, reply } => {
                assert_eq!(label, "GAME_DECIDE");
                assert!(reply.contains("timeout"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plain_reply_passes_through() {
        let oracle = Oracle::new(Fixed("WORLD=YES; CHARACTER=NO"));
        let out = oracle.ask("p", "s", "x").await.unwrap();
        assert_eq!(out, "WORLD=YES; CHARACTER=NO");
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("北境王国联盟", 2), "北境...<truncated 4 chars>");
    }

    #[test]
    fn test_compact() {
        assert_eq!(compact("  a \n b\t c "), "a b c");
    }
}
