#![forbid(unsafe_code)]

//! Ordered failover across a provider's mirror endpoints.
//!
//! Deliberately a plain linear scan: no backoff, no health scoring, no
//! circuit breaking. Mirror lists are short (two or three entries) and the
//! browser is waiting on the response, so the cheapest useful policy is
//! "try the next one".

use std::future::Future;

use tracing::warn;
use url::Url;

use crate::providers::ProviderError;

#[derive(Debug, Clone)]
pub struct MirrorPool {
    mirrors: Vec<Url>,
}

impl MirrorPool {
    /// Callers supply at least one mirror; config resolution guarantees the
    /// built-in defaults when nothing is set.
    pub fn new(mirrors: Vec<Url>) -> Self {
        Self { mirrors }
    }

    pub fn mirrors(&self) -> &[Url] {
        &self.mirrors
    }

    /// Runs `op` against each mirror in order and returns the first success.
    ///
    /// A mirror that answers with [`ProviderError::NoResults`] is
    /// authoritative: the catalogue is the same everywhere, so the scan stops
    /// instead of burning the remaining mirrors on the same empty answer.
    pub async fn try_each<T, F, Fut>(&self, what: &str, op: F) -> Result<T, ProviderError>
    where
        F: Fn(Url) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last: Option<ProviderError> = None;
        for mirror in &self.mirrors {
            match op(mirror.clone()).await {
                Ok(value) => return Ok(value),
                Err(ProviderError::NoResults) => return Err(ProviderError::NoResults),
                Err(err) => {
                    warn!(mirror = %mirror, error = %err, "{what} failed, trying next mirror");
                    last = Some(err);
                }
            }
        }

        Err(ProviderError::MirrorsExhausted {
            attempts: self.mirrors.len(),
            last: Box::new(last.unwrap_or(ProviderError::NoResults)),
        })
    }
}
