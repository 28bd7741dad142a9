use thiserror::Error;

use crate::shared_types::EventId;

/// Failures are contained at the smallest unit that can absorb them:
/// a quote, a market, an event, or a poll cycle.
#[derive(Debug, Error)]
pub enum ArbError {
    #[error("invalid odds: {0}")]
    InvalidOdds(String),

    #[error("unexpected payload shape: {0}")]
    DataShape(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("delivery to subscriber {0} failed")]
    DeliveryFailure(u64),

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ArbError {
    fn from(err: reqwest::Error) -> Self {
        // the request URL carries the api key
        let err = err.without_url();
        if err.is_decode() {
            ArbError::DataShape(err.to_string())
        } else {
            ArbError::UpstreamUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ArbError {
    fn from(err: serde_json::Error) -> Self {
        ArbError::DataShape(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArbError>;
