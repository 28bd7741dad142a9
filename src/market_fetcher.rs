use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ArbError, Result};
use crate::shared_types::{EventId, EventRecord, MarketRecord, OutcomeRecord};

/// Upstream odds provider. Payloads are handed back undecoded so the
/// scanner decides how much of a malformed response to throw away.
#[async_trait]
pub trait OddsFeed: Send + Sync {
    async fn fetch_events(&self, date: NaiveDate) -> Result<Value>;

    async fn fetch_markets(&self, event_id: EventId) -> Result<Value>;
}

#[derive(Deserialize, Debug)]
struct ApiEvent {
    #[serde(rename = "BettingEventID")]
    id: EventId,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "StartDate")]
    start_date: Option<String>,
    #[serde(rename = "GameStatus", default)]
    status: Option<String>,
    #[serde(rename = "HomeTeam", default)]
    home_team: Option<String>,
    #[serde(rename = "AwayTeam", default)]
    away_team: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiMarket {
    #[serde(rename = "BettingMarketID")]
    id: u64,
    #[serde(rename = "BettingMarketType", default)]
    market_type: Option<String>,
    #[serde(rename = "PlayerName", default)]
    player_name: Option<String>,
    #[serde(rename = "AnyBetsAvailable", default)]
    any_bets_available: Option<bool>,
    #[serde(rename = "BettingOutcomes", default)]
    outcomes: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct ApiOutcome {
    #[serde(rename = "SportsBook", default)]
    sportsbook: Option<ApiSportsbook>,
    #[serde(rename = "PayoutAmerican", default)]
    payout_american: Option<i64>,
    #[serde(rename = "BettingOutcomeType", default)]
    outcome_type: Option<String>,
    #[serde(rename = "Value", default)]
    value: Option<Decimal>,
    #[serde(rename = "IsAvailable", default)]
    is_available: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct ApiSportsbook {
    #[serde(rename = "Name")]
    name: Option<String>,
}

impl From<ApiOutcome> for OutcomeRecord {
    fn from(api: ApiOutcome) -> Self {
        OutcomeRecord {
            sportsbook: api.sportsbook.and_then(|s| s.name),
            american_odds: api.payout_american,
            side_label: api.outcome_type,
            line_value: api.value,
            available: api.is_available.unwrap_or(false),
        }
    }
}

/// Outcomes are decoded one by one so a single bad quote only loses itself.
fn decode_market(api: ApiMarket) -> MarketRecord {
    let market_id = api.id;
    let outcomes = api
        .outcomes
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<ApiOutcome>(item) {
            Ok(outcome) => Some(OutcomeRecord::from(outcome)),
            Err(e) => {
                warn!(market_id, error = %e, "skipping malformed outcome record");
                None
            }
        })
        .collect();

    MarketRecord {
        market_id,
        market_type: api.market_type.unwrap_or_default(),
        label: api.player_name,
        accepting_bets: api.any_bets_available.unwrap_or(false),
        outcomes,
    }
}

/// Upstream start times carry no offset; they are read as UTC.
fn parse_start_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn expect_list(payload: Value, what: &str) -> Result<Vec<Value>> {
    match payload {
        Value::Array(items) => Ok(items),
        other => Err(ArbError::DataShape(format!(
            "expected a list of {}, got {}",
            what,
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Decodes a market listing. A non-list payload fails as a whole; a bad
/// market record fails on its own.
pub fn decode_markets(payload: Value) -> Result<Vec<Result<MarketRecord>>> {
    let items = expect_list(payload, "markets")?;
    Ok(items
        .into_iter()
        .map(|item| {
            let id = item.get("BettingMarketID").and_then(Value::as_u64);
            serde_json::from_value::<ApiMarket>(item)
                .map(decode_market)
                .map_err(|e| match id {
                    Some(id) => ArbError::DataShape(format!("market {}: {}", id, e)),
                    None => ArbError::from(e),
                })
        })
        .collect())
}

/// Decodes an event listing, skipping records without an id or a usable
/// start time.
pub fn decode_events(payload: Value) -> Result<Vec<EventRecord>> {
    let items = expect_list(payload, "events")?;
    let mut events = Vec::with_capacity(items.len());
    for item in items {
        let api: ApiEvent = match serde_json::from_value(item) {
            Ok(api) => api,
            Err(e) => {
                warn!(error = %e, "skipping malformed event record");
                continue;
            }
        };
        let start_time = match api.start_date.as_deref().and_then(parse_start_time) {
            Some(t) => t,
            None => {
                debug!(event_id = api.id, "skipping event without start time");
                continue;
            }
        };
        events.push(EventRecord {
            event_id: api.id,
            name: api.name.unwrap_or_else(|| format!("event {}", api.id)),
            start_time,
            status: api.status,
            home_team: api.home_team,
            away_team: api.away_team,
        });
    }
    Ok(events)
}

/// SportsDataIO betting endpoints over HTTPS.
pub struct SportsDataClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl SportsDataClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        // joins below are relative to the last path segment
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&base)
            .map_err(|e| ArbError::Config(format!("invalid odds api url {}: {}", base, e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("SportsArbitrageScanner/1.0")
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str, include_available: bool) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| ArbError::Config(format!("invalid endpoint {}: {}", path, e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", &self.api_key);
            if include_available {
                query.append_pair("include", "available");
            }
        }
        Ok(url)
    }

    /// `None` when the upstream answers 404.
    async fn get_json(&self, url: Url) -> Result<Option<Value>> {
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.json::<Value>().await?;
        Ok(Some(body))
    }
}

#[async_trait]
impl OddsFeed for SportsDataClient {
    async fn fetch_events(&self, date: NaiveDate) -> Result<Value> {
        let path = format!("BettingEventsByDate/{}", date.format("%Y-%m-%d"));
        let url = self.endpoint(&path, false)?;
        self.get_json(url).await?.ok_or_else(|| {
            ArbError::UpstreamUnavailable(format!("event listing for {} not found", date))
        })
    }

    async fn fetch_markets(&self, event_id: EventId) -> Result<Value> {
        let url = self.endpoint(&format!("BettingMarkets/{}", event_id), true)?;
        self.get_json(url)
            .await?
            .ok_or(ArbError::EventNotFound(event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decode_markets() {
        let payload = json!([
            {
                "BettingMarketID": 11,
                "BettingMarketType": "Player Prop",
                "PlayerName": "Jayson Tatum",
                "AnyBetsAvailable": true,
                "BettingOutcomes": [
                    {
                        "SportsBook": { "Name": "DraftKings" },
                        "PayoutAmerican": 102,
                        "BettingOutcomeType": "Over",
                        "Value": 25.5,
                        "IsAvailable": true
                    },
                    {
                        "SportsBook": null,
                        "PayoutAmerican": -110,
                        "BettingOutcomeType": "Under",
                        "Value": null,
                        "IsAvailable": false
                    }
                ]
            },
            {
                "BettingMarketID": 12,
                "AnyBetsAvailable": null,
                "BettingOutcomes": [
                    { "PayoutAmerican": 110.0, "IsAvailable": true },
                    { "PayoutAmerican": 120, "IsAvailable": null },
                    "garbage"
                ]
            },
            { "BettingMarketID": "not-a-number" },
            { "BettingMarketID": 13, "BettingOutcomes": "oops" }
        ]);

        let markets = decode_markets(payload).unwrap();
        assert_eq!(markets.len(), 4);

        let first = markets[0].as_ref().unwrap();
        assert_eq!(first.market_id, 11);
        assert_eq!(first.label.as_deref(), Some("Jayson Tatum"));
        assert!(first.accepting_bets);
        assert_eq!(first.outcomes[0].sportsbook.as_deref(), Some("DraftKings"));
        assert_eq!(first.outcomes[0].line_value, Some(dec!(25.5)));
        assert_eq!(first.outcomes[1].sportsbook, None);
        assert_eq!(first.outcomes[1].line_value, None);

        let lenient = markets[1].as_ref().unwrap();
        assert!(!lenient.accepting_bets);
        assert_eq!(lenient.outcomes.len(), 1);
        assert_eq!(lenient.outcomes[0].american_odds, Some(120));
        assert!(!lenient.outcomes[0].available);

        assert!(matches!(markets[2], Err(ArbError::DataShape(_))));
        match &markets[3] {
            Err(ArbError::DataShape(msg)) => assert!(msg.starts_with("market 13")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_list_payload_is_data_shape_error() {
        let result = decode_markets(json!({ "Message": "Invalid key" }));
        match result {
            Err(ArbError::DataShape(msg)) => assert!(msg.contains("object")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(decode_events(json!("nope")).is_err());
    }

    #[test]
    fn test_decode_events() {
        let payload = json!([
            {
                "BettingEventID": 501,
                "Name": "BOS @ LAL",
                "StartDate": "2024-01-15T19:30:00",
                "GameStatus": "Scheduled",
                "HomeTeam": "LAL",
                "AwayTeam": "BOS"
            },
            { "BettingEventID": 502, "StartDate": null },
            { "Name": "missing id" },
            { "BettingEventID": 503, "StartDate": "2024-01-15T22:00:00Z" }
        ]);

        let events = decode_events(payload).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, 501);
        assert_eq!(events[0].home_team.as_deref(), Some("LAL"));
        assert_eq!(events[0].start_time.to_rfc3339(), "2024-01-15T19:30:00+00:00");
        assert_eq!(events[1].name, "event 503");
    }

    #[test]
    fn test_endpoint_carries_key_and_include() {
        let client = SportsDataClient::new(
            "https://example.test/v3/nba/odds/json",
            "k3y",
            Duration::from_secs(1),
        )
        .unwrap();
        let url = client.endpoint("BettingMarkets/42", true).unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.test/v3/nba/odds/json/BettingMarkets/42?key=k3y&include=available"
        );
    }
}
