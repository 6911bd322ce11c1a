// =============================================================================
// REST Client (C3) — public market-data bootstrap over Binance USD-M Futures
// =============================================================================
//
// Grounded on `binance/client.rs`'s request/response plumbing (signed query
// building, status-aware error mapping, `#[instrument]` spans) generalized
// from private trading endpoints to the public bootstrap calls this core
// needs, and consulting `RateLimiter` before every call (spec §4.3).
// =============================================================================

pub mod cache;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use crate::error::{CoreError, CoreResult};
use crate::model::MarketInfo;
use crate::rate_limit::{RateLimitRule, RateLimiter, RuleInterval, RuleKind};
use crate::signing::signed_query;

use cache::ResponseCache;

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

/// Public-data REST client. Holds no position on whether the caller ever
/// supplies credentials — signed calls are only reachable via
/// [`RestClient::signed_get`]/[`signed_post`], kept for completeness
/// (spec §6) even though bootstrap never exercises them.
pub struct RestClient {
    base_url: String,
    api_key: Option<String>,
    secret: Option<String>,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    cache: ResponseCache,
}

impl RestClient {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), limiter)
    }

    pub fn with_base_url(base_url: String, limiter: Arc<RateLimiter>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url,
            api_key: None,
            secret: None,
            http,
            limiter,
            cache: ResponseCache::new(100, Duration::from_secs(60)),
        }
    }

    pub fn with_credentials(mut self, api_key: String, secret: String) -> Self {
        self.api_key = Some(api_key);
        self.secret = Some(secret);
        self
    }

    /// Map a non-success HTTP status to the spec §7 error taxonomy.
    fn map_status(status: StatusCode, body: &serde_json::Value) -> CoreError {
        match status.as_u16() {
            418 => CoreError::IpBanned,
            403 => CoreError::WafRejected,
            429 => CoreError::RateLimited,
            503 => CoreError::ServiceUnavailable,
            _ => {
                if let (Some(code), Some(msg)) = (
                    body.get("code").and_then(|v| v.as_i64()),
                    body.get("msg").and_then(|v| v.as_str()),
                ) {
                    CoreError::ExchangeApiError {
                        code,
                        msg: msg.to_string(),
                    }
                } else {
                    CoreError::HttpStatus(status.as_u16())
                }
            }
        }
    }

    async fn execute(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &str,
        weight: u32,
        is_order: bool,
    ) -> CoreResult<serde_json::Value> {
        self.limiter.throttle(weight, is_order).await;

        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };

        let mut builder = self.http.request(method.clone(), &url);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("X-MBX-APIKEY", api_key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| CoreError::ConnectionError(e.to_string()))?;

        let status = resp.status();
        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        self.limiter
            .observe_headers(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::ParseError(e.to_string()))?;

        if !status.is_success() {
            let mapped = Self::map_status(status, &body);
            warn!(%method, path, status = status.as_u16(), "REST call returned non-success status");
            return Err(mapped);
        }

        Ok(body)
    }

    /// Unsigned GET, consulting the response cache first when `cacheable`.
    #[instrument(skip(self), name = "rest::get")]
    pub async fn get(
        &self,
        path: &str,
        query: &str,
        weight: u32,
        cacheable: bool,
    ) -> CoreResult<serde_json::Value> {
        let cache_key = format!("{path}?{query}");
        if cacheable {
            if let Some(hit) = self.cache.get(&cache_key) {
                debug!(path, "REST cache hit");
                return Ok(hit);
            }
        }

        let body = self
            .execute(reqwest::Method::GET, path, query, weight, false)
            .await?;

        if cacheable {
            self.cache.put(cache_key, body.clone());
        }
        Ok(body)
    }

    /// Signed GET — kept for completeness (spec §6); unused by bootstrap.
    pub async fn signed_get(&self, path: &str, params: &str, weight: u32) -> CoreResult<serde_json::Value> {
        let secret = self.secret.as_deref().ok_or_else(|| {
            CoreError::ConfigurationError("signed request attempted without a secret".into())
        })?;
        let query = signed_query(secret, params);
        self.execute(reqwest::Method::GET, path, &query, weight, false).await
    }

    /// Signed POST — kept for completeness (spec §6); unused by bootstrap.
    pub async fn signed_post(
        &self,
        path: &str,
        params: &str,
        weight: u32,
        is_order: bool,
    ) -> CoreResult<serde_json::Value> {
        let secret = self.secret.as_deref().ok_or_else(|| {
            CoreError::ConfigurationError("signed request attempted without a secret".into())
        })?;
        let query = signed_query(secret, params);
        self.execute(reqwest::Method::POST, path, &query, weight, is_order)
            .await
    }

    /// Signed DELETE — kept for completeness (spec §6); unused by bootstrap.
    pub async fn signed_delete(&self, path: &str, params: &str, weight: u32) -> CoreResult<serde_json::Value> {
        let secret = self.secret.as_deref().ok_or_else(|| {
            CoreError::ConfigurationError("signed request attempted without a secret".into())
        })?;
        let query = signed_query(secret, params);
        self.execute(reqwest::Method::DELETE, path, &query, weight, false)
            .await
    }

    // -------------------------------------------------------------------
    // Bootstrap calls (spec §4.3)
    // -------------------------------------------------------------------

    /// `GET /fapi/v1/exchangeInfo` — parses symbol metadata and, when
    /// present, the exchange's rate-limit rules, loading the latter into
    /// the shared [`RateLimiter`].
    #[instrument(skip(self), name = "rest::exchange_info")]
    pub async fn fetch_exchange_info(&self) -> CoreResult<Vec<MarketInfo>> {
        let body = self.get("/fapi/v1/exchangeInfo", "", 1, true).await?;

        if let Some(rules) = body.get("rateLimits").and_then(|v| v.as_array()) {
            let parsed: Vec<RateLimitRule> = rules
                .iter()
                .filter_map(Self::parse_rate_limit_rule)
                .collect();
            if !parsed.is_empty() {
                self.limiter.load_rules(parsed);
            }
        }

        let symbols = body
            .get("symbols")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let markets = symbols
            .iter()
            .filter_map(|s| {
                Some(MarketInfo {
                    symbol: s.get("symbol")?.as_str()?.to_string(),
                    status: s.get("status")?.as_str()?.to_string(),
                    base_asset: s.get("baseAsset")?.as_str()?.to_string(),
                    quote_asset: s.get("quoteAsset")?.as_str()?.to_string(),
                    price_precision: s.get("pricePrecision").and_then(|v| v.as_u64()).unwrap_or(2) as u32,
                    qty_precision: s.get("quantityPrecision").and_then(|v| v.as_u64()).unwrap_or(3) as u32,
                })
            })
            .collect();

        Ok(markets)
    }

    fn parse_rate_limit_rule(raw: &serde_json::Value) -> Option<RateLimitRule> {
        let kind = match raw.get("rateLimitType")?.as_str()? {
            "REQUEST_WEIGHT" => RuleKind::RequestWeight,
            "ORDERS" => RuleKind::Orders,
            "RAW_REQUESTS" => RuleKind::RawRequest,
            _ => return None,
        };
        let interval = match raw.get("interval")?.as_str()? {
            "SECOND" => RuleInterval::Second,
            "MINUTE" => RuleInterval::Minute,
            "HOUR" => RuleInterval::Hour,
            "DAY" => RuleInterval::Day,
            _ => return None,
        };
        let interval_num = raw.get("intervalNum")?.as_u64()? as u32;
        let limit = raw.get("limit")?.as_u64()? as u32;
        Some(RateLimitRule::new(kind, interval, interval_num, limit))
    }

    /// `GET /fapi/v1/ticker/24hr` — bulk 24h ticker snapshot used to seed
    /// the trend module before the first WS ticker frame arrives.
    #[instrument(skip(self), name = "rest::ticker_24hr")]
    pub async fn fetch_ticker_24hr(&self) -> CoreResult<serde_json::Value> {
        self.get("/fapi/v1/ticker/24hr", "", 40, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_status_translates_known_codes() {
        let empty = serde_json::json!({});
        assert!(matches!(
            RestClient::map_status(StatusCode::from_u16(418).unwrap(), &empty),
            CoreError::IpBanned
        ));
        assert!(matches!(
            RestClient::map_status(StatusCode::from_u16(403).unwrap(), &empty),
            CoreError::WafRejected
        ));
        assert!(matches!(
            RestClient::map_status(StatusCode::from_u16(429).unwrap(), &empty),
            CoreError::RateLimited
        ));
        assert!(matches!(
            RestClient::map_status(StatusCode::from_u16(503).unwrap(), &empty),
            CoreError::ServiceUnavailable
        ));
    }

    #[test]
    fn map_status_prefers_exchange_payload_when_present() {
        let body = serde_json::json!({"code": -1121, "msg": "Invalid symbol."});
        match RestClient::map_status(StatusCode::from_u16(400).unwrap(), &body) {
            CoreError::ExchangeApiError { code, msg } => {
                assert_eq!(code, -1121);
                assert_eq!(msg, "Invalid symbol.");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_rate_limit_rule_rejects_unknown_kind() {
        let raw = serde_json::json!({
            "rateLimitType": "SOMETHING_ELSE",
            "interval": "MINUTE",
            "intervalNum": 1,
            "limit": 10
        });
        assert!(RestClient::parse_rate_limit_rule(&raw).is_none());
    }

    #[test]
    fn parse_rate_limit_rule_accepts_known_shape() {
        let raw = serde_json::json!({
            "rateLimitType": "REQUEST_WEIGHT",
            "interval": "MINUTE",
            "intervalNum": 1,
            "limit": 2400
        });
        let rule = RestClient::parse_rate_limit_rule(&raw).expect("should parse");
        assert_eq!(rule.limit, 2400);
    }
}
