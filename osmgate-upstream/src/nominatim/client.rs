//! Nominatim HTTP client

use std::time::Duration;

use async_trait::async_trait;
use osmgate_core::{ConfigError, OsmConfig, Place, UpstreamError, SERVICE_NOMINATIM};
use reqwest::Client;
use serde_json::Value as JsonValue;

use super::types::{places_from_results, NominatimPlace};
use crate::service::GeocodingService;

fn transport(err: reqwest::Error) -> UpstreamError {
    UpstreamError::Transport {
        service: SERVICE_NOMINATIM.to_string(),
        message: err.to_string(),
    }
}

fn invalid_response(reason: impl Into<String>) -> UpstreamError {
    UpstreamError::Parse {
        service: SERVICE_NOMINATIM.to_string(),
        reason: reason.into(),
    }
}

/// Nominatim geocoding client.
///
/// One pooled connection set per process; the identifying User-Agent is
/// attached to every request.
#[derive(Clone)]
pub struct NominatimClient {
    client: Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if user_agent.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "user_agent".to_string(),
            });
        }

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http_client".to_string(),
                value: user_agent.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &OsmConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.nominatim_base_url.clone(),
            &config.user_agent,
            config.http_timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<JsonValue, UpstreamError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        tracing::debug!(url = %url, "nominatim request");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(UpstreamError::Status {
                service: SERVICE_NOMINATIM.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(transport)?;
        serde_json::from_str(&body)
            .map_err(|e| invalid_response(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl GeocodingService for NominatimClient {
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<Place>, UpstreamError> {
        let params = [
            ("q", query.to_string()),
            ("format", "json".to_string()),
            ("limit", limit.to_string()),
            ("addressdetails", "1".to_string()),
        ];
        let body = self.get_json("search", &params).await?;
        let raw: Vec<NominatimPlace> = serde_json::from_value(body)
            .map_err(|e| invalid_response(format!("Unexpected search reply: {}", e)))?;

        places_from_results(SERVICE_NOMINATIM, &raw)
    }

    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Place>, UpstreamError> {
        let params = [
            ("lat", format!("{:.6}", latitude)),
            ("lon", format!("{:.6}", longitude)),
            ("format", "json".to_string()),
            ("addressdetails", "1".to_string()),
        ];
        let body = self.get_json("reverse", &params).await?;
        parse_reverse_reply(body)
    }
}

/// Nominatim answers an empty reverse lookup with `{"error": "..."}`.
fn parse_reverse_reply(body: JsonValue) -> Result<Option<Place>, UpstreamError> {
    if body.get("error").is_some() {
        return Ok(None);
    }

    let raw: NominatimPlace = serde_json::from_value(body)
        .map_err(|e| invalid_response(format!("Unexpected reverse reply: {}", e)))?;
    raw.to_place()
        .map(Some)
        .ok_or_else(|| invalid_response("reverse result has no valid coordinates"))
}

impl std::fmt::Debug for NominatimClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NominatimClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
