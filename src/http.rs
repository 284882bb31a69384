//! HTTP reverse geocoder for Nominatim-compatible endpoints.
//!
//! This module provides address lookups with:
//! - Connection pooling and a configurable User-Agent
//! - Dispatch rate limiting (spaces out request starts, 1 req/s by default)
//! - Automatic retry with exponential backoff on 429 and transport errors

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{CaptureError, Result};
use crate::resolver::{AddressLookup, ReverseGeocoder};

/// Connection settings for [`NominatimGeocoder`].
///
/// The public Nominatim instance allows at most one request per second and
/// requires an identifying User-Agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Base URL without trailing `/reverse`. Default: public OSM instance
    pub base_url: String,
    pub user_agent: String,
    /// Minimum spacing between request starts. Default: 1s
    pub min_request_interval: Duration,
    /// Per-request timeout. Default: 10s
    pub timeout: Duration,
    /// Retries after a 429 or transport error. Default: 3
    pub max_retries: u32,
    /// Preferred response language. Default: "nl"
    pub language: String,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: concat!("backpath-capture/", env!("CARGO_PKG_VERSION")).to_string(),
            min_request_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            language: "nl".to_string(),
        }
    }
}

/// `format=jsonv2` reverse response. Failures come back as `{"error": ...}`.
#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Option<ApiAddress>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiAddress {
    road: Option<String>,
    pedestrian: Option<String>,
    footway: Option<String>,
    path: Option<String>,
    house_number: Option<String>,
    postcode: Option<String>,
}

impl ApiAddress {
    fn into_lookup(self) -> AddressLookup {
        // Backpaths are often mapped as footways rather than roads
        let street_name = self.road.or(self.pedestrian).or(self.footway).or(self.path);
        AddressLookup {
            street_name,
            house_number: self.house_number,
            postal_code: self.postcode,
        }
    }
}

fn parse_reverse_response(bytes: &[u8]) -> Result<AddressLookup> {
    let data: ReverseResponse = serde_json::from_slice(bytes)
        .map_err(|e| CaptureError::GeocodeFailed(format!("JSON parse error: {}", e)))?;

    if let Some(error) = data.error {
        return Err(CaptureError::GeocodeFailed(error));
    }

    let lookup = data.address.unwrap_or_default().into_lookup();
    if lookup.is_empty() {
        return Err(CaptureError::GeocodeFailed("no address at location".to_string()));
    }
    Ok(lookup)
}

/// Dispatch rate limiter - spaces out when requests START.
///
/// Each caller reserves the next free slot, so concurrent lookups for the
/// start and end point of a route go out one interval apart.
struct DispatchRateLimiter {
    interval: Duration,
    next_dispatch: Mutex<Instant>,
    dispatched_count: AtomicU32,
    consecutive_429s: AtomicU32,
}

impl DispatchRateLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_dispatch: Mutex::new(Instant::now()),
            dispatched_count: AtomicU32::new(0),
            consecutive_429s: AtomicU32::new(0),
        }
    }

    /// Wait for our dispatch slot and return its sequence number.
    async fn wait_for_dispatch_slot(&self) -> u32 {
        let (wait_duration, dispatch_num) = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();

            let dispatch_at = if *next > now { *next } else { now };
            *next = dispatch_at + self.interval;

            let num = self.dispatched_count.fetch_add(1, Ordering::Relaxed) + 1;
            (dispatch_at - now, num)
        };

        // Wait outside the lock
        if !wait_duration.is_zero() {
            debug!("[Dispatch #{}] Waiting {:?} for slot", dispatch_num, wait_duration);
            tokio::time::sleep(wait_duration).await;
        }

        dispatch_num
    }

    fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        // Exponential backoff on top of the dispatch interval: 2x, 4x, 8x max
        let backoff = self.interval * (1 << count.min(3));
        warn!("[DispatchRateLimiter] Got 429! Consecutive: {}, backing off {:?}", count, backoff);
        backoff
    }
}

/// Reverse geocoder backed by a Nominatim `/reverse` endpoint.
pub struct NominatimGeocoder {
    client: Client,
    config: GeocoderConfig,
    rate_limiter: DispatchRateLimiter,
}

impl NominatimGeocoder {
    pub fn new(config: GeocoderConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(CaptureError::Config("geocoder base_url is empty".to_string()));
        }

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(config.timeout)
            .build()
            .map_err(|e| CaptureError::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "[NominatimGeocoder] Using {} (dispatch interval: {:?}, max retries: {})",
            config.base_url, config.min_request_interval, config.max_retries
        );

        Ok(Self {
            client,
            rate_limiter: DispatchRateLimiter::new(config.min_request_interval),
            config,
        })
    }

    pub fn config(&self) -> &GeocoderConfig {
        &self.config
    }

    fn reverse_url(&self) -> String {
        format!("{}/reverse", self.config.base_url.trim_end_matches('/'))
    }

    async fn fetch_reverse(&self, latitude: f64, longitude: f64) -> Result<AddressLookup> {
        let url = self.reverse_url();
        let query = [
            ("format", "jsonv2".to_string()),
            ("addressdetails", "1".to_string()),
            ("zoom", "18".to_string()),
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
        ];

        let mut retries = 0;
        let req_start = Instant::now();

        loop {
            let dispatch_num = self.rate_limiter.wait_for_dispatch_slot().await;

            let response = self
                .client
                .get(&url)
                .query(&query)
                .header("Accept-Language", &self.config.language)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > self.config.max_retries {
                            return Err(CaptureError::GeocodeFailed("Max retries exceeded (429)".to_string()));
                        }

                        let wait = self.rate_limiter.record_429();
                        warn!(
                            "[Reverse #{}] 429 Too Many Requests for ({:.5}, {:.5}), retry {} with {:?} backoff",
                            dispatch_num, latitude, longitude, retries, wait
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    self.rate_limiter.record_success();

                    if !status.is_success() {
                        return Err(CaptureError::GeocodeFailed(format!("HTTP {}", status)));
                    }

                    let bytes = resp
                        .bytes()
                        .await
                        .map_err(|e| CaptureError::GeocodeFailed(format!("Body download error: {}", e)))?;

                    let lookup = parse_reverse_response(&bytes)?;
                    debug!(
                        "[Reverse #{}] ({:.5}, {:.5}) -> {:?} {:?} {:?} in {:?}",
                        dispatch_num,
                        latitude,
                        longitude,
                        lookup.street_name,
                        lookup.house_number,
                        lookup.postal_code,
                        req_start.elapsed()
                    );
                    return Ok(lookup);
                }
                Err(e) => {
                    retries += 1;
                    if retries > self.config.max_retries {
                        return Err(CaptureError::GeocodeFailed(format!("Request error: {}", e)));
                    }

                    let wait = Duration::from_millis(200 * (1 << retries));
                    warn!(
                        "[Reverse #{}] Error: {}, retry {} after {:?}",
                        dispatch_num, e, retries, wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

impl ReverseGeocoder for NominatimGeocoder {
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<AddressLookup> {
        self.fetch_reverse(latitude, longitude).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_road_address() {
        let body = br#"{
            "place_id": 1,
            "osm_type": "way",
            "display_name": "12, Stationsplein, Lelystad",
            "address": {
                "house_number": "12",
                "road": "Stationsplein",
                "city": "Lelystad",
                "postcode": "8232 CA",
                "country_code": "nl"
            }
        }"#;
        let lookup = parse_reverse_response(body).unwrap();
        assert_eq!(lookup.street_name.as_deref(), Some("Stationsplein"));
        assert_eq!(lookup.house_number.as_deref(), Some("12"));
        assert_eq!(lookup.postal_code.as_deref(), Some("8232 CA"));
    }

    #[test]
    fn test_parse_footway_falls_back() {
        let body = br#"{"address": {"footway": "Achterpad", "postcode": "8224 AB"}}"#;
        let lookup = parse_reverse_response(body).unwrap();
        assert_eq!(lookup.street_name.as_deref(), Some("Achterpad"));
        assert_eq!(lookup.house_number, None);
    }

    #[test]
    fn test_parse_error_response() {
        let body = br#"{"error": "Unable to geocode"}"#;
        assert_eq!(
            parse_reverse_response(body),
            Err(CaptureError::GeocodeFailed("Unable to geocode".to_string()))
        );
        assert!(parse_reverse_response(br#"{"address": {"city": "Lelystad"}}"#).is_err());
        assert!(parse_reverse_response(b"<html>").is_err());
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = GeocoderConfig::default();
        assert_eq!(config.min_request_interval, Duration::from_secs(1));
        assert_eq!(config.max_retries, 3);
        assert!(config.user_agent.starts_with("backpath-capture/"));

        let geocoder = NominatimGeocoder::new(GeocoderConfig {
            base_url: "http://localhost:8080/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(geocoder.reverse_url(), "http://localhost:8080/reverse");

        let empty = GeocoderConfig { base_url: " ".to_string(), ..Default::default() };
        assert!(matches!(NominatimGeocoder::new(empty), Err(CaptureError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_rate_limiter() {
        let limiter = DispatchRateLimiter::new(Duration::from_secs(1));

        // First request should not wait
        let start = Instant::now();
        assert_eq!(limiter.wait_for_dispatch_slot().await, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Second request takes the next slot one interval later
        assert_eq!(limiter.wait_for_dispatch_slot().await, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        // Concurrent callers are spaced out as well
        let (a, b) = futures::join!(limiter.wait_for_dispatch_slot(), limiter.wait_for_dispatch_slot());
        assert_eq!(a + b, 3 + 4);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_grows_and_resets() {
        let limiter = DispatchRateLimiter::new(Duration::from_millis(500));
        assert_eq!(limiter.record_429(), Duration::from_secs(1));
        assert_eq!(limiter.record_429(), Duration::from_secs(2));
        assert_eq!(limiter.record_429(), Duration::from_secs(4));
        assert_eq!(limiter.record_429(), Duration::from_secs(4));
        limiter.record_success();
        assert_eq!(limiter.record_429(), Duration::from_secs(1));
    }
}
