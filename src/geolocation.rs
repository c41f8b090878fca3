//! Geolocation: best-effort IP→location lookup. Failure is logged and
//! swallowed by the caller; this module never fails a probe.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::model::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoProvider {
    Geoip2,
    IpApi,
}

struct CacheEntry {
    location: Location,
    created_at: Instant,
}

/// Per-entry creation-time TTL cache in front of the configured provider.
/// Each entry expires on its own clock rather than a single global sweep.
pub struct GeolocationClient {
    client: reqwest::Client,
    provider: GeoProvider,
    ttl: Duration,
    cache: Mutex<HashMap<IpAddr, CacheEntry>>,
}

#[derive(Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    country: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    isp: Option<String>,
    #[serde(rename = "as")]
    asn: Option<String>,
}

impl GeolocationClient {
    pub fn new(provider: GeoProvider, cache_duration: Duration) -> Self {
        GeolocationClient {
            client: reqwest::Client::new(),
            provider,
            ttl: cache_duration,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lookup(&self, ip: IpAddr) -> Option<Location> {
        if let Some(entry) = self.cache.lock().unwrap().get(&ip) {
            if entry.created_at.elapsed() < self.ttl {
                return Some(entry.location.clone());
            }
        }

        let location = match self.provider {
            GeoProvider::IpApi => self.lookup_ip_api(ip).await,
            GeoProvider::Geoip2 => {
                log::debug!("geoip2 provider requires a local database path; skipping lookup for {ip}");
                None
            }
        };

        if let Some(loc) = &location {
            self.cache.lock().unwrap().insert(
                ip,
                CacheEntry {
                    location: loc.clone(),
                    created_at: Instant::now(),
                },
            );
        }
        location
    }

    async fn lookup_ip_api(&self, ip: IpAddr) -> Option<Location> {
        let url = format!("http://ip-api.com/json/{ip}");
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                log::debug!("geolocation lookup failed for {ip}: {e}");
                return None;
            }
        };
        let parsed: IpApiResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                log::debug!("geolocation response decode failed for {ip}: {e}");
                return None;
            }
        };
        if parsed.status != "success" {
            return None;
        }
        Some(Location {
            ip,
            country_code: parsed.country_code,
            country_name: parsed.country,
            region: parsed.region_name,
            city: parsed.city,
            latitude: parsed.lat,
            longitude: parsed.lon,
            isp: parsed.isp,
            asn: parsed.asn.clone(),
            asn_description: parsed.asn,
            last_updated: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_returns_same_entry_within_ttl() {
        let client = GeolocationClient::new(GeoProvider::IpApi, Duration::from_secs(60));
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        client.cache.lock().unwrap().insert(
            ip,
            CacheEntry {
                location: Location {
                    ip,
                    country_code: Some("US".into()),
                    country_name: None,
                    region: None,
                    city: None,
                    latitude: None,
                    longitude: None,
                    isp: None,
                    asn: None,
                    asn_description: None,
                    last_updated: chrono::Utc::now(),
                },
                created_at: Instant::now(),
            },
        );
        let looked_up = client.lookup(ip).await.unwrap();
        assert_eq!(looked_up.country_code.as_deref(), Some("US"));
    }
}
