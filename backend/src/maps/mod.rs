//! Map-provider boundary.
//!
//! Everything here is optional: when no API key is configured the client
//! reports itself disabled and dispatch falls back to the scored order.
//! Outbound calls carry a hard deadline.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;

use common::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eta {
    pub distance_m: i64,
    pub duration_s: i64,
}

#[async_trait]
pub trait MapsClient: Send + Sync {
    fn enabled(&self) -> bool;

    /// Driving ETA between two points.
    async fn eta(&self, origin: &GeoPoint, destination: &GeoPoint) -> Result<Eta>;

    /// Driving ETAs from many origins to one destination; positions with
    /// no route come back as None.
    async fn etas_to(&self, origins: &[GeoPoint], destination: &GeoPoint)
    -> Result<Vec<Option<Eta>>>;
}

/// No-provider stand-in; callers check `enabled()` and skip the calls.
pub struct DisabledMaps;

#[async_trait]
impl MapsClient for DisabledMaps {
    fn enabled(&self) -> bool {
        false
    }

    async fn eta(&self, _origin: &GeoPoint, _destination: &GeoPoint) -> Result<Eta> {
        Err(anyhow!("maps provider not configured"))
    }

    async fn etas_to(
        &self,
        _origins: &[GeoPoint],
        _destination: &GeoPoint,
    ) -> Result<Vec<Option<Eta>>> {
        Err(anyhow!("maps provider not configured"))
    }
}

const MATRIX_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/distancematrix/json";
/// The matrix API caps origins per request.
const MATRIX_CHUNK: usize = 25;

pub struct GoogleMapsClient {
    http: reqwest::Client,
    api_key: String,
}

impl GoogleMapsClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, api_key })
    }

    async fn matrix(&self, origins: &str, destination: &GeoPoint) -> Result<MatrixResponse> {
        let destinations = format!("{},{}", destination.lat, destination.lng);
        let response = self
            .http
            .get(MATRIX_ENDPOINT)
            .query(&[
                ("origins", origins),
                ("destinations", destinations.as_str()),
                ("mode", "driving"),
                ("departure_time", "now"),
                ("traffic_model", "best_guess"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: MatrixResponse = response.json().await?;
        if body.status != "OK" {
            return Err(anyhow!(
                "maps matrix error: {}",
                body.error_message.unwrap_or(body.status)
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl MapsClient for GoogleMapsClient {
    fn enabled(&self) -> bool {
        true
    }

    async fn eta(&self, origin: &GeoPoint, destination: &GeoPoint) -> Result<Eta> {
        let etas = self
            .etas_to(std::slice::from_ref(origin), destination)
            .await?;
        etas.first()
            .copied()
            .flatten()
            .ok_or_else(|| anyhow!("no route found"))
    }

    async fn etas_to(
        &self,
        origins: &[GeoPoint],
        destination: &GeoPoint,
    ) -> Result<Vec<Option<Eta>>> {
        let mut out = Vec::with_capacity(origins.len());

        for chunk in origins.chunks(MATRIX_CHUNK) {
            let joined = chunk
                .iter()
                .map(|p| format!("{},{}", p.lat, p.lng))
                .collect::<Vec<_>>()
                .join("|");

            let body = self.matrix(&joined, destination).await?;
            // Index by position; short responses pad with unknowns so the
            // output stays aligned with the input origins.
            for i in 0..chunk.len() {
                out.push(
                    body.rows
                        .get(i)
                        .and_then(|row| row.elements.first())
                        .and_then(MatrixElement::to_eta),
                );
            }
        }

        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    error_message: Option<String>,
    #[serde(default)]
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    #[serde(default)]
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    distance: Option<MatrixValue>,
    duration: Option<MatrixValue>,
    duration_in_traffic: Option<MatrixValue>,
}

#[derive(Debug, Deserialize)]
struct MatrixValue {
    value: i64,
}

impl MatrixElement {
    fn to_eta(&self) -> Option<Eta> {
        if self.status != "OK" {
            return None;
        }
        let duration = self
            .duration_in_traffic
            .as_ref()
            .or(self.duration.as_ref())?;
        Some(Eta {
            distance_m: self.distance.as_ref().map(|d| d.value).unwrap_or(0),
            duration_s: duration.value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_client_reports_disabled() {
        assert!(!DisabledMaps.enabled());
    }

    #[test]
    fn element_prefers_traffic_duration() {
        let element = MatrixElement {
            status: "OK".into(),
            distance: Some(MatrixValue { value: 1200 }),
            duration: Some(MatrixValue { value: 300 }),
            duration_in_traffic: Some(MatrixValue { value: 420 }),
        };
        let eta = element.to_eta().unwrap();
        assert_eq!(eta.duration_s, 420);
        assert_eq!(eta.distance_m, 1200);
    }

    #[test]
    fn element_without_route_is_none() {
        let element = MatrixElement {
            status: "ZERO_RESULTS".into(),
            distance: None,
            duration: None,
            duration_in_traffic: None,
        };
        assert!(element.to_eta().is_none());
    }

    #[test]
    fn matrix_response_parses() {
        let raw = r#"{
            "status": "OK",
            "rows": [
                {"elements": [{"status": "OK", "distance": {"value": 900}, "duration": {"value": 180}}]},
                {"elements": [{"status": "ZERO_RESULTS"}]}
            ]
        }"#;
        let body: MatrixResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.rows.len(), 2);
        assert!(body.rows[0].elements[0].to_eta().is_some());
        assert!(body.rows[1].elements[0].to_eta().is_none());
    }
}
