//! Geocoding and road-routing collaborators, and the route geometry built on them.
//!
//! Both collaborators are optional. Any failure (timeout, bad status, open
//! breaker) is treated as "no data": places fall back to region centroids and
//! paths fall back to straight segments between the points.

use crate::cache::{fingerprint, QueryCache};
use crate::circuit_breaker::{create_collaborator_circuit_breaker, CollaboratorBreaker};
use crate::errors::AppError;
use crate::models::{RouteDayPlan, RoutePlan};
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Geographic center of Brazil, used when the region is unknown.
pub const COUNTRY_CENTROID: Coordinates = Coordinates::new(-14.2350, -51.9253);

const REGION_CENTROIDS: [(&str, f64, f64); 27] = [
    ("AC", -9.0238, -70.8120),
    ("AL", -9.5713, -36.7820),
    ("AP", 1.4144, -51.7865),
    ("AM", -4.2633, -65.2432),
    ("BA", -12.9714, -38.5014),
    ("CE", -3.7172, -38.5433),
    ("DF", -15.7942, -47.8822),
    ("ES", -19.1834, -40.3089),
    ("GO", -16.6864, -49.2643),
    ("MA", -2.5387, -44.2825),
    ("MT", -15.6014, -56.0979),
    ("MS", -20.7722, -54.7852),
    ("MG", -19.9167, -43.9345),
    ("PA", -1.4558, -48.5044),
    ("PB", -7.2400, -36.7820),
    ("PR", -25.4284, -49.2733),
    ("PE", -8.0476, -34.8770),
    ("PI", -5.0892, -42.8019),
    ("RJ", -22.9068, -43.1729),
    ("RN", -5.7945, -35.2110),
    ("RS", -30.0346, -51.2177),
    ("RO", -8.7612, -63.9039),
    ("RR", 1.4144, -61.4444),
    ("SC", -27.2423, -50.2189),
    ("SP", -23.5505, -46.6333),
    ("SE", -10.5741, -37.3857),
    ("TO", -10.1753, -48.2982),
];

/// Approximate center of a region (UF), if the code is known.
pub fn region_centroid(region: &str) -> Option<Coordinates> {
    let region = region.trim().to_uppercase();
    REGION_CENTROIDS
        .iter()
        .find(|(code, _, _)| *code == region)
        .map(|&(_, lat, lon)| Coordinates::new(lat, lon))
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Coordinates of a place name; `Ok(None)` when the place is unknown.
    async fn geocode(&self, place: &str) -> Result<Option<Coordinates>, AppError>;
}

#[async_trait]
pub trait RoadRouter: Send + Sync {
    /// Road path through the points in order; `Ok(None)` when no route exists.
    async fn route(&self, points: &[Coordinates]) -> Result<Option<Vec<Coordinates>>, AppError>;
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("hunter-leads-api/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::ExternalApiError(format!("Failed to create HTTP client: {}", e)))
}

fn breaker_error(service: &str, err: failsafe::Error<AppError>) -> AppError {
    match err {
        failsafe::Error::Rejected => {
            AppError::ExternalApiError(format!("{} circuit open, call rejected", service))
        }
        failsafe::Error::Inner(e) => e,
    }
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

/// Client for a Nominatim-style `/search` endpoint.
#[derive(Clone)]
pub struct HttpGeocoder {
    client: reqwest::Client,
    base_url: String,
    breaker: CollaboratorBreaker,
}

impl HttpGeocoder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            breaker: create_collaborator_circuit_breaker(),
        })
    }

    async fn fetch(&self, place: &str) -> Result<Option<Coordinates>, AppError> {
        let url = format!("{}/search", self.base_url);
        tracing::debug!("Geocoding '{}' via {}", place, url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", place),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", "br"),
            ])
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Geocoder request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::ExternalApiError(format!(
                "Geocoder returned {}",
                status
            )));
        }

        let hits: Vec<SearchHit> = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse geocoder response: {}", e))
        })?;

        Ok(hits.into_iter().next().and_then(|hit| {
            match (hit.lat.parse::<f64>(), hit.lon.parse::<f64>()) {
                (Ok(lat), Ok(lon)) => Some(Coordinates::new(lat, lon)),
                _ => {
                    tracing::warn!("Geocoder returned unparseable coordinates for '{}'", place);
                    None
                }
            }
        }))
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, place: &str) -> Result<Option<Coordinates>, AppError> {
        self.breaker
            .call(self.fetch(place))
            .await
            .map_err(|e| breaker_error("Geocoder", e))
    }
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<RoadRoute>,
}

#[derive(Debug, Deserialize)]
struct RoadRoute {
    geometry: RouteGeometryJson,
}

#[derive(Debug, Deserialize)]
struct RouteGeometryJson {
    coordinates: Vec<[f64; 2]>,
}

/// Client for an OSRM-style `/route/v1/driving` endpoint.
#[derive(Clone)]
pub struct HttpRoadRouter {
    client: reqwest::Client,
    base_url: String,
    breaker: CollaboratorBreaker,
}

impl HttpRoadRouter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            breaker: create_collaborator_circuit_breaker(),
        })
    }

    async fn fetch(&self, points: &[Coordinates]) -> Result<Option<Vec<Coordinates>>, AppError> {
        // The wire format is lon,lat.
        let path = points
            .iter()
            .map(|p| format!("{},{}", p.lon, p.lat))
            .collect::<Vec<_>>()
            .join(";");
        let url = format!("{}/route/v1/driving/{}", self.base_url, path);
        tracing::debug!("Requesting road route through {} points", points.len());

        let response = self
            .client
            .get(&url)
            .query(&[("overview", "full"), ("geometries", "geojson")])
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Road router request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::ExternalApiError(format!(
                "Road router returned {}",
                status
            )));
        }

        let body: RouteResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse road router response: {}", e))
        })?;

        if body.code != "Ok" {
            tracing::info!("Road router found no route ({})", body.code);
            return Ok(None);
        }

        Ok(body.routes.into_iter().next().map(|route| {
            route
                .geometry
                .coordinates
                .into_iter()
                .map(|[lon, lat]| Coordinates::new(lat, lon))
                .collect()
        }))
    }
}

#[async_trait]
impl RoadRouter for HttpRoadRouter {
    async fn route(&self, points: &[Coordinates]) -> Result<Option<Vec<Coordinates>>, AppError> {
        if points.len() < 2 {
            return Ok(None);
        }
        self.breaker
            .call(self.fetch(points))
            .await
            .map_err(|e| breaker_error("Road router", e))
    }
}

/// A located point of a day's route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoPoint {
    pub label: String,
    pub coordinates: Coordinates,
    /// True when the point is a region centroid rather than a geocoded place.
    pub approximate: bool,
}

/// Drawable geometry of one route day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayGeometry {
    pub day: u32,
    /// Base first, then each stop in visiting order.
    pub points: Vec<GeoPoint>,
    pub path: Vec<Coordinates>,
    /// False when the path is straight segments between the points.
    pub follows_roads: bool,
}

/// Builds map geometry for route plans.
pub struct RouteGeometryService {
    geocoder: Option<Arc<dyn Geocoder>>,
    router: Option<Arc<dyn RoadRouter>>,
    cache: Arc<dyn QueryCache<Option<Coordinates>>>,
}

impl RouteGeometryService {
    pub fn new(
        geocoder: Option<Arc<dyn Geocoder>>,
        router: Option<Arc<dyn RoadRouter>>,
        cache: Arc<dyn QueryCache<Option<Coordinates>>>,
    ) -> Self {
        Self {
            geocoder,
            router,
            cache,
        }
    }

    pub async fn plan_geometry(&self, plan: &RoutePlan) -> Vec<DayGeometry> {
        let mut days = Vec::with_capacity(plan.days.len());
        for day in &plan.days {
            days.push(self.day_geometry(day, &plan.base_city, &plan.base_region).await);
        }
        days
    }

    pub async fn day_geometry(
        &self,
        day: &RouteDayPlan,
        base_city: &str,
        base_region: &str,
    ) -> DayGeometry {
        let mut points = Vec::with_capacity(day.stops.len() + 1);
        points.push(self.locate(base_city, base_region).await);
        for stop in &day.stops {
            let lead = &stop.lead.lead;
            let region = if lead.region.trim().is_empty() {
                base_region
            } else {
                &lead.region
            };
            points.push(self.locate(&lead.city, region).await);
        }

        let coordinates: Vec<Coordinates> = points.iter().map(|p| p.coordinates).collect();
        let (path, follows_roads) = match self.road_path(&coordinates).await {
            Some(path) => (path, true),
            None => (coordinates, false),
        };

        DayGeometry {
            day: day.day,
            points,
            path,
            follows_roads,
        }
    }

    async fn road_path(&self, points: &[Coordinates]) -> Option<Vec<Coordinates>> {
        let router = self.router.as_ref()?;
        if points.len() < 2 {
            return None;
        }
        match router.route(points).await {
            Ok(Some(path)) if path.len() >= 2 => Some(path),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Road routing failed, using straight lines: {}", e);
                None
            }
        }
    }

    /// Geocodes "city, region", falling back to the region centroid.
    async fn locate(&self, city: &str, region: &str) -> GeoPoint {
        let label = match (city.trim(), region.trim()) {
            ("", region) => region.to_string(),
            (city, "") => city.to_string(),
            (city, region) => format!("{}, {}", city, region),
        };

        if let Some(coordinates) = self.geocode_cached(&label).await {
            return GeoPoint {
                label,
                coordinates,
                approximate: false,
            };
        }

        GeoPoint {
            coordinates: region_centroid(region).unwrap_or(COUNTRY_CENTROID),
            label,
            approximate: true,
        }
    }

    async fn geocode_cached(&self, label: &str) -> Option<Coordinates> {
        let geocoder = self.geocoder.as_ref()?;
        if label.is_empty() {
            return None;
        }
        let key = fingerprint(&["geocode", &label.to_uppercase()]);
        if let Some(hit) = self.cache.get(&key).await {
            return hit;
        }

        match geocoder.geocode(&format!("{}, Brasil", label)).await {
            Ok(found) => {
                // Misses are remembered too; only faults are retried.
                self.cache.insert(key, found).await;
                found
            }
            Err(e) => {
                tracing::warn!("Geocoding '{}' failed, using region centroid: {}", label, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_region_has_a_centroid() {
        assert_eq!(REGION_CENTROIDS.len(), 27);
        assert_eq!(
            region_centroid("ba"),
            Some(Coordinates::new(-12.9714, -38.5014))
        );
        assert_eq!(region_centroid("XX"), None);
    }
}
