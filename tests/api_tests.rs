//! HTTP surface tests against the in-memory registry and pipeline.
mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::*;
use hunter_leads_api::cache::{MokaQueryCache, NoCache};
use hunter_leads_api::config::Config;
use hunter_leads_api::export::CsvExporter;
use hunter_leads_api::geo::RouteGeometryService;
use hunter_leads_api::api::handlers::{self, AppState};
use hunter_leads_api::models::IndustryCode;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use hunter_leads_api::errors::AppError;
use hunter_leads_api::pipeline::{
    InMemoryPipelineStore, PipelineEntry, PipelineStore, PipelineUpdate,
};
use hunter_leads_api::prospecting::ProspectingService;
use hunter_leads_api::routing::NavigationBuilder;
use hunter_leads_api::scoring::{Scorer, ScoringProfile};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

const NAV_BASE: &str = "https://www.google.com/maps/dir/";
const SEARCH_BASE: &str = "https://www.google.com/maps/search/";

fn test_config() -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        port: 3000,
        navigation_base_url: NAV_BASE.to_string(),
        maps_search_base_url: SEARCH_BASE.to_string(),
        geocoder_base_url: None,
        road_router_base_url: None,
        collaborator_timeout_secs: 15,
        registry_result_limit: 50_000,
        query_cache_ttl_secs: 300,
        scoring_profile_path: None,
    }
}

fn test_app() -> Router {
    handlers::app(Arc::new(test_state(Arc::new(InMemoryPipelineStore::new()))))
}

fn test_state(pipeline: Arc<dyn PipelineStore>) -> AppState {
    let mut registry = FakeRegistry::new(vec![
        with_phone(lead("11111111000100", "Salvador", "BA"), "71 33334444"),
        lead("22222222000100", "Salvador", "BA"),
        with_email(lead("33333333000100", "Feira de Santana", "BA"), "a@b.com"),
    ]);
    registry.codes = vec![IndustryCode {
        code: "4711302".to_string(),
        description: "Comércio varejista de mercadorias em geral".to_string(),
    }];

    let navigation = NavigationBuilder::new(NAV_BASE);
    AppState {
        config: test_config(),
        prospecting: ProspectingService::new(
            Arc::new(registry),
            Scorer::new(ScoringProfile::default()).as_of(today()),
            navigation.clone(),
            50_000,
        ),
        pipeline,
        geometry: RouteGeometryService::new(None, None, Arc::new(NoCache)),
        exporter: CsvExporter::new(SEARCH_BASE, navigation),
        pipeline_cache: Arc::new(MokaQueryCache::<Vec<PipelineEntry>>::new(
            Duration::from_secs(60),
            10,
        )),
        pipeline_generation: AtomicU64::new(0),
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_check() {
    let app = test_app();
    let (status, body) = send_json(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn lookup_endpoints() {
    let app = test_app();

    let (status, codes) =
        send_json(&app, Method::GET, "/api/v1/industry-codes?term=varejista", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(codes[0]["code"], "4711302");

    let (_, cities) = send_json(&app, Method::GET, "/api/v1/cities?region=BA", None).await;
    assert_eq!(cities, json!(["Feira de Santana", "Salvador"]));

    let (_, segments) = send_json(&app, Method::GET, "/api/v1/segments", None).await;
    assert_eq!(segments["max_score"], 95);
    assert_eq!(segments["segments"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn qualify_endpoint() {
    let app = test_app();
    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/v1/leads/qualify",
        Some(json!({ "industry_codes": ["4711-3/02"], "region": "BA", "min_score": 60 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["leads"][0]["company_id"], "11111111000100");
    assert_eq!(body["leads"][0]["score"], 70);
}

#[tokio::test]
async fn qualify_without_codes_is_bad_request() {
    let app = test_app();
    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/v1/leads/qualify",
        Some(json!({ "industry_codes": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("industry codes"));
}

#[tokio::test]
async fn plan_then_export_and_draw() {
    let app = test_app();
    let (status, planned) = send_json(
        &app,
        Method::POST,
        "/api/v1/routes/plan",
        Some(json!({
            "base_city": "Feira de Santana",
            "base_region": "BA",
            "days": 2,
            "visits_per_day": 2,
            "industry_codes": ["4711302"],
            "cities": ["Salvador", "Feira de Santana"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(planned["total_visits"], 3);

    let plan = planned["plan"].clone();
    let (status, csv) = send(
        &app,
        Method::POST,
        "/api/v1/export/route",
        Some(json!({ "plan": plan })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(csv).unwrap();
    assert!(text.starts_with("Dia,Ordem,Empresa"));
    assert_eq!(text.lines().count(), 4);

    let (_, summary) = send(
        &app,
        Method::POST,
        "/api/v1/export/route-summary",
        Some(json!({ "plan": plan, "include_links": false })),
    )
    .await;
    let summary = String::from_utf8(summary).unwrap();
    assert_eq!(summary.lines().count(), 3);
    assert!(!summary.contains("https://"));

    let (status, geometry) = send_json(
        &app,
        Method::POST,
        "/api/v1/routes/geometry",
        Some(json!({ "plan": plan })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(geometry.as_array().unwrap().len(), 2);
    assert_eq!(geometry[0]["follows_roads"], false);
    assert_eq!(geometry[0]["points"][0]["approximate"], true);
}

#[tokio::test]
async fn zero_days_is_bad_request() {
    let app = test_app();
    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/v1/routes/plan",
        Some(json!({
            "base_city": "Salvador",
            "base_region": "BA",
            "days": 0,
            "visits_per_day": 5,
            "industry_codes": ["4711302"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lead_export_has_headers_and_rows() {
    let app = test_app();
    let (_, qualified) = send_json(
        &app,
        Method::POST,
        "/api/v1/leads/qualify",
        Some(json!({ "industry_codes": ["4711302"] })),
    )
    .await;

    let (status, csv) = send(
        &app,
        Method::POST,
        "/api/v1/export/leads",
        Some(json!({ "leads": qualified["leads"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(csv).unwrap();
    assert!(text.starts_with("Nome Fantasia,Razão Social,CNPJ"));
    assert_eq!(text.lines().count(), 4);
    assert!(text.contains("+557133334444"));
}

#[tokio::test]
async fn pipeline_lifecycle() {
    let app = test_app();

    let (status, added) = send_json(
        &app,
        Method::POST,
        "/api/v1/pipeline",
        Some(json!({ "company_ids": ["11111111000100", "22222222000100"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(added["affected"], 2);

    let (_, listed) = send_json(&app, Method::GET, "/api/v1/pipeline", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 2);
    assert_eq!(listed[0]["status"], "Novo");

    let (status, _) = send_json(
        &app,
        Method::PATCH,
        "/api/v1/pipeline/11111111000100",
        Some(json!({ "status": "Tentativa", "note": "Retornar amanhã" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send_json(
        &app,
        Method::PATCH,
        "/api/v1/pipeline/22222222000100",
        Some(json!({ "status": "Vendido" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("Vendido"));

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/v1/pipeline/batch",
        Some(json!({ "updates": [
            { "company_id": "11111111000100", "status": "Em Negociação", "value": "1200.00" },
            { "company_id": "11111111000100", "status": "Vendido" }
        ] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, summary) = send_json(&app, Method::GET, "/api/v1/pipeline/summary", None).await;
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["sold"], 1);
    assert_eq!(summary["conversion_rate"], 50.0);

    let (status, _) = send_json(&app, Method::DELETE, "/api/v1/pipeline/22222222000100", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send_json(&app, Method::DELETE, "/api/v1/pipeline/22222222000100", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listed) = send_json(&app, Method::GET, "/api/v1/pipeline", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["status"], "Vendido");
}

#[tokio::test]
async fn empty_patch_is_bad_request() {
    let app = test_app();
    send_json(
        &app,
        Method::POST,
        "/api/v1/pipeline",
        Some(json!({ "company_ids": ["11111111000100"] })),
    )
    .await;
    let (status, _) = send_json(
        &app,
        Method::PATCH,
        "/api/v1/pipeline/11111111000100",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Pipeline store whose first listing pauses after reading until released.
#[derive(Default)]
struct PausingStore {
    inner: InMemoryPipelineStore,
    paused_once: AtomicBool,
    listed: Notify,
    release: Notify,
}

#[async_trait]
impl PipelineStore for PausingStore {
    async fn ensure_schema(&self) -> Result<(), AppError> {
        self.inner.ensure_schema().await
    }

    async fn add_leads(&self, company_ids: &[String]) -> Result<usize, AppError> {
        self.inner.add_leads(company_ids).await
    }

    async fn update_status(
        &self,
        company_id: &str,
        status: hunter_leads_api::pipeline::LeadStatus,
    ) -> Result<(), AppError> {
        self.inner.update_status(company_id, status).await
    }

    async fn update_details(
        &self,
        company_id: &str,
        value: Option<BigDecimal>,
        note: Option<String>,
    ) -> Result<(), AppError> {
        self.inner.update_details(company_id, value, note).await
    }

    async fn apply_batch(&self, updates: &[PipelineUpdate]) -> Result<usize, AppError> {
        self.inner.apply_batch(updates).await
    }

    async fn remove(&self, company_id: &str) -> Result<(), AppError> {
        self.inner.remove(company_id).await
    }

    async fn remove_batch(&self, company_ids: &[String]) -> Result<usize, AppError> {
        self.inner.remove_batch(company_ids).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineEntry>, AppError> {
        let entries = self.inner.list(limit).await?;
        if !self.paused_once.swap(true, Ordering::SeqCst) {
            self.listed.notify_one();
            self.release.notified().await;
        }
        Ok(entries)
    }
}

#[tokio::test]
async fn write_during_listing_is_not_hidden_by_cache() {
    let store = Arc::new(PausingStore::default());
    let app = handlers::app(Arc::new(test_state(store.clone())));

    let reader = app.clone();
    let slow_read = tokio::spawn(async move {
        send_json(&reader, Method::GET, "/api/v1/pipeline", None).await
    });

    store.listed.notified().await;
    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/v1/pipeline",
        Some(json!({ "company_ids": ["11111111000100"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    store.release.notify_one();

    let (status, before) = slow_read.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(before.as_array().map(Vec::len), Some(0));

    let (_, after) = send_json(&app, Method::GET, "/api/v1/pipeline", None).await;
    assert_eq!(after.as_array().map(Vec::len), Some(1));

    let (_, summary) = send_json(&app, Method::GET, "/api/v1/pipeline/summary", None).await;
    assert_eq!(summary["total"], 1);
}

#[tokio::test]
async fn oversized_listing_limit_is_accepted() {
    let app = test_app();
    let (status, body) = send_json(
        &app,
        Method::GET,
        "/api/v1/pipeline?limit=18446744073709551615",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}
