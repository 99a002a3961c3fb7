use crate::cache::{fingerprint, QueryCache};
use crate::config::Config;
use crate::errors::AppError;
use crate::export::{CsvExporter, CSV_CONTENT_TYPE};
use crate::geo::{DayGeometry, RouteGeometryService};
use crate::models::*;
use crate::pipeline::{
    PipelineEntry, PipelineStore, PipelineSummary, PipelineUpdate, DEFAULT_LIST_LIMIT,
};
use crate::prospecting::ProspectingService;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of industry codes returned by a text search.
const DEFAULT_CODE_SEARCH_LIMIT: usize = 15;

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Registry search, qualification and visit planning.
    pub prospecting: ProspectingService,
    /// Deal tracking store.
    pub pipeline: Arc<dyn PipelineStore>,
    /// Map geometry for planned routes.
    pub geometry: RouteGeometryService,
    pub exporter: CsvExporter,
    /// Pipeline listings, invalidated on every pipeline write.
    pub pipeline_cache: Arc<dyn QueryCache<Vec<PipelineEntry>>>,
    /// Bumped by every pipeline write.
    pub pipeline_generation: AtomicU64,
}

impl AppState {
    async fn pipeline_entries(&self, limit: usize) -> Result<Vec<PipelineEntry>, AppError> {
        let key = fingerprint(&["pipeline", &limit.to_string()]);
        if let Some(hit) = self.pipeline_cache.get(&key).await {
            return Ok(hit);
        }
        let generation = self.pipeline_generation.load(Ordering::Acquire);
        let entries = self.pipeline.list(limit).await?;
        self.pipeline_cache.insert(key.clone(), entries.clone()).await;
        // A write that landed during the read may have invalidated before our insert.
        if self.pipeline_generation.load(Ordering::Acquire) != generation {
            tracing::debug!("Pipeline changed during listing, dropping cached copy");
            self.pipeline_cache.invalidate(&key).await;
        }
        Ok(entries)
    }

    fn pipeline_changed(&self) {
        self.pipeline_generation.fetch_add(1, Ordering::AcqRel);
        self.pipeline_cache.invalidate_all();
    }
}

/// Routes under `/api/v1`, without state or middleware.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/industry-codes", get(search_industry_codes))
        .route("/api/v1/cities", get(list_cities))
        .route("/api/v1/segments", get(list_segments))
        .route("/api/v1/leads/qualify", post(qualify_leads))
        .route("/api/v1/routes/plan", post(plan_route))
        .route("/api/v1/routes/geometry", post(route_geometry))
        .route("/api/v1/export/leads", post(export_leads))
        .route("/api/v1/export/route", post(export_route))
        .route("/api/v1/export/route-summary", post(export_route_summary))
        .route("/api/v1/pipeline", get(list_pipeline).post(add_to_pipeline))
        .route("/api/v1/pipeline/summary", get(pipeline_summary))
        .route(
            "/api/v1/pipeline/:company_id",
            patch(update_pipeline_entry).delete(remove_from_pipeline),
        )
        .route("/api/v1/pipeline/batch", post(apply_pipeline_batch))
        .route("/api/v1/pipeline/batch-delete", post(remove_pipeline_batch))
}

/// Health check plus every API route, bound to `state`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "hunter-leads-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/industry-codes?term=&limit=
///
/// Industry codes whose description contains `term`.
pub async fn search_industry_codes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IndustryCodeQuery>,
) -> Result<Json<Vec<IndustryCode>>, AppError> {
    tracing::info!("GET /industry-codes - term: {}", params.term);
    let codes = state
        .prospecting
        .registry()
        .search_text(
            &params.term,
            params
                .limit
                .unwrap_or(DEFAULT_CODE_SEARCH_LIMIT)
                .min(state.config.registry_result_limit),
        )
        .await?;
    Ok(Json(codes))
}

/// GET /api/v1/cities?region=
pub async fn list_cities(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CityQuery>,
) -> Result<Json<Vec<String>>, AppError> {
    let cities = state
        .prospecting
        .registry()
        .list_cities(params.region.as_deref())
        .await?;
    tracing::debug!("GET /cities - {} cities", cities.len());
    Ok(Json(cities))
}

/// GET /api/v1/segments
///
/// Segment table, profile presets and scoring weights in use.
pub async fn list_segments(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let profile = state.prospecting.scorer().profile();
    Json(json!({
        "segments": profile.catalog.segments,
        "presets": profile.catalog.presets,
        "weights": profile.weights,
        "max_score": profile.weights.max_score(),
        "codes_by_segment": profile.catalog.codes_by_segment(),
    }))
}

/// POST /api/v1/leads/qualify
///
/// Searches the registry and returns deduplicated leads sorted by score.
pub async fn qualify_leads(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QualifyRequest>,
) -> Result<Json<QualifyResponse>, AppError> {
    tracing::info!(
        "POST /leads/qualify - {} codes, {} segments, region: {:?}",
        request.industry_codes.len(),
        request.segments.len(),
        request.region
    );
    let response = state.prospecting.find_qualified(&request).await?;
    Ok(Json(response))
}

/// POST /api/v1/routes/plan
pub async fn plan_route(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RoutePlanRequest>,
) -> Result<Json<RoutePlanResponse>, AppError> {
    tracing::info!(
        "POST /routes/plan - base: {} - {}, {} days x {} visits",
        request.base_city,
        request.base_region,
        request.days,
        request.visits_per_day
    );
    let response = state.prospecting.plan_visits(&request).await?;
    Ok(Json(response))
}

/// POST /api/v1/routes/geometry
///
/// Located points and drawable path for each day of a plan.
pub async fn route_geometry(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RouteGeometryRequest>,
) -> Json<Vec<DayGeometry>> {
    Json(state.geometry.plan_geometry(&request.plan).await)
}

fn csv_response(body: Vec<u8>, filename: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, CSV_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

/// POST /api/v1/export/leads
pub async fn export_leads(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LeadsExportRequest>,
) -> Result<Response, AppError> {
    let body = state.exporter.leads_csv(&request.leads)?;
    tracing::info!("Exported {} leads", request.leads.len());
    Ok(csv_response(body, "leads.csv"))
}

/// POST /api/v1/export/route
pub async fn export_route(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RouteExportRequest>,
) -> Result<Response, AppError> {
    let body = state
        .exporter
        .route_csv(&request.plan, request.include_links)?;
    Ok(csv_response(body, "roteiro.csv"))
}

/// POST /api/v1/export/route-summary
pub async fn export_route_summary(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RouteExportRequest>,
) -> Result<Response, AppError> {
    let body = state
        .exporter
        .route_summary_csv(&request.plan, request.include_links)?;
    Ok(csv_response(body, "resumo.csv"))
}

/// GET /api/v1/pipeline?limit=
///
/// Most recently updated entries first.
pub async fn list_pipeline(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PipelineListQuery>,
) -> Result<Json<Vec<PipelineEntry>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Ok(Json(state.pipeline_entries(limit).await?))
}

/// POST /api/v1/pipeline
///
/// Adds companies with status "Novo"; companies already tracked are skipped.
pub async fn add_to_pipeline(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompanyIdsRequest>,
) -> Result<(StatusCode, Json<PipelineWriteResponse>), AppError> {
    let ids: Vec<String> = request
        .company_ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(AppError::BadRequest(
            "At least one company id is required".to_string(),
        ));
    }

    let affected = state.pipeline.add_leads(&ids).await?;
    state.pipeline_changed();
    Ok((StatusCode::CREATED, Json(PipelineWriteResponse { affected })))
}

/// GET /api/v1/pipeline/summary
pub async fn pipeline_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PipelineSummary>, AppError> {
    let entries = state.pipeline_entries(DEFAULT_LIST_LIMIT).await?;
    Ok(Json(PipelineSummary::from_entries(&entries)))
}

/// PATCH /api/v1/pipeline/:company_id
///
/// A status change and the value/note edits are applied together.
pub async fn update_pipeline_entry(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<String>,
    Json(request): Json<PipelinePatchRequest>,
) -> Result<StatusCode, AppError> {
    match request.status {
        Some(status) => {
            let update = PipelineUpdate {
                company_id: company_id.clone(),
                status,
                value: request.value,
                note: request.note,
            };
            state.pipeline.apply_batch(std::slice::from_ref(&update)).await?;
        }
        None => {
            if request.value.is_none() && request.note.is_none() {
                return Err(AppError::BadRequest("Nothing to update".to_string()));
            }
            state
                .pipeline
                .update_details(&company_id, request.value, request.note)
                .await?;
        }
    }
    state.pipeline_changed();
    tracing::info!("Pipeline entry {} updated", company_id);
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/pipeline/:company_id
pub async fn remove_from_pipeline(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.pipeline.remove(&company_id).await?;
    state.pipeline_changed();
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/pipeline/batch
///
/// All updates succeed or none are applied.
pub async fn apply_pipeline_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PipelineBatchRequest>,
) -> Result<Json<PipelineWriteResponse>, AppError> {
    let affected = state.pipeline.apply_batch(&request.updates).await?;
    state.pipeline_changed();
    Ok(Json(PipelineWriteResponse { affected }))
}

/// POST /api/v1/pipeline/batch-delete
pub async fn remove_pipeline_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompanyIdsRequest>,
) -> Result<Json<PipelineWriteResponse>, AppError> {
    let affected = state.pipeline.remove_batch(&request.company_ids).await?;
    state.pipeline_changed();
    Ok(Json(PipelineWriteResponse { affected }))
}
