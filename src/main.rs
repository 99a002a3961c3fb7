use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use hunter_leads_api::cache::{
    lead_search_weight, CachedRegistry, MokaQueryCache, SEARCH_CACHE_MAX_LEADS,
};
use hunter_leads_api::config::Config;
use hunter_leads_api::db::Database;
use hunter_leads_api::export::CsvExporter;
use hunter_leads_api::geo::{
    Coordinates, Geocoder, HttpGeocoder, HttpRoadRouter, RoadRouter, RouteGeometryService,
};
use hunter_leads_api::handlers::{self, AppState};
use hunter_leads_api::pipeline::{PgPipelineStore, PipelineEntry, PipelineStore};
use hunter_leads_api::prospecting::ProspectingService;
use hunter_leads_api::registry::{LeadSearch, PgRegistry, RegistryQuery};
use hunter_leads_api::routing::NavigationBuilder;
use hunter_leads_api::scoring::{Scorer, ScoringProfile};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serves the OpenAPI specification YAML file.
async fn serve_openapi_spec() -> impl IntoResponse {
    match tokio::fs::read_to_string("openapi.yml").await {
        Ok(content) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/yaml")],
            content,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "OpenAPI spec not found").into_response(),
    }
}

/// Serves the Swagger UI HTML page pointing at `serve_openapi_spec`.
async fn serve_swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Hunter Leads API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-standalone-preset.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.yml",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIStandalonePreset
                ],
                layout: "StandaloneLayout"
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

/// Initializes logging, configuration, the database, collaborators and caches,
/// then serves the HTTP API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hunter_leads_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let missing = db.missing_registry_tables().await?;
    if !missing.is_empty() {
        tracing::warn!(
            "Registry tables missing: {} (lead searches will fail until imported)",
            missing.join(", ")
        );
    }

    let profile = match &config.scoring_profile_path {
        Some(path) => ScoringProfile::from_json_file(path)?,
        None => ScoringProfile::default(),
    };
    tracing::info!(
        "Scoring profile ready ({} segments, max score {})",
        profile.catalog.segments.len(),
        profile.weights.max_score()
    );

    // Registry search cache (caller-owned; the core never reads it)
    let search_cache = Arc::new(MokaQueryCache::<LeadSearch>::weighted(
        config.query_cache_ttl(),
        SEARCH_CACHE_MAX_LEADS,
        lead_search_weight,
    ));
    let registry: Arc<dyn RegistryQuery> = Arc::new(CachedRegistry::new(
        PgRegistry::new(db.pool.clone()),
        search_cache,
    ));

    let navigation = NavigationBuilder::new(config.navigation_base_url.clone());
    let prospecting = ProspectingService::new(
        registry,
        Scorer::new(profile),
        navigation.clone(),
        config.registry_result_limit,
    );

    let pipeline: Arc<dyn PipelineStore> = Arc::new(PgPipelineStore::new(db.pool.clone()));
    pipeline.ensure_schema().await?;

    let geocoder: Option<Arc<dyn Geocoder>> = match &config.geocoder_base_url {
        Some(url) => Some(Arc::new(HttpGeocoder::new(url, config.collaborator_timeout())?)),
        None => None,
    };
    let road_router: Option<Arc<dyn RoadRouter>> = match &config.road_router_base_url {
        Some(url) => Some(Arc::new(HttpRoadRouter::new(url, config.collaborator_timeout())?)),
        None => None,
    };
    // Place coordinates barely move; keep them for a day
    let geocode_cache = Arc::new(MokaQueryCache::<Option<Coordinates>>::new(Duration::from_secs(86_400), 10_000));
    let geometry = RouteGeometryService::new(geocoder, road_router, geocode_cache);

    let app_state = Arc::new(AppState {
        exporter: CsvExporter::new(config.maps_search_base_url.clone(), navigation),
        pipeline_cache: Arc::new(MokaQueryCache::<Vec<PipelineEntry>>::new(config.query_cache_ttl(), 100)),
        pipeline_generation: AtomicU64::new(0),
        config: config.clone(),
        prospecting,
        pipeline,
        geometry,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = handlers::api_routes()
        .route("/docs", get(serve_swagger_ui))
        .route("/api-docs/openapi.yml", get(serve_openapi_spec))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
