//! Hunter Leads API Library
//!
//! Lead qualification and visit planning over the Brazilian company registry:
//! registry search with deduplication, rule-based scoring, multi-day route
//! planning with navigation links, CSV export and a sales pipeline store.
//!
//! # Modules
//!
//! - `api`: HTTP-layer namespace.
//! - `domain`: Domain-layer namespace.
//! - `integrations`: External collaborator namespace.
//! - `cache`: Injectable query caches.
//! - `circuit_breaker`: Circuit breaker for collaborator calls.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `errors`: Error handling types.
//! - `export`: CSV exports.
//! - `geo`: Geocoding, road routing and route geometry.
//! - `handlers`: HTTP request handlers and router.
//! - `models`: Core data models and API payloads.
//! - `pipeline`: Sales pipeline store.
//! - `prospecting`: Qualification and visit planning workflows.
//! - `registry`: Company registry queries and deduplication.
//! - `routing`: Route planning and navigation links.
//! - `scoring`: Lead scoring engine.

pub mod api;
pub mod domain;
pub mod integrations;

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod export;
pub mod geo;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod prospecting;
pub mod registry;
pub mod routing;
pub mod scoring;
