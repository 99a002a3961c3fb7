use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Tables the registry queries read from.
pub const REGISTRY_TABLES: [&str; 3] = ["estabelecimentos", "municipios", "cnaes"];

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Registry tables absent from the `public` schema.
    pub async fn missing_registry_tables(&self) -> anyhow::Result<Vec<String>> {
        let present: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables WHERE table_schema = 'public' AND table_name::text = ANY($1)",
        )
        .bind(REGISTRY_TABLES.map(String::from).to_vec())
        .fetch_all(&self.pool)
        .await?;

        Ok(REGISTRY_TABLES
            .iter()
            .filter(|t| !present.iter().any(|p| p == *t))
            .map(|t| t.to_string())
            .collect())
    }
}
