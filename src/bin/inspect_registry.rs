//! Prints the registry and pipeline tables with their columns and row estimates.

use hunter_leads_api::db::{Database, REGISTRY_TABLES};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inspect_registry=info".into()),
        )
        .init();

    let database_url = std::env::var("DB_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DB_URL or DATABASE_URL must be set"))?;
    let db = Database::new(&database_url).await?;

    let missing = db.missing_registry_tables().await?;
    for table in &missing {
        tracing::warn!("Registry table '{}' not found", table);
    }

    for table in REGISTRY_TABLES.iter().copied().chain(["crm"]) {
        if missing.iter().any(|m| m == table) {
            continue;
        }

        let estimate: Option<f32> = sqlx::query_scalar(
            "SELECT reltuples FROM pg_class WHERE relname = $1 AND relkind = 'r'",
        )
        .bind(table)
        .fetch_optional(&db.pool)
        .await?;

        let columns: Vec<(String, String)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text FROM information_schema.columns WHERE table_schema = 'public' AND table_name = $1 ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&db.pool)
        .await?;

        if columns.is_empty() {
            println!("{}: (absent)", table);
            continue;
        }

        match estimate {
            Some(rows) if rows >= 0.0 => println!("{} (~{} rows)", table, rows as i64),
            _ => println!("{}", table),
        }
        for (name, data_type) in columns {
            println!("  - {}: {}", name, data_type);
        }
        println!();
    }

    Ok(())
}
