//! Sales pipeline: per-company deal tracking with a validated status lifecycle.

use crate::errors::{AppError, ResultExt};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;

/// Default number of entries returned by a listing.
pub const DEFAULT_LIST_LIMIT: usize = 5000;

/// Deal phase of a company in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadStatus {
    #[serde(rename = "Novo")]
    New,
    #[serde(rename = "Tentativa")]
    Attempted,
    #[serde(rename = "Em Negociação")]
    Negotiating,
    #[serde(rename = "Vendido")]
    Sold,
    #[serde(rename = "Perdido")]
    Lost,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 5] = [
        LeadStatus::New,
        LeadStatus::Attempted,
        LeadStatus::Negotiating,
        LeadStatus::Sold,
        LeadStatus::Lost,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LeadStatus::New => "Novo",
            LeadStatus::Attempted => "Tentativa",
            LeadStatus::Negotiating => "Em Negociação",
            LeadStatus::Sold => "Vendido",
            LeadStatus::Lost => "Perdido",
        }
    }

    /// Exact label match; no case folding or substring heuristics.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Sold | LeadStatus::Lost)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    /// Staying in the same status is always allowed.
    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        use LeadStatus::*;
        *self == next
            || matches!(
                (self, next),
                (New, Attempted)
                    | (New, Lost)
                    | (Attempted, Negotiating)
                    | (Attempted, Lost)
                    | (Negotiating, Sold)
                    | (Negotiating, Lost)
            )
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LeadStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Unknown pipeline status '{}' (expected one of: {})",
                s,
                Self::ALL.map(|st| st.label()).join(", ")
            ))
        })
    }
}

/// Checks a status change. Returns `Ok(false)` for a no-op (same status).
pub fn check_transition(
    company_id: &str,
    from: LeadStatus,
    to: LeadStatus,
) -> Result<bool, AppError> {
    if from == to {
        return Ok(false);
    }
    if from.can_transition_to(to) {
        Ok(true)
    } else {
        Err(AppError::InvalidTransition {
            company_id: company_id.to_string(),
            from: from.label().to_string(),
            to: to.label().to_string(),
        })
    }
}

fn validate_value(company_id: &str, value: &BigDecimal) -> Result<(), AppError> {
    if value < &BigDecimal::zero() {
        return Err(AppError::BadRequest(format!(
            "Deal value of {} cannot be negative",
            company_id
        )));
    }
    Ok(())
}

/// One company in the pipeline, enriched with registry contact data when available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEntry {
    pub company_id: String,
    pub status: LeadStatus,
    pub value: BigDecimal,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub trade_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub region: Option<String>,
}

impl PipelineEntry {
    fn new(company_id: String, now: DateTime<Utc>) -> Self {
        Self {
            company_id,
            status: LeadStatus::New,
            value: BigDecimal::zero(),
            note: None,
            created_at: now,
            updated_at: now,
            trade_name: None,
            phone: None,
            email: None,
            region: None,
        }
    }
}

/// Full update of one entry, as applied by a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineUpdate {
    pub company_id: String,
    pub status: LeadStatus,
    pub value: Option<BigDecimal>,
    pub note: Option<String>,
}

/// Aggregate figures over a set of entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub total: usize,
    pub total_value: BigDecimal,
    pub sold: usize,
    pub sold_value: BigDecimal,
    pub negotiating: usize,
    pub negotiating_value: BigDecimal,
    pub new: usize,
    /// Sold entries as a percentage of all entries.
    pub conversion_rate: f64,
}

impl PipelineSummary {
    pub fn from_entries(entries: &[PipelineEntry]) -> Self {
        let sum = |status: Option<LeadStatus>| -> (usize, BigDecimal) {
            entries
                .iter()
                .filter(|e| status.map_or(true, |s| e.status == s))
                .fold((0, BigDecimal::zero()), |(n, v), e| (n + 1, v + &e.value))
        };

        let (total, total_value) = sum(None);
        let (sold, sold_value) = sum(Some(LeadStatus::Sold));
        let (negotiating, negotiating_value) = sum(Some(LeadStatus::Negotiating));
        let (new, _) = sum(Some(LeadStatus::New));

        let conversion_rate = if total == 0 {
            0.0
        } else {
            sold as f64 / total as f64 * 100.0
        };

        Self {
            total,
            total_value,
            sold,
            sold_value,
            negotiating,
            negotiating_value,
            new,
            conversion_rate,
        }
    }
}

/// Persistence contract of the pipeline.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Creates the backing storage if missing.
    async fn ensure_schema(&self) -> Result<(), AppError>;

    /// Adds companies with status `New`; already tracked ids are left untouched.
    /// Returns how many were inserted.
    async fn add_leads(&self, company_ids: &[String]) -> Result<usize, AppError>;

    async fn update_status(&self, company_id: &str, status: LeadStatus) -> Result<(), AppError>;

    /// Sets deal value and/or note; `None` leaves the field as is.
    async fn update_details(
        &self,
        company_id: &str,
        value: Option<BigDecimal>,
        note: Option<String>,
    ) -> Result<(), AppError>;

    /// Applies every update or none of them.
    async fn apply_batch(&self, updates: &[PipelineUpdate]) -> Result<usize, AppError>;

    async fn remove(&self, company_id: &str) -> Result<(), AppError>;

    /// Removes every listed company in one transaction; unknown ids are ignored.
    async fn remove_batch(&self, company_ids: &[String]) -> Result<usize, AppError>;

    /// Most recently updated first.
    async fn list(&self, limit: usize) -> Result<Vec<PipelineEntry>, AppError>;
}

/// LIMIT value for a listing: at least 1, saturating at `i64::MAX`.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX).max(1)
}

fn not_tracked(company_id: &str) -> AppError {
    AppError::NotFound(format!("Company {} is not in the pipeline", company_id))
}

// ============ Postgres ============

#[derive(Debug, sqlx::FromRow)]
struct PipelineRow {
    company_id: String,
    status: String,
    value: BigDecimal,
    note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    trade_name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    region: Option<String>,
}

impl TryFrom<PipelineRow> for PipelineEntry {
    type Error = AppError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        let status = parse_stored_status(&row.company_id, &row.status)?;
        Ok(Self {
            company_id: row.company_id,
            status,
            value: row.value,
            note: row.note,
            created_at: row.created_at,
            updated_at: row.updated_at,
            trade_name: row.trade_name,
            phone: row.phone,
            email: row.email,
            region: row.region,
        })
    }
}

fn parse_stored_status(company_id: &str, stored: &str) -> Result<LeadStatus, AppError> {
    LeadStatus::from_label(stored).ok_or_else(|| {
        AppError::InternalError(format!(
            "Stored status '{}' of {} is not a known pipeline status",
            stored, company_id
        ))
    })
}

/// Pipeline persisted in the `crm` table.
#[derive(Clone)]
pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn locked_status(
        tx: &mut Transaction<'_, Postgres>,
        company_id: &str,
    ) -> Result<LeadStatus, AppError> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT status FROM crm WHERE cnpj = $1 FOR UPDATE")
                .bind(company_id)
                .fetch_optional(&mut **tx)
                .await
                .with_context(|| format!("locking pipeline entry {}", company_id))?;

        match stored {
            Some(stored) => parse_stored_status(company_id, &stored),
            None => Err(not_tracked(company_id)),
        }
    }

    async fn write_update(
        tx: &mut Transaction<'_, Postgres>,
        update: &PipelineUpdate,
    ) -> Result<(), AppError> {
        let current = Self::locked_status(tx, &update.company_id).await?;
        check_transition(&update.company_id, current, update.status)?;
        if let Some(value) = &update.value {
            validate_value(&update.company_id, value)?;
        }

        sqlx::query(
            r#"UPDATE crm
            SET status = $2,
                valor = COALESCE($3, valor),
                anotacao = COALESCE($4, anotacao),
                data_atualizacao = NOW()
            WHERE cnpj = $1"#,
        )
        .bind(&update.company_id)
        .bind(update.status.label())
        .bind(update.value.clone())
        .bind(update.note.clone())
        .execute(&mut **tx)
        .await
        .with_context(|| format!("updating pipeline entry {}", update.company_id))?;
        Ok(())
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS crm (
                cnpj TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'Novo',
                anotacao TEXT,
                valor NUMERIC(12,2) NOT NULL DEFAULT 0,
                data_criacao TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                data_atualizacao TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await
        .context("creating crm table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_crm_data_atualizacao ON crm (data_atualizacao DESC)",
        )
        .execute(&self.pool)
        .await
        .context("creating crm index")?;

        tracing::info!("Pipeline schema ready");
        Ok(())
    }

    async fn add_leads(&self, company_ids: &[String]) -> Result<usize, AppError> {
        if company_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO crm (cnpj) SELECT DISTINCT UNNEST($1::text[]) ON CONFLICT (cnpj) DO NOTHING",
        )
        .bind(company_ids)
        .execute(&self.pool)
        .await
        .context("adding leads to pipeline")?;

        let inserted = result.rows_affected() as usize;
        tracing::info!(
            "Added {} of {} companies to the pipeline",
            inserted,
            company_ids.len()
        );
        Ok(inserted)
    }

    async fn update_status(&self, company_id: &str, status: LeadStatus) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.context("starting status update")?;
        let current = Self::locked_status(&mut tx, company_id).await?;

        if check_transition(company_id, current, status)? {
            sqlx::query("UPDATE crm SET status = $2, data_atualizacao = NOW() WHERE cnpj = $1")
                .bind(company_id)
                .bind(status.label())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("updating status of {}", company_id))?;
            tracing::info!("Pipeline {}: {} -> {}", company_id, current, status);
        }

        tx.commit().await.context("committing status update")?;
        Ok(())
    }

    async fn update_details(
        &self,
        company_id: &str,
        value: Option<BigDecimal>,
        note: Option<String>,
    ) -> Result<(), AppError> {
        if let Some(value) = &value {
            validate_value(company_id, value)?;
        }
        let result = sqlx::query(
            r#"UPDATE crm
            SET valor = COALESCE($2, valor),
                anotacao = COALESCE($3, anotacao),
                data_atualizacao = NOW()
            WHERE cnpj = $1"#,
        )
        .bind(company_id)
        .bind(value)
        .bind(note)
        .execute(&self.pool)
        .await
        .with_context(|| format!("updating details of {}", company_id))?;

        if result.rows_affected() == 0 {
            return Err(not_tracked(company_id));
        }
        Ok(())
    }

    async fn apply_batch(&self, updates: &[PipelineUpdate]) -> Result<usize, AppError> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.context("starting batch update")?;
        for update in updates {
            // An error drops the transaction, which rolls it back.
            Self::write_update(&mut tx, update).await?;
        }
        tx.commit().await.context("committing batch update")?;

        tracing::info!("Applied {} pipeline updates", updates.len());
        Ok(updates.len())
    }

    async fn remove(&self, company_id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM crm WHERE cnpj = $1")
            .bind(company_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("removing {} from pipeline", company_id))?;

        if result.rows_affected() == 0 {
            return Err(not_tracked(company_id));
        }
        Ok(())
    }

    async fn remove_batch(&self, company_ids: &[String]) -> Result<usize, AppError> {
        if company_ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.context("starting batch delete")?;
        let result = sqlx::query("DELETE FROM crm WHERE cnpj = ANY($1)")
            .bind(company_ids)
            .execute(&mut *tx)
            .await
            .context("removing companies from pipeline")?;
        tx.commit().await.context("committing batch delete")?;

        Ok(result.rows_affected() as usize)
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineEntry>, AppError> {
        let rows = sqlx::query_as::<_, PipelineRow>(
            r#"SELECT
                c.cnpj AS company_id,
                c.status,
                c.valor AS value,
                c.anotacao AS note,
                c.data_criacao AS created_at,
                c.data_atualizacao AS updated_at,
                e.nome_fantasia AS trade_name,
                CASE WHEN COALESCE(e.ddd_1, '') <> '' AND COALESCE(e.telefone_1, '') <> ''
                     THEN e.ddd_1 || ' ' || e.telefone_1 END AS phone,
                NULLIF(e.correio_eletronico, '') AS email,
                e.uf AS region
            FROM (
                SELECT * FROM crm ORDER BY data_atualizacao DESC LIMIT $1
            ) c
            LEFT JOIN estabelecimentos e
                ON e.cnpj_basico || e.cnpj_ordem || e.cnpj_dv = c.cnpj
            ORDER BY c.data_atualizacao DESC"#,
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .context("listing pipeline")?;

        rows.into_iter().map(PipelineEntry::try_from).collect()
    }
}

// ============ In-memory ============

#[derive(Debug, Clone)]
struct Tracked {
    entry: PipelineEntry,
    touched: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, Tracked>,
    clock: u64,
}

impl MemoryState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn apply(&mut self, update: &PipelineUpdate) -> Result<(), AppError> {
        let touched = self.tick();
        let tracked = self
            .entries
            .get_mut(&update.company_id)
            .ok_or_else(|| not_tracked(&update.company_id))?;
        check_transition(&update.company_id, tracked.entry.status, update.status)?;
        if let Some(value) = &update.value {
            validate_value(&update.company_id, value)?;
        }

        tracked.entry.status = update.status;
        if let Some(value) = &update.value {
            tracked.entry.value = value.clone();
        }
        if let Some(note) = &update.note {
            tracked.entry.note = Some(note.clone());
        }
        tracked.entry.updated_at = Utc::now();
        tracked.touched = touched;
        Ok(())
    }
}

/// Process-local pipeline, used by tests and when no database is wanted.
#[derive(Debug, Default)]
pub struct InMemoryPipelineStore {
    state: RwLock<MemoryState>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn ensure_schema(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn add_leads(&self, company_ids: &[String]) -> Result<usize, AppError> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for id in company_ids {
            if state.entries.contains_key(id) {
                continue;
            }
            let touched = state.tick();
            state.entries.insert(
                id.clone(),
                Tracked {
                    entry: PipelineEntry::new(id.clone(), Utc::now()),
                    touched,
                },
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update_status(&self, company_id: &str, status: LeadStatus) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let current = state
            .entries
            .get(company_id)
            .map(|t| t.entry.status)
            .ok_or_else(|| not_tracked(company_id))?;
        if check_transition(company_id, current, status)? {
            state.apply(&PipelineUpdate {
                company_id: company_id.to_string(),
                status,
                value: None,
                note: None,
            })?;
        }
        Ok(())
    }

    async fn update_details(
        &self,
        company_id: &str,
        value: Option<BigDecimal>,
        note: Option<String>,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let status = state
            .entries
            .get(company_id)
            .map(|t| t.entry.status)
            .ok_or_else(|| not_tracked(company_id))?;
        state.apply(&PipelineUpdate {
            company_id: company_id.to_string(),
            status,
            value,
            note,
        })
    }

    async fn apply_batch(&self, updates: &[PipelineUpdate]) -> Result<usize, AppError> {
        let mut state = self.state.write().await;
        // Work on a copy so a failing update leaves the store untouched.
        let mut staged = MemoryState {
            entries: state.entries.clone(),
            clock: state.clock,
        };
        for update in updates {
            staged.apply(update)?;
        }
        *state = staged;
        Ok(updates.len())
    }

    async fn remove(&self, company_id: &str) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state
            .entries
            .remove(company_id)
            .map(|_| ())
            .ok_or_else(|| not_tracked(company_id))
    }

    async fn remove_batch(&self, company_ids: &[String]) -> Result<usize, AppError> {
        let mut state = self.state.write().await;
        Ok(company_ids
            .iter()
            .filter(|id| state.entries.remove(id.as_str()).is_some())
            .count())
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineEntry>, AppError> {
        let state = self.state.read().await;
        let mut tracked: Vec<&Tracked> = state.entries.values().collect();
        tracked.sort_by(|a, b| b.touched.cmp(&a.touched));
        Ok(tracked
            .into_iter()
            .take(limit.max(1))
            .map(|t| t.entry.clone())
            .collect())
    }
}
