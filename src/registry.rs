//! Read access to the company registry.

use crate::config::MAX_RESULT_LIMIT;
use crate::errors::{AppError, ResultExt};
use crate::models::{Address, BranchRole, CityCount, IndustryCode, Lead, QueryWarning};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;

/// Region value meaning "the whole country".
pub const ALL_REGIONS: &str = "BRASIL";
/// City value meaning "every city of the region".
pub const ALL_CITIES: &str = "TODAS";

/// Registration status code of an active establishment.
const ACTIVE_STATUS: &str = "02";

/// Filter for an industry-code search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadQuery {
    pub codes: Vec<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub headquarters_only: bool,
    pub limit: usize,
}

impl LeadQuery {
    pub fn new(codes: Vec<String>) -> Self {
        Self {
            codes,
            region: None,
            city: None,
            headquarters_only: false,
            limit: MAX_RESULT_LIMIT,
        }
    }

    pub fn region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn city(mut self, city: Option<String>) -> Self {
        self.city = city;
        self
    }

    pub fn headquarters_only(mut self, headquarters_only: bool) -> Self {
        self.headquarters_only = headquarters_only;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Validates and canonicalizes the filter.
    ///
    /// Codes lose their separators and duplicates, the `BRASIL`/`TODAS`
    /// sentinels become "no filter", and the limit is clamped to the ceiling.
    pub fn normalized(self) -> Result<Self, AppError> {
        let mut codes: Vec<String> = Vec::with_capacity(self.codes.len());
        for code in self.codes.iter().map(|c| normalize_industry_code(c)) {
            if !code.is_empty() && !codes.contains(&code) {
                codes.push(code);
            }
        }
        if codes.is_empty() {
            return Err(AppError::BadRequest(
                "At least one industry code is required".to_string(),
            ));
        }

        let region = self
            .region
            .map(|r| r.trim().to_uppercase())
            .filter(|r| !r.is_empty() && r != ALL_REGIONS);
        let city = self
            .city
            .map(|c| collapse_whitespace(&c))
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(ALL_CITIES));

        Ok(Self {
            codes,
            region,
            city,
            headquarters_only: self.headquarters_only,
            limit: self.limit.clamp(1, MAX_RESULT_LIMIT),
        })
    }
}

/// Leads returned by a search plus any non-fatal conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadSearch {
    pub leads: Vec<Lead>,
    pub warnings: Vec<QueryWarning>,
}

/// Query contract of the company registry.
#[async_trait]
pub trait RegistryQuery: Send + Sync {
    /// Active establishments whose primary activity is in `query.codes`.
    async fn search_by_codes(&self, query: &LeadQuery) -> Result<LeadSearch, AppError>;

    /// Industry codes whose description contains `term` (case-insensitive).
    async fn search_text(&self, term: &str, limit: usize) -> Result<Vec<IndustryCode>, AppError>;

    /// Distinct city names of a region, or of the whole registry when `None`.
    async fn list_cities(&self, region: Option<&str>) -> Result<Vec<String>, AppError>;

    /// Cities ranked by their number of matching active establishments.
    async fn top_cities(
        &self,
        codes: &[String],
        region: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CityCount>, AppError>;
}

/// Strips separators from an industry code ("4711-3/02" → "4711302").
pub fn normalize_industry_code(code: &str) -> String {
    code.chars().filter(|c| c.is_alphanumeric()).collect()
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keeps one lead per base identifier.
///
/// The representative is the first lead with the best
/// (headquarters, visitable, has phone, has email) tuple; output order follows
/// the first appearance of each base identifier.
pub fn dedupe_by_base_id(leads: Vec<Lead>) -> Vec<Lead> {
    fn priority(lead: &Lead) -> (bool, bool, bool, bool) {
        (
            lead.is_headquarters(),
            lead.is_visitable(),
            lead.primary_phone.is_some(),
            lead.email.is_some(),
        )
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Lead> = Vec::new();
    let before = leads.len();

    for lead in leads {
        match index.get(&lead.base_id) {
            Some(&slot) => {
                if priority(&lead) > priority(&kept[slot]) {
                    kept[slot] = lead;
                }
            }
            None => {
                index.insert(lead.base_id.clone(), kept.len());
                kept.push(lead);
            }
        }
    }

    if kept.len() < before {
        tracing::debug!("Deduplicated {} leads into {}", before, kept.len());
    }
    kept
}

/// Parses a registry activity-start date (`YYYYMMDD` or ISO); malformed values become `None`.
pub fn parse_activity_start(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() == 8 && raw.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(raw, "%Y%m%d").ok();
    }
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

fn join_phone(area: Option<&str>, number: Option<&str>) -> Option<String> {
    let area = area.map(str::trim).filter(|s| !s.is_empty())?;
    let number = number.map(str::trim).filter(|s| !s.is_empty())?;
    Some(format!("{} {}", area, number))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// One row of the establishment projection.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct EstablishmentRow {
    pub company_id: String,
    pub base_id: String,
    pub trade_name: Option<String>,
    pub corporate_name: Option<String>,
    pub activity_code: String,
    pub activity_description: Option<String>,
    pub secondary_codes: Option<String>,
    pub branch_flag: Option<String>,
    pub street: Option<String>,
    pub number: Option<String>,
    pub neighborhood: Option<String>,
    pub postal_code: Option<String>,
    pub complement: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub area_code_1: Option<String>,
    pub phone_1: Option<String>,
    pub area_code_2: Option<String>,
    pub phone_2: Option<String>,
    pub email: Option<String>,
    pub activity_start: Option<String>,
}

impl From<EstablishmentRow> for Lead {
    fn from(row: EstablishmentRow) -> Self {
        let city = row.city.clone().unwrap_or_default();
        let region = row.region.clone().unwrap_or_default();

        let address = non_empty(row.street).map(|street| Address {
            street,
            number: row.number.unwrap_or_default().trim().to_string(),
            neighborhood: row.neighborhood.unwrap_or_default().trim().to_string(),
            postal_code: row.postal_code.unwrap_or_default().trim().to_string(),
            complement: non_empty(row.complement),
            city: city.clone(),
            region: region.clone(),
        });

        let activity_start = row.activity_start.as_deref().and_then(|raw| {
            let parsed = parse_activity_start(raw);
            if parsed.is_none() && !raw.trim().is_empty() {
                tracing::debug!("Ignoring malformed activity start '{}' of {}", raw, row.company_id);
            }
            parsed
        });

        Lead {
            primary_phone: join_phone(row.area_code_1.as_deref(), row.phone_1.as_deref()),
            secondary_phone: join_phone(row.area_code_2.as_deref(), row.phone_2.as_deref()),
            email: non_empty(row.email),
            secondary_activity_codes: row
                .secondary_codes
                .as_deref()
                .map(|codes| {
                    codes
                        .split(',')
                        .map(normalize_industry_code)
                        .filter(|c| !c.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            branch_role: BranchRole::from_registry_flag(row.branch_flag.as_deref().unwrap_or("")),
            trade_name: row.trade_name.unwrap_or_default().trim().to_string(),
            corporate_name: non_empty(row.corporate_name),
            activity_description: row.activity_description.unwrap_or_default(),
            activity_code: row.activity_code,
            company_id: row.company_id,
            base_id: row.base_id,
            address,
            city,
            region,
            activity_start,
        }
    }
}

/// Postgres-backed registry over the `estabelecimentos`, `municipios` and
/// `cnaes` tables.
#[derive(Clone)]
pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolves a city name to its locality code, ignoring case and spacing.
    async fn resolve_city(&self, city: &str) -> Result<Option<String>, AppError> {
        sqlx::query_scalar::<_, String>(
            "SELECT codigo FROM municipios WHERE UPPER(TRIM(descricao)) = UPPER($1) LIMIT 1",
        )
        .bind(collapse_whitespace(city))
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("resolving city '{}'", city))
    }
}

#[async_trait]
impl RegistryQuery for PgRegistry {
    async fn search_by_codes(&self, query: &LeadQuery) -> Result<LeadSearch, AppError> {
        let query = query.clone().normalized()?;
        let mut warnings = Vec::new();

        let city_code = match &query.city {
            Some(city) => {
                let code = self.resolve_city(city).await?;
                if code.is_none() {
                    tracing::warn!(
                        "City '{}' not found in locality table, searching the whole region",
                        city
                    );
                    warnings.push(QueryWarning::CityNotFound { city: city.clone() });
                }
                code
            }
            None => None,
        };

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"SELECT
                e.cnpj_basico || e.cnpj_ordem || e.cnpj_dv AS company_id,
                e.cnpj_basico AS base_id,
                e.nome_fantasia AS trade_name,
                e.razao_social AS corporate_name,
                e.cnae_principal AS activity_code,
                c.descricao AS activity_description,
                e.cnae_secundaria AS secondary_codes,
                e.matriz_filial AS branch_flag,
                e.logradouro AS street,
                e.numero AS number,
                e.bairro AS neighborhood,
                e.cep AS postal_code,
                e.complemento AS complement,
                m.descricao AS city,
                e.uf AS region,
                e.ddd_1 AS area_code_1,
                e.telefone_1 AS phone_1,
                e.ddd_2 AS area_code_2,
                e.telefone_2 AS phone_2,
                e.correio_eletronico AS email,
                e.data_inicio_atividade::text AS activity_start
            FROM estabelecimentos e
            LEFT JOIN municipios m ON e.municipio = m.codigo
            LEFT JOIN cnaes c ON e.cnae_principal = c.codigo
            WHERE e.cnae_principal = ANY("#,
        );
        builder.push_bind(query.codes.clone());
        builder.push(") AND e.situacao_cadastral = ");
        builder.push_bind(ACTIVE_STATUS);

        if let Some(region) = &query.region {
            builder.push(" AND e.uf = ");
            builder.push_bind(region.clone());
        }
        if let Some(code) = city_code {
            builder.push(" AND e.municipio = ");
            builder.push_bind(code);
        }
        if query.headquarters_only {
            builder.push(" AND e.matriz_filial = '1'");
        }

        // One extra row tells a full page from a truncated one.
        builder.push(" LIMIT ");
        builder.push_bind((query.limit + 1) as i64);

        let rows: Vec<EstablishmentRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .context("searching establishments by industry code")?;

        let mut leads: Vec<Lead> = rows.into_iter().map(Lead::from).collect();
        if leads.len() > query.limit {
            leads.truncate(query.limit);
            tracing::warn!("Registry search truncated at {} rows", query.limit);
            warnings.push(QueryWarning::Truncated { limit: query.limit });
        }

        tracing::info!(
            "Registry search for {} codes (region: {:?}, city: {:?}) returned {} leads",
            query.codes.len(),
            query.region,
            query.city,
            leads.len()
        );
        Ok(LeadSearch { leads, warnings })
    }

    async fn search_text(&self, term: &str, limit: usize) -> Result<Vec<IndustryCode>, AppError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        let escaped = term
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");

        let codes = sqlx::query_as::<_, IndustryCode>(
            "SELECT codigo AS code, descricao AS description FROM cnaes WHERE descricao ILIKE $1 ORDER BY codigo LIMIT $2",
        )
        .bind(format!("%{}%", escaped))
        .bind(limit.clamp(1, MAX_RESULT_LIMIT) as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("searching industry codes for '{}'", term))?;

        tracing::debug!("Industry code search '{}' matched {}", term, codes.len());
        Ok(codes)
    }

    async fn list_cities(&self, region: Option<&str>) -> Result<Vec<String>, AppError> {
        let region = region
            .map(|r| r.trim().to_uppercase())
            .filter(|r| !r.is_empty() && r != ALL_REGIONS && r != ALL_CITIES);

        let cities = match region {
            None => {
                sqlx::query_scalar::<_, String>(
                    "SELECT DISTINCT descricao FROM municipios ORDER BY descricao",
                )
                .fetch_all(&self.pool)
                .await
            }
            Some(region) => {
                sqlx::query_scalar::<_, String>(
                    r#"SELECT DISTINCT m.descricao
                    FROM estabelecimentos e
                    JOIN municipios m ON e.municipio = m.codigo
                    WHERE e.uf = $1
                    ORDER BY m.descricao"#,
                )
                .bind(region)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("listing cities")?;

        Ok(cities)
    }

    async fn top_cities(
        &self,
        codes: &[String],
        region: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CityCount>, AppError> {
        let query = LeadQuery::new(codes.to_vec())
            .region(region.map(str::to_string))
            .limit(limit)
            .normalized()?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"SELECT m.descricao AS city, COUNT(*) AS total
            FROM estabelecimentos e
            JOIN municipios m ON e.municipio = m.codigo
            WHERE e.cnae_principal = ANY("#,
        );
        builder.push_bind(query.codes.clone());
        builder.push(") AND e.situacao_cadastral = ");
        builder.push_bind(ACTIVE_STATUS);
        if let Some(region) = &query.region {
            builder.push(" AND e.uf = ");
            builder.push_bind(region.clone());
        }
        builder.push(" GROUP BY m.descricao ORDER BY total DESC, m.descricao LIMIT ");
        builder.push_bind(query.limit as i64);

        let cities: Vec<CityCount> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .context("ranking cities by establishment count")?;

        tracing::debug!("Top cities for {:?}: {}", query.region, cities.len());
        Ok(cities)
    }
}
