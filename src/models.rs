use crate::pipeline::{LeadStatus, PipelineUpdate};
use bigdecimal::BigDecimal;
use chrono::{Datelike, NaiveDate, Utc};
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use serde::{Deserialize, Serialize};

// ============ Domain Models ============

/// Postal address of an establishment, as recorded in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Street name (logradouro).
    pub street: String,
    /// House number; may be a placeholder such as "S/N".
    pub number: String,
    /// Neighborhood (bairro).
    pub neighborhood: String,
    /// Postal code (CEP), digits with optional punctuation.
    pub postal_code: String,
    /// Complement (suite, block, etc.).
    pub complement: Option<String>,
    /// City name.
    pub city: String,
    /// Two-letter region code (UF).
    pub region: String,
}

impl Address {
    /// An address is complete when street, number and postal code are all present.
    pub fn is_complete(&self) -> bool {
        !self.street.trim().is_empty()
            && !self.number.trim().is_empty()
            && !self.postal_code.trim().is_empty()
    }

    /// Single-line representation for display and export.
    pub fn formatted(&self) -> String {
        let mut parts = vec![self.street.trim().to_string()];
        if !self.number.trim().is_empty() {
            parts.push(format!("nº {}", self.number.trim()));
        }
        if let Some(complement) = self.complement.as_deref().map(str::trim) {
            if !complement.is_empty() {
                parts.push(complement.to_string());
            }
        }
        if !self.neighborhood.trim().is_empty() {
            parts.push(format!("- {}", self.neighborhood.trim()));
        }
        if !self.postal_code.trim().is_empty() {
            parts.push(format!("- CEP {}", self.postal_code.trim()));
        }
        parts.join(" ")
    }

    /// Comma-joined query string for map search providers.
    pub fn maps_query(&self) -> String {
        [
            &self.street,
            &self.number,
            &self.neighborhood,
            &self.city,
            &self.region,
            &self.postal_code,
        ]
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }

    /// Map search link for this address.
    pub fn map_search_url(&self, search_base: &str) -> String {
        let query: String = url::form_urlencoded::byte_serialize(self.maps_query().as_bytes())
            .collect();
        format!("{}?api=1&query={}", search_base, query)
    }

    /// First five digits of the postal code (CEP prefix).
    pub fn postal_prefix(&self) -> String {
        self.postal_code
            .chars()
            .filter(|c| c.is_ascii_digit())
            .take(5)
            .collect()
    }
}

/// Legal role of an establishment within its company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchRole {
    Headquarters,
    Branch,
}

impl BranchRole {
    /// Maps the registry flag ("1" = headquarters) to a role.
    pub fn from_registry_flag(flag: &str) -> Self {
        if flag.trim() == "1" {
            BranchRole::Headquarters
        } else {
            BranchRole::Branch
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BranchRole::Headquarters => "MATRIZ",
            BranchRole::Branch => "FILIAL",
        }
    }
}

/// A prospective company establishment, projected from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    /// Full company identifier (CNPJ, 14 digits).
    pub company_id: String,
    /// Base identifier shared by headquarters and branches (first 8 digits).
    pub base_id: String,
    /// Trade name (nome fantasia).
    pub trade_name: String,
    /// Legal name (razão social).
    pub corporate_name: Option<String>,
    /// Primary activity code (CNAE).
    pub activity_code: String,
    /// Description of the primary activity code.
    pub activity_description: String,
    #[serde(default)]
    pub secondary_activity_codes: Vec<String>,
    pub branch_role: BranchRole,
    pub address: Option<Address>,
    pub city: String,
    pub region: String,
    pub primary_phone: Option<String>,
    pub secondary_phone: Option<String>,
    pub email: Option<String>,
    pub activity_start: Option<NaiveDate>,
}

impl Lead {
    /// A lead is visitable when it has a complete address.
    pub fn is_visitable(&self) -> bool {
        self.address.as_ref().is_some_and(Address::is_complete)
    }

    /// A lead is contactable when it has a primary phone or an email.
    pub fn is_contactable(&self) -> bool {
        self.primary_phone.is_some() || self.email.is_some()
    }

    pub fn is_headquarters(&self) -> bool {
        self.branch_role == BranchRole::Headquarters
    }

    /// Whole calendar years between the activity start and `today` (0 if unknown).
    pub fn years_active_at(&self, today: NaiveDate) -> i32 {
        self.activity_start
            .map(|start| (today.year() - start.year()).max(0))
            .unwrap_or(0)
    }

    pub fn years_active(&self) -> i32 {
        self.years_active_at(Utc::now().date_naive())
    }

    /// Primary phone in E.164 form, when it parses as a valid Brazilian number.
    pub fn primary_phone_e164(&self) -> Option<String> {
        let raw = self.primary_phone.as_deref()?;
        let number = phonenumber::parse(Some(CountryId::BR), raw).ok()?;
        if phonenumber::is_valid(&number) {
            Some(number.format().mode(Mode::E164).to_string())
        } else {
            tracing::debug!("Phone '{}' of {} is not a valid BR number", raw, self.company_id);
            None
        }
    }
}

/// A lead with its qualification score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredLead {
    #[serde(flatten)]
    pub lead: Lead,
    pub score: i32,
    /// Human-readable explanation of each rule that fired, in rule order.
    pub reasons: Vec<String>,
    /// Name of the matched segment, if any.
    pub segment: Option<String>,
}

impl ScoredLead {
    /// Score threshold for a lead to count as qualified.
    pub const QUALIFIED_THRESHOLD: i32 = 50;

    pub fn qualified(&self) -> bool {
        self.score >= Self::QUALIFIED_THRESHOLD
    }
}

// ============ Route Models ============

/// One visit in a day plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub lead: ScoredLead,
    /// 1-based position within the day.
    pub order: u32,
    pub day: u32,
    pub note: Option<String>,
}

impl RouteStop {
    pub fn display_address(&self) -> String {
        match &self.lead.lead.address {
            Some(address) => address.formatted(),
            None => format!("{} - {}", self.lead.lead.city, self.lead.lead.region),
        }
    }
}

/// Visits assigned to a single day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDayPlan {
    pub day: u32,
    pub stops: Vec<RouteStop>,
    pub base_city: String,
}

impl RouteDayPlan {
    pub fn visit_count(&self) -> usize {
        self.stops.len()
    }

    pub fn mean_score(&self) -> f64 {
        if self.stops.is_empty() {
            return 0.0;
        }
        let total: i64 = self.stops.iter().map(|s| i64::from(s.lead.score)).sum();
        total as f64 / self.stops.len() as f64
    }

    pub fn leads(&self) -> impl Iterator<Item = &ScoredLead> {
        self.stops.iter().map(|s| &s.lead)
    }
}

/// A multi-day visit schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub days: Vec<RouteDayPlan>,
    pub base_city: String,
    pub base_region: String,
}

impl RoutePlan {
    pub fn empty(base_city: &str, base_region: &str) -> Self {
        Self {
            days: Vec::new(),
            base_city: base_city.to_string(),
            base_region: base_region.to_string(),
        }
    }

    pub fn total_visits(&self) -> usize {
        self.days.iter().map(RouteDayPlan::visit_count).sum()
    }

    pub fn total_days(&self) -> usize {
        self.days.len()
    }

    /// Visit-count-weighted average of the day means.
    pub fn mean_score(&self) -> f64 {
        let visits = self.total_visits();
        if visits == 0 {
            return 0.0;
        }
        let weighted: f64 = self
            .days
            .iter()
            .map(|d| d.mean_score() * d.visit_count() as f64)
            .sum();
        weighted / visits as f64
    }

    /// Origin label used for navigation links ("City, UF").
    pub fn origin_label(&self) -> String {
        match (self.base_city.trim(), self.base_region.trim()) {
            ("", "") => String::new(),
            (city, "") => city.to_string(),
            ("", region) => region.to_string(),
            (city, region) => format!("{}, {}", city, region),
        }
    }
}

// ============ Registry Models ============

/// Industry activity code with its description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IndustryCode {
    pub code: String,
    pub description: String,
}

/// City with its count of matching active establishments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CityCount {
    pub city: String,
    pub total: i64,
}

/// Non-fatal conditions observed while answering a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryWarning {
    /// The city name did not resolve; results cover the whole region instead.
    CityNotFound { city: String },
    /// More rows matched than the cap allows; the result was truncated.
    Truncated { limit: usize },
    /// The registry could not be queried; the result is empty because of a fault.
    RegistryUnavailable { message: String },
}

// ============ API Request/Response Models ============

/// Filter for qualifying leads straight from the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct QualifyRequest {
    #[serde(default)]
    pub industry_codes: Vec<String>,
    /// Segment preset keys expanded into industry codes.
    #[serde(default)]
    pub segments: Vec<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    #[serde(default)]
    pub headquarters_only: bool,
    pub limit: Option<usize>,
    #[serde(default)]
    pub min_score: i32,
    /// Keep only leads with a complete address.
    #[serde(default)]
    pub visitable_only: bool,
    /// Keep only leads with a primary phone.
    #[serde(default)]
    pub with_phone: bool,
    /// Keep only leads whose matched segment name is listed.
    #[serde(default)]
    pub segment_names: Vec<String>,
}

/// Response of lead qualification.
#[derive(Debug, Clone, Serialize)]
pub struct QualifyResponse {
    pub total: usize,
    pub with_email: usize,
    pub with_phone: usize,
    pub contactable: usize,
    pub visitable: usize,
    pub leads: Vec<ScoredLead>,
    pub warnings: Vec<QueryWarning>,
}

/// Request for planning a multi-day visit route.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutePlanRequest {
    pub base_city: String,
    pub base_region: String,
    pub days: u32,
    pub visits_per_day: u32,
    #[serde(default)]
    pub industry_codes: Vec<String>,
    #[serde(default)]
    pub segments: Vec<String>,
    /// Cities to cover; empty means pick the densest cities of the region.
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub headquarters_only: bool,
    /// Reorder each day's stops by postal code.
    #[serde(default)]
    pub optimize_by_postal_code: bool,
}

/// Navigation link for one day.
#[derive(Debug, Clone, Serialize)]
pub struct DayNavigation {
    pub day: u32,
    pub visits: usize,
    pub mean_score: f64,
    /// Single link; waypoints past the provider limit are dropped.
    pub url: Option<String>,
    /// Full multi-leg split, present only when the single link dropped stops.
    pub legs: Vec<String>,
}

/// Response of route planning.
#[derive(Debug, Clone, Serialize)]
pub struct RoutePlanResponse {
    pub request_id: String,
    pub total_visits: usize,
    pub total_days: usize,
    pub mean_score: f64,
    pub plan: RoutePlan,
    pub navigation: Vec<DayNavigation>,
    pub leads_found_by_city: Vec<CityCount>,
    pub warnings: Vec<QueryWarning>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndustryCodeQuery {
    pub term: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CityQuery {
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteExportRequest {
    pub plan: RoutePlan,
    #[serde(default = "default_true")]
    pub include_links: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadsExportRequest {
    pub leads: Vec<ScoredLead>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteGeometryRequest {
    pub plan: RoutePlan,
}

// ============ Pipeline API Models ============

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineListQuery {
    pub limit: Option<usize>,
}

/// Company identifiers to add to or remove from the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyIdsRequest {
    pub company_ids: Vec<String>,
}

/// Partial update of one pipeline entry; absent fields are left unchanged.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelinePatchRequest {
    pub status: Option<LeadStatus>,
    pub value: Option<BigDecimal>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineBatchRequest {
    pub updates: Vec<PipelineUpdate>,
}

/// Number of pipeline entries affected by a write.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineWriteResponse {
    pub affected: usize,
}
