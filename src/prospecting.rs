//! Prospecting workflows: registry search, qualification and visit planning.

use crate::errors::AppError;
use crate::models::{
    CityCount, QualifyRequest, QualifyResponse, QueryWarning, RoutePlanRequest,
    RoutePlanResponse, ScoredLead,
};
use crate::registry::{dedupe_by_base_id, LeadQuery, LeadSearch, RegistryQuery};
use crate::routing::{optimize_by_postal_code, plan_navigation, plan_route, NavigationBuilder};
use crate::scoring::{by_segments, visitable_only, with_phone, Scorer};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Per-city search cap when planning visits.
pub const CITY_SEARCH_LIMIT: usize = 2000;
/// Number of cities picked in density mode.
pub const DENSITY_CITY_COUNT: usize = 10;

pub struct ProspectingService {
    registry: Arc<dyn RegistryQuery>,
    scorer: Scorer,
    navigation: NavigationBuilder,
    result_limit: usize,
}

impl ProspectingService {
    pub fn new(
        registry: Arc<dyn RegistryQuery>,
        scorer: Scorer,
        navigation: NavigationBuilder,
        result_limit: usize,
    ) -> Self {
        Self {
            registry,
            scorer,
            navigation,
            result_limit,
        }
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn registry(&self) -> &Arc<dyn RegistryQuery> {
        &self.registry
    }

    /// Explicit codes plus the codes of the named segment presets.
    fn resolve_codes(&self, codes: &[String], segments: &[String]) -> Result<Vec<String>, AppError> {
        let mut all: Vec<String> = codes.to_vec();
        if !segments.is_empty() {
            let expanded = self
                .scorer
                .profile()
                .catalog
                .codes_for(segments)
                .map_err(|unknown| {
                    AppError::BadRequest(format!("Unknown segments: {}", unknown.join(", ")))
                })?;
            all.extend(expanded);
        }
        if all.iter().all(|c| c.trim().is_empty()) {
            return Err(AppError::BadRequest(
                "Provide industry codes or segments".to_string(),
            ));
        }
        Ok(all)
    }

    /// Runs a registry search, turning a registry fault into an empty result
    /// with a warning. Invalid filters still fail.
    async fn search(&self, query: &LeadQuery) -> Result<LeadSearch, AppError> {
        match self.registry.search_by_codes(query).await {
            Ok(mut search) => {
                search.leads = dedupe_by_base_id(search.leads);
                Ok(search)
            }
            Err(e) if e.is_client_error() => Err(e),
            Err(e) => {
                tracing::error!("Registry search failed: {}", e);
                Ok(LeadSearch {
                    leads: Vec::new(),
                    warnings: vec![QueryWarning::RegistryUnavailable {
                        message: e.root().to_string(),
                    }],
                })
            }
        }
    }

    /// Searches, deduplicates and scores leads for a filter.
    pub async fn find_qualified(&self, request: &QualifyRequest) -> Result<QualifyResponse, AppError> {
        let codes = self.resolve_codes(&request.industry_codes, &request.segments)?;
        let query = LeadQuery::new(codes)
            .region(request.region.clone())
            .city(request.city.clone())
            .headquarters_only(request.headquarters_only)
            .limit(request.limit.unwrap_or(self.result_limit).min(self.result_limit))
            .normalized()?;

        let search = self.search(&query).await?;
        let mut leads = self.scorer.qualify(search.leads, request.min_score);
        if request.visitable_only {
            leads = visitable_only(&leads);
        }
        if request.with_phone {
            leads = with_phone(&leads);
        }
        leads = by_segments(&leads, &request.segment_names);

        tracing::info!(
            "Qualified {} leads (min score {})",
            leads.len(),
            request.min_score
        );

        Ok(QualifyResponse {
            total: leads.len(),
            with_email: leads.iter().filter(|l| l.lead.email.is_some()).count(),
            with_phone: leads.iter().filter(|l| l.lead.primary_phone.is_some()).count(),
            contactable: leads.iter().filter(|l| l.lead.is_contactable()).count(),
            visitable: leads.iter().filter(|l| l.lead.is_visitable()).count(),
            leads,
            warnings: search.warnings,
        })
    }

    /// Plans a multi-day visit route over explicit or density-ranked cities.
    pub async fn plan_visits(&self, request: &RoutePlanRequest) -> Result<RoutePlanResponse, AppError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("plan_visits", %request_id);
        self.plan_visits_inner(request, request_id)
            .instrument(span)
            .await
    }

    async fn plan_visits_inner(
        &self,
        request: &RoutePlanRequest,
        request_id: Uuid,
    ) -> Result<RoutePlanResponse, AppError> {
        if request.days == 0 || request.visits_per_day == 0 {
            return Err(AppError::BadRequest(
                "Days and visits per day must be positive".to_string(),
            ));
        }
        let codes = self.resolve_codes(&request.industry_codes, &request.segments)?;
        let base_region = request.base_region.trim().to_uppercase();
        let mut warnings = Vec::new();

        let targets = if request.cities.is_empty() {
            self.densest_cities(&codes, &base_region, &mut warnings).await?
        } else {
            request
                .cities
                .iter()
                .map(|entry| parse_city_entry(entry, &base_region))
                .filter(|(city, _)| !city.is_empty())
                .collect()
        };
        tracing::info!("Planning visits across {} cities", targets.len());

        let mut per_city: Vec<Vec<ScoredLead>> = Vec::with_capacity(targets.len());
        let mut leads_found_by_city = Vec::with_capacity(targets.len());
        for (city, region) in &targets {
            let query = LeadQuery::new(codes.clone())
                .region(Some(region.clone()))
                .city(Some(city.clone()))
                .headquarters_only(request.headquarters_only)
                .limit(CITY_SEARCH_LIMIT)
                .normalized()?;
            let search = self.search(&query).await?;
            warnings.extend(search.warnings);

            let scored = self.scorer.qualify(search.leads, 0);
            leads_found_by_city.push(CityCount {
                city: format!("{} - {}", city, region),
                total: scored.len() as i64,
            });
            per_city.push(scored);
        }

        let capacity = (request.days as usize).saturating_mul(request.visits_per_day as usize);
        let selected = select_for_route(per_city, capacity);

        let mut plan = plan_route(
            &selected,
            request.days,
            request.visits_per_day,
            &request.base_city,
            &base_region,
        )?;
        if request.optimize_by_postal_code {
            plan.days = plan.days.into_iter().map(optimize_by_postal_code).collect();
        }
        let navigation = plan_navigation(&plan, &self.navigation);

        tracing::info!(
            "Route ready: {} visits over {} days",
            plan.total_visits(),
            plan.total_days()
        );

        Ok(RoutePlanResponse {
            request_id: request_id.to_string(),
            total_visits: plan.total_visits(),
            total_days: plan.total_days(),
            mean_score: plan.mean_score(),
            plan,
            navigation,
            leads_found_by_city,
            warnings,
        })
    }

    async fn densest_cities(
        &self,
        codes: &[String],
        region: &str,
        warnings: &mut Vec<QueryWarning>,
    ) -> Result<Vec<(String, String)>, AppError> {
        let region_filter = (!region.is_empty()).then_some(region);
        match self
            .registry
            .top_cities(codes, region_filter, DENSITY_CITY_COUNT)
            .await
        {
            Ok(cities) => {
                if cities.is_empty() {
                    tracing::warn!("No cities with matching leads in region '{}'", region);
                }
                Ok(cities
                    .into_iter()
                    .map(|c| (c.city, region.to_string()))
                    .collect())
            }
            Err(e) if e.is_client_error() => Err(e),
            Err(e) => {
                tracing::error!("City ranking failed: {}", e);
                warnings.push(QueryWarning::RegistryUnavailable {
                    message: e.root().to_string(),
                });
                Ok(Vec::new())
            }
        }
    }
}

/// Splits "City - UF" entries; bare names take the base region.
pub fn parse_city_entry(entry: &str, base_region: &str) -> (String, String) {
    match entry.rsplit_once(" - ") {
        Some((city, region)) if region.trim().len() == 2 => {
            (city.trim().to_string(), region.trim().to_uppercase())
        }
        _ => (entry.trim().to_string(), base_region.to_string()),
    }
}

/// Takes the best lead of every city, then fills the remaining capacity by
/// overall score. Each company and each base identifier appears once.
pub fn select_for_route(per_city: Vec<Vec<ScoredLead>>, capacity: usize) -> Vec<ScoredLead> {
    let mut selected: Vec<ScoredLead> = Vec::new();
    let mut companies: HashSet<String> = HashSet::new();
    let mut bases: HashSet<String> = HashSet::new();

    let mut rest: Vec<ScoredLead> = Vec::new();
    for city in per_city {
        let mut leads = city.into_iter();
        for lead in leads.by_ref() {
            if bases.contains(&lead.lead.base_id) {
                continue;
            }
            companies.insert(lead.lead.company_id.clone());
            bases.insert(lead.lead.base_id.clone());
            selected.push(lead);
            break;
        }
        rest.extend(leads);
    }

    let free = capacity.saturating_sub(selected.len());
    if free > 0 {
        rest.retain(|l| !companies.contains(&l.lead.company_id));
        rest.sort_by(|a, b| b.score.cmp(&a.score));
        for lead in rest {
            if selected.len() >= capacity {
                break;
            }
            if bases.insert(lead.lead.base_id.clone()) {
                selected.push(lead);
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn city_entries() {
        assert_eq!(
            parse_city_entry("Feira de Santana - BA", "SE"),
            ("Feira de Santana".to_string(), "BA".to_string())
        );
        assert_eq!(
            parse_city_entry("Embu-Guaçu", "SP"),
            ("Embu-Guaçu".to_string(), "SP".to_string())
        );
    }
}
