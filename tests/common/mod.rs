//! Shared fixtures: lead builders and an in-memory registry.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use hunter_leads_api::errors::AppError;
use hunter_leads_api::models::{Address, BranchRole, CityCount, IndustryCode, Lead, QueryWarning};
use hunter_leads_api::registry::{normalize_industry_code, LeadQuery, LeadSearch, RegistryQuery};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed reference date so company age never depends on the clock.
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

pub fn address(street: &str, number: &str, neighborhood: &str, cep: &str, city: &str, uf: &str) -> Address {
    Address {
        street: street.to_string(),
        number: number.to_string(),
        neighborhood: neighborhood.to_string(),
        postal_code: cep.to_string(),
        complement: None,
        city: city.to_string(),
        region: uf.to_string(),
    }
}

/// A visitable branch in the given city, with no contact data.
pub fn lead(company_id: &str, city: &str, uf: &str) -> Lead {
    Lead {
        company_id: company_id.to_string(),
        base_id: company_id.chars().take(8).collect(),
        trade_name: format!("Empresa {}", company_id),
        corporate_name: None,
        activity_code: "4711302".to_string(),
        activity_description: "Comércio varejista de mercadorias em geral".to_string(),
        secondary_activity_codes: Vec::new(),
        branch_role: BranchRole::Branch,
        address: Some(address(
            "Rua das Flores",
            "100",
            "Centro",
            "44001-000",
            city,
            uf,
        )),
        city: city.to_string(),
        region: uf.to_string(),
        primary_phone: None,
        secondary_phone: None,
        email: None,
        activity_start: None,
    }
}

pub fn with_base(mut lead: Lead, base_id: &str) -> Lead {
    lead.base_id = base_id.to_string();
    lead
}

pub fn headquarters(mut lead: Lead) -> Lead {
    lead.branch_role = BranchRole::Headquarters;
    lead
}

pub fn without_address(mut lead: Lead) -> Lead {
    lead.address = None;
    lead
}

pub fn with_phone(mut lead: Lead, phone: &str) -> Lead {
    lead.primary_phone = Some(phone.to_string());
    lead
}

pub fn with_email(mut lead: Lead, email: &str) -> Lead {
    lead.email = Some(email.to_string());
    lead
}

pub fn with_code(mut lead: Lead, code: &str) -> Lead {
    lead.activity_code = code.to_string();
    lead
}

pub fn in_neighborhood(mut lead: Lead, neighborhood: &str, cep: &str) -> Lead {
    if let Some(address) = lead.address.as_mut() {
        address.neighborhood = neighborhood.to_string();
        address.postal_code = cep.to_string();
    }
    lead
}

/// Registry over a fixed set of leads, filtering the way the database does.
#[derive(Default)]
pub struct FakeRegistry {
    pub leads: Vec<Lead>,
    pub codes: Vec<IndustryCode>,
    pub failing: bool,
    pub searches: AtomicUsize,
}

impl FakeRegistry {
    pub fn new(leads: Vec<Lead>) -> Self {
        Self {
            leads,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn fault(&self) -> Result<(), AppError> {
        if self.failing {
            Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }

    fn matching<'a>(&'a self, codes: &'a [String], region: Option<&'a str>) -> impl Iterator<Item = &'a Lead> {
        self.leads.iter().filter(move |lead| {
            codes.contains(&normalize_industry_code(&lead.activity_code))
                && region.map_or(true, |r| lead.region.eq_ignore_ascii_case(r))
        })
    }
}

#[async_trait]
impl RegistryQuery for FakeRegistry {
    async fn search_by_codes(&self, query: &LeadQuery) -> Result<LeadSearch, AppError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.fault()?;
        let query = query.clone().normalized()?;
        let mut warnings = Vec::new();

        let known_city = query.city.as_ref().filter(|city| {
            self.leads
                .iter()
                .any(|l| l.city.eq_ignore_ascii_case(city.as_str()))
        });
        if let (Some(city), None) = (&query.city, known_city) {
            warnings.push(QueryWarning::CityNotFound { city: city.clone() });
        }

        let mut leads: Vec<Lead> = self
            .matching(&query.codes, query.region.as_deref())
            .filter(|l| known_city.map_or(true, |c| l.city.eq_ignore_ascii_case(c)))
            .filter(|l| !query.headquarters_only || l.is_headquarters())
            .cloned()
            .collect();

        if leads.len() > query.limit {
            leads.truncate(query.limit);
            warnings.push(QueryWarning::Truncated { limit: query.limit });
        }
        Ok(LeadSearch { leads, warnings })
    }

    async fn search_text(&self, term: &str, limit: usize) -> Result<Vec<IndustryCode>, AppError> {
        self.fault()?;
        let term = term.to_lowercase();
        Ok(self
            .codes
            .iter()
            .filter(|c| c.description.to_lowercase().contains(&term))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_cities(&self, region: Option<&str>) -> Result<Vec<String>, AppError> {
        self.fault()?;
        let mut cities: Vec<String> = self
            .leads
            .iter()
            .filter(|l| region.map_or(true, |r| l.region.eq_ignore_ascii_case(r)))
            .map(|l| l.city.clone())
            .collect();
        cities.sort();
        cities.dedup();
        Ok(cities)
    }

    async fn top_cities(
        &self,
        codes: &[String],
        region: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CityCount>, AppError> {
        self.fault()?;
        let codes: Vec<String> = codes.iter().map(|c| normalize_industry_code(c)).collect();
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for lead in self.matching(&codes, region) {
            *counts.entry(lead.city.clone()).or_default() += 1;
        }
        let mut ranked: Vec<CityCount> = counts
            .into_iter()
            .map(|(city, total)| CityCount { city, total })
            .collect();
        ranked.sort_by(|a, b| b.total.cmp(&a.total));
        ranked.truncate(limit);
        Ok(ranked)
    }
}
