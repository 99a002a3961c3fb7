//! Spreadsheet-friendly CSV exports of qualified leads and route plans.

use crate::errors::AppError;
use crate::models::{RoutePlan, ScoredLead};
use crate::routing::{plan_navigation, NavigationBuilder};

/// Content type of every export.
pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

const LEAD_HEADERS: [&str; 24] = [
    "Nome Fantasia",
    "Razão Social",
    "CNPJ",
    "CNPJ Básico",
    "Matriz/Filial",
    "CNAE",
    "Descrição CNAE",
    "Telefone 1",
    "Telefone 2",
    "Telefone E.164",
    "E-mail",
    "Logradouro",
    "Número",
    "Complemento",
    "Bairro",
    "CEP",
    "Cidade",
    "UF",
    "Data Início Atividade",
    "Anos de Atividade",
    "Link Mapa",
    "Score",
    "Segmento",
    "Razões Score",
];

const ROUTE_HEADERS: [&str; 13] = [
    "Dia",
    "Ordem",
    "Empresa",
    "CNPJ",
    "Endereço",
    "Cidade",
    "UF",
    "Telefone",
    "Email",
    "Score",
    "Segmento",
    "Link Mapa",
    "Observações",
];

const SUMMARY_HEADERS: [&str; 4] = ["Dia", "Total Visitas", "Score Médio", "Link Rota Dia"];

#[derive(Debug, Clone)]
pub struct CsvExporter {
    maps_search_base: String,
    navigation: NavigationBuilder,
}

impl CsvExporter {
    pub fn new(maps_search_base: impl Into<String>, navigation: NavigationBuilder) -> Self {
        Self {
            maps_search_base: maps_search_base.into(),
            navigation,
        }
    }

    fn map_link(&self, lead: &ScoredLead) -> String {
        lead.lead
            .address
            .as_ref()
            .map(|a| a.map_search_url(&self.maps_search_base))
            .unwrap_or_default()
    }

    /// One row per lead, with score explanation.
    pub fn leads_csv(&self, leads: &[ScoredLead]) -> Result<Vec<u8>, AppError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(LEAD_HEADERS)?;

        for scored in leads {
            let lead = &scored.lead;
            let address = lead.address.as_ref();
            let part = |value: Option<&String>| value.cloned().unwrap_or_default();

            writer.write_record([
                lead.trade_name.clone(),
                lead.corporate_name.clone().unwrap_or_default(),
                lead.company_id.clone(),
                lead.base_id.clone(),
                lead.branch_role.label().to_string(),
                lead.activity_code.clone(),
                lead.activity_description.clone(),
                lead.primary_phone.clone().unwrap_or_default(),
                lead.secondary_phone.clone().unwrap_or_default(),
                lead.primary_phone_e164().unwrap_or_default(),
                lead.email.clone().unwrap_or_default(),
                part(address.map(|a| &a.street)),
                part(address.map(|a| &a.number)),
                address
                    .and_then(|a| a.complement.clone())
                    .unwrap_or_default(),
                part(address.map(|a| &a.neighborhood)),
                part(address.map(|a| &a.postal_code)),
                lead.city.clone(),
                lead.region.clone(),
                lead.activity_start
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                lead.years_active().to_string(),
                self.map_link(scored),
                scored.score.to_string(),
                scored.segment.clone().unwrap_or_default(),
                scored.reasons.join(" | "),
            ])?;
        }

        finish(writer, "leads")
    }

    /// One row per visit, in day and visiting order.
    pub fn route_csv(&self, plan: &RoutePlan, include_links: bool) -> Result<Vec<u8>, AppError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(ROUTE_HEADERS)?;

        for day in &plan.days {
            for stop in &day.stops {
                let lead = &stop.lead.lead;
                writer.write_record([
                    day.day.to_string(),
                    stop.order.to_string(),
                    lead.trade_name.clone(),
                    lead.company_id.clone(),
                    stop.display_address(),
                    lead.city.clone(),
                    lead.region.clone(),
                    lead.primary_phone.clone().unwrap_or_default(),
                    lead.email.clone().unwrap_or_default(),
                    stop.lead.score.to_string(),
                    stop.lead.segment.clone().unwrap_or_default(),
                    if include_links {
                        self.map_link(&stop.lead)
                    } else {
                        String::new()
                    },
                    stop.note.clone().unwrap_or_default(),
                ])?;
            }
        }

        finish(writer, "route")
    }

    /// One row per day with its navigation link.
    pub fn route_summary_csv(
        &self,
        plan: &RoutePlan,
        include_links: bool,
    ) -> Result<Vec<u8>, AppError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(SUMMARY_HEADERS)?;

        for day in plan_navigation(plan, &self.navigation) {
            writer.write_record([
                day.day.to_string(),
                day.visits.to_string(),
                format!("{:.1}", day.mean_score),
                if include_links {
                    day.url.unwrap_or_default()
                } else {
                    String::new()
                },
            ])?;
        }

        finish(writer, "route summary")
    }
}

fn finish(writer: csv::Writer<Vec<u8>>, what: &str) -> Result<Vec<u8>, AppError> {
    writer
        .into_inner()
        .map_err(|e| AppError::InternalError(format!("Failed to flush {} export: {}", what, e)))
}
