//! Multi-day visit planning and navigation links.
//!
//! Planning is a density heuristic, not a shortest-path solver: leads are
//! bucketed by locality, buckets are ranked by mean score then size, and the
//! flattened sequence fills days in order.

use crate::errors::AppError;
use crate::models::{
    Address, DayNavigation, RouteDayPlan, RoutePlan, RouteStop, ScoredLead,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Waypoint limit of the navigation link provider.
pub const MAX_WAYPOINTS: usize = 9;

/// Sanitized addresses this short or shorter carry no navigable information.
const MIN_ADDRESS_LEN: usize = 5;

/// Partitions scored leads into a day-by-day visit plan.
///
/// Non-visitable leads are skipped. Days that receive no visits are not
/// included in the plan.
pub fn plan_route(
    leads: &[ScoredLead],
    num_days: u32,
    visits_per_day: u32,
    base_city: &str,
    base_region: &str,
) -> Result<RoutePlan, AppError> {
    if num_days == 0 {
        return Err(AppError::BadRequest(
            "Number of route days must be positive".to_string(),
        ));
    }
    if visits_per_day == 0 {
        return Err(AppError::BadRequest(
            "Visits per day must be positive".to_string(),
        ));
    }

    let visitable: Vec<&ScoredLead> = leads.iter().filter(|l| l.lead.is_visitable()).collect();
    if visitable.is_empty() {
        tracing::info!("No visitable leads, returning empty route plan");
        return Ok(RoutePlan::empty(base_city, base_region));
    }

    let ordered = prioritize_by_locality(visitable);
    let per_day = visits_per_day as usize;

    let days: Vec<RouteDayPlan> = ordered
        .chunks(per_day)
        .take(num_days as usize)
        .zip(1u32..)
        .map(|(chunk, day)| RouteDayPlan {
            day,
            stops: chunk
                .iter()
                .zip(1u32..)
                .map(|(lead, order)| RouteStop {
                    lead: (*lead).clone(),
                    order,
                    day,
                    note: None,
                })
                .collect(),
            base_city: base_city.to_string(),
        })
        .collect();

    let plan = RoutePlan {
        days,
        base_city: base_city.to_string(),
        base_region: base_region.to_string(),
    };
    tracing::info!(
        "Planned {} visits over {} days from {} ({} visitable leads offered)",
        plan.total_visits(),
        plan.total_days(),
        plan.origin_label(),
        ordered.len()
    );
    Ok(plan)
}

/// Locality bucket: city, neighborhood and postal code prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LocalityKey {
    city: String,
    neighborhood: String,
    postal_prefix: String,
}

impl LocalityKey {
    fn of(lead: &ScoredLead) -> Self {
        let (neighborhood, postal_prefix) = match &lead.lead.address {
            Some(address) => (normalize_label(&address.neighborhood), address.postal_prefix()),
            None => (String::new(), String::new()),
        };
        Self {
            city: normalize_label(&lead.lead.city),
            neighborhood,
            postal_prefix,
        }
    }
}

fn normalize_label(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Groups by locality, orders groups by (mean score, size) descending and
/// flattens them with each group sorted by score. All sorts are stable, so
/// ties keep first-appearance order.
fn prioritize_by_locality(leads: Vec<&ScoredLead>) -> Vec<&ScoredLead> {
    let mut index: HashMap<LocalityKey, usize> = HashMap::new();
    let mut groups: Vec<Vec<&ScoredLead>> = Vec::new();

    for lead in leads {
        let key = LocalityKey::of(lead);
        match index.get(&key) {
            Some(&slot) => groups[slot].push(lead),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![lead]);
            }
        }
    }

    let mut ranked: Vec<(f64, usize, Vec<&ScoredLead>)> = groups
        .into_iter()
        .map(|group| {
            let total: i64 = group.iter().map(|l| i64::from(l.score)).sum();
            let mean = total as f64 / group.len() as f64;
            (mean, group.len(), group)
        })
        .collect();

    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));

    ranked
        .into_iter()
        .flat_map(|(_, _, mut group)| {
            group.sort_by(|a, b| b.score.cmp(&a.score));
            group
        })
        .collect()
}

/// Reorders a day's stops by postal code and renumbers them from 1.
///
/// A cheap proximity pass: neighbouring postal codes usually mean
/// neighbouring streets.
pub fn optimize_by_postal_code(day: RouteDayPlan) -> RouteDayPlan {
    if day.stops.len() <= 1 {
        return day;
    }
    let mut stops = day.stops;
    stops.sort_by_key(|stop| {
        stop.lead
            .lead
            .address
            .as_ref()
            .map(|a| a.postal_code.chars().filter(|c| c.is_ascii_digit()).collect::<String>())
            .unwrap_or_default()
    });
    for (stop, order) in stops.iter_mut().zip(1u32..) {
        stop.order = order;
    }
    RouteDayPlan {
        day: day.day,
        stops,
        base_city: day.base_city,
    }
}

// ============ Address sanitization ============

fn rural_markers() -> &'static Regex {
    static RURAL: OnceLock<Regex> = OnceLock::new();
    RURAL.get_or_init(|| {
        Regex::new(
            r"(?i)\b(FAZENDA|FAZ|S[IÍ]TIO|CH[AÁ]CARA|ESTRADA|RODOVIA|ROD|KM|POVOADO|ZONA RURAL|ASSENTAMENTO|BR[- ]?\d{2,3}|[A-Z]{2}-\d{2,3})\b",
        )
        .expect("rural marker pattern is valid")
    })
}

/// True for house numbers that carry no location ("S/N", "0", "999", punctuation).
pub fn is_placeholder_number(number: &str) -> bool {
    let trimmed = number.trim();
    if !trimmed.chars().any(|c| c.is_alphanumeric()) {
        return true;
    }
    let compact: String = trimmed
        .to_uppercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    if compact.chars().all(|c| c == '0') {
        return true;
    }
    if compact.len() >= 3 && compact.chars().all(|c| c == '9') {
        return true;
    }
    matches!(
        compact.as_str(),
        "SN" | "SNº" | "SNO" | "SEMNUMERO" | "SEMNÚMERO" | "SNR"
    )
}

/// True when the street name points at a rural location.
pub fn is_rural_street(street: &str) -> bool {
    rural_markers().is_match(street)
}

/// Capitalizes the first letter of every word and lowercases the rest.
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous_is_letter = false;
    for c in value.trim().chars() {
        if c.is_alphabetic() {
            if previous_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(c);
            previous_is_letter = false;
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Produces a navigation-friendly address line, or `None` when nothing usable
/// remains (5 characters or fewer).
pub fn sanitize_address(address: &Address) -> Option<String> {
    let street = title_case(&address.street);
    let number = if is_placeholder_number(&address.number) || is_rural_street(&address.street) {
        String::new()
    } else {
        address.number.trim().to_string()
    };
    let neighborhood = title_case(&address.neighborhood);
    let city = title_case(&address.city);
    let region = address.region.trim().to_uppercase();
    let locality = match (city.is_empty(), region.is_empty()) {
        (false, false) => format!("{} - {}", city, region),
        (false, true) => city,
        (true, false) => region,
        (true, true) => String::new(),
    };

    let line = [street, number, neighborhood, locality]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    if line.chars().count() <= MIN_ADDRESS_LEN {
        None
    } else {
        Some(line)
    }
}

/// Sanitized address of a lead, filling city/region from the lead when the
/// address lacks them.
pub fn sanitize_lead_address(lead: &ScoredLead) -> Option<String> {
    let mut address = lead.lead.address.clone()?;
    if address.city.trim().is_empty() {
        address.city = lead.lead.city.clone();
    }
    if address.region.trim().is_empty() {
        address.region = lead.lead.region.clone();
    }
    sanitize_address(&address)
}

// ============ Navigation links ============

/// A multi-stop driving link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationLink {
    pub url: String,
    pub origin: String,
    pub destination: String,
    pub waypoints: Vec<String>,
    /// Waypoints that did not fit into this link.
    pub dropped_waypoints: usize,
}

/// Builds driving links against a directions endpoint.
#[derive(Debug, Clone)]
pub struct NavigationBuilder {
    base_url: String,
    max_waypoints: usize,
}

impl NavigationBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            max_waypoints: MAX_WAYPOINTS,
        }
    }

    /// Single link visiting the leads in order: the last surviving address is
    /// the destination, up to nine earlier ones become waypoints and the rest
    /// are dropped. `None` when no address survives sanitization.
    pub fn link(&self, origin: &str, leads: &[ScoredLead]) -> Option<NavigationLink> {
        let mut addresses = surviving_addresses(leads);
        let destination = addresses.pop()?;
        let dropped = addresses.len().saturating_sub(self.max_waypoints);
        addresses.truncate(self.max_waypoints);
        if dropped > 0 {
            tracing::warn!(
                "Navigation link limited to {} waypoints, {} dropped",
                self.max_waypoints,
                dropped
            );
        }
        Some(self.assemble(origin, destination, addresses, dropped))
    }

    /// Splits the full sequence into consecutive links; each leg starts where
    /// the previous one ended, so no stop is lost.
    pub fn legs(&self, origin: &str, leads: &[ScoredLead]) -> Vec<NavigationLink> {
        let addresses = surviving_addresses(leads);
        let mut legs = Vec::new();
        let mut leg_origin = origin.to_string();
        for chunk in addresses.chunks(self.max_waypoints + 1) {
            let mut stops = chunk.to_vec();
            let Some(destination) = stops.pop() else {
                continue;
            };
            let next_origin = destination.clone();
            legs.push(self.assemble(&leg_origin, destination, stops, 0));
            leg_origin = next_origin;
        }
        legs
    }

    fn assemble(
        &self,
        origin: &str,
        destination: String,
        waypoints: Vec<String>,
        dropped_waypoints: usize,
    ) -> NavigationLink {
        let mut url = format!(
            "{}?api=1&origin={}&destination={}",
            self.base_url,
            encode(origin),
            encode(&destination)
        );
        if !waypoints.is_empty() {
            let joined = waypoints
                .iter()
                .map(|w| encode(w))
                .collect::<Vec<_>>()
                .join("|");
            url.push_str("&waypoints=");
            url.push_str(&joined);
        }
        url.push_str("&travelmode=driving");

        NavigationLink {
            url,
            origin: origin.to_string(),
            destination,
            waypoints,
            dropped_waypoints,
        }
    }
}

fn surviving_addresses(leads: &[ScoredLead]) -> Vec<String> {
    leads.iter().filter_map(sanitize_lead_address).collect()
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Navigation URL for leads in visiting order; `None` means no route.
pub fn build_navigation_url(base_url: &str, origin: &str, leads: &[ScoredLead]) -> Option<String> {
    NavigationBuilder::new(base_url)
        .link(origin, leads)
        .map(|link| link.url)
}

/// Every leg needed to visit all leads in order, each within the waypoint limit.
pub fn build_navigation_legs(base_url: &str, origin: &str, leads: &[ScoredLead]) -> Vec<String> {
    NavigationBuilder::new(base_url)
        .legs(origin, leads)
        .into_iter()
        .map(|leg| leg.url)
        .collect()
}

/// Per-day navigation summary for a plan, starting each day at the plan's base.
pub fn plan_navigation(plan: &RoutePlan, builder: &NavigationBuilder) -> Vec<DayNavigation> {
    let origin = plan.origin_label();
    plan.days
        .iter()
        .map(|day| {
            let leads: Vec<ScoredLead> = day.leads().cloned().collect();
            let link = builder.link(&origin, &leads);
            let legs = match &link {
                Some(l) if l.dropped_waypoints > 0 => builder
                    .legs(&origin, &leads)
                    .into_iter()
                    .map(|leg| leg.url)
                    .collect(),
                _ => Vec::new(),
            };
            DayNavigation {
                day: day.day,
                visits: day.visit_count(),
                mean_score: day.mean_score(),
                url: link.map(|l| l.url),
                legs,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(street: &str, number: &str) -> Address {
        Address {
            street: street.into(),
            number: number.into(),
            neighborhood: String::new(),
            postal_code: "40000-000".into(),
            complement: None,
            city: "SALVADOR".into(),
            region: "ba".into(),
        }
    }

    #[test]
    fn placeholder_numbers() {
        for n in ["S/N", "s/n", "SN", "0", "000", "999", "", " - ", "..."] {
            assert!(is_placeholder_number(n), "{n:?} should be a placeholder");
        }
        for n in ["10", "1020", "99", "12A"] {
            assert!(!is_placeholder_number(n), "{n:?} is a real number");
        }
    }

    #[test]
    fn rural_streets_drop_the_number() {
        assert!(is_rural_street("FAZENDA BOA VISTA"));
        assert!(is_rural_street("Rodovia BR-116"));
        assert!(is_rural_street("Estrada do Coco km 12"));
        assert!(!is_rural_street("Rua das Flores"));
        assert!(!is_rural_street("Avenida Getulio Vargas"));

        let line = sanitize_address(&address("FAZENDA BOA VISTA", "150")).unwrap();
        assert_eq!(line, "Fazenda Boa Vista, Salvador - BA");
    }

    #[test]
    fn title_case_matches_word_boundaries() {
        assert_eq!(title_case("RUA DAS  FLORES"), "Rua Das Flores");
        assert_eq!(title_case("av. sete de setembro"), "Av. Sete De Setembro");
        assert_eq!(title_case("SÃO JOSÉ"), "São José");
    }

    #[test]
    fn short_addresses_are_discarded() {
        let empty = Address {
            street: String::new(),
            number: "S/N".into(),
            neighborhood: String::new(),
            postal_code: String::new(),
            complement: None,
            city: String::new(),
            region: "BA".into(),
        };
        assert_eq!(sanitize_address(&empty), None);
    }
}
