/// Property-based tests using proptest
/// Invariants of deduplication, scoring, route planning and address handling
mod common;

use common::*;
use hunter_leads_api::models::{Lead, ScoredLead};
use hunter_leads_api::registry::dedupe_by_base_id;
use hunter_leads_api::routing::{
    build_navigation_url, is_placeholder_number, plan_route, sanitize_address, title_case,
    MAX_WAYPOINTS,
};
use hunter_leads_api::scoring::{Scorer, ScoringProfile};
use proptest::prelude::*;
use std::collections::HashSet;

/// (base index, headquarters, has address, has phone, has email)
fn lead_traits() -> impl Strategy<Value = Vec<(u8, bool, bool, bool, bool)>> {
    prop::collection::vec((0u8..6, any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()), 0..40)
}

fn build_leads(traits: &[(u8, bool, bool, bool, bool)]) -> Vec<Lead> {
    traits
        .iter()
        .enumerate()
        .map(|(i, &(base, hq, addr, phone, email))| {
            let mut l = with_base(
                lead(&format!("{:08}{:06}", base, i), "Salvador", "BA"),
                &format!("{:08}", base),
            );
            if hq {
                l = headquarters(l);
            }
            if !addr {
                l = without_address(l);
            }
            if phone {
                l = with_phone(l, "71 33334444");
            }
            if email {
                l = with_email(l, "a@b.com");
            }
            l
        })
        .collect()
}

fn priority(l: &Lead) -> (bool, bool, bool, bool) {
    (
        l.is_headquarters(),
        l.is_visitable(),
        l.primary_phone.is_some(),
        l.email.is_some(),
    )
}

/// Visitable leads in distinct neighborhoods with varied scores.
fn visitable_leads(count: usize) -> Vec<ScoredLead> {
    let leads = (0..count)
        .map(|i| {
            let mut l = in_neighborhood(
                lead(&format!("{:08}000100", i + 1), "Salvador", "BA"),
                &format!("Bairro {}", i % 4),
                &format!("4{:04}-000", i % 7),
            );
            if i % 3 == 0 {
                l = with_phone(l, "71 33334444");
            }
            l
        })
        .collect();
    Scorer::new(ScoringProfile::default())
        .as_of(today())
        .qualify(leads, 0)
}

proptest! {
    #[test]
    fn dedupe_keeps_one_best_lead_per_base(traits in lead_traits()) {
        let leads = build_leads(&traits);
        let kept = dedupe_by_base_id(leads.clone());

        let bases: HashSet<&str> = leads.iter().map(|l| l.base_id.as_str()).collect();
        prop_assert_eq!(kept.len(), bases.len());

        for representative in &kept {
            let best = leads
                .iter()
                .filter(|l| l.base_id == representative.base_id)
                .map(priority)
                .max()
                .unwrap();
            prop_assert_eq!(priority(representative), best);
        }
    }

    #[test]
    fn plan_respects_day_capacity(count in 0usize..60, days in 1u32..8, per_day in 1u32..12) {
        let leads = visitable_leads(count);
        let plan = plan_route(&leads, days, per_day, "Salvador", "BA").unwrap();

        let capacity = days as usize * per_day as usize;
        let expected_visits = count.min(capacity);
        prop_assert_eq!(plan.total_visits(), expected_visits);
        prop_assert_eq!(
            plan.total_days(),
            (expected_visits + per_day as usize - 1) / per_day as usize
        );
        for day in &plan.days {
            prop_assert!(day.visit_count() <= per_day as usize);
            prop_assert!(day.visit_count() > 0);
        }

        let ids: HashSet<&str> = plan
            .days
            .iter()
            .flat_map(|d| d.stops.iter().map(|s| s.lead.lead.company_id.as_str()))
            .collect();
        prop_assert_eq!(ids.len(), expected_visits);
    }

    #[test]
    fn navigation_never_exceeds_waypoint_limit(count in 1usize..30) {
        let leads = visitable_leads(count);
        let url = build_navigation_url("https://www.google.com/maps/dir/", "Salvador, BA", &leads).unwrap();
        let waypoints = url
            .split('&')
            .find_map(|pair| pair.strip_prefix("waypoints="))
            .map(|w| w.split('|').count())
            .unwrap_or(0);
        prop_assert_eq!(waypoints, (count - 1).min(MAX_WAYPOINTS));
    }

    #[test]
    fn qualify_above_max_score_is_empty(traits in lead_traits()) {
        let scorer = Scorer::new(ScoringProfile::default()).as_of(today());
        let max = scorer.profile().weights.max_score();
        prop_assert!(scorer.qualify(build_leads(&traits), max + 1).is_empty());
    }

    #[test]
    fn qualify_is_a_sorted_permutation(traits in lead_traits()) {
        let leads = build_leads(&traits);
        let scored = Scorer::new(ScoringProfile::default()).as_of(today()).qualify(leads.clone(), 0);
        prop_assert_eq!(scored.len(), leads.len());
        prop_assert!(scored.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn sanitization_never_panics_and_is_never_tiny(
        street in "\\PC{0,30}",
        number in "\\PC{0,6}",
        neighborhood in "\\PC{0,20}",
        city in "\\PC{0,20}",
        region in "[A-Za-z]{0,2}"
    ) {
        let a = address(&street, &number, &neighborhood, "", &city, &region);
        if let Some(line) = sanitize_address(&a) {
            prop_assert!(line.chars().count() > 5);
        }
        let _ = is_placeholder_number(&number);
    }

    #[test]
    fn title_case_is_idempotent(value in "[a-zA-Z ]{0,40}") {
        let once = title_case(&value);
        prop_assert_eq!(title_case(&once), once.clone());
    }
}
