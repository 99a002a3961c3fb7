//! Rule-based lead qualification.
//!
//! Every rule is additive and fires independently; each fired rule appends a
//! reason line with its point delta so the score can always be explained.
//! Scoring depends only on the lead, the [`ScoringProfile`] and the reference
//! date used for company age, which makes it reproducible.

use crate::models::{Lead, ScoredLead};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Points awarded per rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub highly_aligned: i32,
    pub aligned: i32,
    pub valid_phone: i32,
    pub secondary_phone: i32,
    pub email: i32,
    pub complete_address: i32,
    pub years_3_plus: i32,
    pub years_8_plus: i32,
    pub headquarters: i32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            highly_aligned: 30,
            aligned: 15,
            valid_phone: 20,
            secondary_phone: 5,
            email: 5,
            complete_address: 20,
            years_3_plus: 5,
            years_8_plus: 10,
            headquarters: 5,
        }
    }
}

impl ScoringWeights {
    /// Highest score a lead can reach under these weights, saturating at `i32::MAX`.
    pub fn max_score(&self) -> i32 {
        self.checked_max_score().unwrap_or(i32::MAX)
    }

    /// Highest reachable score, or `None` when it does not fit in an `i32`.
    pub fn checked_max_score(&self) -> Option<i32> {
        [
            self.valid_phone,
            self.secondary_phone,
            self.email,
            self.complete_address,
            self.years_8_plus.max(self.years_3_plus),
            self.headquarters,
        ]
        .into_iter()
        .try_fold(self.highly_aligned.max(self.aligned), i32::checked_add)
    }

    fn named(&self) -> [(&'static str, i32); 9] {
        [
            ("highly_aligned", self.highly_aligned),
            ("aligned", self.aligned),
            ("valid_phone", self.valid_phone),
            ("secondary_phone", self.secondary_phone),
            ("email", self.email),
            ("complete_address", self.complete_address),
            ("years_3_plus", self.years_3_plus),
            ("years_8_plus", self.years_8_plus),
            ("headquarters", self.headquarters),
        ]
    }

    /// Rejects negative weights and tables whose total overflows.
    pub fn validate(&self) -> anyhow::Result<()> {
        let negative: Vec<&str> = self
            .named()
            .into_iter()
            .filter(|(_, w)| *w < 0)
            .map(|(name, _)| name)
            .collect();
        if !negative.is_empty() {
            anyhow::bail!("Negative scoring weights: {}", negative.join(", "));
        }
        if self.checked_max_score().is_none() {
            anyhow::bail!("Scoring weights overflow the maximum score");
        }
        Ok(())
    }
}

/// How closely a segment matches the ideal customer profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentFit {
    HighlyAligned,
    Aligned,
}

/// A named group of industry codes sharing a sales-fit rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub key: String,
    pub name: String,
    pub description: String,
    pub codes: Vec<String>,
    pub fit: SegmentFit,
}

impl Segment {
    fn new(key: &str, name: &str, description: &str, codes: &[&str], fit: SegmentFit) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            codes: codes.iter().map(|c| c.to_string()).collect(),
            fit,
        }
    }

    fn matches(&self, normalized_code: &str) -> bool {
        self.codes
            .iter()
            .any(|code| digits_only(code) == normalized_code)
    }
}

/// A named selection of segments offered as a shortcut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePreset {
    pub name: String,
    pub segment_keys: Vec<String>,
}

/// Ordered segment table; the first matching segment wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentCatalog {
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub presets: Vec<ProfilePreset>,
}

impl Default for SegmentCatalog {
    fn default() -> Self {
        use SegmentFit::*;
        Self {
            segments: vec![
                Segment::new(
                    "supermercados",
                    "Supermercados e Hipermercados",
                    "Varejo alimentício de grande porte",
                    &["4711301", "4711302", "4712100"],
                    HighlyAligned,
                ),
                Segment::new(
                    "minimercados",
                    "Minimercados e Mercearias",
                    "Varejo alimentício de pequeno e médio porte",
                    &["4712100", "4729699"],
                    Aligned,
                ),
                Segment::new(
                    "padarias",
                    "Padarias e Confeitarias",
                    "Comércio de pães, bolos e similares",
                    &["4721102", "1091101", "1091102"],
                    HighlyAligned,
                ),
                Segment::new(
                    "restaurantes",
                    "Restaurantes e Lanchonetes",
                    "Serviços de alimentação",
                    &["5611201", "5611203", "5611204", "5611205"],
                    Aligned,
                ),
                Segment::new(
                    "hoteis",
                    "Hotéis e Pousadas",
                    "Serviços de hospedagem",
                    &["5510801", "5510802", "5590601", "5590602"],
                    Aligned,
                ),
                Segment::new(
                    "industria_alimentos",
                    "Indústria de Alimentos",
                    "Fabricação de produtos alimentícios",
                    &["1091101", "1091102", "1092900", "1093701"],
                    HighlyAligned,
                ),
                Segment::new(
                    "atacado_alimentos",
                    "Atacado de Alimentos",
                    "Comércio atacadista de produtos alimentícios",
                    &["4631100", "4632001", "4633801", "4635401"],
                    Aligned,
                ),
                Segment::new(
                    "farmacia",
                    "Farmácias e Drogarias",
                    "Comércio varejista de medicamentos",
                    &["4771701", "4771702", "4771703"],
                    Aligned,
                ),
                Segment::new(
                    "construcao",
                    "Construção Civil",
                    "Empresas de construção e obras",
                    &["4120400", "4211101", "4212000", "4213800"],
                    Aligned,
                ),
                Segment::new(
                    "material_construcao",
                    "Material de Construção",
                    "Comércio de materiais de construção",
                    &["4744001", "4744002", "4744003", "4744004"],
                    HighlyAligned,
                ),
            ],
            presets: vec![ProfilePreset {
                name: "Sacaria de Rafia".to_string(),
                segment_keys: vec![
                    "industria_alimentos".to_string(),
                    "atacado_alimentos".to_string(),
                    "material_construcao".to_string(),
                ],
            }],
        }
    }
}

impl SegmentCatalog {
    /// Finds the segment for an industry code, ignoring punctuation in the code.
    pub fn segment_for(&self, activity_code: &str) -> Option<&Segment> {
        let normalized = digits_only(activity_code);
        if normalized.is_empty() {
            return None;
        }
        self.segments.iter().find(|s| s.matches(&normalized))
    }

    pub fn by_key(&self, key: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.key == key)
    }

    /// Expands segment keys into their industry codes, de-duplicated, in order.
    /// Unknown keys are reported back as the error.
    pub fn codes_for(&self, keys: &[String]) -> Result<Vec<String>, Vec<String>> {
        let mut codes: Vec<String> = Vec::new();
        let mut unknown = Vec::new();
        for key in keys {
            match self.by_key(key) {
                Some(segment) => {
                    for code in &segment.codes {
                        if !codes.contains(code) {
                            codes.push(code.clone());
                        }
                    }
                }
                None => unknown.push(key.clone()),
            }
        }
        if unknown.is_empty() {
            Ok(codes)
        } else {
            Err(unknown)
        }
    }

    /// Segment name → industry codes, in catalog order.
    pub fn codes_by_segment(&self) -> Vec<(String, Vec<String>)> {
        self.segments
            .iter()
            .map(|s| (s.name.clone(), s.codes.clone()))
            .collect()
    }
}

/// Weights and segment table used together for scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringProfile {
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default)]
    pub catalog: SegmentCatalog,
}

impl ScoringProfile {
    /// Loads a profile from a JSON file; missing sections fall back to defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let profile: ScoringProfile = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid scoring profile {}: {}", path.display(), e))?;
        if profile.catalog.segments.is_empty() {
            anyhow::bail!("Scoring profile {} has no segments", path.display());
        }
        profile
            .weights
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid scoring profile {}: {}", path.display(), e))?;
        tracing::info!(
            "Loaded scoring profile from {} ({} segments)",
            path.display(),
            profile.catalog.segments.len()
        );
        Ok(profile)
    }
}

/// Scores leads against a profile as of a fixed reference date.
#[derive(Debug, Clone)]
pub struct Scorer {
    profile: ScoringProfile,
    as_of: NaiveDate,
}

impl Scorer {
    pub fn new(profile: ScoringProfile) -> Self {
        Self {
            profile,
            as_of: Utc::now().date_naive(),
        }
    }

    /// Pins the date used to compute company age.
    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = date;
        self
    }

    pub fn profile(&self) -> &ScoringProfile {
        &self.profile
    }

    pub fn score(&self, lead: Lead) -> ScoredLead {
        let weights = &self.profile.weights;
        let mut score: i32 = 0;
        let mut reasons = Vec::new();
        let mut segment_name = None;

        if let Some(segment) = self.profile.catalog.segment_for(&lead.activity_code) {
            let (points, label) = match segment.fit {
                SegmentFit::HighlyAligned => {
                    (weights.highly_aligned, "Segmento altamente aderente")
                }
                SegmentFit::Aligned => (weights.aligned, "Segmento aderente"),
            };
            score = score.saturating_add(points);
            reasons.push(format!("{}: {} (+{})", label, segment.name, points));
            segment_name = Some(segment.name.clone());
        }

        if lead.primary_phone.is_some() {
            score = score.saturating_add(weights.valid_phone);
            reasons.push(format!("Telefone principal válido (+{})", weights.valid_phone));
        }

        if lead.secondary_phone.is_some() {
            score = score.saturating_add(weights.secondary_phone);
            reasons.push(format!(
                "Telefone secundário disponível (+{})",
                weights.secondary_phone
            ));
        }

        if lead.email.is_some() {
            score = score.saturating_add(weights.email);
            reasons.push(format!("Email disponível (+{})", weights.email));
        }

        if lead.is_visitable() {
            score = score.saturating_add(weights.complete_address);
            reasons.push(format!("Endereço completo (+{})", weights.complete_address));
        }

        let years = lead.years_active_at(self.as_of);
        if years >= 8 {
            score = score.saturating_add(weights.years_8_plus);
            reasons.push(format!(
                "Empresa com {} anos de atividade (+{})",
                years, weights.years_8_plus
            ));
        } else if years >= 3 {
            score = score.saturating_add(weights.years_3_plus);
            reasons.push(format!(
                "Empresa com {} anos de atividade (+{})",
                years, weights.years_3_plus
            ));
        }

        if lead.is_headquarters() {
            score = score.saturating_add(weights.headquarters);
            reasons.push(format!("Matriz da empresa (+{})", weights.headquarters));
        }

        ScoredLead {
            lead,
            score,
            reasons,
            segment: segment_name,
        }
    }

    /// Scores every lead, drops those under `min_score` (when positive) and
    /// sorts by score, highest first. Equal scores keep input order.
    pub fn qualify(&self, leads: Vec<Lead>, min_score: i32) -> Vec<ScoredLead> {
        let mut scored: Vec<ScoredLead> = leads.into_iter().map(|l| self.score(l)).collect();
        if min_score > 0 {
            scored.retain(|s| s.score >= min_score);
        }
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        tracing::debug!(
            "Qualified {} leads (min score {})",
            scored.len(),
            min_score
        );
        scored
    }
}

/// Keeps only leads with a complete address.
pub fn visitable_only(leads: &[ScoredLead]) -> Vec<ScoredLead> {
    leads
        .iter()
        .filter(|l| l.lead.is_visitable())
        .cloned()
        .collect()
}

/// Keeps leads whose matched segment name is in `segment_names`; empty keeps all.
pub fn by_segments(leads: &[ScoredLead], segment_names: &[String]) -> Vec<ScoredLead> {
    if segment_names.is_empty() {
        return leads.to_vec();
    }
    leads
        .iter()
        .filter(|l| {
            l.segment
                .as_ref()
                .is_some_and(|name| segment_names.contains(name))
        })
        .cloned()
        .collect()
}

/// Keeps only leads with a primary phone.
pub fn with_phone(leads: &[ScoredLead]) -> Vec<ScoredLead> {
    leads
        .iter()
        .filter(|l| l.lead.primary_phone.is_some())
        .cloned()
        .collect()
}

/// Strips everything but ASCII digits ("4711-3/02" → "4711302").
pub fn digits_only(code: &str) -> String {
    code.chars().filter(|c| c.is_ascii_digit()).collect()
}
