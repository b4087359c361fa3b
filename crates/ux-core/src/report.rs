use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{EpisodeId, EpisodeStatus, PersonaId};

/// A deduplicated, Run-scoped usability issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub issue: String,
    pub evidence: String,
    /// Highest friction among contributing steps.
    pub severity: f64,
    /// Number of contributing StepTraces.
    pub frequency: u32,
    pub affected_personas: BTreeSet<PersonaId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_index: Option<usize>,
    /// Filled lazily by a fix advisor after aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_fix: Option<String>,
}

/// Aggregate statistics for one logical screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenStats {
    pub screen_index: usize,
    /// Frame id (screenshot mode) or URL pathname (agent mode).
    pub label: String,
    pub avg_friction: f64,
    pub max_friction: f64,
    pub avg_dropoff_risk: f64,
    pub confusion_count: u32,
    pub finding_count: u32,
    pub step_count: u32,
}

/// A confusion as reported at one step, kept for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfusion {
    pub step_index: u32,
    pub screen_index: usize,
    pub issue: String,
    pub evidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_ref: Option<String>,
}

/// Per-episode rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaRollup {
    pub episode_id: EpisodeId,
    pub persona_id: PersonaId,
    pub status: EpisodeStatus,
    pub avg_friction: f64,
    pub avg_confidence: f64,
    pub step_count: u32,
    pub confusions: Vec<StepConfusion>,
}

/// Run-wide summary.
///
/// FAILED episodes count toward `total_episodes` only; they are neither
/// completed nor abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_episodes: u32,
    pub completed_episodes: u32,
    pub abandoned_episodes: u32,
    pub avg_friction: f64,
    pub avg_dropoff_risk: f64,
}

/// Terminal output of aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJson {
    pub summary: ReportSummary,
    /// Ordered by severity, highest first.
    pub findings: Vec<Finding>,
    pub per_screen: BTreeMap<usize, ScreenStats>,
    pub per_persona: Vec<PersonaRollup>,
}

impl ReportJson {
    /// Serialize to the stable byte form persisted for a Run.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_wire_shape() {
        let report = ReportJson {
            summary: ReportSummary {
                total_episodes: 1,
                completed_episodes: 1,
                abandoned_episodes: 0,
                avg_friction: 0.25,
                avg_dropoff_risk: 0.1,
            },
            findings: vec![Finding {
                issue: "Cannot find submit button".to_string(),
                evidence: "grey on grey".to_string(),
                severity: 0.8,
                frequency: 1,
                affected_personas: BTreeSet::from(["p1".to_string()]),
                element_ref: Some("btn-1".to_string()),
                step_index: Some(0),
                screen_index: Some(0),
                recommended_fix: None,
            }],
            per_screen: BTreeMap::from([(
                0,
                ScreenStats {
                    screen_index: 0,
                    label: "f0".to_string(),
                    avg_friction: 0.25,
                    max_friction: 0.8,
                    avg_dropoff_risk: 0.1,
                    confusion_count: 1,
                    finding_count: 1,
                    step_count: 2,
                },
            )]),
            per_persona: Vec::new(),
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["summary"]["completedEpisodes"], 1);
        assert_eq!(value["findings"][0]["affectedPersonas"][0], "p1");
        assert!(value["findings"][0].get("recommendedFix").is_none());
        assert_eq!(value["perScreen"]["0"]["stepCount"], 2);

        let again: ReportJson = serde_json::from_value(value).unwrap();
        assert_eq!(again, report);
    }
}
