use std::fmt::Write;
use std::path::Path;

use ux_core::ReportJson;

pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let report: ReportJson = serde_json::from_str(&content)?;
    print!("{}", render(&report));
    Ok(())
}

/// Human-readable rendering of a report.
pub fn render(report: &ReportJson) -> String {
    let mut out = String::new();
    let summary = &report.summary;

    // Writing to a String cannot fail.
    let _ = writeln!(out, "Summary");
    let _ = writeln!(out, "=======");
    let _ = writeln!(
        out,
        "Episodes: {} (completed {}, abandoned {})",
        summary.total_episodes, summary.completed_episodes, summary.abandoned_episodes
    );
    let _ = writeln!(
        out,
        "Avg friction: {:.3}  Avg drop-off risk: {:.3}",
        summary.avg_friction, summary.avg_dropoff_risk
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "Findings");
    let _ = writeln!(out, "========");
    if report.findings.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (i, finding) in report.findings.iter().enumerate() {
        let element = finding
            .element_ref
            .as_deref()
            .map(|e| format!(" ({})", e))
            .unwrap_or_default();
        let screen = finding
            .screen_index
            .map(|s| format!(", screen {}", s))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{:>3}. [{:.2}] {}{} x{}, {} personas{}",
            i + 1,
            finding.severity,
            finding.issue,
            element,
            finding.frequency,
            finding.affected_personas.len(),
            screen
        );
        if let Some(fix) = &finding.recommended_fix {
            let _ = writeln!(out, "       fix: {}", fix);
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Screens");
    let _ = writeln!(out, "=======");
    for screen in report.per_screen.values() {
        let _ = writeln!(
            out,
            "  #{} {}: friction avg {:.2} max {:.2}, drop-off {:.2}, {} confusions, {} findings, {} steps",
            screen.screen_index,
            if screen.label.is_empty() { "(no url)" } else { &screen.label },
            screen.avg_friction,
            screen.max_friction,
            screen.avg_dropoff_risk,
            screen.confusion_count,
            screen.finding_count,
            screen.step_count
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Personas");
    let _ = writeln!(out, "========");
    for rollup in &report.per_persona {
        let _ = writeln!(
            out,
            "  {} {}: {} steps, friction {:.2}, confidence {:.2}, {} confusions",
            rollup.persona_id,
            rollup.status.as_str(),
            rollup.step_count,
            rollup.avg_friction,
            rollup.avg_confidence,
            rollup.confusions.len()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_lists_findings_in_order() {
        let report: ReportJson = serde_json::from_value(json!({
            "summary": {
                "totalEpisodes": 2,
                "completedEpisodes": 1,
                "abandonedEpisodes": 1,
                "avgFriction": 0.5,
                "avgDropoffRisk": 0.25
            },
            "findings": [
                {
                    "issue": "Cannot find submit button",
                    "evidence": "Blends into footer",
                    "severity": 0.9,
                    "frequency": 2,
                    "affectedPersonas": ["a", "b"],
                    "elementRef": "btn-1",
                    "stepIndex": 1,
                    "screenIndex": 1
                },
                {
                    "issue": "Help is hard to find",
                    "evidence": "No link",
                    "severity": 0.4,
                    "frequency": 1,
                    "affectedPersonas": ["a"]
                }
            ],
            "perScreen": {},
            "perPersona": []
        }))
        .unwrap();

        let text = render(&report);
        assert!(text.contains("Episodes: 2 (completed 1, abandoned 1)"));
        assert!(text.contains("  1. [0.90] Cannot find submit button (btn-1) x2, 2 personas, screen 1"));
        assert!(text.contains("  2. [0.40] Help is hard to find x1, 1 personas"));
        let first = text.find("Cannot find").unwrap();
        let second = text.find("Help is hard").unwrap();
        assert!(first < second);
    }
}
