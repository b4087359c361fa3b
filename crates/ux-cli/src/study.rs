//! Study files: the Flow, Personas and run overrides for one `ux run`.

use std::path::Path;

use serde::Deserialize;
use ux_config::UxConfig;
use ux_core::{Flow, Persona, RunConfig};
use ux_sim::SiteMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyRun {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// One page of the scripted site served to agent-mode studies.
#[derive(Debug, Clone, Deserialize)]
pub struct StudyPage {
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    pub flow: Flow,
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub run: StudyRun,
    /// Pages for the synthetic browser; the built-in checkout site if empty.
    #[serde(default)]
    pub site: Vec<StudyPage>,
}

impl Study {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read study {}: {}", path.display(), e))?;
        Ok(Self::from_yaml(&content)?)
    }

    /// Study overrides win over config defaults; `seed` from the command line
    /// wins over both.
    pub fn run_config(&self, config: &UxConfig, seed: Option<u64>) -> RunConfig {
        RunConfig {
            model: self
                .run
                .model
                .clone()
                .unwrap_or_else(|| config.model().to_string()),
            max_steps: self.run.max_steps.unwrap_or_else(|| config.max_steps()),
            seed: seed.or(self.run.seed).or(config.run.seed),
        }
    }

    pub fn site_map(&self) -> SiteMap {
        if self.site.is_empty() {
            return SiteMap::checkout();
        }
        self.site.iter().fold(SiteMap::new(), |site, page| {
            let links: Vec<&str> = page.links.iter().map(String::as_str).collect();
            site.page(&page.path, &page.title, &links)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ux_core::{FlowMode, FlowTarget};

    const SCREENSHOT_STUDY: &str = r#"
flow:
  id: signup
  name: Signup
  mode: SCREENSHOT
  frames:
    - id: landing
      imagePath: frames/landing.png
    - id: form
      imagePath: frames/form.png
      label: Signup form
personas:
  - id: impatient
    name: Impatient Ivy
    traits:
      patience: 0.1
      exploration: 0.4
      frustrationSensitivity: 0.9
      forgiveness: 0.2
      helpSeeking: 0.3
    ageGroup: 25-34
    gender: female
run:
  maxSteps: 6
"#;

    #[test]
    fn test_parse_screenshot_study() {
        let study = Study::from_yaml(SCREENSHOT_STUDY).unwrap();
        assert_eq!(study.flow.mode(), FlowMode::Screenshot);
        assert_eq!(study.flow.frames().len(), 2);
        assert_eq!(study.flow.frames()[1].label.as_deref(), Some("Signup form"));
        assert_eq!(study.personas[0].traits.frustration_sensitivity, 0.9);
        assert!(study.site.is_empty());
    }

    #[test]
    fn test_run_config_precedence() {
        let study = Study::from_yaml(SCREENSHOT_STUDY).unwrap();
        let config = UxConfig::from_yaml("run:\n  model: gpt-4o\n  max_steps: 9\n  seed: 1\n").unwrap();

        let run = study.run_config(&config, None);
        assert_eq!(run.model, "gpt-4o");
        assert_eq!(run.max_steps, 6);
        assert_eq!(run.seed, Some(1));

        assert_eq!(study.run_config(&config, Some(77)).seed, Some(77));
    }

    #[test]
    fn test_parse_agent_study_with_site() {
        let yaml = r#"
flow:
  id: pricing
  mode: AGENT
  url: https://app.test/
  goal: Find the enterprise price
personas: []
site:
  - path: /
    title: Home
    links: [/pricing]
  - path: /pricing
    title: Pricing
"#;
        let study = Study::from_yaml(yaml).unwrap();
        match &study.flow.target {
            FlowTarget::Agent { url, goal } => {
                assert_eq!(url, "https://app.test/");
                assert_eq!(goal, "Find the enterprise price");
            }
            other => panic!("unexpected target {:?}", other),
        }
        let site = study.site_map();
        assert_eq!(site.len(), 2);
        assert_eq!(site.get("/").unwrap().links, vec!["/pricing".to_string()]);
        assert!(site.get("/pricing").unwrap().links.is_empty());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let yaml = "flow:\n  id: x\n  mode: VIDEO\npersonas: []\n";
        assert!(Study::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_demo_studies_parse() {
        let checkout =
            Study::from_yaml(include_str!("../../../demos/checkout-study.yaml")).unwrap();
        assert_eq!(checkout.flow.mode(), FlowMode::Agent);
        assert_eq!(checkout.personas.len(), 2);
        assert_eq!(checkout.run.max_steps, Some(10));
        assert_eq!(checkout.site_map().len(), SiteMap::checkout().len());

        let signup = Study::from_yaml(include_str!("../../../demos/signup-study.yaml")).unwrap();
        assert_eq!(signup.flow.frames().len(), 4);
        for persona in &signup.personas {
            assert!(persona.validate().is_ok());
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.yaml");
        std::fs::write(&path, SCREENSHOT_STUDY).unwrap();
        assert_eq!(Study::from_file(&path).unwrap().flow.id, "signup");
        assert!(Study::from_file(&dir.path().join("missing.yaml")).is_err());
    }
}
