//! Seeded stand-in for the reasoning provider.
//!
//! Every call derives its own ChaCha8 stream from the reasoner seed, the
//! episode seed, the persona, the step and the attempt. The same inputs always
//! produce the same output regardless of how episodes are scheduled.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use ux_core::{
    Action, AgentReasoning, BrowserAction, Confusion, FlowMode, Observation, ProviderError,
    Reasoner, ScreenshotReasoning, ScrollDirection, StepInput,
};

/// Page title that tells the synthetic persona its goal is reached.
pub const DEFAULT_GOAL_TITLE: &str = "Order confirmed";

const ISSUES: [(&str, &str); 6] = [
    ("Cannot find the primary button", "cta"),
    ("Form labels are ambiguous", "form-label"),
    ("Price is not visible before checkout", "price"),
    ("Navigation menu hides key pages", "nav"),
    ("Error message does not explain the fix", "error-banner"),
    ("Too much text above the fold", "hero"),
];

pub struct SyntheticReasoner {
    seed: u64,
    goal_title: String,
}

impl SyntheticReasoner {
    pub fn new(seed: u64) -> Self {
        SyntheticReasoner {
            seed,
            goal_title: DEFAULT_GOAL_TITLE.to_string(),
        }
    }

    pub fn with_goal_title(mut self, title: impl Into<String>) -> Self {
        self.goal_title = title.into();
        self
    }

    fn rng_for(&self, input: &StepInput) -> ChaCha8Rng {
        let mut key = mix(self.seed, input.seed.unwrap_or(0));
        key = mix(key, u64::from(input.step_index));
        key = mix(key, u64::from(input.attempt));
        for byte in input.persona.id.bytes() {
            key = mix(key, u64::from(byte));
        }
        ChaCha8Rng::seed_from_u64(key)
    }

    fn screenshot(&self, input: &StepInput, rng: &mut ChaCha8Rng) -> ScreenshotReasoning {
        let traits = &input.persona.traits;
        let screen = screen_key(&input.observation);
        let difficulty = (screen % 10) as f64 / 10.0;

        let friction = score(
            0.15 + 0.45 * difficulty + 0.25 * traits.frustration_sensitivity
                - 0.15 * traits.patience
                + rng.gen_range(-0.1..0.1),
        );
        let confidence = score(
            0.3 + 0.35 * traits.exploration + 0.25 * (1.0 - friction) + rng.gen_range(-0.1..0.1),
        );
        let dropoff_risk = score(
            friction * (1.0 - 0.5 * traits.forgiveness) * (1.0 - 0.4 * traits.patience)
                + rng.gen_range(0.0..0.05),
        );

        let mut confusions = Vec::new();
        if rng.gen_bool(friction) {
            let (issue, element) = ISSUES[(screen % ISSUES.len() as u64) as usize];
            confusions.push(Confusion {
                issue: issue.to_string(),
                evidence: format!("{} paused on {}", input.persona.name, label(&input.observation)),
                element_ref: Some(format!("{}-{}", element, screen % 3)),
            });
        }
        if traits.help_seeking > 0.7 && rng.gen_bool(0.3) {
            confusions.push(Confusion {
                issue: "Help is hard to find".to_string(),
                evidence: format!("{} looked for a help link", input.persona.name),
                element_ref: None,
            });
        }

        let likely_action = if dropoff_risk > 0.6 && rng.gen_bool(1.0 - traits.patience) {
            Action::Abandon
        } else if confidence > 0.6 {
            Action::ClickPrimaryCta
        } else {
            let mut candidates = vec![Action::Hesitate, Action::Scroll, Action::ClickSecondaryCta];
            if traits.exploration > 0.5 {
                candidates.push(Action::OpenNav);
            }
            if traits.help_seeking > 0.5 {
                candidates.push(Action::SeekInfo);
            }
            if input.last_action.is_some() {
                candidates.push(Action::Back);
            }
            candidates.choose(rng).copied().unwrap_or(Action::Hesitate)
        };

        let memory_update = confusions
            .first()
            .map(|c| format!("Step {}: {}", input.step_index, c.issue));

        ScreenshotReasoning {
            salient: format!("{} with {} call to action", label(&input.observation), intensity(confidence)),
            confusions,
            likely_action,
            confidence,
            friction,
            dropoff_risk,
            memory_update,
        }
    }

    fn agent(&self, input: &StepInput, rng: &mut ChaCha8Rng) -> AgentReasoning {
        let mut base = self.screenshot(input, rng);
        if base.likely_action == Action::Abandon {
            base.likely_action = Action::Hesitate;
        }

        let (title, elements) = match &input.observation {
            Observation::Page {
                page_title,
                element_count,
                ..
            } => (page_title.as_deref(), element_count.unwrap_or(0)),
            Observation::Frame { .. } => (None, 0),
        };

        if title == Some(self.goal_title.as_str()) {
            return AgentReasoning {
                base,
                browser_action: BrowserAction::Done {
                    success: true,
                    summary: Some(format!("Reached '{}'", self.goal_title)),
                },
                intent: Action::ClickPrimaryCta,
                completes_goal: Some(true),
            };
        }

        let (browser_action, intent) = if elements == 0 {
            (BrowserAction::NavigateBack, Action::Back)
        } else if rng.gen_bool(0.1) {
            (
                BrowserAction::Scroll {
                    direction: ScrollDirection::Down,
                    amount: Some(400),
                },
                Action::Scroll,
            )
        } else if rng.gen_bool(base.confidence) {
            (
                BrowserAction::Click {
                    target: "link-0".to_string(),
                },
                Action::ClickPrimaryCta,
            )
        } else {
            let link = rng.gen_range(0..elements);
            let intent = if link == 0 {
                Action::ClickPrimaryCta
            } else {
                Action::ClickSecondaryCta
            };
            (
                BrowserAction::Click {
                    target: format!("link-{}", link),
                },
                intent,
            )
        };
        base.likely_action = intent;

        AgentReasoning {
            base,
            browser_action,
            intent,
            completes_goal: Some(false),
        }
    }
}

#[async_trait]
impl Reasoner for SyntheticReasoner {
    async fn reason(&self, input: &StepInput) -> Result<Value, ProviderError> {
        let mut rng = self.rng_for(input);
        let value = match input.mode {
            FlowMode::Screenshot => serde_json::to_value(self.screenshot(input, &mut rng)),
            FlowMode::Agent => serde_json::to_value(self.agent(input, &mut rng)),
        };
        value.map_err(|e| ProviderError::Rejected(e.to_string()))
    }
}

fn mix(hash: u64, value: u64) -> u64 {
    (hash ^ value)
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_mul(0x0100_0000_01b3)
}

/// Stable per-screen key: the frame index, or a hash of the page URL.
fn screen_key(observation: &Observation) -> u64 {
    match observation {
        Observation::Frame { frame_index, .. } => *frame_index as u64,
        Observation::Page { url, .. } => url
            .as_deref()
            .unwrap_or("")
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325, |h, b| mix(h, u64::from(b))),
    }
}

fn label(observation: &Observation) -> String {
    match observation {
        Observation::Frame { frame_id, .. } => frame_id.clone(),
        Observation::Page {
            page_title, url, ..
        } => page_title
            .clone()
            .or_else(|| url.clone())
            .unwrap_or_else(|| "blank page".to_string()),
    }
}

fn intensity(confidence: f64) -> &'static str {
    if confidence > 0.6 {
        "a clear"
    } else {
        "an unclear"
    }
}

/// Clamp into [0, 1] and round to three decimals.
fn score(raw: f64) -> f64 {
    (raw.clamp(0.0, 1.0) * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ux_core::{validate_reasoning, Persona, PersonaTraits};
    use uuid::Uuid;

    fn input(mode: FlowMode, step_index: u32, observation: Observation) -> StepInput {
        StepInput {
            run_id: Uuid::nil(),
            episode_id: Uuid::nil(),
            model: "synthetic".to_string(),
            mode,
            persona: Persona {
                id: "p1".to_string(),
                name: "Pat".to_string(),
                traits: PersonaTraits {
                    patience: 0.2,
                    exploration: 0.8,
                    frustration_sensitivity: 0.9,
                    forgiveness: 0.1,
                    help_seeking: 0.9,
                },
                age_group: "35-44".to_string(),
                gender: "unspecified".to_string(),
                knobs: None,
            },
            step_index,
            max_steps: 10,
            observation,
            screenshot_path: None,
            goal: None,
            memory: Vec::new(),
            last_action: None,
            attempt: 1,
            seed: Some(5),
        }
    }

    fn frame(i: usize) -> Observation {
        Observation::Frame {
            frame_index: i,
            frame_id: format!("screen-{}", i),
        }
    }

    fn page(title: &str, elements: u32) -> Observation {
        Observation::Page {
            url: Some("https://shop.test/cart".to_string()),
            page_title: Some(title.to_string()),
            element_count: Some(elements),
        }
    }

    #[tokio::test]
    async fn test_screenshot_output_is_schema_valid() {
        let reasoner = SyntheticReasoner::new(1);
        for step in 0..20 {
            let raw = reasoner
                .reason(&input(FlowMode::Screenshot, step, frame(step as usize)))
                .await
                .unwrap();
            validate_reasoning(FlowMode::Screenshot, &raw).unwrap();
        }
    }

    #[tokio::test]
    async fn test_agent_output_is_schema_valid() {
        let reasoner = SyntheticReasoner::new(1);
        for step in 0..20 {
            let raw = reasoner
                .reason(&input(FlowMode::Agent, step, page("Cart", 3)))
                .await
                .unwrap();
            let out = validate_reasoning(FlowMode::Agent, &raw).unwrap();
            assert!(!out.finishes_goal());
            assert_ne!(out.likely_action(), Action::Abandon);
        }
    }

    #[tokio::test]
    async fn test_same_input_same_output() {
        let reasoner = SyntheticReasoner::new(9);
        let a = reasoner.reason(&input(FlowMode::Screenshot, 3, frame(3))).await.unwrap();
        let b = reasoner.reason(&input(FlowMode::Screenshot, 3, frame(3))).await.unwrap();
        assert_eq!(a, b);

        let mut retry = input(FlowMode::Screenshot, 3, frame(3));
        retry.attempt = 2;
        let c = reasoner.reason(&retry).await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_goal_page_finishes() {
        let reasoner = SyntheticReasoner::new(1);
        let raw = reasoner
            .reason(&input(FlowMode::Agent, 4, page(DEFAULT_GOAL_TITLE, 0)))
            .await
            .unwrap();
        let out = validate_reasoning(FlowMode::Agent, &raw).unwrap();
        assert!(out.finishes_goal());
        assert!(out.browser_action().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_dead_end_page_goes_back() {
        let reasoner = SyntheticReasoner::new(1);
        let raw = reasoner
            .reason(&input(FlowMode::Agent, 1, page("Help", 0)))
            .await
            .unwrap();
        let out = validate_reasoning(FlowMode::Agent, &raw).unwrap();
        assert_eq!(out.browser_action(), Some(&BrowserAction::NavigateBack));
    }
}
