use rand::seq::SliceRandom;
use rand::Rng;
use ux_core::{Flow, FlowTarget, Frame, Persona, PersonaTraits};

const AGE_GROUPS: [&str; 5] = ["18-24", "25-34", "35-44", "45-54", "55+"];
const GENDERS: [&str; 3] = ["female", "male", "unspecified"];

/// Generate `count` valid personas with traits drawn from `rng`.
pub fn generate_personas<R: Rng>(rng: &mut R, count: usize) -> Vec<Persona> {
    (0..count)
        .map(|i| Persona {
            id: format!("persona-{}", i),
            name: format!("Persona {}", i),
            traits: PersonaTraits {
                patience: unit(rng),
                exploration: unit(rng),
                frustration_sensitivity: unit(rng),
                forgiveness: unit(rng),
                help_seeking: unit(rng),
            },
            age_group: AGE_GROUPS.choose(rng).copied().unwrap_or("25-34").to_string(),
            gender: GENDERS.choose(rng).copied().unwrap_or("unspecified").to_string(),
            knobs: None,
        })
        .collect()
}

fn unit<R: Rng>(rng: &mut R) -> f64 {
    (rng.gen::<f64>() * 100.0).round() / 100.0
}

/// A screenshot flow with `frames` numbered frames.
pub fn screenshot_flow(id: &str, frames: usize) -> Flow {
    Flow {
        id: id.to_string(),
        name: format!("{} ({} screens)", id, frames),
        target: FlowTarget::Screenshot {
            frames: (0..frames)
                .map(|i| Frame {
                    id: format!("screen-{}", i),
                    image_path: format!("frames/{:02}.png", i),
                    label: None,
                })
                .collect(),
        },
    }
}

/// An agent flow against the checkout site served by
/// [`SiteMap::checkout`](crate::SiteMap::checkout).
pub fn checkout_flow(id: &str) -> Flow {
    Flow {
        id: id.to_string(),
        name: "Checkout".to_string(),
        target: FlowTarget::Agent {
            url: format!("{}/", crate::browser::CHECKOUT_ORIGIN),
            goal: "Buy any product and reach the order confirmation".to_string(),
        },
    }
}
