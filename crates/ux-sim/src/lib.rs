pub mod browser;
pub mod fault;
pub mod invariants;
pub mod reasoner;
pub mod scenario;
pub mod sim;

pub use browser::{SiteMap, SitePage, SyntheticBrowser};
pub use fault::{FaultConfig, FaultStats, FaultyBrowser, FaultyReasoner};
pub use invariants::{check_run_invariants, Violation};
pub use reasoner::SyntheticReasoner;
pub use sim::{Sim, SimError, SimOptions, SimOutcome};
