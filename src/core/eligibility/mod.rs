//! Per-patient eligibility gating
//!
//! - [`suppression`] - identity and consent opt-out check
//! - [`lookback`] - claims-based provider relationship check
//! - [`gate`] - runs both, suppression first

pub mod gate;
pub mod lookback;
pub mod suppression;

pub use gate::{EligibilityGate, GateDecision};
pub use lookback::{evaluate_claims, LookBackDecision, LookBackSettings, LookBackValidator, NPI_SYSTEM};
pub use suppression::{SuppressionCheck, SuppressionDecision};
