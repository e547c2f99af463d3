//! Upstream data sources
//!
//! - [`traits`] - the record, claims, consent and identity seams
//! - [`http`] - REST client implementing all four
//! - [`mock`] - in-memory implementation with failure injection

pub mod http;
pub mod mock;
pub mod traits;

pub use http::HttpSourceClient;
pub use mock::MockSource;
pub use traits::{
    ClaimsSource, ConsentRecord, ConsentSource, IdentitySource, RecordSource, OPT_IN_POLICY,
    OPT_OUT_POLICY,
};
