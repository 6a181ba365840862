pub mod dsl;
mod engine;

pub use dsl::DslContext;
pub use engine::{PolicyContext, PolicyDecision, PolicyEngine};
