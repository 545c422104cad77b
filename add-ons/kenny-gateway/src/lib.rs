//! Gateway: front-door routing (direct-vs-coordinator), SSE facade,
//! aggregated health views. This crate holds the pieces shared between the
//! route-decision logic and the `kenny-gateway` binary's HTTP handlers.

pub mod classification;
pub mod config;
pub mod snapshot;

pub use classification::{classify, ClassificationCache, RouteDecision};
pub use config::GatewayConfig;
pub use snapshot::{Snapshot, SnapshotCache};
