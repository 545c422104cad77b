//! kenny-core: shared wire types, error taxonomy, and HTTP client primitives for
//! the Kenny agent fabric.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod manifest;
pub mod plan;
pub mod registry_types;
pub mod security;
pub mod sse;

pub use cache::{fingerprint, normalize_params, CacheEntry};
pub use client::{AgentClient, RegistryClient};
pub use error::{ErrorEnvelope, KennyError, WithCorrelation};
pub use manifest::{AgentManifest, AgentType, CapabilityDescriptor, HealthCheckSpec, SafetyAnnotation, Sla};
pub use plan::{
 CacheTier, CapabilityCall, ConfidenceResult, ExecutionResult, ExecutionStatus, Plan, PlanStrategy,
 PlanValidationError, StrategyHint,
};
pub use registry_types::{
 AgentSummary, CapabilityRef, HealthObservation, HealthRing, HealthStatus, OverallHealth, PerformanceStats,
 RegistryRecord, SlaViolation, SystemHealthSnapshot,
};
pub use security::{EgressDecision, Incident, IncidentStatus, ResponseAction, ResponseRule, SecurityEvent, Severity};
pub use sse::{ChunkType, StreamChunk};
