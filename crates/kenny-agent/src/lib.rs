//! Agent Service Base: the uniform contract every capability-providing
//! service in the Kenny fabric implements on top of this crate.

pub mod base;
pub mod cache;
pub mod confidence;
pub mod config;
pub mod dependency;
pub mod llm;
pub mod warming;

pub use base::{AgentHealthReport, AgentServiceBase, CapabilityHandler, HealthCheckResult};
pub use config::AgentConfig;
pub use dependency::{DependencyDeclaration, DependencyManager};
pub use llm::{CatalogEntry, Interpretation, LlmClient, LlmSelection, NoLlmClient, OpenRouterLlmClient};
pub use warming::{CacheWarmer, PatternLearner, WarmTarget, WarmingPattern};
