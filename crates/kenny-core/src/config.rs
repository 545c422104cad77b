//! Shared config-loading scaffold.
//!
//! Every component follows the same precedence: an env var names a TOML file
//! path, falling back to a component-default path; in both cases a
//! `KENNY_<COMPONENT>`-prefixed environment source overrides file values.
//! Components call [`builder`] and layer their own `set_default` calls before
//! `.build().try_deserialize()`.

use config::builder::DefaultState;
use config::ConfigBuilder;
use std::path::Path;

/// Starts a `config::Config` builder with the file source already attached (if the
/// resolved path exists) and the environment source layered on top.
///
/// `config_path_env` e.g. `"KENNY_REGISTRY_CONFIG"`; `default_path` e.g.
/// `"config/registry.toml"`; `env_prefix` e.g. `"KENNY_REGISTRY"` (separator `__`,
/// so `KENNY_REGISTRY__CACHE__L1__CAPACITY` maps to `cache.l1.capacity`).
pub fn builder(config_path_env: &str, default_path: &str, env_prefix: &str) -> ConfigBuilder<DefaultState> {
    let config_path = std::env::var(config_path_env).unwrap_or_else(|_| default_path.to_string());
    let path = Path::new(&config_path);
    let mut builder = config::Config::builder();
    if path.exists() {
        builder = builder.add_source(config::File::from(path));
    }
    builder.add_source(config::Environment::with_prefix(env_prefix).separator("__"))
}

/// Loads `.env` (if present) the way every binary does at process start.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, ".env not loaded; using system environment");
    }
}

/// Installs a `tracing_subscriber` registry reading `RUST_LOG` (default `info`).
pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
