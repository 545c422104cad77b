//! Agent Registry process entry point. The HTTP surface and egress/security
//! wiring live in `lib.rs` so integration tests can build the router
//! in-process against a temp-directory-backed store.

use kenny_registry::{EgressRules, Registry, RegistryConfig};
use kenny_registry_server::{build_app, default_response_rules, RegistryEgressController};
use kenny_security::{EventLog, SecurityPlane};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    kenny_core::config::load_dotenv();
    kenny_core::config::init_tracing();

    let config = RegistryConfig::load().expect("load RegistryConfig");
    let allowlist = config.egress_allowlist.iter().cloned().map(Into::into).collect();
    let egress = EgressRules::new(allowlist);
    let registry = Registry::open(&config.store_path, egress).expect("open registry store");

    let event_log = EventLog::open(":memory:").expect("open security event log");
    let security = Arc::new(SecurityPlane::new(
        event_log,
        1800,
        default_response_rules(),
        Box::new(RegistryEgressController(Arc::clone(&registry))),
    ));

    let app = build_app(registry, security);

    let addr: std::net::SocketAddr = config.bind_addr.parse().expect("valid bind_addr");
    tracing::info!(%addr, "kenny-registry listening");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind registry listener");
    axum::serve(listener, app).await.expect("registry server error");
}
