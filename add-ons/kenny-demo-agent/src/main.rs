//! Reference capability-providing service built on `kenny-agent`'s
//! `AgentServiceBase`: self-registers with the Registry at startup and runs
//! the background cache warmer alongside its HTTP server. Route handlers and
//! capability implementations live in `lib.rs` so they can be exercised
//! in-process by integration tests.

use kenny_agent::{AgentConfig, CacheWarmer, PatternLearner, WarmingPattern};
use kenny_demo_agent::{build_app, build_base, manifest, register_with_registry};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    kenny_core::config::load_dotenv();
    kenny_core::config::init_tracing();

    let agent_id = std::env::var("KENNY_DEMO_AGENT_ID").unwrap_or_else(|_| "mail-agent".to_string());
    let registry_base_url = std::env::var("KENNY_REGISTRY_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8081".to_string());
    let bind_addr = std::env::var("KENNY_DEMO_AGENT_BIND").unwrap_or_else(|_| "127.0.0.1:8090".to_string());
    let base_url = std::env::var("KENNY_DEMO_AGENT_BASE_URL").unwrap_or_else(|_| format!("http://{bind_addr}"));

    let config = AgentConfig::load(&agent_id, &registry_base_url).expect("load AgentConfig");
    let warm_interval_s = config.warm_interval_s;

    let base = build_base(&config).await;

    register_with_registry(&registry_base_url, &manifest(&agent_id, &base_url), &base_url).await;

    let learner = Arc::new(PatternLearner::new(16));
    let static_patterns = vec![WarmingPattern {
        verb: "messages.search".to_string(),
        params: serde_json::json!({ "mailbox": "Inbox", "limit": 10 }),
        schema: None,
        time_sensitive: false,
    }];
    let warmer = Arc::new(CacheWarmer::new(agent_id.clone(), Arc::clone(&base), base.cache(), static_patterns, learner));
    tokio::spawn(warmer.run(warm_interval_s));

    let app = build_app(base);

    let addr: std::net::SocketAddr = bind_addr.parse().expect("valid bind addr");
    tracing::info!(%addr, %agent_id, "kenny-demo-agent listening");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind demo agent listener");
    axum::serve(listener, app).await.expect("demo agent server error");
}
