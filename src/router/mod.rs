//! HTTP triggers.
pub mod status;
pub mod trigger;

use axum::Router;
use axum::routing::post;

use crate::AppState;

pub fn trigger_router() -> Router<AppState> {
    Router::new()
        // `POST /trigger/all` goes to `all`.
        .route("/all", post(trigger::all))
        // `POST /trigger/:UUID` goes to `one`.
        .route("/{uuid}", post(trigger::one))
}

/// Build a state over in-memory ports, targeting "Active Directory".
#[cfg(test)]
pub fn state(
    registry: std::sync::Arc<crate::mock::InMemoryRegistry>,
    directory: std::sync::Arc<crate::mock::InMemoryDirectory>,
) -> AppState {
    use std::sync::Arc;

    use crate::config::Configuration;
    use crate::ports::SystemClock;
    use crate::resolver::Resolvers;
    use crate::sync::{ItSystemRef, Synchronizer};

    let config = Configuration::parse(crate::config::tests::YAML)
        .expect("test configuration is valid");
    let resolvers = Resolvers::new(
        registry.clone(),
        directory,
        config.ldap.cpr_attribute.clone(),
        config.ldap.search_base.clone(),
        config.batch.policy(),
    );
    let synchronizer = Synchronizer::new(
        resolvers,
        registry,
        Arc::new(SystemClock),
        ItSystemRef::from(&config.it_system),
        config.sync.concurrency,
    );

    AppState {
        config: Arc::new(config),
        synchronizer: Arc::new(synchronizer),
        metrics: None,
    }
}
