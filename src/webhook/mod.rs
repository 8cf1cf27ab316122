//! Mutating admission webhook
//!
//! Thin HTTP surface over [`Injector`]: the handler decodes the pod from the
//! AdmissionReview, runs every injection path and answers with a JSON patch.
//! All decisions live in the injector.

pub mod pod;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::inject::Injector;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Engine applied to every admitted pod
    pub injector: Injector,
}

impl WebhookState {
    /// Create a new webhook state around an injector
    pub fn new(injector: Injector) -> Self {
        Self { injector }
    }
}

/// Create the webhook router
///
/// - POST /mutate/pods - Inject CA material, registry address and scrape annotations
/// - GET /healthz - Liveness probe
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate/pods", post(pod::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
