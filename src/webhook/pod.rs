//! Pod Mutation Webhook
//!
//! Handles AdmissionReview requests for Pods, running every injection path
//! and answering with a JSON patch from the submitted pod to the mutated one.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use tracing::{debug, error, info};

use super::WebhookState;

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The admission review request was invalid or malformed
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// An error occurred during JSON serialization/deserialization
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidReview(_) => StatusCode::BAD_REQUEST,
            WebhookError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Handle mutating admission review for Pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = mutate_pod_request(&state, &req).await;
    Json(response.into_review())
}

/// Process a single pod admission request
pub async fn mutate_pod_request(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = &request.uid;

    let Some(obj) = &request.object else {
        debug!(uid = %uid, "No pod object in request, allowing unchanged");
        return AdmissionResponse::from(request);
    };

    let pod = match pod_from_object(obj, request.namespace.as_deref()) {
        Ok(pod) => pod,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to decode pod");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    let mutated = match state.injector.mutate_all(&pod).await {
        Ok(mutated) => mutated,
        Err(e) => {
            error!(uid = %uid, pod = ?pod.metadata.name, error = %e, "Injection failed");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    let patch = match build_patch(&pod, &mutated) {
        Ok(patch) => patch,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to diff pod");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    if patch.0.is_empty() {
        debug!(uid = %uid, pod = ?pod.metadata.name, "Nothing to inject");
        return AdmissionResponse::from(request);
    }

    info!(
        uid = %uid,
        namespace = ?pod.metadata.namespace,
        pod = ?pod.metadata.name,
        patch_ops = patch.0.len(),
        "Applying patch to pod"
    );

    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Decode the admitted object as a pod, defaulting its namespace to the
/// request namespace
fn pod_from_object(obj: &DynamicObject, namespace: Option<&str>) -> Result<Pod, WebhookError> {
    if let Some(types) = &obj.types {
        if types.kind != "Pod" {
            return Err(WebhookError::InvalidReview(format!(
                "expected a Pod, got {}",
                types.kind
            )));
        }
    }

    let mut pod: Pod = serde_json::from_value(serde_json::to_value(obj)?)?;
    if pod.metadata.namespace.is_none() {
        pod.metadata.namespace = namespace.map(str::to_string);
    }
    Ok(pod)
}

/// JSON patch turning `original` into `mutated`
pub fn build_patch(original: &Pod, mutated: &Pod) -> Result<json_patch::Patch, WebhookError> {
    let before = serde_json::to_value(original)?;
    let after = serde_json::to_value(mutated)?;
    Ok(json_patch::diff(&before, &after))
}
