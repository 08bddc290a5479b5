use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::liveness::{Liveness, LivenessPhase};

/// Handle /healthz endpoint
///
/// 200 `ok` while ready; 503 with the current phase otherwise.
pub async fn healthz(State(liveness): State<Liveness>) -> impl IntoResponse {
    match liveness.get() {
        LivenessPhase::Ready => (StatusCode::OK, "ok"),
        phase => (StatusCode::SERVICE_UNAVAILABLE, phase.as_str()),
    }
}
