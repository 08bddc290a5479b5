use axum::{
    extract::State,
    response::{Html, IntoResponse, Response},
    Extension,
};
use tracing::debug;

use super::AppState;
use crate::context::RequestContext;
use crate::error::AppError;
use crate::render::RenderData;

/// Handle the landing page
///
/// Counts the visit when persistence is enabled and renders the page. With
/// persistence disabled the page shows a count of zero.
pub async fn index(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, AppError> {
    let count = match &state.counter {
        Some(store) => match store.increment_and_read(&ctx).await {
            Ok(counter) => counter.count,
            Err(e) => return Err(state.request_failed(&ctx, e.into())),
        },
        None => 0,
    };
    debug!(request_id = %ctx.request_id, count, "rendering landing page");

    let data = RenderData {
        count,
        hostname: state.hostname.to_string(),
    };
    match state.template.render(&data) {
        Ok(html) => Ok(Html(html).into_response()),
        Err(e) => Err(state.request_failed(&ctx, e)),
    }
}
