//! Twitter confirmation code
//!
//! The proxy may stop at an emailed confirmation code while logging in.
//! These routes let the signed-in user pass that code through.

use axum::{
    Form, Router,
    extract::State,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Deserialize;

use super::html::render_page;
use crate::AppState;
use crate::auth::{CurrentUser, PageUser};
use crate::error::AppError;
use crate::platform::SessionStatus;

/// Create confirmation code router
pub fn confirmation_router() -> Router<AppState> {
    Router::new().route(
        "/confirmation-code",
        get(confirmation_page).post(submit_confirmation_code),
    )
}

const CONFIRMATION_FORM: &str = r#"<form method="post" action="/confirmation-code">
    <label>Confirmation Code <input name="code" autocomplete="one-time-code" /></label>
    <button type="submit">Submit</button>
</form>"#;

/// GET /confirmation-code
///
/// Redirects home unless Twitter is enabled and waiting for a code.
async fn confirmation_page(
    State(state): State<AppState>,
    PageUser(_session): PageUser,
) -> Result<Response, AppError> {
    let Some(twitter) = &state.twitter else {
        return Ok(Redirect::to("/").into_response());
    };

    if twitter.status().await? != SessionStatus::WaitingForConfirmationCode {
        return Ok(Redirect::to("/").into_response());
    }

    Ok(render_page("Confirmation Code", CONFIRMATION_FORM).into_response())
}

#[derive(Debug, Deserialize)]
struct ConfirmationCodeForm {
    code: String,
}

/// POST /confirmation-code
async fn submit_confirmation_code(
    State(state): State<AppState>,
    CurrentUser(_session): CurrentUser,
    Form(form): Form<ConfirmationCodeForm>,
) -> Result<Redirect, AppError> {
    let twitter = state
        .twitter
        .as_ref()
        .ok_or_else(|| AppError::Validation("Twitter is not enabled".to_string()))?;

    let code = form.code.trim();
    if code.is_empty() {
        return Err(AppError::Validation("Confirmation code is required".to_string()));
    }

    twitter.input_confirmation_code(code).await?;
    Ok(Redirect::to("/"))
}
