//! Feed page and compose action
//!
//! - GET / - Unified feed with the compose, reply and delete forms
//! - POST / - Multipart compose, answered with a dispatch report

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, State},
    response::{Html, Response},
    routing::get,
};

use super::dispatch_response;
use super::html::{escape_html_attr, escape_html_text, render_hidden_input, render_page};
use crate::AppState;
use crate::auth::{CurrentUser, PageUser, Session};
use crate::error::AppError;
use crate::service::{ComposeRequest, LogicalPost};

/// Create feed page router
///
/// `max_upload_bytes` bounds the whole compose body, images included.
pub fn pages_router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/", get(index_page).post(compose))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

// =============================================================================
// Feed page
// =============================================================================

/// GET /
async fn index_page(
    State(state): State<AppState>,
    PageUser(session): PageUser,
) -> Result<Html<String>, AppError> {
    let posts = state.timeline.feed().await?;

    let body = render_index(&state, &session, &posts);
    Ok(render_page("Feed", &body))
}

fn render_index(
    state: &AppState,
    session: &Session,
    posts: &[LogicalPost],
) -> String {
    let mut body = String::new();

    body.push_str(&format!(
        r#"<header>
    <span>Signed in as {}</span>
    <form method="post" action="/sign-out"><button type="submit">Sign out</button></form>
    <form method="post" action="/refresh"><button type="submit">Refresh</button></form>
</header>
"#,
        escape_html_text(&session.display_name)
    ));

    body.push_str("<ul class=\"accounts\">\n");
    if let Some(twitter) = &state.twitter {
        body.push_str(&format!(
            "<li>Twitter: @{} (<a href=\"/confirmation-code\">confirmation code</a>)</li>\n",
            escape_html_text(twitter.username())
        ));
    }
    if let Some(bluesky) = &state.bluesky {
        body.push_str(&format!(
            "<li>Bluesky: {}</li>\n",
            escape_html_text(bluesky.username())
        ));
    }
    body.push_str("</ul>\n");

    body.push_str(&render_compose_form(state, None));

    body.push_str("<ol class=\"feed\">\n");
    for post in posts {
        body.push_str(&render_post(state, post));
    }
    body.push_str("</ol>\n");

    body
}

fn render_compose_form(state: &AppState, reply_to: Option<&LogicalPost>) -> String {
    let checkbox = |name: &str, label: &str, enabled: bool, applicable: bool| {
        if !enabled || !applicable {
            return String::new();
        }
        format!(
            "<label><input type=\"checkbox\" name=\"{}\" checked /> {}</label>\n",
            name, label
        )
    };

    let (hidden, submit) = match reply_to {
        Some(post) => {
            let mut hidden = String::new();
            if let Some(id) = post.twitter_id() {
                hidden.push_str(&render_hidden_input("replyTwitterId", id));
            }
            if let Some(id) = post.bluesky_id() {
                hidden.push_str(&render_hidden_input("replyBlueskyId", id));
            }
            (hidden, "Reply")
        }
        None => (String::new(), "Post"),
    };

    let twitter_applicable = reply_to.is_none_or(|post| post.twitter_id().is_some());
    let bluesky_applicable = reply_to.is_none_or(|post| post.bluesky_id().is_some());

    format!(
        r#"<form method="post" action="/" enctype="multipart/form-data" class="compose">
    <textarea name="text" rows="4" cols="60"></textarea>
    <input type="file" name="files" accept="image/*" multiple />
    {}{}{}<button type="submit">{}</button>
</form>
"#,
        checkbox("twitter", "Twitter", state.twitter.is_some(), twitter_applicable),
        checkbox("bluesky", "Bluesky", state.bluesky.is_some(), bluesky_applicable),
        hidden,
        submit
    )
}

fn render_post(state: &AppState, post: &LogicalPost) -> String {
    let mut badges = Vec::new();
    if post.twitter_id().is_some() {
        badges.push("Twitter");
    }
    if post.bluesky_id().is_some() {
        badges.push("Bluesky");
    }

    let mut delete_inputs = String::new();
    if let Some(id) = post.twitter_id() {
        delete_inputs.push_str(&render_hidden_input("twitterId", id));
    }
    if let Some(id) = post.bluesky_id() {
        delete_inputs.push_str(&render_hidden_input("blueskyId", id));
    }

    format!(
        r#"<li>
    <time datetime="{}">{}</time> <span class="platforms">{}</span>
    <p>{}</p>
    <details><summary>Reply</summary>
{}    </details>
    <form method="post" action="/delete-post">{}<button type="submit">Delete</button></form>
</li>
"#,
        escape_html_attr(&post.posted_at.to_rfc3339()),
        escape_html_text(&post.posted_at.format("%Y-%m-%d %H:%M").to_string()),
        badges.join(" / "),
        escape_html_text(&post.text).replace('\n', "<br />"),
        render_compose_form(state, Some(post)),
        delete_inputs
    )
}

// =============================================================================
// Compose action
// =============================================================================

/// POST /
async fn compose(
    State(state): State<AppState>,
    CurrentUser(_session): CurrentUser,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let request = read_compose_form(&mut multipart).await?;
    let report = state.dispatcher.compose(&request).await;
    Ok(dispatch_response(report))
}

async fn read_compose_form(multipart: &mut Multipart) -> Result<ComposeRequest, AppError> {
    let mut request = ComposeRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid form data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "files" {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Invalid upload: {}", e)))?;
            // Browsers send an empty part when no file is picked
            if !bytes.is_empty() {
                request.files.push(bytes.to_vec());
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::Validation(format!("Invalid form field {}: {}", name, e)))?;

        match name.as_str() {
            "text" => request.text = value,
            "twitter" => request.targets.twitter = is_checked(&value),
            "bluesky" => request.targets.bluesky = is_checked(&value),
            "replyTwitterId" => request.reply_to.twitter_id = non_empty(value),
            "replyBlueskyId" => request.reply_to.bluesky_id = non_empty(value),
            other => tracing::debug!(field = other, "Ignoring unknown compose field"),
        }
    }

    Ok(request)
}

fn is_checked(value: &str) -> bool {
    matches!(value, "on" | "true")
}

pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
