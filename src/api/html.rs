//! HTML rendering helpers shared by the pages

use axum::response::Html;

pub(crate) fn escape_html_attr(value: &str) -> String {
    html_escape::encode_double_quoted_attribute(value).into_owned()
}

pub(crate) fn escape_html_text(value: &str) -> String {
    html_escape::encode_text(value).into_owned()
}

pub(crate) fn render_hidden_input(name: &str, value: &str) -> String {
    format!(
        "<input type=\"hidden\" name=\"{}\" value=\"{}\" />",
        escape_html_attr(name),
        escape_html_attr(value)
    )
}

/// Wrap `body` in the shared page layout
pub(crate) fn render_page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{} - Crosspost</title>
</head>
<body>
{}
</body>
</html>
"#,
        escape_html_text(title),
        body
    ))
}
