//! Default HTML error page.

use crate::http::Status;

const STYLE: &str = "#powered_by { margin-top: 20px; border-top: 2px solid black; font-style: italic; }\n    #traceback { color: red; }";

/// Render the page for `status`. `traceback` is shown verbatim (escaped)
/// when present.
#[must_use]
pub fn render(status: &Status, message: &str, traceback: Option<&str>, server: &str) -> String {
    let message = if message.is_empty() { status.reason() } else { message };
    let status = escape(&status.to_string());
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n    <meta http-equiv=\"Content-Type\" content=\"text/html; charset=utf-8\">\n    <title>{status}</title>\n    <style type=\"text/css\">\n    {STYLE}\n    </style>\n</head>\n<body>\n    <h2>{status}</h2>\n    <p>{message}</p>\n    <pre id=\"traceback\">{traceback}</pre>\n    <div id=\"powered_by\"><span>Powered by {server}</span></div>\n</body>\n</html>\n",
        message = escape(message),
        traceback = escape(traceback.unwrap_or("")),
        server = escape(server),
    )
}

/// Escape text for an HTML body or double-quoted attribute.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}
