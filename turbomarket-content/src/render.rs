use std::fmt::Write;

use turbomarket_common::EmailContent;

/// Escape text for inclusion in HTML element content or attribute values
pub(crate) fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Assemble the full HTML document for a bulk send.
///
/// `body_html` and `footer_html` are model-authored HTML and are inserted
/// as-is; every other field is plain text and is escaped.
#[must_use]
pub fn render_html(content: &EmailContent) -> String {
    let mut html = String::from("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\">");
    let _ = write!(html, "<title>{}</title></head>\n<body>\n", escape(&content.subject));

    if !content.preheader_text.is_empty() {
        let _ = writeln!(
            html,
            "<div style=\"display:none;max-height:0;overflow:hidden\">{}</div>",
            escape(&content.preheader_text)
        );
    }

    if let Some(url) = &content.hero_image_url {
        let _ = writeln!(
            html,
            "<img src=\"{}\" alt=\"{}\" style=\"width:100%;height:auto\">",
            escape(url),
            escape(&content.subject)
        );
    }

    if !content.hook.is_empty() {
        let _ = writeln!(html, "<h1>{}</h1>", escape(&content.hook));
    }

    html.push_str(&content.body_html);
    html.push('\n');

    if !content.cta_text.is_empty() {
        let _ = writeln!(html, "<p class=\"cta\"><strong>{}</strong></p>", escape(&content.cta_text));
    }

    if !content.footer_html.is_empty() {
        let _ = writeln!(html, "<footer>{}</footer>", content.footer_html);
    }

    html.push_str("</body>\n</html>\n");
    html
}
