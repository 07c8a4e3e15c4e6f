//! Head content assembly and inline-script sanitization.
//!
//! Controller document metadata turns into head markup here: `<meta>`
//! tags, the Google Analytics and Hotjar bootstrap blocks, and custom
//! inline scripts. Everything attribute-valued is escaped; custom
//! script text passes through a token blacklist first.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::controller::{DocMeta, MetaTag};
use crate::utils::html;

/// Token patterns never allowed in user-supplied inline scripts. Each
/// occurrence is replaced with an inert marker comment. Defense in
/// depth, not full sanitization.
const BLOCKED_TOKENS: [&str; 10] = [
    "eval(",
    "Function(",
    "setTimeout(",
    "setInterval(",
    "document.write(",
    "innerHTML",
    "outerHTML",
    "document.cookie",
    "localStorage",
    "sessionStorage",
];

static BLOCKED: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = BLOCKED_TOKENS
        .iter()
        .map(|token| regex::escape(token))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)({alternation})")).unwrap()
});

/// Replace every blacklisted token with `/* BLOCKED: token */`.
///
/// Detection is case-insensitive; the marker carries the canonical
/// token spelling.
pub fn sanitize_inline_script(script: &str) -> String {
    BLOCKED
        .replace_all(script, |caps: &Captures| {
            let canonical = BLOCKED_TOKENS
                .iter()
                .find(|token| token.eq_ignore_ascii_case(&caps[1]))
                .copied()
                .unwrap_or(&caps[1]);
            format!("/* BLOCKED: {canonical} */")
        })
        .into_owned()
}

/// Build the head markup for one document's metadata.
///
/// Lines are indented to sit inside the page shell's `<head>`.
pub fn head_content(doc: &DocMeta) -> String {
    let mut head = String::new();

    for tag in &doc.head.meta {
        head.push_str(&format!("    {}\n", meta_tag(tag)));
    }

    if let Some(id) = &doc.head.script.analytics_id {
        let id = script_id(id);
        head.push_str(&format!(
            "    <script async src=\"https://www.googletagmanager.com/gtag/js?id={id}\"></script>\n"
        ));
        head.push_str(&format!(
            "    <script>window.dataLayer = window.dataLayer || [];function gtag(){{dataLayer.push(arguments);}}gtag('js', new Date());gtag('config', '{id}');</script>\n"
        ));
    }

    if let Some(id) = &doc.head.script.hotjar {
        let id = script_id(id);
        head.push_str(&format!(
            "    <script>(function(h,o,t,j,a,r){{h.hj=h.hj||function(){{(h.hj.q=h.hj.q||[]).push(arguments)}};h._hjSettings={{hjid:{id},hjsv:6}};a=o.getElementsByTagName('head')[0];r=o.createElement('script');r.async=1;r.src=t+h._hjSettings.hjid+j+h._hjSettings.hjsv;a.appendChild(r);}})(window,document,'https://static.hotjar.com/c/hotjar-','.js?sv=');</script>\n"
        ));
    }

    for script in &doc.head.script.custom {
        head.push_str(&format!(
            "    <script>{}</script>\n",
            sanitize_inline_script(script)
        ));
    }

    head
}

/// One `<meta>` tag from its attribute map, declaration order kept.
fn meta_tag(tag: &MetaTag) -> String {
    let mut markup = String::from("<meta");
    for (name, value) in tag {
        if !is_attr_name(name) {
            continue;
        }
        let value = match value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        markup.push_str(&format!(" {name}=\"{}\"", html::escape_attr(&value)));
    }
    markup.push('>');
    markup
}

/// Attribute names come from controller data; anything beyond plain
/// attribute characters is dropped rather than escaped.
fn is_attr_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ':' || c == '_')
}

/// Analytics/Hotjar ids are interpolated into script text, so they are
/// reduced to the id alphabet instead of escaped.
fn script_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
