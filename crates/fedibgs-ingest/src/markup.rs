//! Markup stripping and embedding-input preparation for post content.

use scraper::node::Node;
use scraper::Html;

/// Reduce a status's HTML body to plain text.
///
/// Text nodes are concatenated with entities decoded. Paragraphs and line
/// breaks become newlines so that adjacent paragraphs do not fuse words.
pub fn strip_tags(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());

    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if el.name() == "br" => out.push('\n'),
            Node::Element(el) if el.name() == "p" && !out.is_empty() && !out.ends_with('\n') => {
                out.push('\n')
            }
            _ => {}
        }
    }

    out.trim().to_string()
}

/// Remove URL schemes so the encoder never mistakes text for an image URI.
pub fn defang_urls(text: &str) -> String {
    text.replace("http://", "")
        .replace("https://", "")
        .replace("data:", "data.")
}

/// The text sent to the encoder for a post body, or `None` when nothing
/// remains after stripping.
pub fn embedding_text(plain: &str) -> Option<String> {
    let defanged = defang_urls(plain);
    let trimmed = defanged.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
