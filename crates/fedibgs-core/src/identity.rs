//! Deterministic identifiers and URL canonicalization.

use md5::{Digest, Md5};
use uuid::Uuid;

/// Image extensions the inference service can fetch and embed.
const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

/// Derive the post id from its URL.
///
/// The UUID's 16 bytes are the raw MD5 digest of the URL's UTF-8 bytes, with
/// no version or variant bits applied. Every ingestion process in every run
/// must agree on this value: it is the only dedup key in the system, so the
/// byte layout must not change.
pub fn post_id(post_url: &str) -> Uuid {
    let digest = Md5::digest(post_url.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    Uuid::from_bytes(bytes)
}

/// Remove the query string (and anything after it) from a URL.
pub fn strip_query(url: &str) -> &str {
    match url.find('?') {
        Some(pos) => &url[..pos],
        None => url,
    }
}

/// Whether a canonical URL points at an image the inference service can load.
pub fn is_embeddable_image_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://"))
        && IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}
