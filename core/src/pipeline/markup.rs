//! Embedded-resource references in chapter markup and their inlining as data URIs.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid img regex")
});

static SVG_IMAGE_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<image\b[^>]*?\s(?:xlink:)?href\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid svg image regex")
});

/// Location of a resource path inside the markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub path: String,
    start: usize,
    end: usize,
}

/// Every resolvable resource reference in document order, with character references in the
/// attribute value decoded.
///
/// `data:` URIs and absolute `scheme://` URLs are already self-contained and are skipped.
pub fn scan_references(markup: &str) -> Vec<ResourceRef> {
    let mut refs: Vec<ResourceRef> = [&*IMG_SRC, &*SVG_IMAGE_HREF]
        .into_iter()
        .flat_map(|regex| regex.captures_iter(markup))
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .filter(|value| is_resolvable(value.as_str()))
        .map(|value| ResourceRef {
            path: html_escape::decode_html_entities(value.as_str()).into_owned(),
            start: value.start(),
            end: value.end(),
        })
        .collect();
    refs.sort_by_key(|reference| reference.start);
    refs
}

/// Distinct paths, in first-seen order.
pub fn unique_paths(refs: &[ResourceRef]) -> Vec<&str> {
    let mut seen = HashSet::new();
    refs.iter().map(|r| r.path.as_str()).filter(|path| seen.insert(*path)).collect()
}

fn is_resolvable(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return false;
    }
    let lower = trimmed.to_ascii_lowercase();
    !(lower.starts_with("data:") || lower.contains("://"))
}

/// Replace each reference whose path has an entry in `data_uris`; others are left untouched.
pub fn inline_resources(
    markup: &str,
    refs: &[ResourceRef],
    data_uris: &HashMap<String, String>,
) -> String {
    let extra: usize = refs.iter().filter_map(|r| data_uris.get(&r.path).map(String::len)).sum();
    let mut out = String::with_capacity(markup.len() + extra);
    let mut cursor = 0;
    for reference in refs {
        let Some(uri) = data_uris.get(&reference.path) else {
            continue;
        };
        out.push_str(&markup[cursor..reference.start]);
        out.push_str(uri);
        cursor = reference.end;
    }
    out.push_str(&markup[cursor..]);
    out
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// MIME type inferred from the path extension.
pub fn mime_from_path(path: &str) -> &'static str {
    let without_fragment = path.split(['#', '?']).next().unwrap_or(path);
    match Path::new(without_fragment)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("avif") => "image/avif",
        _ => "application/octet-stream",
    }
}
