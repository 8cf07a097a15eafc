//! Session link resolution
//!
//! Players share private servers through several URL shapes (AppsFlyer
//! redirectors, `deep_link_value` links, `/share` pages). The client only
//! joins reliably from its own `roblox://` share-link URI, so every shape is
//! normalized to that before launch.

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::{debug, warn};

/// URI scheme the client registers for deep links
pub const LAUNCH_SCHEME: &str = "roblox";

/// Which link shape produced the launch URI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// `af_web_dp=<percent-encoded target>` redirector
    Redirector,
    /// `deep_link_value=` link
    DeepLinkValue,
    /// `/share` page with a `code=` parameter
    ShareLink,
    /// Already a `roblox://` URI
    Canonical,
    /// Nothing recognized; the input is passed through
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    pub uri: String,
    pub kind: LinkKind,
}

static CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[?&#])code=([^&#\s]+)").expect("Invalid code regex"));

static REDIRECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]af_web_dp=([^&#\s]+)").expect("Invalid redirect regex"));

static SHARE_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[a-z]+://[^/?#]+(?:/[^?#]*)?/share").expect("Invalid share regex"));

/// Canonical share-link URI for a private server code
pub fn share_link_uri(code: &str) -> String {
    format!("{}://navigation/share_links?code={}&type=Server", LAUNCH_SCHEME, code)
}

/// Direct launch URI for a place id
pub fn place_uri(place_id: &str) -> String {
    format!("{}://placeId={}", LAUNCH_SCHEME, place_id)
}

fn is_canonical(link: &str) -> bool {
    link.get(..LAUNCH_SCHEME.len() + 3)
        .map(|prefix| prefix.eq_ignore_ascii_case(&format!("{}://", LAUNCH_SCHEME)))
        .unwrap_or(false)
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

fn extract_code(text: &str) -> Option<String> {
    CODE_RE
        .captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

fn from_redirector(link: &str) -> Option<String> {
    let target = REDIRECT_RE.captures(link)?.get(1)?.as_str();
    extract_code(&decode(target))
}

fn from_deep_link_value(link: &str) -> Option<String> {
    if !link.contains("deep_link_value=") {
        return None;
    }
    // The value is often percent-encoded as a whole, hiding `code=` behind `code%3D`
    extract_code(link).or_else(|| extract_code(&decode(link)))
}

fn from_share_path(link: &str) -> Option<String> {
    if !SHARE_PATH_RE.is_match(link) {
        return None;
    }
    extract_code(link)
}

/// Normalize a session link and report which shape it had
///
/// Surrounding whitespace is ignored for matching; links that are passed
/// through come back exactly as given.
pub fn resolve_link(original: &str) -> ResolvedLink {
    let link = original.trim();

    if is_canonical(link) {
        return ResolvedLink {
            uri: original.to_string(),
            kind: LinkKind::Canonical,
        };
    }

    let extracted = from_redirector(link)
        .map(|code| (code, LinkKind::Redirector))
        .or_else(|| from_deep_link_value(link).map(|code| (code, LinkKind::DeepLinkValue)))
        .or_else(|| from_share_path(link).map(|code| (code, LinkKind::ShareLink)));

    match extracted {
        Some((code, kind)) => {
            debug!("Extracted share code {} from {:?} link", code, kind);
            ResolvedLink {
                uri: share_link_uri(&code),
                kind,
            }
        }
        None => {
            warn!("Unrecognized session link, opening as-is: {}", link);
            ResolvedLink {
                uri: original.to_string(),
                kind: LinkKind::Unrecognized,
            }
        }
    }
}

/// Normalize a session link into the URI the client accepts
pub fn resolve(link: &str) -> String {
    resolve_link(link).uri
}
