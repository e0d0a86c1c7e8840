//! Provider request signatures (Twilio scheme).
//!
//! The signed string is the absolute request URL followed by every form parameter
//! as `key` + `value`, sorted by key. The MAC is HMAC-SHA1 keyed by the account
//! auth token, sent base64-encoded in `X-Twilio-Signature`.
//!
//! Proxies and the provider disagree on whether a default port (`:443`, `:80`)
//! belongs in the URL, so both spellings are accepted.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use url::Url;

type HmacSha1 = Hmac<Sha1>;

/// `X-Twilio-Signature`, lowercased as stored in header maps.
pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

fn mac_for(auth_token: &str, url: &str, params: &[(String, String)]) -> Option<HmacSha1> {
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes()).ok()?;
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    mac.update(url.as_bytes());
    for (k, v) in sorted {
        mac.update(k.as_bytes());
        mac.update(v.as_bytes());
    }
    Some(mac)
}

/// Signature the provider would send for this request.
pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> Option<String> {
    let mac = mac_for(auth_token, url, params)?;
    Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// `url` as given, then with and without its scheme's default port.
/// A non-default port is part of the signed URL and is never rewritten.
pub fn candidate_urls(url: &str) -> Vec<String> {
    let mut candidates = vec![url.to_string()];
    let Ok(parsed) = Url::parse(url) else {
        return candidates;
    };
    // `port()` is None for an explicit default port too.
    if parsed.port().is_some() {
        return candidates;
    }
    let (Some(host), Some(port)) = (parsed.host_str(), parsed.port_or_known_default()) else {
        return candidates;
    };
    let mut rest = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        rest.push('?');
        rest.push_str(query);
    }
    for variant in [
        format!("{}://{}:{}{}", parsed.scheme(), host, port, rest),
        format!("{}://{}{}", parsed.scheme(), host, rest),
    ] {
        if !candidates.contains(&variant) {
            candidates.push(variant);
        }
    }
    candidates
}

/// Constant-time check of `signature` against the expected MAC for any spelling of `url`.
pub fn validate(auth_token: &str, url: &str, params: &[(String, String)], signature: &str) -> bool {
    let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };
    candidate_urls(url).iter().any(|candidate| {
        mac_for(auth_token, candidate, params)
            .map(|mac| mac.verify_slice(&provided).is_ok())
            .unwrap_or(false)
    })
}
