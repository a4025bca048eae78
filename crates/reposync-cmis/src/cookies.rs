//! `Set-Cookie` parsing for session reuse
//!
//! Only the attributes the authentication provider stores are read:
//! `Domain`, `Path`, `Expires` and `Max-Age` (which wins over `Expires`).

use chrono::{DateTime, Duration, Utc};
use reposync_core::ports::StoredCookie;
use url::Url;

/// Parse one `Set-Cookie` header value received from `origin`
pub(crate) fn parse_set_cookie(header: &str, origin: &Url, now: DateTime<Utc>) -> Option<StoredCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = StoredCookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        domain: origin.host_str().unwrap_or_default().to_string(),
        path: "/".to_string(),
        expires: None,
    };
    let mut max_age = None;

    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((key, val)) => (key.trim(), val.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                cookie.domain = val.trim_start_matches('.').to_string();
            }
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            "expires" => {
                cookie.expires = DateTime::parse_from_rfc2822(val)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            "max-age" => max_age = val.parse::<i64>().ok(),
            _ => {}
        }
    }

    if let Some(seconds) = max_age {
        cookie.expires = Some(now + Duration::seconds(seconds));
    }
    Some(cookie)
}

/// Insert or replace `cookie` by name, domain and path
pub(crate) fn merge(jar: &mut Vec<StoredCookie>, cookie: StoredCookie) {
    jar.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
    jar.push(cookie);
}

/// Value for a `Cookie` request header, `None` if nothing applies
pub(crate) fn header_value(jar: &[StoredCookie], now: DateTime<Utc>) -> Option<String> {
    let pairs: Vec<String> = jar
        .iter()
        .filter(|c| !c.is_expired(now))
        .map(StoredCookie::header_pair)
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
