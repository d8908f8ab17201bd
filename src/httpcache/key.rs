//! Cache key derivation: method + canonical URL + the `Vary`-named headers.

use url::Url;

pub struct CacheKeyParts<'a> {
    pub method: &'a str,
    pub url: &'a str,
    /// `(header name, header value)` pairs for every header named in the
    /// response's negotiated `Vary`, in the order `Vary` listed them.
    pub vary_headers: &'a [(String, String)],
}

/// Canonicalizes the URL's query string (sorted by key) so equivalent
/// requests with reordered params share a cache key.
fn canonicalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
            pairs.sort();
            url.set_query(None);
            if !pairs.is_empty() {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (k, v) in &pairs {
                    serializer.append_pair(k, v);
                }
                url.set_query(Some(&serializer.finish()));
            }
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

pub fn cache_key(parts: &CacheKeyParts) -> String {
    let canonical_url = canonicalize_url(parts.url);
    let vary_fingerprint: String = parts
        .vary_headers
        .iter()
        .map(|(name, value)| format!("{}={}", name.to_ascii_lowercase(), value))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}:{}:{}", parts.method.to_ascii_uppercase(), canonical_url, vary_fingerprint)
}

/// Extracts `max-age` from a `Cache-Control` header value, in seconds.
pub fn parse_cache_control_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let directive = directive.trim();
        let (name, value) = directive.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reordered_query_params_share_a_key() {
        let a = cache_key(&CacheKeyParts {
            method: "GET",
            url: "https://api.example.com/v1/models?b=2&a=1",
            vary_headers: &[],
        });
        let b = cache_key(&CacheKeyParts {
            method: "get",
            url: "https://api.example.com/v1/models?a=1&b=2",
            vary_headers: &[],
        });
        assert_eq!(a, b);
    }

    #[test]
    fn differing_vary_header_values_differ() {
        let a = cache_key(&CacheKeyParts {
            method: "GET",
            url: "https://api.example.com/v1/models",
            vary_headers: &[("Accept-Language".to_string(), "en".to_string())],
        });
        let b = cache_key(&CacheKeyParts {
            method: "GET",
            url: "https://api.example.com/v1/models",
            vary_headers: &[("Accept-Language".to_string(), "fr".to_string())],
        });
        assert_ne!(a, b);
    }

    #[test]
    fn max_age_parses_from_cache_control() {
        assert_eq!(parse_cache_control_max_age("max-age=60, public"), Some(60));
        assert_eq!(parse_cache_control_max_age("no-store"), None);
    }
}
