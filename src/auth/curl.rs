//! Cookie and URL extraction from pasted cURL commands.
//!
//! The easiest way for an operator to hand over a fresh session is to copy
//! the archive request from browser devtools as a cURL command. These
//! helpers pull the Cookie header and the takeout URL back out of that
//! paste; raw cookie strings (with or without a `Cookie:` prefix or
//! surrounding quotes) pass through unchanged.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Matches the Cookie header argument of a cURL command.
#[allow(clippy::expect_used)]
static CURL_COOKIE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)-H\s*['"]Cookie:\s*([^'"]+)['"]"#).expect("cookie regex is valid")
    // Static pattern, safe to panic
});

/// Matches the request URL of a cURL command.
#[allow(clippy::expect_used)]
static CURL_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)curl\s+['"]?(https?://[^'"\s]+)['"]?"#).expect("url regex is valid")
    // Static pattern, safe to panic
});

/// Extracts the cookie value from a cURL command or raw cookie string.
///
/// Falls back to returning the trimmed input (minus any surrounding quotes)
/// when it does not look like a cURL command, so operators can paste the
/// bare cookie value directly.
#[must_use]
pub fn extract_cookie(input: &str) -> String {
    let looks_like_curl = input.to_lowercase().contains("curl")
        || input.contains("-H 'Cookie:")
        || input.contains("-H \"Cookie:");

    if looks_like_curl {
        if let Some(captures) = CURL_COOKIE_PATTERN.captures(input) {
            let cookie = captures[1].trim().to_string();
            debug!(len = cookie.len(), "extracted cookie from cURL command");
            return cookie;
        }
    }

    let trimmed = input.trim();
    if let Some(rest) = strip_prefix_ignore_case(trimmed, "cookie:") {
        return rest.trim().to_string();
    }

    let mut cookie = trimmed;
    if (cookie.starts_with('\'') && cookie.ends_with('\'') && cookie.len() >= 2)
        || (cookie.starts_with('"') && cookie.ends_with('"') && cookie.len() >= 2)
    {
        cookie = &cookie[1..cookie.len() - 1];
    }
    cookie.to_string()
}

/// Extracts the takeout download URL from a cURL command, if one is present.
#[must_use]
pub fn extract_url(input: &str) -> Option<String> {
    let captures = CURL_URL_PATTERN.captures(input)?;
    let url = captures[1].to_string();
    if url.to_lowercase().contains("takeout") {
        debug!(url = %url, "extracted URL from cURL command");
        Some(url)
    } else {
        None
    }
}

fn strip_prefix_ignore_case<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    if input.len() >= prefix.len() && input[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&input[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURL_SAMPLE: &str = concat!(
        "curl 'https://takeout.example.com/takeout-1-001.zip?j=abc' ",
        "-H 'accept: */*' ",
        "-H 'Cookie: SID=abc123; HSID=def456' ",
        "--compressed"
    );

    #[test]
    fn test_extract_cookie_from_curl_command() {
        assert_eq!(extract_cookie(CURL_SAMPLE), "SID=abc123; HSID=def456");
    }

    #[test]
    fn test_extract_cookie_from_double_quoted_curl() {
        let input = r#"curl "https://takeout.example.com/takeout-1-001.zip" -H "Cookie: SID=xyz""#;
        assert_eq!(extract_cookie(input), "SID=xyz");
    }

    #[test]
    fn test_extract_cookie_from_prefixed_string() {
        assert_eq!(extract_cookie("Cookie: SID=abc"), "SID=abc");
        assert_eq!(extract_cookie("cookie: SID=abc"), "SID=abc");
    }

    #[test]
    fn test_extract_cookie_strips_surrounding_quotes() {
        assert_eq!(extract_cookie("'SID=abc; HSID=def'"), "SID=abc; HSID=def");
        assert_eq!(extract_cookie("\"SID=abc\""), "SID=abc");
    }

    #[test]
    fn test_extract_cookie_passes_raw_value_through() {
        assert_eq!(extract_cookie("  SID=abc; HSID=def  "), "SID=abc; HSID=def");
    }

    #[test]
    fn test_extract_url_from_curl_command() {
        assert_eq!(
            extract_url(CURL_SAMPLE).as_deref(),
            Some("https://takeout.example.com/takeout-1-001.zip?j=abc")
        );
    }

    #[test]
    fn test_extract_url_rejects_non_takeout() {
        let input = "curl 'https://example.com/other.zip' -H 'Cookie: SID=abc'";
        assert_eq!(extract_url(input), None);
    }

    #[test]
    fn test_extract_url_absent_from_raw_cookie() {
        assert_eq!(extract_url("SID=abc; HSID=def"), None);
    }
}
