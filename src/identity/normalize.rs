use crate::{IdentityError, IdentityResult};
use url::Url;

/// Query parameters that only carry session or tracking noise
const SESSION_PARAMS: &[&str] = &["phpsessid", "sesc", "fbclid", "gclid", "mc_eid"];

/// Normalizes a raw link into its canonical string form
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase the host and resolve dot segments (done by `url`)
/// 3. Remove the fragment (everything after #)
/// 4. Remove session and tracking parameters, whether separated by `&` or `;`
/// 5. Remove the empty query string (trailing ?)
///
/// The result is stable: `normalize(normalize(x)) == normalize(x)`.
///
/// # Examples
///
/// ```
/// use lurker::identity::normalize;
///
/// let url = normalize("https://Forum.Example.org/index.php?PHPSESSID=abc;topic=9.0#msg1").unwrap();
/// assert_eq!(url, "https://forum.example.org/index.php?topic=9.0");
/// ```
pub fn normalize(raw: &str) -> IdentityResult<String> {
    normalize_url(raw).map(|url| url.to_string())
}

/// Same as [`normalize`] but keeps the parsed [`Url`]
pub fn normalize_url(raw: &str) -> IdentityResult<Url> {
    let raw = raw.trim();
    let mut url = Url::parse(raw).map_err(|e| IdentityError::Parse {
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(IdentityError::InvalidScheme(url.scheme().to_string()));
    }

    url.set_fragment(None);

    if let Some(query) = url.query().map(str::to_string) {
        let segments: Vec<_> = split_query(&query)
            .into_iter()
            .filter(|(_, segment)| !is_session_param(segment))
            .collect();
        set_segments(&mut url, &segments);
    }

    Ok(url)
}

/// Splits a query into segments, remembering the separator before each one
///
/// Forum software mixes `&` and `;` as separators (`?topic=9.0;topicseen`),
/// so both are recognised and preserved.
pub(crate) fn split_query(query: &str) -> Vec<(Option<char>, &str)> {
    let mut segments = Vec::new();
    let mut separator = None;
    let mut start = 0;

    for (i, c) in query.char_indices() {
        if c == '&' || c == ';' {
            segments.push((separator, &query[start..i]));
            separator = Some(c);
            start = i + 1;
        }
    }
    segments.push((separator, &query[start..]));

    segments
}

/// Joins segments back into a query string, dropping empty ones
pub(crate) fn join_query<S: AsRef<str>>(segments: &[(Option<char>, S)]) -> String {
    let mut query = String::new();

    for (separator, segment) in segments {
        let segment = segment.as_ref();
        if segment.is_empty() {
            continue;
        }
        if !query.is_empty() {
            query.push(separator.unwrap_or('&'));
        }
        query.push_str(segment);
    }

    query
}

/// Replaces the query of `url`, removing it entirely when nothing is left
pub(crate) fn set_segments<S: AsRef<str>>(url: &mut Url, segments: &[(Option<char>, S)]) {
    let query = join_query(segments);
    if query.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&query));
    }
}

/// Returns the key part of a `key=value` segment
pub(crate) fn segment_key(segment: &str) -> &str {
    segment.split('=').next().unwrap_or(segment)
}

fn is_session_param(segment: &str) -> bool {
    let key = segment_key(segment).to_ascii_lowercase();
    SESSION_PARAMS.contains(&key.as_str()) || key.starts_with("utm_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_fragment() {
        let result = normalize("https://forum.example.org/index.php?topic=5.0#msg10").unwrap();
        assert_eq!(result, "https://forum.example.org/index.php?topic=5.0");
    }

    #[test]
    fn test_remove_leading_session_param() {
        let result =
            normalize("https://forum.example.org/index.php?PHPSESSID=abc123&board=5.0").unwrap();
        assert_eq!(result, "https://forum.example.org/index.php?board=5.0");
    }

    #[test]
    fn test_remove_trailing_session_param() {
        let result =
            normalize("https://forum.example.org/index.php?board=5.0&PHPSESSID=abc123").unwrap();
        assert_eq!(result, "https://forum.example.org/index.php?board=5.0");
    }

    #[test]
    fn test_remove_semicolon_session_param() {
        let result =
            normalize("https://forum.example.org/index.php?action=recent;PHPSESSID=x;start=10")
                .unwrap();
        assert_eq!(
            result,
            "https://forum.example.org/index.php?action=recent;start=10"
        );
    }

    #[test]
    fn test_only_session_param_leaves_no_query() {
        let result = normalize("https://forum.example.org/index.php?PHPSESSID=abc").unwrap();
        assert_eq!(result, "https://forum.example.org/index.php");
    }

    #[test]
    fn test_remove_tracking_params() {
        let result =
            normalize("https://forum.example.org/index.php?utm_source=x&topic=1.0&fbclid=y")
                .unwrap();
        assert_eq!(result, "https://forum.example.org/index.php?topic=1.0");
    }

    #[test]
    fn test_lowercase_host() {
        let result = normalize("https://FORUM.Example.ORG/index.php").unwrap();
        assert_eq!(result, "https://forum.example.org/index.php");
    }

    #[test]
    fn test_keeps_separator_style() {
        let result = normalize("https://forum.example.org/index.php?topic=9.0;topicseen").unwrap();
        assert_eq!(result, "https://forum.example.org/index.php?topic=9.0;topicseen");
    }

    #[test]
    fn test_drops_empty_segments() {
        let result = normalize("https://forum.example.org/index.php?a=1&&b=2&").unwrap();
        assert_eq!(result, "https://forum.example.org/index.php?a=1&b=2");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "https://forum.example.org/index.php?PHPSESSID=abc;topic=9.20;topicseen#new",
            "http://WWW.forum.example.org/a/../index.php?board=5.0&PHPSESSID=1",
            "https://forum.example.org/index.php?&&utm_medium=mail;;action=recent;start=10",
            "https://forum.example.org/files/image with space.png?x=1#frag",
            "https://forum.example.org",
            "https://forum.example.org/index.php?",
        ];

        for input in inputs {
            let once = normalize(input).unwrap();
            let twice = normalize(&once).unwrap();
            assert_eq!(once, twice, "normalize is not idempotent for {}", input);
        }
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize("ftp://forum.example.org/file");
        assert!(matches!(result, Err(IdentityError::InvalidScheme(_))));
    }

    #[test]
    fn test_malformed_url() {
        let result = normalize("not a url");
        assert!(matches!(result, Err(IdentityError::Parse { .. })));
    }

    #[test]
    fn test_split_and_join_roundtrip() {
        let segments = split_query("a=1;b=2&c=3");
        assert_eq!(
            segments,
            vec![(None, "a=1"), (Some(';'), "b=2"), (Some('&'), "c=3")]
        );
        assert_eq!(join_query(&segments), "a=1;b=2&c=3");
    }
}
