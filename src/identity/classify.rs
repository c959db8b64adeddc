use super::normalize::{normalize_url, segment_key, set_segments, split_query};
use super::{PageIdentity, PageKind};
use crate::{IdentityError, IdentityResult};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// `topic=N`, `topic=N.O`, `topic=N.msgM` or `topic=N.new`
static TOPIC_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:\.(?:(\d+)|msg(\d+)|new))?$").expect("valid topic regex")
});

/// `board=N` or `board=N.O`
static BOARD_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:\.(\d+))?$").expect("valid board regex"));

/// Query keys that never distinguish one topic page from another
const TOPIC_NOISE: &[&str] = &["board", "topicseen"];

/// Normalizes `raw` and detects which kind of page it points at
///
/// Markers are checked in order of precedence: `topic=N.msgM` is a post,
/// `topic=N[.O]` a topic page, `board=N[.O]` a board page. Everything else is a
/// generic index page whose offset is read from `start=O`.
///
/// # Examples
///
/// ```
/// use lurker::identity::{classify, PageKind};
///
/// let id = classify("https://forum.example.org/index.php?board=5.0").unwrap();
/// assert_eq!((id.kind, id.id, id.offset), (PageKind::Board, 5, 0));
/// ```
pub fn classify(raw: &str) -> IdentityResult<PageIdentity> {
    let url = normalize_url(raw)?;
    let query = url.query().unwrap_or_default().to_string();

    let topic = query_value(&query, "topic").and_then(|v| TOPIC_VALUE.captures(v));
    if let Some(caps) = topic {
        let topic_id = parse_number(&url, caps.get(1).map(|m| m.as_str()))?;

        if let Some(msg) = caps.get(3) {
            let msg_id = parse_number(&url, Some(msg.as_str()))?;
            let marker = format!("topic={}.msg{}", topic_id, msg_id);
            return Ok(PageIdentity {
                kind: PageKind::Post,
                id: msg_id,
                offset: 0,
                canonical_url: render(&url, "topic", Some(marker), TOPIC_NOISE),
            });
        }

        let offset = parse_offset(&url, caps.get(2).map(|m| m.as_str()))?;
        return Ok(build(&url, PageKind::Topic, topic_id, offset));
    }

    let board = query_value(&query, "board").and_then(|v| BOARD_VALUE.captures(v));
    if let Some(caps) = board {
        let board_id = parse_number(&url, caps.get(1).map(|m| m.as_str()))?;
        let offset = parse_offset(&url, caps.get(2).map(|m| m.as_str()))?;
        return Ok(build(&url, PageKind::Board, board_id, offset));
    }

    let offset = match query_value(&query, "start") {
        Some(value) if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
            parse_number(&url, Some(value))?
        }
        _ => 0,
    };
    Ok(build(&url, PageKind::Index, 0, offset))
}

/// Classifies `raw` and checks that it is of the `expected` kind
///
/// Assets carry no markers, so for them the URL is only normalized.
pub fn parse_as(expected: PageKind, raw: &str) -> IdentityResult<PageIdentity> {
    if expected == PageKind::Asset {
        return PageIdentity::asset(raw);
    }

    let identity = classify(raw)?;
    if identity.kind != expected {
        return Err(IdentityError::InvalidIdentity {
            expected: expected.to_string(),
            url: identity.canonical_url,
        });
    }
    Ok(identity)
}

/// Re-renders a canonical URL with a different pagination offset
pub(super) fn rewrite(
    kind: PageKind,
    id: i64,
    offset: i64,
    canonical_url: &str,
) -> IdentityResult<PageIdentity> {
    let url = parse_canonical(canonical_url)?;
    Ok(build(&url, kind, id, offset))
}

/// Renders the offset-less form of a paginated identity
pub(super) fn entity_form(identity: &PageIdentity) -> Option<String> {
    let url = Url::parse(&identity.canonical_url).ok()?;
    let rendered = match identity.kind {
        PageKind::Board => render(&url, "board", Some(format!("board={}", identity.id)), &[]),
        PageKind::Topic => render(
            &url,
            "topic",
            Some(format!("topic={}", identity.id)),
            TOPIC_NOISE,
        ),
        PageKind::Index => render(&url, "start", None, &[]),
        PageKind::Post | PageKind::Asset => return None,
    };
    Some(rendered)
}

/// Builds the post identity for message `msg_id` of a topic
pub(super) fn post_form(topic: &PageIdentity, msg_id: i64) -> IdentityResult<PageIdentity> {
    let url = parse_canonical(&topic.canonical_url)?;
    let marker = format!("topic={}.msg{}", topic.id, msg_id);
    Ok(PageIdentity {
        kind: PageKind::Post,
        id: msg_id,
        offset: 0,
        canonical_url: render(&url, "topic", Some(marker), TOPIC_NOISE),
    })
}

/// Recovers the first page of the topic a post link points into
pub(super) fn topic_of_post(post: &PageIdentity) -> IdentityResult<PageIdentity> {
    let url = parse_canonical(&post.canonical_url)?;
    let query = url.query().unwrap_or_default().to_string();
    let caps = query_value(&query, "topic")
        .and_then(|v| TOPIC_VALUE.captures(v))
        .ok_or_else(|| IdentityError::InvalidIdentity {
            expected: "post".to_string(),
            url: post.canonical_url.clone(),
        })?;
    let topic_id = parse_number(&url, caps.get(1).map(|m| m.as_str()))?;
    Ok(build(&url, PageKind::Topic, topic_id, 0))
}

fn parse_canonical(canonical_url: &str) -> IdentityResult<Url> {
    Url::parse(canonical_url).map_err(|e| IdentityError::Parse {
        url: canonical_url.to_string(),
        message: e.to_string(),
    })
}

fn build(url: &Url, kind: PageKind, id: i64, offset: i64) -> PageIdentity {
    let canonical_url = match kind {
        PageKind::Board => render(url, "board", Some(format!("board={}.{}", id, offset)), &[]),
        PageKind::Topic => render(
            url,
            "topic",
            Some(format!("topic={}.{}", id, offset)),
            TOPIC_NOISE,
        ),
        // offset 0 is written as "no start", so both spellings dedup together
        PageKind::Index => {
            let marker = (offset > 0).then(|| format!("start={}", offset));
            render(url, "start", marker, &[])
        }
        PageKind::Post | PageKind::Asset => url.to_string(),
    };

    PageIdentity {
        kind,
        id,
        offset,
        canonical_url,
    }
}

/// Rewrites the first `key` segment to `marker` (or removes it when `None`)
///
/// Later duplicates of `key` and every key listed in `drop` are removed. A
/// marker for a key that is not present yet is appended with `;`.
fn render(url: &Url, key: &str, marker: Option<String>, drop: &[&str]) -> String {
    let query = url.query().unwrap_or_default().to_string();
    let mut segments: Vec<(Option<char>, String)> = Vec::new();
    let mut replaced = false;

    for (separator, segment) in split_query(&query) {
        let name = segment_key(segment);
        if drop.contains(&name) {
            continue;
        }
        if name == key {
            if !replaced {
                if let Some(marker) = &marker {
                    segments.push((separator, marker.clone()));
                }
                replaced = true;
            }
            continue;
        }
        segments.push((separator, segment.to_string()));
    }

    if !replaced {
        if let Some(marker) = marker {
            segments.push((Some(';'), marker));
        }
    }

    let mut url = url.clone();
    set_segments(&mut url, &segments);
    url.to_string()
}

fn query_value<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    split_query(query)
        .into_iter()
        .find(|(_, segment)| segment_key(segment) == key)
        .map(|(_, segment)| segment.split_once('=').map(|(_, v)| v).unwrap_or(""))
}

fn parse_number(url: &Url, digits: Option<&str>) -> IdentityResult<i64> {
    let digits = digits.unwrap_or("0");
    digits.parse::<i64>().map_err(|e| IdentityError::Parse {
        url: url.to_string(),
        message: format!("invalid number '{}': {}", digits, e),
    })
}

fn parse_offset(url: &Url, digits: Option<&str>) -> IdentityResult<i64> {
    match digits {
        Some(d) => parse_number(url, Some(d)),
        None => Ok(0),
    }
}
