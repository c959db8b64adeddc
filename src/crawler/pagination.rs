//! Pagination expansion for boards and topics
//!
//! The first page of a listing advertises its last page through navigation
//! links; every page in between is enqueued from there.

use crate::crawler::{Document, SelectorError};
use crate::identity::{classify, PageIdentity, PageKind};
use crate::processor::{CrawlContext, ProcessError};

/// Topics per board page and posts per topic page
pub const PAGE_SIZE: i64 = 20;

const NAVIGATION_LINKS: &str = "a.navPages, a.nav_page";

/// Listings advertising more pages than this are treated as malformed
pub const MAX_PAGES: i64 = 10_000;

/// Offsets of every page after the first, up to `max_offset`
///
/// ```
/// use lurker::crawler::pagination_offsets;
///
/// assert_eq!(pagination_offsets(40, 20).collect::<Vec<_>>(), vec![20, 40]);
/// assert_eq!(pagination_offsets(45, 20).collect::<Vec<_>>(), vec![20, 40]);
/// assert_eq!(pagination_offsets(19, 20).count(), 0);
/// ```
pub fn pagination_offsets(max_offset: i64, page_size: i64) -> impl Iterator<Item = i64> {
    let pages = if page_size > 0 && max_offset >= page_size {
        max_offset / page_size
    } else {
        0
    };
    (1..=pages).map(move |i| i * page_size)
}

/// Largest offset among navigation links pointing at the same listing
pub fn max_advertised_offset(
    identity: &PageIdentity,
    document: &Document,
) -> Result<i64, SelectorError> {
    let mut max = 0;
    for link in document.select(NAVIGATION_LINKS)? {
        let Some(href) = document.resolve_attr(&link, "href") else {
            continue;
        };
        if let Ok(target) = classify(&href) {
            if target.same_page(identity) {
                max = max.max(target.offset);
            }
        }
    }
    Ok(max)
}

/// Enqueues the remaining pages of a board or topic seen at offset 0
///
/// Returns how many new tasks were inserted. Other kinds and later pages are
/// left alone.
pub fn expand_pagination(
    identity: &PageIdentity,
    entity_id: Option<i64>,
    document: &Document,
    ctx: &CrawlContext,
) -> Result<usize, ProcessError> {
    if identity.offset != 0 || !matches!(identity.kind, PageKind::Board | PageKind::Topic) {
        return Ok(0);
    }

    let max = max_advertised_offset(identity, document)?;
    let pages = max / PAGE_SIZE;
    if pages > MAX_PAGES {
        return Err(ProcessError::MalformedPage(format!(
            "{} advertises {} pages (last offset {})",
            identity, pages, max
        )));
    }
    if pages > 0 {
        tracing::debug!("{} has {} more pages (last offset {})", identity, pages, max);
    }

    let mut inserted = 0;
    for offset in pagination_offsets(max, PAGE_SIZE) {
        let page = identity.with_offset(offset)?;
        if ctx.enqueue(&page, entity_id, false)?.is_inserted() {
            inserted += 1;
        }
    }
    Ok(inserted)
}
