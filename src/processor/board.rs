use super::{CrawlContext, PageProcessor, ProcessError};
use crate::crawler::{select_first_in, text_of, Document};
use crate::identity::{classify, PageIdentity, PageKind};
use scraper::ElementRef;

/// Board listing: child boards and the topics on this page
pub struct BoardProcessor;

impl PageProcessor for BoardProcessor {
    fn name(&self) -> &'static str {
        "board"
    }

    fn process(
        &self,
        identity: &PageIdentity,
        document: &Document,
        ctx: &CrawlContext,
    ) -> Result<(), ProcessError> {
        let oid = identity.id.to_string();
        let board_id =
            ctx.entities()
                .find_board_id(&oid)?
                .ok_or_else(|| ProcessError::MissingParent {
                    kind: PageKind::Board,
                    oid: oid.clone(),
                })?;

        let child_links = document.select(".board a.top_info")?;
        let has_index = document.select_first("#messageindex")?.is_some();
        if child_links.is_empty() && !has_index {
            return Err(ProcessError::MalformedPage(format!(
                "{} has neither child boards nor a topic index",
                identity
            )));
        }

        let mut children = 0;
        for link in child_links {
            if record_board_link(document, &link, Some(&oid), ctx)? {
                children += 1;
            }
        }

        let mut topics = 0;
        for link in document.select("#messageindex a.all_td_link")? {
            if record_topic_link(document, &link, board_id, ctx)? {
                topics += 1;
            }
        }

        tracing::info!(
            "Board page {}: {} child boards, {} topics",
            identity,
            children,
            topics
        );
        Ok(())
    }
}

/// Upserts the board behind a board link and queues its first page
///
/// Returns false when the link does not point at a board.
pub(super) fn record_board_link(
    document: &Document,
    link: &ElementRef<'_>,
    parent_oid: Option<&str>,
    ctx: &CrawlContext,
) -> Result<bool, ProcessError> {
    let Some(href) = document.resolve_attr(link, "href") else {
        return Ok(false);
    };
    let board = match classify(&href) {
        Ok(board) if board.kind == PageKind::Board => board.first_page()?,
        Ok(other) => {
            tracing::debug!("Board link points at a {} page, skipping: {}", other.kind, href);
            return Ok(false);
        }
        Err(e) => {
            tracing::warn!("Skipping board link {}: {}", href, e);
            return Ok(false);
        }
    };

    let name = select_first_in(link, ".subject")?
        .map(|e| text_of(&e))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Unknown Board".to_string());
    let description = select_first_in(link, ".about_info")?
        .map(|e| text_of(&e))
        .filter(|t| !t.is_empty());

    let board_id = ctx.entities().upsert_board(
        &board.id.to_string(),
        &name,
        &board.entity_url(),
        description.as_deref(),
        parent_oid,
    )?;
    ctx.enqueue(&board, Some(board_id), false)?;
    Ok(true)
}

fn record_topic_link(
    document: &Document,
    link: &ElementRef<'_>,
    board_id: i64,
    ctx: &CrawlContext,
) -> Result<bool, ProcessError> {
    let Some(href) = document.resolve_attr(link, "href") else {
        return Ok(false);
    };
    let topic = match classify(&href).and_then(|target| target.topic_page()) {
        Ok(topic) => topic,
        Err(e) => {
            tracing::warn!("Skipping topic link {}: {}", href, e);
            return Ok(false);
        }
    };

    let title = select_first_in(link, ".message_link")?
        .map(|e| text_of(&e))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Unknown Topic".to_string());

    let topic_id = ctx.entities().upsert_topic(
        &topic.id.to_string(),
        &topic.entity_url(),
        &title,
        None,
        board_id,
        None,
    )?;
    ctx.enqueue(&topic, Some(topic_id), false)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::test_support::{document, memory_context};
    use crate::storage::{EntityRepository, TaskStore};

    const BASE: &str = "https://forum.example.org/index.php";

    const BOARD_HTML: &str = r#"
        <div id="main_content">
          <div class="board">
            <a class="top_info" href="index.php?board=11.0">
              <span class="subject">Screenshots</span>
              <span class="about_info">Show your work</span>
            </a>
          </div>
          <div id="messageindex">
            <a class="all_td_link" href="index.php?topic=100.0"><span class="message_link">First topic</span></a>
            <a class="all_td_link" href="index.php?topic=101.0;topicseen"><span class="message_link">Second topic</span></a>
            <a class="all_td_link" href="javascript:void(0)">broken</a>
          </div>
        </div>
    "#;

    fn known_board(store: &crate::storage::SqliteStorage) -> i64 {
        store
            .upsert_board("5", "Mods", &format!("{}?board=5", BASE), None, None)
            .unwrap()
    }

    #[test]
    fn test_board_records_children_and_topics() {
        let (ctx, store) = memory_context();
        let board_id = known_board(&store);
        let url = format!("{}?board=5.0", BASE);

        BoardProcessor
            .process(&classify(&url).unwrap(), &document(&url, BOARD_HTML), &ctx)
            .unwrap();

        assert!(store.exists_board("11").unwrap());
        assert!(store.exists_topic("100").unwrap());
        assert!(store.exists_topic("101").unwrap());
        assert_eq!(store.size(&[PageKind::Board]).unwrap(), 1);
        assert_eq!(store.size(&[PageKind::Topic]).unwrap(), 2);

        let topic = store.claim(&[PageKind::Topic]).unwrap().unwrap();
        assert_eq!(topic.url, format!("{}?topic=100.0", BASE));
        assert_eq!(topic.entity_id, store.find_topic_id("100").unwrap());
        assert!(board_id > 0);
    }

    #[test]
    fn test_board_processing_is_idempotent() {
        let (ctx, store) = memory_context();
        known_board(&store);
        let url = format!("{}?board=5.0", BASE);
        let page = classify(&url).unwrap();

        BoardProcessor
            .process(&page, &document(&url, BOARD_HTML), &ctx)
            .unwrap();
        let counts = store.entity_counts().unwrap();
        BoardProcessor
            .process(&page, &document(&url, BOARD_HTML), &ctx)
            .unwrap();

        assert_eq!(store.entity_counts().unwrap(), counts);
        assert_eq!(store.size(&[PageKind::Board, PageKind::Topic]).unwrap(), 3);
    }

    #[test]
    fn test_unknown_board_is_rejected() {
        let (ctx, _store) = memory_context();
        let url = format!("{}?board=42.0", BASE);

        let err = BoardProcessor
            .process(&classify(&url).unwrap(), &document(&url, BOARD_HTML), &ctx)
            .unwrap_err();
        assert!(matches!(err, ProcessError::MissingParent { .. }));
    }

    #[test]
    fn test_board_without_listing_is_malformed() {
        let (ctx, store) = memory_context();
        known_board(&store);
        let url = format!("{}?board=5.0", BASE);

        let err = BoardProcessor
            .process(
                &classify(&url).unwrap(),
                &document(&url, "<p>An error has occurred</p>"),
                &ctx,
            )
            .unwrap_err();
        assert_eq!(err.category().as_str(), "malformed_page");
    }
}
