use super::board::record_board_link;
use super::{CrawlContext, PageProcessor, ProcessError};
use crate::crawler::{select_first_in, text_of, Document};
use crate::identity::{classify, PageIdentity, PageKind};
use scraper::ElementRef;

/// Forum front page and the recent posts listing
///
/// Root boards are upserted and queued. Recent posts lead to topics, which
/// are recorded (when their board is already known) and queued with `force`
/// so that fresh replies are picked up even if the topic was crawled lately.
pub struct IndexProcessor;

impl PageProcessor for IndexProcessor {
    fn name(&self) -> &'static str {
        "index"
    }

    fn process(
        &self,
        identity: &PageIdentity,
        document: &Document,
        ctx: &CrawlContext,
    ) -> Result<(), ProcessError> {
        let mut boards = 0;
        for link in document.select(".board a.info_text")? {
            if record_board_link(document, &link, None, ctx)? {
                boards += 1;
            }
        }

        let has_recent = document.select_first("#recent")?.is_some();
        if boards == 0 && !has_recent {
            return Err(ProcessError::MalformedPage(format!(
                "{} lists neither boards nor recent posts",
                identity
            )));
        }

        let mut topics = 0;
        for post in document.select("#recent .core_posts")? {
            if record_recent_post(document, &post, ctx)? {
                topics += 1;
            }
        }

        tracing::info!(
            "Index page {}: {} boards, {} recent topics",
            identity,
            boards,
            topics
        );
        Ok(())
    }
}

/// Handles one `.core_posts` entry; returns false when it was skipped
fn record_recent_post(
    document: &Document,
    post: &ElementRef<'_>,
    ctx: &CrawlContext,
) -> Result<bool, ProcessError> {
    let board_link = select_first_in(post, ".topic_info h5 a:nth-of-type(1)")?;
    let topic_link = select_first_in(post, ".topic_info h5 a:nth-of-type(2)")?;
    let (Some(board_link), Some(topic_link)) = (board_link, topic_link) else {
        tracing::debug!("Recent post without board and topic links, skipping");
        return Ok(false);
    };

    let board = match document
        .resolve_attr(&board_link, "href")
        .map(|href| classify(&href))
    {
        Some(Ok(board)) if board.kind == PageKind::Board => board,
        _ => return Ok(false),
    };
    let Some(board_id) = ctx.entities().find_board_id(&board.id.to_string())? else {
        tracing::debug!("Recent post in unknown board {}, skipping", board.id);
        return Ok(false);
    };

    let Some(href) = document.resolve_attr(&topic_link, "href") else {
        return Ok(false);
    };
    let topic = match classify(&href).and_then(|target| target.topic_page()) {
        Ok(topic) => topic,
        Err(e) => {
            tracing::warn!("Skipping recent post link {}: {}", href, e);
            return Ok(false);
        }
    };

    let title = Some(text_of(&topic_link))
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
    ctx.enqueue(&topic, Some(topic_id), true)?;
    Ok(true)
}
