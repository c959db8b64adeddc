use super::{CrawlContext, PageProcessor, ProcessError};
use crate::crawler::{select_first_in, select_in, text_of, Document};
use crate::identity::{PageIdentity, PageKind};
use crate::storage::db_timestamp;
use chrono::{NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use scraper::ElementRef;
use std::sync::LazyLock;

static POST_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2}), (\d{2}:\d{2})").expect("valid post date regex")
});

/// `u=N` in a profile link
static PROFILE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?;&]u=(\d+)").expect("valid profile regex"));

/// Topic page: posts, their authors and inline images
///
/// On the first page the author of the opening post becomes the topic
/// author.
pub struct TopicProcessor;

impl PageProcessor for TopicProcessor {
    fn name(&self) -> &'static str {
        "topic"
    }

    fn process(
        &self,
        identity: &PageIdentity,
        document: &Document,
        ctx: &CrawlContext,
    ) -> Result<(), ProcessError> {
        let oid = identity.id.to_string();
        let topic_id =
            ctx.entities()
                .find_topic_id(&oid)?
                .ok_or_else(|| ProcessError::MissingParent {
                    kind: PageKind::Topic,
                    oid: oid.clone(),
                })?;

        let posts = document.select("#forumposts .windowbg")?;
        if posts.is_empty() {
            return Err(ProcessError::MalformedPage(format!(
                "no posts found on {}",
                identity
            )));
        }

        for (index, post) in posts.iter().enumerate() {
            let account_id = record_account(document, post, ctx)?;
            if index == 0 && identity.offset == 0 {
                ctx.entities().set_topic_author(topic_id, account_id)?;
            }
            record_post(document, identity, post, topic_id, account_id, ctx)?;
        }

        tracing::info!("Topic page {}: {} posts", identity, posts.len());
        Ok(())
    }
}

/// Upserts the poster of `post`; guests get a synthetic `guest_<name>` oid
fn record_account(
    document: &Document,
    post: &ElementRef<'_>,
    ctx: &CrawlContext,
) -> Result<i64, ProcessError> {
    let poster = select_first_in(post, ".poster")?
        .ok_or_else(|| ProcessError::MalformedPage("post without poster block".to_string()))?;
    let nick = match select_first_in(&poster, ".nick a")? {
        Some(link) => link,
        None => select_first_in(&poster, ".nick")?
            .ok_or_else(|| ProcessError::MalformedPage("poster without nick".to_string()))?,
    };

    let name = text_of(&nick);
    if name.is_empty() {
        return Err(ProcessError::MalformedPage("poster with empty nick".to_string()));
    }

    let profile = document.resolve_attr(&nick, "href");
    let member_id = profile
        .as_deref()
        .and_then(|url| PROFILE_ID.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let (oid, url) = match (member_id, profile) {
        (Some(id), Some(profile)) => (id, profile),
        _ => {
            let guest = format!("guest_{}", name);
            (guest.clone(), guest)
        }
    };

    let avatar_id = match select_first_in(&poster, "img.avatar")?
        .and_then(|img| document.resolve_attr(&img, "src"))
    {
        Some(src) => Some(ctx.register_asset(&format!("avatar/{}", oid), &src)?),
        None => None,
    };

    Ok(ctx.entities().upsert_account(&oid, &name, &url, avatar_id)?)
}

fn record_post(
    document: &Document,
    topic: &PageIdentity,
    post: &ElementRef<'_>,
    topic_id: i64,
    account_id: i64,
    ctx: &CrawlContext,
) -> Result<i64, ProcessError> {
    let body = select_first_in(post, ".post .inner")?
        .ok_or_else(|| ProcessError::MalformedPage("post without body".to_string()))?;
    let msg_id = body
        .value()
        .id()
        .and_then(|id| id.strip_prefix("msg_"))
        .and_then(|n| n.parse::<i64>().ok())
        .ok_or_else(|| ProcessError::MalformedPage("post body without msg_N id".to_string()))?;

    let created_at = post_date(&text_of(post));
    let permalink = topic.post(msg_id)?;
    let post_id = ctx.entities().upsert_post(
        &msg_id.to_string(),
        &body.inner_html(),
        &permalink.canonical_url,
        Some(account_id),
        topic_id,
        created_at.as_deref(),
    )?;

    for (n, img) in select_in(&body, "img")?.iter().enumerate() {
        let Some(src) = document.resolve_attr(img, "src") else {
            continue;
        };
        let name = format!("topic/{}/post-{}/{}", topic.id, msg_id, n);
        let asset_id = ctx.register_asset(&name, &src)?;
        ctx.entities().link_post_asset(post_id, asset_id)?;
    }

    Ok(post_id)
}

/// First `YYYY-MM-DD, HH:MM` in the post header, read as UTC
fn post_date(text: &str) -> Option<String> {
    let caps = POST_DATE.captures(text)?;
    let naive =
        NaiveDateTime::parse_from_str(&format!("{} {}", &caps[1], &caps[2]), "%Y-%m-%d %H:%M")
            .ok()?;
    Some(db_timestamp(Utc.from_utc_datetime(&naive)))
}
