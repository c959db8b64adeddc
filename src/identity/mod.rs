//! Page identity module for Lurker
//!
//! Raw forum links come in many spellings: with session ids, fragments,
//! `;topicseen` suffixes, `.msgN` anchors or explicit `.0` offsets. This module
//! turns them into typed [`PageIdentity`] values whose canonical URL is stable
//! and therefore usable as a dedup key for tasks and ledger entries.

mod classify;
mod normalize;

pub use classify::{classify, parse_as};
pub use normalize::{normalize, normalize_url};

use crate::{IdentityError, IdentityResult};
use std::fmt;

/// The kinds of pages and resources the crawler knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PageKind {
    /// Generic page without a board or topic marker (forum index, recent posts)
    Index,
    /// Board listing, paginated by topic offset
    Board,
    /// Topic page, paginated by post offset
    Topic,
    /// Link to a single post inside a topic
    Post,
    /// Binary resource (image, attachment, avatar)
    Asset,
}

impl PageKind {
    /// Converts the kind to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Board => "board",
            Self::Topic => "topic",
            Self::Post => "post",
            Self::Asset => "asset",
        }
    }

    /// Parses a kind from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "index" => Some(Self::Index),
            "board" => Some(Self::Board),
            "topic" => Some(Self::Topic),
            "post" => Some(Self::Post),
            "asset" => Some(Self::Asset),
            _ => None,
        }
    }

    /// Returns true for kinds whose URL carries a pagination offset
    pub fn is_paginated(&self) -> bool {
        matches!(self, Self::Index | Self::Board | Self::Topic)
    }

    /// Returns all kinds
    pub fn all() -> Vec<Self> {
        vec![
            Self::Index,
            Self::Board,
            Self::Topic,
            Self::Post,
            Self::Asset,
        ]
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// A typed, canonical reference to a page
///
/// Two identities refer to the same *page* when `(kind, id)` match, and to the
/// same *task target* when `(kind, id, offset)` match. `canonical_url` is the
/// fetch form: it keeps the offset, written out explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageIdentity {
    pub kind: PageKind,
    pub id: i64,
    pub offset: i64,
    pub canonical_url: String,
}

impl PageIdentity {
    /// Parses a URL that must point at a board page
    pub fn board(url: &str) -> IdentityResult<Self> {
        parse_as(PageKind::Board, url)
    }

    /// Parses a URL that must point at a topic page
    pub fn topic(url: &str) -> IdentityResult<Self> {
        parse_as(PageKind::Topic, url)
    }

    /// Builds an asset identity; assets are keyed by URL only
    pub fn asset(url: &str) -> IdentityResult<Self> {
        Ok(Self {
            kind: PageKind::Asset,
            id: 0,
            offset: 0,
            canonical_url: normalize(url)?,
        })
    }

    /// Returns true when both identities point at the same page
    pub fn same_page(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }

    /// Returns true when both identities point at the same fetch target
    pub fn same_target(&self, other: &Self) -> bool {
        self.same_page(other) && self.offset == other.offset
    }

    /// Rewrites the pagination marker to `offset`
    ///
    /// Boards and topics get `board=N.O` / `topic=N.O`; generic pages get
    /// `start=O`. Negative offsets and kinds without pagination are rejected.
    pub fn with_offset(&self, offset: i64) -> IdentityResult<Self> {
        if offset < 0 {
            return Err(IdentityError::NegativeOffset(offset));
        }
        if !self.kind.is_paginated() {
            return Err(IdentityError::InvalidIdentity {
                expected: "paginated".to_string(),
                url: self.canonical_url.clone(),
            });
        }

        classify::rewrite(self.kind, self.id, offset, &self.canonical_url)
    }

    /// Returns the offset-stripped form used for entity rows and foreign keys
    ///
    /// ```
    /// use lurker::identity::classify;
    ///
    /// let board = classify("https://forum.example.org/index.php?board=5.40").unwrap();
    /// assert_eq!(board.entity_url(), "https://forum.example.org/index.php?board=5");
    /// ```
    pub fn entity_url(&self) -> String {
        classify::entity_form(self).unwrap_or_else(|| self.canonical_url.clone())
    }

    /// Returns the identity of post `msg_id` on this topic
    pub fn post(&self, msg_id: i64) -> IdentityResult<Self> {
        if self.kind != PageKind::Topic {
            return Err(IdentityError::InvalidIdentity {
                expected: PageKind::Topic.to_string(),
                url: self.canonical_url.clone(),
            });
        }
        classify::post_form(self, msg_id)
    }

    /// Returns the first page of the topic this topic page or post link belongs to
    pub fn topic_page(&self) -> IdentityResult<Self> {
        match self.kind {
            PageKind::Topic => self.first_page(),
            PageKind::Post => classify::topic_of_post(self),
            _ => Err(IdentityError::InvalidIdentity {
                expected: PageKind::Topic.to_string(),
                url: self.canonical_url.clone(),
            }),
        }
    }

    /// Returns the first page of this listing
    pub fn first_page(&self) -> IdentityResult<Self> {
        if self.offset == 0 || !self.kind.is_paginated() {
            return Ok(self.clone());
        }
        self.with_offset(0)
    }
}

impl fmt::Display for PageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_url)
    }
}
