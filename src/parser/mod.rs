//! The feed-parser contract and its implementations.
//!
//! The core depends only on this contract: raw bytes plus a content-type
//! hint and the source URL in, an item list plus feed-level metadata out.
//! RSS/Atom/JSON-feed go through feed-rs; gopher directory listings have
//! their own tiny parser keyed off the source URL.

mod gopher;

use thiserror::Error;

use crate::storage::ParsedItem;
use crate::util::strip_control_chars;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unparseable feed: {0}")]
    Unparseable(String),
    #[error("feed contains no recognisable entries")]
    Empty,
}

/// Feed-level metadata a parse can surface alongside its items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedInfo {
    /// Title hint, used when the node has no user-set title.
    pub title: Option<String>,
    /// Homepage URL.
    pub homepage: Option<String>,
    pub description: Option<String>,
    /// Explicit icon URL from the feed.
    pub icon: Option<String>,
    /// Update-interval hint in minutes (`ttl` or syn:updatePeriod).
    pub interval_hint: Option<i64>,
}

/// A successful parse.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub info: FeedInfo,
    pub items: Vec<ParsedItem>,
}

/// Parses fetched bytes into items plus feed metadata.
///
/// `content_type` is a hint, not a promise — servers lie about it
/// constantly, so implementations sniff the payload too.
pub trait FeedParser: Send + Sync {
    fn parse(
        &self,
        data: &[u8],
        content_type: Option<&str>,
        source_url: &str,
    ) -> Result<ParsedFeed, ParseError>;
}

// ============================================================================
// Default implementation
// ============================================================================

/// The stock parser: gopher listings by URL, everything else via feed-rs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultParser;

impl FeedParser for DefaultParser {
    fn parse(
        &self,
        data: &[u8],
        _content_type: Option<&str>,
        source_url: &str,
    ) -> Result<ParsedFeed, ParseError> {
        if source_url.contains("gopher://") {
            return gopher::parse_listing(data, source_url);
        }
        parse_syndication(data)
    }
}

/// RSS/Atom/JSON-feed via feed-rs.
fn parse_syndication(data: &[u8]) -> Result<ParsedFeed, ParseError> {
    let feed = feed_rs::parser::parse(data).map_err(|e| ParseError::Unparseable(e.to_string()))?;

    let homepage = feed
        .links
        .iter()
        .find(|link| link.rel.as_deref() != Some("self"))
        .or_else(|| feed.links.first())
        .map(|link| link.href.clone());

    let info = FeedInfo {
        title: feed
            .title
            .map(|t| strip_control_chars(&t.content).into_owned()),
        homepage,
        description: feed
            .description
            .map(|d| strip_control_chars(&d.content).into_owned()),
        icon: feed.icon.map(|i| i.uri).or(feed.logo.map(|l| l.uri)),
        interval_hint: feed.ttl.map(i64::from).filter(|ttl| *ttl > 0),
    };

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let source_url = entry.links.first().map(|l| l.href.clone());
            let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let title = entry
                .title
                .map(|t| strip_control_chars(&t.content).into_owned())
                .unwrap_or_else(|| "Untitled".to_string());
            let author = entry.authors.first().map(|a| a.name.clone());

            let source_id = {
                let trimmed = entry.id.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            };

            let mut metadata = Vec::new();
            for category in &entry.categories {
                let label = category.label.as_deref().unwrap_or(&category.term);
                metadata.push(("category".to_string(), label.to_string()));
            }
            for media in &entry.media {
                for content in &media.content {
                    if let Some(url) = &content.url {
                        metadata.push(("enclosure".to_string(), url.to_string()));
                    }
                }
            }

            ParsedItem {
                source_id,
                title,
                source_url,
                description,
                author,
                published,
                metadata,
            }
        })
        .collect();

    Ok(ParsedFeed { info, items })
}
