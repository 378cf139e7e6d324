//! Phlog gopher directory listings as feeds.

use chrono::Utc;

use crate::storage::ParsedItem;
use crate::util::strip_control_chars;

use super::{FeedInfo, ParseError, ParsedFeed};

/// Be friendly to very long phlog listings.
const MAX_GOPHER_ITEMS: usize = 25;

/// Parses a gopher directory listing into items.
///
/// Each line is `<type><display>\t<selector>\t<host>\t<port>`; only text
/// entries (type `0`) become items, with the source synthesised as
/// `gopher://host:port/0<selector>`. For gopher the homepage is the
/// source itself.
pub(super) fn parse_listing(data: &[u8], source_url: &str) -> Result<ParsedFeed, ParseError> {
    let text = String::from_utf8_lossy(data);
    let now = Utc::now().timestamp();

    let info = FeedInfo {
        title: Some(
            source_url
                .strip_prefix("gopher://")
                .unwrap_or(source_url)
                .to_string(),
        ),
        homepage: Some(source_url.to_string()),
        ..Default::default()
    };

    let mut items = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        let fields: Vec<&str> = line.splitn(5, '\t').collect();
        if fields.len() < 4 {
            continue;
        }
        let Some(display) = fields[0].strip_prefix('0') else {
            continue;
        };

        let (selector, host, port) = (fields[1], fields[2], fields[3]);
        let source = format!("gopher://{}:{}/0{}", host, port, selector);
        items.push(ParsedItem {
            source_id: Some(source.clone()),
            title: strip_control_chars(display).into_owned(),
            source_url: Some(source),
            description: Some(String::new()),
            published: Some(now),
            ..Default::default()
        });

        if items.len() >= MAX_GOPHER_ITEMS {
            break;
        }
    }

    Ok(ParsedFeed { info, items })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_text_entries_become_items() {
        let listing = b"iWelcome to my phlog\tfake\texample.org\t70\r\n\
0First post\t/phlog/1.txt\texample.org\t70\r\n\
1Subdirectory\t/other\texample.org\t70\r\n\
0Second post\t/phlog/2.txt\texample.org\t70\r\n\
.\r\n";
        let parsed = parse_listing(listing, "gopher://example.org/1phlog").unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].title, "First post");
        assert_eq!(
            parsed.items[1].source_url.as_deref(),
            Some("gopher://example.org:70/0/phlog/2.txt")
        );
        assert_eq!(
            parsed.info.homepage.as_deref(),
            Some("gopher://example.org/1phlog")
        );
    }

    #[test]
    fn test_item_count_is_capped() {
        let mut listing = String::new();
        for i in 0..40 {
            listing.push_str(&format!("0Post {}\t/p/{}.txt\texample.org\t70\r\n", i, i));
        }
        let parsed = parse_listing(listing.as_bytes(), "gopher://example.org/1p").unwrap();
        assert_eq!(parsed.items.len(), MAX_GOPHER_ITEMS);
    }
}
