//! OPML round-trip fidelity: structure, titles, URLs, search-folder
//! rules, and match modes survive an export/import cycle.


use eddy::feedlist::{opml, FeedList, NodeKind};
use eddy::rules::MatchMode;
use pretty_assertions::assert_eq;

const FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Subscriptions</title></head>
  <body>
    <outline text="Tech" title="Tech">
      <outline type="rss" text="Example" title="Example" xmlUrl="https://example.com/feed.xml" htmlUrl="https://example.com"/>
      <outline text="Nested" title="Nested">
        <outline type="rss" text="Deep" title="Deep" xmlUrl="https://deep.example/rss" updateInterval="30"/>
      </outline>
    </outline>
    <outline type="rss" text="Filtered" title="Filtered" xmlUrl="https://filtered.example/rss" filtercmd="grep -v ads"/>
    <outline type="vfolder" text="Hot" title="Hot" anyMatch="true" unreadOnly="true">
      <outline type="rule" rule="exact_title" value="rust" additive="true"/>
      <outline type="rule" rule="flagged" value="" additive="false"/>
    </outline>
  </body>
</opml>"#;

/// Collect a comparable shape of the whole tree.
fn shape(feedlist: &FeedList, id: &str, out: &mut Vec<String>) {
    let node = feedlist.node(id).unwrap();
    let line = match &node.kind {
        NodeKind::Folder => format!("folder:{}", node.title),
        NodeKind::Feed { subscription } => format!(
            "feed:{}:{}:{}:{}:{}",
            node.title,
            subscription.source,
            subscription.homepage.as_deref().unwrap_or("-"),
            subscription.filter_cmd.as_deref().unwrap_or("-"),
            subscription.update_interval,
        ),
        NodeKind::SearchFolder { folder } => {
            let rules: Vec<String> = folder
                .rules
                .rules
                .iter()
                .map(|rule| format!("{}={}/{}", rule.info.id, rule.value, rule.additive))
                .collect();
            format!(
                "vfolder:{}:{:?}:{}:[{}]",
                node.title,
                folder.rules.mode,
                folder.rules.unread_only,
                rules.join(",")
            )
        }
        NodeKind::SourceRoot { .. } => format!("source:{}", node.title),
    };
    out.push(line);
    for child in &node.children {
        shape(feedlist, child, out);
    }
}

#[test]
fn test_roundtrip_preserves_everything() {
    let mut original = FeedList::new();
    let root = original.root_id().clone();
    opml::import(&mut original, FIXTURE, &root).unwrap();

    let exported = opml::export(&original, &root).unwrap();

    let mut reimported = FeedList::new();
    let reroot = reimported.root_id().clone();
    opml::import(&mut reimported, &exported, &reroot).unwrap();

    let mut original_shape = Vec::new();
    for child in original.children(&root) {
        shape(&original, &child, &mut original_shape);
    }
    let mut reimported_shape = Vec::new();
    for child in reimported.children(&reroot) {
        shape(&reimported, &child, &mut reimported_shape);
    }

    assert_eq!(original_shape, reimported_shape);
}

#[test]
fn test_import_match_mode_and_unread_only() {
    let mut feedlist = FeedList::new();
    let root = feedlist.root_id().clone();
    let created = opml::import(&mut feedlist, FIXTURE, &root).unwrap();

    let hot = feedlist.node(&created[2]).unwrap();
    let NodeKind::SearchFolder { folder } = &hot.kind else {
        panic!("expected search folder");
    };
    assert_eq!(folder.rules.mode, MatchMode::Any);
    assert!(folder.rules.unread_only);
    assert_eq!(folder.rules.rules.len(), 2);
    assert!(!folder.rules.rules[1].additive);
}

#[test]
fn test_double_roundtrip_is_stable() {
    let mut first = FeedList::new();
    let root1 = first.root_id().clone();
    opml::import(&mut first, FIXTURE, &root1).unwrap();
    let export1 = opml::export(&first, &root1).unwrap();

    let mut second = FeedList::new();
    let root2 = second.root_id().clone();
    opml::import(&mut second, &export1, &root2).unwrap();
    let export2 = opml::export(&second, &root2).unwrap();

    assert_eq!(export1, export2);
}
