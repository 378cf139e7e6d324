//! OPML-shaped import and export of the feed list.
//!
//! The `outline` element is the unit: folders are outlines with children,
//! feeds are `type="rss"` with `xmlUrl`, search folders are
//! `type="vfolder"` with nested `type="rule"` outlines whose attributes
//! carry `rule`, `value`, and `additive`.

use std::collections::HashMap;

use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::rules::{MatchMode, RuleSet, SearchFolder};
use crate::subscription::Subscription;

use super::{FeedList, Node, NodeId, NodeKind};

// ============================================================================
// Import
// ============================================================================

/// Import an OPML document under `parent`. Returns the top-level node ids
/// created.
pub fn import(feedlist: &mut FeedList, content: &str, parent: &NodeId) -> Result<Vec<NodeId>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut created = Vec::new();
    // Innermost open outline: (node id, is_search_folder).
    let mut stack: Vec<(NodeId, bool)> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                let attrs = read_attributes(&reader, &e)?;
                let id = import_outline(feedlist, &attrs, &mut stack, parent, &mut created);
                stack.push((id.unwrap_or_default(), is_vfolder(&attrs)));
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let attrs = read_attributes(&reader, &e)?;
                import_outline(feedlist, &attrs, &mut stack, parent, &mut created);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("XML parse error: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(created)
}

fn is_vfolder(attrs: &HashMap<String, String>) -> bool {
    attrs.get("type").map(String::as_str) == Some("vfolder")
}

fn read_attributes(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let decoder = reader.decoder();
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.decode_and_unescape_value(decoder)?.to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

/// Create a node (or rule) for one outline element. Returns the new node
/// id for container outlines.
fn import_outline(
    feedlist: &mut FeedList,
    attrs: &HashMap<String, String>,
    stack: &mut [(NodeId, bool)],
    import_parent: &NodeId,
    created: &mut Vec<NodeId>,
) -> Option<NodeId> {
    let title = attrs
        .get("title")
        .or_else(|| attrs.get("text"))
        .cloned()
        .unwrap_or_default();

    let parent_id = stack
        .last()
        .map(|(id, _)| id.clone())
        .unwrap_or_else(|| import_parent.clone());

    match attrs.get("type").map(String::as_str) {
        Some("rule") => {
            // A rule outline configures the innermost search folder.
            let (rule, value) = (attrs.get("rule"), attrs.get("value"));
            let additive = attrs.get("additive").map(String::as_str) != Some("false");
            if let (Some(rule), Some(value)) = (rule, value) {
                if let Some((folder_id, true)) = stack.last() {
                    if let Some(node) = feedlist.node_mut(folder_id) {
                        if let NodeKind::SearchFolder { folder } = &mut node.kind {
                            folder.rules.add_rule(rule, value, additive);
                        }
                    }
                }
            } else {
                tracing::warn!("ignoring invalid rule outline");
            }
            None
        }
        Some("vfolder") => {
            let mut rules = RuleSet::default();
            rules.mode = match attrs.get("anyMatch").map(String::as_str) {
                Some("true") => MatchMode::Any,
                _ => MatchMode::All,
            };
            rules.unread_only = attrs.get("unreadOnly").map(String::as_str) == Some("true");

            let id = feedlist.generate_id();
            let node = Node::new(
                id.clone(),
                title,
                NodeKind::SearchFolder {
                    folder: SearchFolder::new(rules),
                },
            );
            let id = feedlist.add_child(&parent_id, node, None)?;
            track_created(created, stack, &id);
            Some(id)
        }
        Some("rss") | Some("atom") => {
            let Some(xml_url) = attrs.get("xmlUrl") else {
                tracing::warn!(title = %title, "feed outline without xmlUrl, skipping");
                return None;
            };
            let mut subscription = Subscription::new(xml_url);
            subscription.homepage = attrs.get("htmlUrl").cloned();
            if let Some(filter) = attrs.get("filtercmd") {
                subscription.filter_cmd = Some(filter.clone());
            }
            if let Some(interval) = attrs.get("updateInterval").and_then(|v| v.parse().ok()) {
                subscription.update_interval = interval;
            }

            let id = feedlist.generate_id();
            let title = if title.is_empty() {
                xml_url.clone()
            } else {
                title
            };
            let node = Node::new(
                id.clone(),
                title,
                NodeKind::Feed {
                    subscription: Box::new(subscription),
                },
            );
            let id = feedlist.add_child(&parent_id, node, None)?;
            track_created(created, stack, &id);
            Some(id)
        }
        _ => {
            // No type (or an unknown one): a folder.
            let id = feedlist.generate_id();
            let node = Node::new(id.clone(), title, NodeKind::Folder);
            let id = feedlist.add_child(&parent_id, node, None)?;
            track_created(created, stack, &id);
            Some(id)
        }
    }
}

fn track_created(created: &mut Vec<NodeId>, stack: &[(NodeId, bool)], id: &NodeId) {
    if stack.is_empty() {
        created.push(id.clone());
    }
}

// ============================================================================
// Export
// ============================================================================

/// Export the subtree under `ancestor` (the whole list when given the
/// root id) as an OPML document.
pub fn export(feedlist: &FeedList, ancestor: &NodeId) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(opml))?;

    writer.write_event(Event::Start(BytesStart::new("head")))?;
    writer.write_event(Event::End(BytesEnd::new("head")))?;

    writer.write_event(Event::Start(BytesStart::new("body")))?;
    for child in feedlist.children(ancestor) {
        export_node(feedlist, &child, &mut writer)?;
    }
    writer.write_event(Event::End(BytesEnd::new("body")))?;

    writer.write_event(Event::End(BytesEnd::new("opml")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

fn export_node(
    feedlist: &FeedList,
    id: &NodeId,
    writer: &mut Writer<Vec<u8>>,
) -> Result<()> {
    let Some(node) = feedlist.node(id) else {
        return Ok(());
    };

    let mut outline = BytesStart::new("outline");
    outline.push_attribute(("text", node.title.as_str()));
    outline.push_attribute(("title", node.title.as_str()));

    match &node.kind {
        NodeKind::Folder => {
            if node.children.is_empty() {
                writer.write_event(Event::Empty(outline))?;
            } else {
                writer.write_event(Event::Start(outline))?;
                for child in &node.children {
                    export_node(feedlist, child, writer)?;
                }
                writer.write_event(Event::End(BytesEnd::new("outline")))?;
            }
        }
        NodeKind::Feed { subscription } | NodeKind::SourceRoot { subscription, .. } => {
            outline.push_attribute(("type", "rss"));
            outline.push_attribute(("xmlUrl", subscription.source.as_str()));
            if let Some(homepage) = &subscription.homepage {
                outline.push_attribute(("htmlUrl", homepage.as_str()));
            }
            if let Some(filter) = &subscription.filter_cmd {
                outline.push_attribute(("filtercmd", filter.as_str()));
            }
            if subscription.update_interval != -1 {
                outline.push_attribute((
                    "updateInterval",
                    subscription.update_interval.to_string().as_str(),
                ));
            }
            writer.write_event(Event::Empty(outline))?;
        }
        NodeKind::SearchFolder { folder } => {
            outline.push_attribute(("type", "vfolder"));
            outline.push_attribute((
                "anyMatch",
                if folder.rules.mode == MatchMode::Any {
                    "true"
                } else {
                    "false"
                },
            ));
            outline.push_attribute((
                "unreadOnly",
                if folder.rules.unread_only {
                    "true"
                } else {
                    "false"
                },
            ));

            writer.write_event(Event::Start(outline))?;
            for rule in &folder.rules.rules {
                let mut rule_outline = BytesStart::new("outline");
                rule_outline.push_attribute(("type", "rule"));
                rule_outline.push_attribute(("text", rule.info.title));
                rule_outline.push_attribute(("rule", rule.info.id));
                rule_outline.push_attribute(("value", rule.value.as_str()));
                rule_outline
                    .push_attribute(("additive", if rule.additive { "true" } else { "false" }));
                writer.write_event(Event::Empty(rule_outline))?;
            }
            writer.write_event(Event::End(BytesEnd::new("outline")))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Feeds</title></head>
  <body>
    <outline text="News" title="News">
      <outline type="rss" text="Example" title="Example" xmlUrl="https://example.com/feed.xml" htmlUrl="https://example.com"/>
    </outline>
    <outline type="rss" text="Top Level" xmlUrl="https://top.example/rss"/>
    <outline type="vfolder" text="Rust stuff" anyMatch="false" unreadOnly="false">
      <outline type="rule" rule="exact_title" value="rust" additive="true"/>
      <outline type="rule" rule="unread" value="" additive="true"/>
    </outline>
  </body>
</opml>"#;

    #[test]
    fn test_import_structure() {
        let mut list = FeedList::new();
        let root = list.root_id().clone();
        let created = import(&mut list, SAMPLE, &root).unwrap();
        assert_eq!(created.len(), 3);

        let folder = list.node(&created[0]).unwrap();
        assert_eq!(folder.title, "News");
        assert!(matches!(folder.kind, NodeKind::Folder));
        assert_eq!(folder.children.len(), 1);

        let feed = list.node(&folder.children[0]).unwrap();
        let subscription = feed.subscription().unwrap();
        assert_eq!(subscription.source, "https://example.com/feed.xml");
        assert_eq!(subscription.homepage.as_deref(), Some("https://example.com"));

        let vfolder = list.node(&created[2]).unwrap();
        let NodeKind::SearchFolder { folder } = &vfolder.kind else {
            panic!("expected a search folder");
        };
        assert_eq!(folder.rules.rules.len(), 2);
        assert_eq!(folder.rules.rules[0].info.id, "exact_title");
        assert_eq!(folder.rules.rules[0].value, "rust");
        assert!(folder.rules.rules[0].additive);
    }

    #[test]
    fn test_feed_without_title_uses_url() {
        let mut list = FeedList::new();
        let root = list.root_id().clone();
        let created = import(
            &mut list,
            r#"<opml><body><outline type="rss" xmlUrl="https://x.example/f"/></body></opml>"#,
            &root,
        )
        .unwrap();
        assert_eq!(list.node(&created[0]).unwrap().title, "https://x.example/f");
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut list = FeedList::new();
        let root = list.root_id().clone();
        import(&mut list, SAMPLE, &root).unwrap();

        let exported = export(&list, &root).unwrap();
        let mut reimported = FeedList::new();
        let reroot = reimported.root_id().clone();
        import(&mut reimported, &exported, &reroot).unwrap();

        // Same shape, titles, urls, and rules.
        let originals = list.children(&root);
        let copies = reimported.children(&reroot);
        assert_eq!(originals.len(), copies.len());
        for (a, b) in originals.iter().zip(copies.iter()) {
            let a = list.node(a).unwrap();
            let b = reimported.node(b).unwrap();
            assert_eq!(a.title, b.title);
            assert_eq!(a.children.len(), b.children.len());
            match (&a.kind, &b.kind) {
                (NodeKind::SearchFolder { folder: fa }, NodeKind::SearchFolder { folder: fb }) => {
                    assert_eq!(fa.rules.mode, fb.rules.mode);
                    assert_eq!(fa.rules.rules.len(), fb.rules.rules.len());
                    for (ra, rb) in fa.rules.rules.iter().zip(fb.rules.rules.iter()) {
                        assert_eq!(ra.info.id, rb.info.id);
                        assert_eq!(ra.value, rb.value);
                        assert_eq!(ra.additive, rb.additive);
                    }
                }
                (NodeKind::Feed { subscription: sa }, NodeKind::Feed { subscription: sb }) => {
                    assert_eq!(sa.source, sb.source);
                    assert_eq!(sa.homepage, sb.homepage);
                }
                (NodeKind::Folder, NodeKind::Folder) => {}
                _ => panic!("node kinds diverged in round trip"),
            }
        }
    }
}
