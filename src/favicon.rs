//! Favicon discovery: a bounded, prioritised probe over candidate URLs.
//!
//! Candidates are tried strictly in order: the feed's explicit icon, the
//! feed directory's `favicon.ico`, then the server roots of the feed URL
//! and the homepage. A candidate with an image extension is stored
//! directly; anything else is scanned as HTML for `<link rel="…icon">`
//! references, and a hit replaces the remaining queue (the site's own
//! list wins, largest declared size first). At most ten URLs are fetched
//! per subscription.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;

use crate::feedlist::NodeId;
use crate::update::{OwnerId, UpdateFlags, UpdateRequest, UpdateResult};
use crate::util::{resolve_url, server_root};
use crate::{CoreCtx, CoreEvent};

/// Hard bound on fetches per discovery run.
const MAX_URLS_PER_RUN: usize = 10;

const IMAGE_EXTENSIONS: &[&str] = &[".ico", ".png", ".gif", ".jpg", ".jpeg", ".svg"];

struct DiscoveryRun {
    node_id: NodeId,
    urls: VecDeque<String>,
    done: HashSet<String>,
}

/// Start (or restart) favicon discovery for a subscription node.
pub fn discover(ctx: &CoreCtx, node_id: &NodeId) {
    let candidates = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(subscription) = feedlist.subscription_mut(node_id) else {
            return;
        };
        subscription.update_state.last_favicon_poll = Utc::now().timestamp();
        candidate_urls(
            subscription.metadata_value("icon"),
            &subscription.source,
            subscription.homepage.as_deref(),
        )
    };

    if candidates.is_empty() {
        return;
    }

    tracing::debug!(node = %node_id, candidates = candidates.len(), "starting favicon discovery");
    let run = DiscoveryRun {
        node_id: node_id.clone(),
        urls: candidates.into(),
        done: HashSet::new(),
    };
    probe_next(ctx, run);
}

/// Ordered candidate list for one subscription.
fn candidate_urls(
    explicit_icon: Option<&str>,
    source: &str,
    homepage: Option<&str>,
) -> Vec<String> {
    let mut urls = Vec::new();
    let mut push = |url: String| {
        if !urls.contains(&url) {
            urls.push(url);
        }
    };

    if let Some(icon) = explicit_icon {
        push(icon.to_string());
    }

    // <base>/favicon.ico next to the feed document.
    if let Ok(base) = url::Url::parse(source) {
        if let Ok(joined) = base.join("favicon.ico") {
            push(joined.to_string());
        }
    }

    if let Some(root) = server_root(source) {
        push(format!("{}/favicon.ico", root));
    }

    if let Some(homepage) = homepage {
        // The homepage itself goes through the HTML-discovery path.
        push(homepage.to_string());
        if let Some(root) = server_root(homepage) {
            push(format!("{}/favicon.ico", root));
        }
    }

    urls
}

fn has_image_extension(url: &str) -> bool {
    let path = url.split(&['?', '#'][..]).next().unwrap_or(url).to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Fetch the next candidate, if the budget allows.
fn probe_next(ctx: &CoreCtx, mut run: DiscoveryRun) {
    if run.done.len() >= MAX_URLS_PER_RUN {
        tracing::debug!(node = %run.node_id, tried = run.done.len(), "giving up favicon discovery");
        return;
    }

    let url = loop {
        match run.urls.pop_front() {
            Some(url) if run.done.contains(&url) => continue,
            Some(url) => break url,
            None => return,
        }
    };
    run.done.insert(url.clone());

    tracing::debug!(node = %run.node_id, url = %url, "trying favicon candidate");

    // Never allow commands here: a redirect must not become a shell.
    let request = UpdateRequest::new(&url, Default::default(), Default::default());
    let flags = UpdateFlags {
        no_feed: true,
        priority_high: true,
        ..UpdateFlags::NONE
    };

    let ctx2 = ctx.clone();
    let owner = OwnerId(run.node_id.clone());
    ctx.queue.submit(
        request,
        owner,
        flags,
        Box::new(move |result| {
            Box::pin(async move {
                if has_image_extension(&result.source) {
                    icon_data_received(&ctx2, run, result).await;
                } else {
                    html_received(&ctx2, run, result);
                }
            })
        }),
    );
}

/// A candidate with an image extension: store it if it carried bytes.
async fn icon_data_received(ctx: &CoreCtx, run: DiscoveryRun, result: UpdateResult) {
    // The MIME type is wrong far too often to be worth checking.
    if result.http_status == 200 && !result.data.is_empty() {
        if ctx
            .db
            .save_icon(&run.node_id, &result.data, &result.source)
            .await
            .is_ok()
        {
            tracing::debug!(node = %run.node_id, url = %result.source, size = result.data.len(), "favicon stored");
            ctx.emit(CoreEvent::IconUpdated(run.node_id.clone()));
            return;
        }
    }

    tracing::debug!(node = %run.node_id, url = %result.source, "no usable favicon data");
    probe_next(ctx, run);
}

/// A non-image candidate: scan it as HTML for declared icons.
fn html_received(ctx: &CoreCtx, mut run: DiscoveryRun, result: UpdateResult) {
    if result.http_status == 200 && !result.data.is_empty() {
        let html = String::from_utf8_lossy(&result.data);
        let links = scan_html_for_icons(&html, &result.source);
        if !links.is_empty() {
            // The site's declared set replaces our remaining guesses;
            // it is sorted by size so the best quality downloads first.
            tracing::debug!(node = %run.node_id, found = links.len(), "html icon links found");
            run.urls = links.into();
        }
    }

    probe_next(ctx, run);
}

/// Scan HTML for `<link rel="…icon…">` hrefs, largest declared size
/// first.
fn scan_html_for_icons(html: &str, base_url: &str) -> Vec<String> {
    let html_lower = html.to_lowercase();
    let mut found: Vec<(u32, String)> = Vec::new();
    let mut search_from = 0;

    while let Some(link_start) = html_lower[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let remaining = &html_lower[abs_start..];

        let tag_end = match remaining.find('>') {
            Some(pos) => pos,
            None => break,
        };
        let tag = &remaining[..=tag_end];
        let original_tag = &html[abs_start..abs_start + tag_end + 1];

        if extract_attr_value(tag, "rel").is_some_and(|rel| rel.contains("icon")) {
            if let Some(href) = extract_attr_value(original_tag, "href") {
                let size = extract_attr_value(tag, "sizes")
                    .and_then(|sizes| sizes.split('x').next().map(|s| s.to_string()))
                    .and_then(|s| s.parse::<u32>().ok())
                    .unwrap_or(0);
                found.push((size, resolve_url(href, base_url)));
            }
        }

        search_from = abs_start + tag_end + 1;
    }

    found.sort_by(|a, b| b.0.cmp(&a.0));
    found.into_iter().map(|(_, url)| url).collect()
}

/// Extracts the value of an attribute from a tag string (case-preserving).
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_lowercase();
    let attr_prefix = format!("{attr_name}=");

    let attr_start = tag_lower.find(&attr_prefix)?;
    let value_start = attr_start + attr_prefix.len();

    if value_start >= tag.len() {
        return None;
    }

    let rest = &tag[value_start..];
    let quote = rest.as_bytes().first()?;

    if *quote != b'"' && *quote != b'\'' {
        return None;
    }

    let quote_char = *quote as char;
    let inner = &rest[1..];
    let end = inner.find(quote_char)?;

    Some(&inner[..end])
}
