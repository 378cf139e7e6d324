use url::Url;

/// What a subscription source string denotes.
///
/// Source strings beginning with `|` are commands, strings containing
/// `://` are URIs, everything else is a local file path. The subscription
/// dialog, the scheduler, and the job runner all classify with this one
/// function so they cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `|command args...` — run through a shell, stdout is the body.
    Command,
    /// Any `scheme://...` URI, including `file://` and `gopher://`.
    Uri,
    /// A bare filesystem path.
    LocalFile,
}

impl SourceKind {
    pub fn of(source: &str) -> Self {
        if source.starts_with('|') {
            SourceKind::Command
        } else if source.contains("://") {
            SourceKind::Uri
        } else {
            SourceKind::LocalFile
        }
    }
}

/// Returns `scheme://host[:port]` for a URL, without path or query.
///
/// Used to build the `/favicon.ico` fallback candidates.
pub fn server_root(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{}://{}:{}", url.scheme(), host, port)),
        None => Some(format!("{}://{}", url.scheme(), host)),
    }
}

/// Resolves a potentially relative URL against a base URL.
///
/// Absolute URLs pass through untouched; protocol-relative URLs pick up
/// https; anything else is joined against the base. Falls back to the
/// input when nothing parses.
pub fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_owned();
    }

    if href.starts_with("//") {
        let with_scheme = format!("https:{}", href);
        if let Ok(parsed) = Url::parse(&with_scheme) {
            return parsed.to_string();
        }
    }

    if let Ok(base) = Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_owned()
}
