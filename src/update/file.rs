//! Local file sources.

use super::{UpdateRequest, UpdateResult};

/// Reads a `file://` URI or bare path.
///
/// A `#fragment` suffix is stripped before the lookup. Status mapping:
/// readable file → 200, missing → 404, unreadable or empty → 403.
pub(crate) async fn process(request: &UpdateRequest) -> UpdateResult {
    let mut result = UpdateResult {
        source: request.source.clone(),
        update_state: request.update_state.clone(),
        ..Default::default()
    };

    let mut path = request.source.as_str();
    if let Some(stripped) = path.strip_prefix("file://") {
        path = stripped;
    }
    if let Some(anchor) = path.find('#') {
        path = &path[..anchor];
    }

    match tokio::fs::read(path).await {
        Ok(data) if data.is_empty() => {
            tracing::debug!(path = path, "file is empty");
            result.http_status = 403;
            result.error = Some(format!("could not read file \"{}\"", path));
        }
        Ok(data) => {
            tracing::debug!(path = path, size = data.len(), "read file");
            result.http_status = 200;
            result.data = data;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            result.http_status = 404;
            result.error = Some(format!("there is no file \"{}\"", path));
        }
        Err(e) => {
            tracing::debug!(path = path, error = %e, "file unreadable");
            result.http_status = 403;
            result.error = Some(format!("could not read file \"{}\"", path));
        }
    }

    result
}
