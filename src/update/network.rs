//! HTTP transport: conditional requests, redirect reporting, capped reads.

use futures::StreamExt;
use secrecy::ExposeSecret;

use super::{JobHandle, UpdateRequest, UpdateResult};

/// Response bodies above this size are discarded.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Performs one HTTP fetch for a request.
///
/// Honours `If-None-Match` / `If-Modified-Since` from the request's update
/// state, follows redirects (the effective URL ends up in the result), and
/// treats 304 as a normal zero-body result: the stored conditional tokens
/// stay untouched. A 200 response replaces them with the server's values.
pub(crate) async fn process(
    client: &reqwest::Client,
    request: &UpdateRequest,
    handle: &JobHandle,
) -> UpdateResult {
    let mut result = UpdateResult {
        source: request.source.clone(),
        update_state: request.update_state.clone(),
        ..Default::default()
    };

    let mut builder = match &request.post_data {
        Some(body) => client
            .post(&request.source)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body.clone()),
        None => client.get(&request.source),
    };

    if let Some(etag) = &request.update_state.etag {
        builder = builder.header(reqwest::header::IF_NONE_MATCH, etag);
    }
    if let Some(last_modified) = &request.update_state.last_modified {
        builder = builder.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
    }
    if let Some(cookies) = &request.update_state.cookies {
        builder = builder.header(reqwest::header::COOKIE, cookies);
    }
    if let Some(auth) = &request.auth_value {
        builder = builder.header(reqwest::header::AUTHORIZATION, auth);
    } else if let Some(username) = &request.options.username {
        let password = request
            .options
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string());
        builder = builder.basic_auth(username, password);
    }

    let response = tokio::select! {
        response = builder.send() => response,
        _ = handle.kill.notified() => {
            result.error = Some("request cancelled".to_string());
            return result;
        }
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(source = %request.source, error = %e, "transport error");
            result.error = Some(e.to_string());
            return result;
        }
    };

    result.source = response.url().to_string();
    result.http_status = response.status().as_u16();
    result.content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    if result.http_status == 304 {
        // Not modified: zero-body success, conditional tokens unchanged.
        tracing::debug!(source = %result.source, "not modified");
        return result;
    }

    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let last_modified = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    match read_limited_bytes(response, handle).await {
        Ok(Some(bytes)) => {
            result.data = bytes;
        }
        Ok(None) => {
            result.error = Some("request cancelled".to_string());
            return result;
        }
        Err(e) => {
            result.error = Some(e);
            return result;
        }
    }

    if result.http_status == 200 {
        if etag.is_some() {
            result.update_state.etag = etag;
        }
        if last_modified.is_some() {
            result.update_state.last_modified = last_modified;
        }
    }

    tracing::debug!(
        source = %result.source,
        status = result.http_status,
        size = result.data.len(),
        "request finished"
    );

    result
}

/// Reads a response body with the size cap, aborting on cancellation.
///
/// Returns `Ok(None)` when the job was cancelled mid-read.
async fn read_limited_bytes(
    response: reqwest::Response,
    handle: &JobHandle,
) -> Result<Option<Vec<u8>>, String> {
    if let Some(len) = response.content_length() {
        if len as usize > MAX_BODY_SIZE {
            return Err("response too large".to_string());
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = handle.kill.notified() => return Ok(None),
        };

        match chunk {
            Some(Ok(chunk)) => {
                if bytes.len().saturating_add(chunk.len()) > MAX_BODY_SIZE {
                    return Err("response too large".to_string());
                }
                bytes.extend_from_slice(&chunk);
            }
            Some(Err(e)) => return Err(e.to_string()),
            None => break,
        }
    }

    Ok(Some(bytes))
}
