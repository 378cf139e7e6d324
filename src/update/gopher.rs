//! `gopher://` sources: plain TCP fetch of a phlog directory listing.
//!
//! The runner only transports bytes; turning the listing into items is the
//! parser layer's job (see `parser::gopher`).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{JobHandle, UpdateRequest, UpdateResult};

const DEFAULT_PORT: u16 = 70;
const READ_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Splits `gopher://host[:port]/<selector>` into its parts.
///
/// The first character of the path is the gopher item type and is not part
/// of the selector sent on the wire.
fn parse_gopher_url(source: &str) -> Option<(String, u16, String)> {
    let rest = source.strip_prefix("gopher://")?;
    let (host_port, path) = match rest.split_once('/') {
        Some((hp, p)) => (hp, p),
        None => (rest, ""),
    };

    let (host, port) = match host_port.split_once(':') {
        Some((h, p)) => (h, p.parse().ok()?),
        None => (host_port, DEFAULT_PORT),
    };
    if host.is_empty() {
        return None;
    }

    // Drop the leading item-type character of the path.
    let selector = if path.is_empty() { "" } else { &path[1..] };

    Some((host.to_string(), port, selector.to_string()))
}

/// Fetches a gopher listing over TCP.
pub(crate) async fn process(request: &UpdateRequest, handle: &JobHandle) -> UpdateResult {
    let mut result = UpdateResult {
        source: request.source.clone(),
        update_state: request.update_state.clone(),
        ..Default::default()
    };

    let Some((host, port, selector)) = parse_gopher_url(&request.source) else {
        tracing::debug!(source = %request.source, "invalid gopher URL");
        result.error = Some(format!("invalid gopher URL \"{}\"", request.source));
        return result;
    };

    tracing::debug!(host = %host, port = port, selector = %selector, "gopher request");

    let fetch = async {
        let mut stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| format!("failed to connect: {}", e))?;
        stream
            .write_all(format!("/{}\r\n", selector).as_bytes())
            .await
            .map_err(|e| format!("failed to send request: {}", e))?;

        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| format!("failed to read response: {}", e))?;
            if n == 0 {
                break;
            }
            if data.len() + n > MAX_RESPONSE_SIZE {
                data.extend_from_slice(&buf[..MAX_RESPONSE_SIZE - data.len()]);
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
        Ok::<Vec<u8>, String>(data)
    };

    let outcome = tokio::select! {
        outcome = tokio::time::timeout(READ_TIMEOUT, fetch) => outcome,
        _ = handle.kill.notified() => {
            result.error = Some("request cancelled".to_string());
            return result;
        }
    };

    match outcome {
        Ok(Ok(data)) => {
            result.http_status = 200;
            result.data = data;
            result.content_type = Some("text/gopher".to_string());
        }
        Ok(Err(e)) => {
            tracing::debug!(source = %request.source, error = %e, "gopher fetch failed");
            result.error = Some(e);
        }
        Err(_) => {
            result.http_status = 504;
            result.error = Some("gopher request timed out".to_string());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{OwnerId, UpdateOptions, UpdateState};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_gopher_url() {
        assert_eq!(
            parse_gopher_url("gopher://example.org/1phlog"),
            Some(("example.org".to_string(), 70, "phlog".to_string()))
        );
        assert_eq!(
            parse_gopher_url("gopher://example.org:7070/0notes/a.txt"),
            Some(("example.org".to_string(), 7070, "notes/a.txt".to_string()))
        );
        assert_eq!(
            parse_gopher_url("gopher://example.org"),
            Some(("example.org".to_string(), 70, String::new()))
        );
        assert_eq!(parse_gopher_url("https://example.org/"), None);
    }

    #[tokio::test]
    async fn test_fetch_listing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 128];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"/phlog\r\n");
            socket
                .write_all(b"0A post\t/phlog/a.txt\texample.org\t70\r\n.\r\n")
                .await
                .unwrap();
        });

        let source = format!("gopher://127.0.0.1:{}/1phlog", addr.port());
        let request = UpdateRequest::new(&source, UpdateState::default(), UpdateOptions::default());
        let handle = JobHandle::new(1, OwnerId::from("test"));

        let result = process(&request, &handle).await;
        assert_eq!(result.http_status, 200);
        assert!(result.data.starts_with(b"0A post"));
    }
}
