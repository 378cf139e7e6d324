//! Post-fetch filters: XSLT stylesheets and arbitrary shell commands.
//!
//! A filter failure never fails the job — the result keeps its status but
//! the body is cleared and `filter_errors` records what happened, so the
//! subscription can render the message.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::UpdateResult;

const FILTER_TIMEOUT: Duration = Duration::from_secs(60);

/// Applies the subscription's filter to a fetched body.
///
/// Stylesheet paths (`*.xsl`) run through the system `xsltproc`; anything
/// else is treated as a shell command fed the body on a temp file
/// (`cmd < tmpfile`). The temp file is removed on every path.
pub(crate) async fn apply(filter_cmd: &str, result: &mut UpdateResult) {
    let filtered = if filter_cmd.ends_with(".xsl") {
        apply_xslt(filter_cmd, result).await
    } else {
        exec_filter_cmd(filter_cmd, result).await
    };

    if let Some(data) = filtered {
        result.data = data;
    } else {
        result.data.clear();
    }
}

/// Writes the body to a temp file and pipes it through a shell command.
fn write_temp_body(data: &[u8]) -> std::io::Result<tempfile::NamedTempFile> {
    let mut tmp = tempfile::Builder::new().prefix("eddy-").tempfile()?;
    tmp.write_all(data)?;
    tmp.flush()?;
    Ok(tmp)
}

async fn run_filter(command_line: String, result: &mut UpdateResult) -> Option<Vec<u8>> {
    let child = Command::new("/bin/sh")
        .arg("-c")
        .arg(&command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            result.filter_errors = Some(format!("could not open pipe \"{}\": {}", command_line, e));
            return None;
        }
    };

    let mut stdout = child.stdout.take();
    let reader = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(out) = stdout.as_mut() {
            let _ = out.read_to_end(&mut buf).await;
        }
        buf
    });

    match tokio::time::timeout(FILTER_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            let out = reader.await.unwrap_or_default();
            Some(out)
        }
        Ok(Ok(status)) => {
            tracing::debug!(command = %command_line, status = ?status.code(), "filter exited with error");
            result.filter_errors = Some(format!(
                "\"{}\" exited with status {}",
                command_line,
                status.code().unwrap_or(-1)
            ));
            None
        }
        Ok(Err(e)) => {
            reader.abort();
            result.filter_errors = Some(e.to_string());
            None
        }
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            reader.abort();
            result.filter_errors = Some(format!("filter \"{}\" timed out", command_line));
            None
        }
    }
}

async fn exec_filter_cmd(filter_cmd: &str, result: &mut UpdateResult) -> Option<Vec<u8>> {
    let tmp = match write_temp_body(&result.data) {
        Ok(tmp) => tmp,
        Err(e) => {
            result.filter_errors = Some(format!("could not write temporary file: {}", e));
            return None;
        }
    };

    let command_line = format!("{} < {}", filter_cmd, tmp.path().display());
    tracing::debug!(command = %command_line, "applying filter command");
    let out = run_filter(command_line, result).await;
    drop(tmp);
    out
}

/// Applies an XSLT stylesheet to an XML body.
///
/// There is no maintained in-process XSLT engine in the ecosystem, so the
/// stylesheet is applied by the system `xsltproc`.
async fn apply_xslt(stylesheet: &str, result: &mut UpdateResult) -> Option<Vec<u8>> {
    let tmp = match write_temp_body(&result.data) {
        Ok(tmp) => tmp,
        Err(e) => {
            result.filter_errors = Some(format!("could not write temporary file: {}", e));
            return None;
        }
    };

    let command_line = format!("xsltproc '{}' '{}'", stylesheet, tmp.path().display());
    tracing::debug!(stylesheet = stylesheet, "applying filter stylesheet");
    let out = run_filter(command_line, result).await;
    drop(tmp);
    out
}
