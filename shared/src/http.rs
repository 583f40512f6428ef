//! Minimal HTTP/1.0 file fetching over a [`TraditionalConnection`].
//!
//! Only what is needed to pull a file off a web server: one GET, status 200,
//! a `Content-Length` header and a body of exactly that length.

use crate::config::ConnectionConfig;
use crate::connection::{Connection, Deadline};
use crate::error::{NetError, Result};
use crate::transport::TraditionalConnection;
use log::debug;
use std::path::Path;
use std::time::Duration;

pub const HTTP_PORT: u16 = 80;

const LINE_END: &str = "\r\n";

/// Fetches `path` from `server` on port 80.
pub async fn get_http_file(server: &str, path: &str, timeout: Duration) -> Result<Vec<u8>> {
    get_http_file_from(server, HTTP_PORT, path, timeout).await
}

/// Fetches `path` from `server:port`.
///
/// `timeout` bounds connecting and each line of the response header; the
/// body may take longer as long as it keeps flowing. Bodies larger than the
/// connection's `max_payload_len` are refused before any of it is read.
pub async fn get_http_file_from(
    server: &str,
    port: u16,
    path: &str,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let config = ConnectionConfig::default();
    let max_len = u64::from(config.max_payload_len);
    let conn = TraditionalConnection::new(config);
    conn.connect_by_name(server, port, timeout).await?;

    let request = format!("GET http://{}{} HTTP/1.0\r\n\r\n", server, path);
    conn.send_raw(request.as_bytes()).await?;

    let deadline = Deadline::after(timeout);
    let status_line = next_line(&conn, &deadline).await?;
    let status = status_line.split_whitespace().nth(1).unwrap_or_default();
    if status != "200" {
        return Err(NetError::Http(format!("server answered '{}'", status_line)));
    }

    let mut content_length = 0u64;
    loop {
        let line = next_line(&conn, &deadline).await?;
        if line.is_empty() {
            break;
        }
        if let Some(len) = content_length_of(&line) {
            content_length = len;
        }
    }

    if content_length == 0 {
        return Err(NetError::Http("response has no Content-Length".to_string()));
    }
    let too_large = || NetError::Http(format!("body of {} bytes is too large", content_length));
    if content_length > max_len {
        return Err(too_large());
    }
    let len = usize::try_from(content_length).map_err(|_| too_large())?;

    debug!("fetching {} bytes of {}{}", len, server, path);
    let body = conn
        .receive_raw(len, timeout)
        .await?
        .ok_or(NetError::Timeout)?;

    conn.disconnect();
    Ok(body)
}

/// Fetches `path` from `server` on port 80 and writes it to `local`,
/// replacing any existing file.
pub async fn download_http_file(
    server: &str,
    path: &str,
    local: impl AsRef<Path>,
    timeout: Duration,
) -> Result<()> {
    download_http_file_from(server, HTTP_PORT, path, local, timeout).await
}

pub async fn download_http_file_from(
    server: &str,
    port: u16,
    path: &str,
    local: impl AsRef<Path>,
    timeout: Duration,
) -> Result<()> {
    let body = get_http_file_from(server, port, path, timeout).await?;
    tokio::fs::write(local, body).await?;
    Ok(())
}

async fn next_line(conn: &TraditionalConnection, deadline: &Deadline) -> Result<String> {
    conn.get_line(LINE_END, deadline.remaining())
        .await?
        .ok_or(NetError::Timeout)
}

fn content_length_of(line: &str) -> Option<u64> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse().ok()
}
