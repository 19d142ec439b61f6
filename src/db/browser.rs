//! SQL Server Browser client (SSRP over UDP 1434).
//!
//! A `CLNT_BCAST_EX` probe is sent to the browser address (broadcast by
//! default) and every `SVR_RESP` datagram received before the deadline is
//! parsed into [`BrowserEntry`] values.

use crate::error::{DbError, DbResult};
use crate::models::ServerInfo;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default browser endpoint: limited broadcast on the SSRP port.
pub const DEFAULT_BROWSER_ADDRESS: &str = "255.255.255.255:1434";

const CLNT_BCAST_EX: u8 = 0x02;
const SVR_RESP: u8 = 0x05;
const DEFAULT_INSTANCE: &str = "MSSQLSERVER";

/// One instance advertised by a SQL Server Browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserEntry {
    pub server_name: String,
    pub instance_name: String,
    pub is_clustered: bool,
    pub version: Option<String>,
    pub tcp_port: Option<u16>,
}

impl BrowserEntry {
    /// Name usable in a `Server=` key: `HOST` for the default instance, `HOST\INSTANCE` otherwise.
    pub fn server_display_name(&self) -> String {
        if self.instance_name.is_empty() || self.instance_name.eq_ignore_ascii_case(DEFAULT_INSTANCE)
        {
            self.server_name.clone()
        } else {
            format!("{}\\{}", self.server_name, self.instance_name)
        }
    }

    pub fn to_server_info(&self) -> ServerInfo {
        let edition = if self.is_clustered {
            "SQL Server (clustered)"
        } else {
            "SQL Server"
        };
        let server = ServerInfo::new(self.server_display_name(), edition);
        match &self.version {
            Some(v) => server.with_version(v.clone()),
            None => server,
        }
    }
}

/// Parse an `SVR_RESP` datagram.
///
/// The payload is `0x05`, a little-endian `u16` length, then instance records
/// such as `ServerName;HOST;InstanceName;SQLEXPRESS;IsClustered;No;Version;16.0.1000.6;tcp;1433;;`.
/// Records without a server name are skipped.
pub fn parse_browser_response(data: &[u8]) -> Vec<BrowserEntry> {
    let payload = match data {
        [SVR_RESP, lo, hi, rest @ ..] => {
            let len = u16::from_le_bytes([*lo, *hi]) as usize;
            &rest[..len.min(rest.len())]
        }
        _ => data,
    };
    let text = String::from_utf8_lossy(payload);

    text.split(";;")
        .filter_map(|record| {
            let mut parts = record.split(';');
            let mut entry = BrowserEntry {
                server_name: String::new(),
                instance_name: String::new(),
                is_clustered: false,
                version: None,
                tcp_port: None,
            };
            while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                match key.trim().to_ascii_lowercase().as_str() {
                    "servername" => entry.server_name = value.to_string(),
                    "instancename" => entry.instance_name = value.to_string(),
                    "isclustered" => entry.is_clustered = value.eq_ignore_ascii_case("yes"),
                    "version" => entry.version = Some(value.to_string()).filter(|v| !v.is_empty()),
                    "tcp" => entry.tcp_port = value.parse().ok(),
                    _ => {}
                }
            }
            (!entry.server_name.is_empty()).then_some(entry)
        })
        .collect()
}

/// Probe `address` and collect browser answers until `wait` elapses.
pub async fn discover_instances(
    address: &str,
    wait: Duration,
    cancel: &CancellationToken,
) -> DbResult<Vec<BrowserEntry>> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| browser_error("bind UDP socket", e))?;
    socket
        .set_broadcast(true)
        .map_err(|e| browser_error("enable broadcast", e))?;
    socket
        .send_to(&[CLNT_BCAST_EX], address)
        .await
        .map_err(|e| browser_error("send browser probe", e))?;
    debug!(address, wait_ms = wait.as_millis() as u64, "Sent SQL Server Browser probe");

    let deadline = Instant::now() + wait;
    let mut entries: Vec<BrowserEntry> = Vec::new();
    let mut buf = vec![0u8; 65535];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(DbError::cancelled("server discovery")),
            received = timeout_at(deadline, socket.recv_from(&mut buf)) => match received {
                Err(_) => break,
                Ok(Ok((len, from))) => {
                    let found = parse_browser_response(&buf[..len]);
                    debug!(%from, instances = found.len(), "Browser response");
                    for entry in found {
                        if !entries
                            .iter()
                            .any(|e| e.server_display_name().eq_ignore_ascii_case(&entry.server_display_name()))
                        {
                            entries.push(entry);
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Browser receive failed");
                    break;
                }
            }
        }
    }

    Ok(entries)
}

fn browser_error(action: &str, error: std::io::Error) -> DbError {
    DbError::connection(
        format!("SQL Server Browser: failed to {}: {}", action, error),
        "Check that UDP 1434 is reachable and broadcast is permitted on this network",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> Vec<u8> {
        let mut data = vec![SVR_RESP];
        data.extend_from_slice(&(body.len() as u16).to_le_bytes());
        data.extend_from_slice(body.as_bytes());
        data
    }

    #[test]
    fn test_parse_multiple_instances() {
        let data = response(
            "ServerName;DB01;InstanceName;MSSQLSERVER;IsClustered;No;Version;16.0.1000.6;tcp;1433;;\
             ServerName;DB01;InstanceName;SQLEXPRESS;IsClustered;Yes;Version;15.0.2000.5;tcp;49822;;",
        );
        let entries = parse_browser_response(&data);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].server_display_name(), "DB01");
        assert_eq!(entries[0].tcp_port, Some(1433));
        assert_eq!(entries[1].server_display_name(), "DB01\\SQLEXPRESS");
        assert!(entries[1].is_clustered);

        let info = entries[1].to_server_info();
        assert_eq!(info.edition, "SQL Server (clustered)");
        assert_eq!(info.version.as_deref(), Some("15.0.2000.5"));
    }

    #[test]
    fn test_parse_ignores_garbage() {
        assert!(parse_browser_response(&[]).is_empty());
        assert!(parse_browser_response(&response("nonsense;;")).is_empty());
        // declared length longer than the datagram
        let mut data = response("ServerName;X;InstanceName;Y;;");
        data[1] = 0xFF;
        assert_eq!(parse_browser_response(&data).len(), 1);
    }
}
