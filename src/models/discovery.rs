//! Server and database discovery models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A discovered database server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name as it should be used to connect (e.g. `HOST`, `HOST\INSTANCE`, `host:5432`)
    pub name: String,
    /// Edition / dialect tag reported by the server (e.g. "Developer Edition (64-bit)")
    pub edition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Number of discovery refreshes that reported this server
    #[serde(default)]
    pub weight: u32,
    pub last_seen: DateTime<Utc>,
}

impl ServerInfo {
    /// Create a freshly discovered server entry.
    pub fn new(name: impl Into<String>, edition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            edition: edition.into(),
            version: None,
            weight: 1,
            last_seen: Utc::now(),
        }
    }

    /// Set the server version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Case-insensitive server name comparison (SQL Server names are case-insensitive).
    pub fn same_server(&self, other: &ServerInfo) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

/// Merge a fresh discovery pass into the previously cached list.
///
/// Only servers reported by `discovered` survive. A server that was already
/// cached keeps its accumulated weight plus one. The result is ordered by
/// weight (highest first), then by name.
pub fn merge_discovered_servers(
    previous: &[ServerInfo],
    discovered: Vec<ServerInfo>,
) -> Vec<ServerInfo> {
    let mut merged: Vec<ServerInfo> = Vec::with_capacity(discovered.len());
    for mut server in discovered {
        if merged.iter().any(|s| s.same_server(&server)) {
            continue;
        }
        let prior_weight = previous
            .iter()
            .find(|p| p.same_server(&server))
            .map(|p| p.weight)
            .unwrap_or(0);
        server.weight = prior_weight.saturating_add(1);
        merged.push(server);
    }
    merged.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    merged
}

/// A database hosted by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl DatabaseInfo {
    pub fn new(name: impl Into<String>, size_bytes: Option<u64>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_increments_weight_of_known_servers() {
        let mut known = ServerInfo::new("DB1", "Standard Edition");
        known.weight = 4;
        let previous = vec![known, ServerInfo::new("gone", "Express Edition")];

        let merged = merge_discovered_servers(
            &previous,
            vec![
                ServerInfo::new("newcomer", "Express Edition"),
                ServerInfo::new("db1", "Standard Edition"),
            ],
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "db1");
        assert_eq!(merged[0].weight, 5);
        assert_eq!(merged[1].name, "newcomer");
        assert_eq!(merged[1].weight, 1);
    }

    #[test]
    fn test_merge_drops_duplicates_within_a_pass() {
        let merged = merge_discovered_servers(
            &[],
            vec![ServerInfo::new("A", "x"), ServerInfo::new("a", "y")],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].edition, "x");
    }

    #[test]
    fn test_merge_orders_ties_by_name() {
        let merged = merge_discovered_servers(
            &[],
            vec![ServerInfo::new("zeta", "x"), ServerInfo::new("Alpha", "x")],
        );
        assert_eq!(merged[0].name, "Alpha");
        assert_eq!(merged[1].name, "zeta");
    }
}
