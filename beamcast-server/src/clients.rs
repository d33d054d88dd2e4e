//! The persistent store of authorized clients.
//!
//! Each paired client is a `NamedCertificate`: a stable UUID, a display
//! name, and the PEM certificate it presents on every TLS handshake. The
//! store round-trips through a JSON state file whose `root` object also
//! carries the server's own UUID. Saves rewrite the whole file with a
//! normalized projection: duplicate certificates collapse to the first
//! entry and colliding names pick up a `" (N)"` suffix.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use beamcast_core::crypto::x509;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedCertificate {
    pub name: String,
    pub cert: String,
    pub uuid: String,
}

#[derive(Serialize)]
struct SaveFile<'a> {
    root: SaveRoot<'a>,
}

#[derive(Serialize)]
struct SaveRoot<'a> {
    uniqueid: &'a str,
    named_devices: &'a [NamedCertificate],
}

#[derive(Deserialize, Default)]
struct LoadFile {
    #[serde(default)]
    root: LoadRoot,
}

#[derive(Deserialize, Default)]
struct LoadRoot {
    #[serde(default)]
    uniqueid: Option<String>,
    #[serde(default)]
    named_devices: Vec<NamedCertificate>,
    /// Legacy format: per-device raw certificate lists.
    #[serde(default)]
    devices: Vec<LegacyDevice>,
}

#[derive(Deserialize, Default)]
struct LegacyDevice {
    #[serde(default)]
    certs: Vec<String>,
}

/// In-memory set of authorized clients, insertion order preserved.
pub struct ClientStore {
    pub unique_id: String,
    entries: Vec<Arc<NamedCertificate>>,
}

impl ClientStore {
    pub fn new() -> Self {
        Self {
            unique_id: Uuid::new_v4().to_string(),
            entries: Vec::new(),
        }
    }

    /// Load the store from disk. A missing or unreadable file yields an
    /// empty store with a fresh server UUID; the in-memory state stays
    /// authoritative for the rest of the process lifetime.
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                if path.exists() {
                    tracing::error!(path = %path.display(), error = %e, "couldn't read client store");
                } else {
                    tracing::info!(path = %path.display(), "client store doesn't exist yet");
                }
                return Self::new();
            }
        };

        let file: LoadFile = match serde_json::from_slice(&data) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "couldn't parse client store");
                return Self::new();
            }
        };

        let unique_id = file
            .root
            .uniqueid
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut entries = Vec::new();

        // Import from the legacy format: bare certificate strings become
        // unnamed entries with fresh UUIDs, renamed on the next save.
        for device in file.root.devices {
            for cert in device.certs {
                entries.push(Arc::new(NamedCertificate {
                    name: String::new(),
                    cert,
                    uuid: Uuid::new_v4().to_string(),
                }));
            }
        }

        for named in file.root.named_devices {
            entries.push(Arc::new(named));
        }

        Self { unique_id, entries }
    }

    /// Rewrite the state file with the normalized projection of this store.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let named_devices = self.normalized();
        let file = SaveFile {
            root: SaveRoot {
                uniqueid: &self.unique_id,
                named_devices: &named_devices,
            },
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Deduplicate by certificate (first wins) and disambiguate colliding
    /// names with `" (2)"`, `" (3)"`, … in insertion order. Any existing
    /// `" (…)"` suffix is stripped before counting.
    fn normalized(&self) -> Vec<NamedCertificate> {
        let mut seen_certs = HashSet::new();
        let mut name_counts: HashMap<String, usize> = HashMap::new();
        let mut out = Vec::new();

        for entry in &self.entries {
            if !seen_certs.insert(entry.cert.clone()) {
                continue;
            }

            let base = match entry.name.find(" (") {
                Some(pos) => entry.name[..pos].to_string(),
                None => entry.name.clone(),
            };
            let count = name_counts.entry(base.clone()).or_insert(0);
            *count += 1;
            let name = if *count > 1 {
                format!("{base} ({count})")
            } else {
                base
            };

            out.push(NamedCertificate {
                name,
                cert: entry.cert.clone(),
                uuid: entry.uuid.clone(),
            });
        }

        out
    }

    pub fn add(&mut self, cert: NamedCertificate) {
        self.entries.push(Arc::new(cert));
    }

    /// Remove every entry with the given UUID, returning how many went away.
    pub fn remove_by_uuid(&mut self, uuid: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.uuid != uuid);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[Arc<NamedCertificate>] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Match a presented DER certificate against the authorized set.
    pub fn find_by_der(&self, der: &[u8]) -> Option<Arc<NamedCertificate>> {
        self.entries
            .iter()
            .find(|entry| x509::matches_authorized(der, &entry.cert))
            .cloned()
    }
}

impl Default for ClientStore {
    fn default() -> Self {
        Self::new()
    }
}
