//! Device authentication against a JSON key registry.

use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::Path,
};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::AuthError;

/// An authenticated principal and the capabilities it was granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub device_id: String,
    pub permissions: BTreeSet<String>,
}

impl Identity {
    /// Check a capability required by the deployment, if any.
    pub fn require(&self, permission: Option<&str>) -> Result<(), AuthError> {
        match permission {
            Some(p) if !self.permissions.contains(p) => Err(AuthError::PermissionDenied(p.to_string())),
            _ => Ok(()),
        }
    }
}

/// What a client presents to open a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub device_id: String,
    pub api_key: Option<String>,
}

impl Credentials {
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            api_key: None,
        }
    }

    pub fn with_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Auth Gate consulted once per session, before any backend call.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError>;
}

fn default_status() -> String {
    "active".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyRecord {
    pub device_id: String,
    /// When set, the client must present this key alongside the device id.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug)]
pub struct KeyRegistry {
    // Err holds the reason the registry could not be loaded
    records: Result<HashMap<String, KeyRecord>, String>,
}

impl KeyRegistry {
    pub fn from_records(records: impl IntoIterator<Item = KeyRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.device_id.clone(), r))
            .collect();
        Self { records: Ok(records) }
    }

    /// Load the registry file. A missing file yields an empty registry; an
    /// unreadable or invalid one makes every lookup fail with an internal
    /// error.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            warn!(
                "Key registry {} not found, every device will be refused",
                path.display()
            );
            return Self::from_records(Vec::new());
        }

        let parsed = fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))
            .and_then(|text| {
                serde_json::from_str::<Vec<KeyRecord>>(&text)
                    .map_err(|e| format!("invalid key registry {}: {e}", path.display()))
            });

        match parsed {
            Ok(records) => {
                info!("Loaded {} device keys from {}", records.len(), path.display());
                Self::from_records(records)
            }
            Err(reason) => {
                tracing::error!("{reason}");
                Self {
                    records: Err(reason),
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.as_ref().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let token = credentials.device_id.trim();
        if token.is_empty() {
            return Err(AuthError::MissingIdentity);
        }
        let records = self
            .records
            .as_ref()
            .map_err(|reason| AuthError::Internal(reason.clone()))?;
        let record = records
            .get(token)
            .ok_or_else(|| AuthError::UnknownIdentity(token.to_string()))?;

        if let Some(expected) = &record.api_key {
            if credentials.api_key.as_deref().map(str::trim) != Some(expected.as_str()) {
                return Err(AuthError::InvalidKey(token.to_string()));
            }
        }
        if record.status != "active" {
            return Err(AuthError::InactiveIdentity(token.to_string()));
        }
        let permissions: BTreeSet<String> = record
            .permissions
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        if permissions.is_empty() {
            return Err(AuthError::NoPermissions(token.to_string()));
        }

        Ok(Identity {
            device_id: record.device_id.clone(),
            permissions,
        })
    }
}

#[async_trait]
impl Authenticator for KeyRegistry {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        self.lookup(credentials)
    }
}
