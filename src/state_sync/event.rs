//! Propagation events published on a namespace channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of every propagation channel; the namespace follows the colon.
pub const CHANNEL_PREFIX: &str = "state_updates";

pub fn channel_name(namespace: &str) -> String {
    format!("{CHANNEL_PREFIX}:{namespace}")
}

/// Namespaces end at the first `:` of a store key, so they cannot contain one.
pub fn valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty() && !namespace.contains(':')
}

pub fn store_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

/// Wire envelope for a change to one cache entry.
///
/// `origin` carries the instance id of the publishing cache. Payloads from
/// older publishers may omit it, in which case the change is treated as remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropagationEvent {
    Update {
        namespace: String,
        key: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    Delete {
        namespace: String,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
}

impl PropagationEvent {
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Update { namespace, .. } | Self::Delete { namespace, .. } => namespace,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Update { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    pub fn origin(&self) -> Option<&str> {
        match self {
            Self::Update { origin, .. } | Self::Delete { origin, .. } => origin.as_deref(),
        }
    }

    /// The new value, or `None` for a delete.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Update { value, .. } => Some(value),
            Self::Delete { .. } => None,
        }
    }
}
