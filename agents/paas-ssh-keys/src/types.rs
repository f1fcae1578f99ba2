//! Types for SSH key management
//!
//! Key types and the JSON records exchanged with the broker's
//! `/user/keys` resources.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::KeysError;

/// Supported SSH key types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SshKeyType {
    /// RSA (`ssh-rsa`)
    #[serde(rename = "ssh-rsa")]
    Rsa,
    /// DSA (`ssh-dss`)
    #[serde(rename = "ssh-dss")]
    Dsa,
}

impl SshKeyType {
    /// OpenSSH wire token for this key type
    pub fn wire_name(&self) -> &'static str {
        match self {
            SshKeyType::Rsa => "ssh-rsa",
            SshKeyType::Dsa => "ssh-dss",
        }
    }

    /// Reverse mapping of [`SshKeyType::wire_name`]
    pub fn from_wire_name(token: &str) -> Option<Self> {
        match token {
            "ssh-rsa" => Some(SshKeyType::Rsa),
            "ssh-dss" => Some(SshKeyType::Dsa),
            _ => None,
        }
    }
}

impl std::fmt::Display for SshKeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for SshKeyType {
    type Err = KeysError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire_name(s)
            .ok_or_else(|| KeysError::InvalidKeyFormat(format!("unknown key type: {s}")))
    }
}

// ============================================================
// Wire Records
// ============================================================

/// A key as the broker reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: SshKeyType,
    pub content: String,
}

/// Body of `POST /user/keys`
#[derive(Debug, Serialize)]
pub(crate) struct CreateKeyRequest<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub key_type: SshKeyType,
    pub content: &'a str,
}

/// Body of `PUT /user/keys/{name}`
#[derive(Debug, Serialize)]
pub(crate) struct UpdateKeyRequest<'a> {
    #[serde(rename = "type")]
    pub key_type: SshKeyType,
    pub content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_type_wire_names() {
        assert_eq!(SshKeyType::Rsa.to_string(), "ssh-rsa");
        assert_eq!(SshKeyType::Dsa.to_string(), "ssh-dss");
        assert_eq!("ssh-dss".parse::<SshKeyType>().unwrap(), SshKeyType::Dsa);
    }

    #[test]
    fn test_unknown_key_type_is_rejected() {
        let err = "ssh-ed25519".parse::<SshKeyType>().unwrap_err();
        assert!(matches!(err, KeysError::InvalidKeyFormat(_)));
        // Wire tokens are case-sensitive
        assert!(SshKeyType::from_wire_name("SSH-RSA").is_none());
    }

    #[test]
    fn test_key_record_serde() {
        let json = r#"{"name":"laptop","type":"ssh-dss","content":"AAAAB3NzaC1kc3M="}"#;
        let record: KeyRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.name, "laptop");
        assert_eq!(record.key_type, SshKeyType::Dsa);

        let request = CreateKeyRequest {
            name: &record.name,
            key_type: SshKeyType::Rsa,
            content: &record.content,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "ssh-rsa");
        assert_eq!(value["name"], "laptop");
    }

    #[test]
    fn test_unknown_type_in_record_fails_to_decode() {
        let json = r#"{"name":"k","type":"ssh-ed25519","content":"AAAA"}"#;
        assert!(serde_json::from_str::<KeyRecord>(json).is_err());
    }
}
