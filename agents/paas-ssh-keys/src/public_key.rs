//! OpenSSH public keys
//!
//! Parses and formats the single-line authorized-keys form
//! `<wire-type> <base64> [comment]`. Only the type and the base64 body are
//! kept; the comment is dropped.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;
use std::str::FromStr;

use crate::error::KeysError;
use crate::generator::KeyPair;
use crate::types::SshKeyType;

/// An SSH public key: type plus base64 body
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key_type: SshKeyType,
    body: String,
}

impl PublicKey {
    /// Build a key from an explicit type and base64 body.
    pub fn new(key_type: SshKeyType, body: impl AsRef<str>) -> Result<Self, KeysError> {
        let body = body.as_ref().trim();
        validate_body(body)?;

        Ok(Self {
            key_type,
            body: body.to_string(),
        })
    }

    /// Trusted constructor for bodies the broker already accepted
    pub(crate) fn from_parts(key_type: SshKeyType, body: String) -> Self {
        Self { key_type, body }
    }

    /// Parse the first non-empty line of `text`.
    pub fn parse(text: &str) -> Result<Self, KeysError> {
        let line = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| KeysError::InvalidKeyFormat("empty public key".to_string()))?;

        let mut fields = line.split_whitespace();
        let (Some(wire_type), Some(body)) = (fields.next(), fields.next()) else {
            return Err(KeysError::InvalidKeyFormat(
                "expected '<type> <base64> [comment]'".to_string(),
            ));
        };

        Self::new(wire_type.parse()?, body)
    }

    /// Parse either a full `<type> <body>` line or a bare body.
    ///
    /// A bare body, with or without a trailing comment, takes `default_type`.
    pub fn parse_with_default(input: &str, default_type: SshKeyType) -> Result<Self, KeysError> {
        match input.split_whitespace().next() {
            Some(first) if SshKeyType::from_wire_name(first).is_some() => Self::parse(input),
            Some(first) => Self::new(default_type, first),
            None => Err(KeysError::InvalidKeyFormat("empty public key".to_string())),
        }
    }

    /// Read a public key file. The private key is never consulted.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KeysError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| KeysError::io(path, e))?;

        Self::parse(&text).map_err(|e| match e {
            KeysError::InvalidKeyFormat(reason) => {
                KeysError::InvalidKeyFormat(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    /// Write `<wire-type> <body>` followed by a newline.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), KeysError> {
        let path = path.as_ref();
        std::fs::write(path, format!("{self}\n")).map_err(|e| KeysError::io(path, e))
    }

    pub fn key_type(&self) -> SshKeyType {
        self.key_type
    }

    /// Base64 body without type prefix or comment
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.key_type, self.body)
    }
}

impl FromStr for PublicKey {
    type Err = KeysError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_body(body: &str) -> Result<(), KeysError> {
    if body.is_empty() {
        return Err(KeysError::InvalidKeyFormat("empty key body".to_string()));
    }
    STANDARD
        .decode(body)
        .map_err(|e| KeysError::InvalidKeyFormat(format!("key body is not valid base64: {e}")))?;
    Ok(())
}

/// Strip an optional wire-type prefix and comment from a key string.
pub(crate) fn canonical_body(input: &str) -> &str {
    let mut fields = input.split_whitespace();
    match (fields.next(), fields.next()) {
        (Some(first), Some(second)) if SshKeyType::from_wire_name(first).is_some() => second,
        (Some(first), _) => first,
        _ => "",
    }
}

// ============================================================
// Key Material
// ============================================================

/// Something that can be registered with the broker
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    /// A bare public key
    PublicOnly(PublicKey),
    /// A key pair on disk; only its public half is ever sent
    Pair(KeyPair),
}

impl KeyMaterial {
    pub fn public_key(&self) -> &PublicKey {
        match self {
            KeyMaterial::PublicOnly(key) => key,
            KeyMaterial::Pair(pair) => pair.public_key(),
        }
    }
}

impl From<PublicKey> for KeyMaterial {
    fn from(key: PublicKey) -> Self {
        KeyMaterial::PublicOnly(key)
    }
}

impl From<KeyPair> for KeyMaterial {
    fn from(pair: KeyPair) -> Self {
        KeyMaterial::Pair(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSA_BODY: &str = "AAAAB3NzaC1yc2FS8iZlpgwS0okYXZUO6IE2CRZvaxE9F41sD9OQH/I5oaCV8g+TlWUM+TgLjtsiSms=";
    const DSA_BODY: &str = "AAAAB3NzaC1kc3Olk/6u0nJIt2Ljq1gF8HZaK5wdfg83xEkhvT9lZOrffxQqcmaMR+Ij0W7djEe0avw=";

    #[test]
    fn test_parse_line_with_comment() {
        let key = PublicKey::parse(&format!("ssh-rsa {RSA_BODY} deploy@lornu.ai  \n")).unwrap();

        assert_eq!(key.key_type(), SshKeyType::Rsa);
        assert_eq!(key.body(), RSA_BODY);
        assert_eq!(key.to_string(), format!("ssh-rsa {RSA_BODY}"));
    }

    #[test]
    fn test_parse_skips_leading_blank_lines() {
        let key: PublicKey = format!("\n   \nssh-dss {DSA_BODY}\nssh-rsa {RSA_BODY}\n")
            .parse()
            .unwrap();

        assert_eq!(key.key_type(), SshKeyType::Dsa);
        assert_eq!(key.body(), DSA_BODY);
    }

    #[test]
    fn test_reserialized_line_parses_to_same_key() {
        let original = PublicKey::parse(&format!("ssh-dss {DSA_BODY} someone@host")).unwrap();
        let reparsed = PublicKey::parse(&original.to_string()).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_rejects_malformed_lines() {
        for line in [
            "",
            "ssh-rsa",
            &format!("ssh-ed25519 {RSA_BODY}"),
            "ssh-rsa not*base64!",
            &format!("{RSA_BODY} ssh-rsa"),
        ] {
            let err = PublicKey::parse(line).unwrap_err();
            assert!(
                matches!(err, KeysError::InvalidKeyFormat(_)),
                "line {line:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_new_trims_body() {
        let key = PublicKey::new(SshKeyType::Rsa, format!("  {RSA_BODY}\n")).unwrap();
        assert_eq!(key.body(), RSA_BODY);
    }

    #[test]
    fn test_parse_with_default_type() {
        let bare = PublicKey::parse_with_default(DSA_BODY, SshKeyType::Dsa).unwrap();
        assert_eq!(bare.key_type(), SshKeyType::Dsa);

        let prefixed =
            PublicKey::parse_with_default(&format!("ssh-rsa {RSA_BODY}"), SshKeyType::Dsa).unwrap();
        assert_eq!(prefixed.key_type(), SshKeyType::Rsa);
        assert_eq!(prefixed.body(), RSA_BODY);
    }

    #[test]
    fn test_parse_with_default_bare_body_with_comment() {
        let key =
            PublicKey::parse_with_default(&format!("  {DSA_BODY} me@host\n"), SshKeyType::Dsa)
                .unwrap();
        assert_eq!(key.key_type(), SshKeyType::Dsa);
        assert_eq!(key.body(), DSA_BODY);

        assert!(matches!(
            PublicKey::parse_with_default("   ", SshKeyType::Rsa),
            Err(KeysError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa.pub");
        std::fs::write(&path, format!("ssh-rsa {RSA_BODY} me@laptop\n")).unwrap();

        let key = PublicKey::from_file(&path).unwrap();
        let copy = dir.path().join("copy.pub");
        key.write_to_file(&copy).unwrap();

        assert_eq!(std::fs::read_to_string(&copy).unwrap(), format!("ssh-rsa {RSA_BODY}\n"));
        assert_eq!(PublicKey::from_file(&copy).unwrap(), key);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PublicKey::from_file(dir.path().join("absent.pub")).unwrap_err();
        assert!(matches!(err, KeysError::Io { .. }));
    }

    #[test]
    fn test_canonical_body() {
        assert_eq!(canonical_body(RSA_BODY), RSA_BODY);
        assert_eq!(canonical_body(&format!("ssh-rsa {RSA_BODY} c")), RSA_BODY);
        assert_eq!(canonical_body(&format!(" {DSA_BODY} ")), DSA_BODY);
        assert_eq!(canonical_body(""), "");
    }
}
