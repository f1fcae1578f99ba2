//! In-memory broker used by the session tests.
//!
//! Implements the `/user/keys` resources with the broker's status codes and
//! exit codes, and records every request it receives.

#![allow(dead_code)]

use async_trait::async_trait;
use paas_ssh_keys::error::{EXIT_KEY_CONTENT_EXISTS, EXIT_KEY_NAME_EXISTS, EXIT_KEY_NOT_FOUND};
use paas_ssh_keys::{Envelope, KeyRecord, KeysError, Message, PublicKey, SshKeyType, Transport};
use parking_lot::Mutex;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub const RSA_A: &str = "AAAAB3NzaC1yc2FS8iZlpgwS0okYXZUO6IE2CRZvaxE9F41sD9OQH/I5oaCV8g+TlWUM+TgLjtsiSms=";
pub const RSA_B: &str = "AAAAB3NzaC1yc2Ekih6STo/Qri4alJKjMF8YjLYQkA+eNH+uiG3GUHeV7HRcTD/LLrLHPhSTTIZ+4Fc=";
pub const RSA_C: &str = "AAAAB3NzaC1yc2G6ckmb+hIeg2sqwVcm7n1rCvarE8OOksrg0VBXsVmYf5TMdBHXF/FFebKqEA+7s08=";
pub const DSA_A: &str = "AAAAB3NzaC1kc3Olk/6u0nJIt2Ljq1gF8HZaK5wdfg83xEkhvT9lZOrffxQqcmaMR+Ij0W7djEe0avw=";
pub const DSA_B: &str = "AAAAB3NzaC1kc3NbruJh9TsmFS0mO6g7A3zUli5DSAEla4henJBR8yCw24PznqetvQ105t7H89+uzI8=";

pub fn rsa(body: &str) -> PublicKey {
    PublicKey::new(SshKeyType::Rsa, body).unwrap()
}

pub fn dsa(body: &str) -> PublicKey {
    PublicKey::new(SshKeyType::Dsa, body).unwrap()
}

pub fn record(name: &str, key_type: SshKeyType, content: &str) -> KeyRecord {
    KeyRecord {
        name: name.to_string(),
        key_type,
        content: content.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct KeyBody {
    name: Option<String>,
    #[serde(rename = "type")]
    key_type: SshKeyType,
    content: String,
}

enum Injected {
    Endpoint(u16, Option<i32>, String),
    Transport(String),
}

#[derive(Default)]
struct BrokerState {
    keys: Vec<KeyRecord>,
    requests: Vec<(Method, String)>,
    injected: Option<Injected>,
}

#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<BrokerState>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_keys(keys: Vec<KeyRecord>) -> Arc<Self> {
        let broker = Self::default();
        broker.state.lock().keys = keys;
        Arc::new(broker)
    }

    /// Keys as the broker currently stores them
    pub fn keys(&self) -> Vec<KeyRecord> {
        self.state.lock().keys.clone()
    }

    pub fn requests(&self) -> Vec<(Method, String)> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Change the broker behind the client's back
    pub fn insert_externally(&self, key: KeyRecord) {
        self.state.lock().keys.push(key);
    }

    pub fn remove_externally(&self, name: &str) {
        self.state.lock().keys.retain(|k| k.name != name);
    }

    /// Fail the next request with this status
    pub fn fail_next(&self, status: u16, exit_code: Option<i32>, text: &str) {
        self.state.lock().injected = Some(Injected::Endpoint(status, exit_code, text.to_string()));
    }

    /// Fail the next request before it reaches the broker
    pub fn fail_transport_next(&self, reason: &str) {
        self.state.lock().injected = Some(Injected::Transport(reason.to_string()));
    }

    fn handle(&self, method: Method, path: &str, body: Option<Value>) -> Result<Envelope, KeysError> {
        let mut state = self.state.lock();
        state.requests.push((method.clone(), path.to_string()));

        match state.injected.take() {
            Some(Injected::Endpoint(status, exit_code, text)) => {
                return Err(error(status, exit_code, None, &text))
            }
            Some(Injected::Transport(reason)) => {
                return Err(KeysError::Transport(anyhow::anyhow!(reason)))
            }
            None => {}
        }

        let name = path
            .strip_prefix("/user/keys/")
            .map(|n| urlencoding::decode(n).unwrap().into_owned());
        let body: Option<KeyBody> = body.map(|b| serde_json::from_value(b).unwrap());

        match (method, name, body) {
            (Method::GET, None, _) if path == "/user/keys" => Ok(Envelope::ok(json!(state.keys))),

            (Method::POST, None, Some(body)) if path == "/user/keys" => {
                let name = body.name.expect("POST without name");
                if state.keys.iter().any(|k| k.name == name) {
                    return Err(error(
                        409,
                        Some(EXIT_KEY_NAME_EXISTS),
                        Some("name"),
                        &format!("SSH key with name {name} already exists. Use a different name or delete conflicting key and retry."),
                    ));
                }
                if state.keys.iter().any(|k| k.content == body.content) {
                    return Err(content_in_use());
                }
                let key = record(&name, body.key_type, &body.content);
                state.keys.push(key.clone());
                Ok(Envelope::ok(json!(key)))
            }

            (Method::PUT, Some(name), Some(body)) => {
                if state.keys.iter().any(|k| k.content == body.content) {
                    return Err(content_in_use());
                }
                let key = record(&name, body.key_type, &body.content);
                let existing = state.keys.iter().position(|k| k.name == name);
                match existing {
                    Some(i) => state.keys[i] = key.clone(),
                    None => state.keys.push(key.clone()),
                }
                Ok(Envelope::ok(json!(key)))
            }

            (Method::GET, Some(name), _) => match state.keys.iter().find(|k| k.name == name) {
                Some(key) => Ok(Envelope::ok(json!(key))),
                None => Err(not_found()),
            },

            (Method::DELETE, Some(name), _) => {
                let before = state.keys.len();
                state.keys.retain(|k| k.name != name);
                if state.keys.len() == before {
                    return Err(not_found());
                }
                Ok(Envelope::default())
            }

            (method, _, _) => Err(error(405, None, None, &format!("{method} {path} not allowed"))),
        }
    }
}

#[async_trait]
impl Transport for FakeBroker {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Envelope, KeysError> {
        self.handle(method, path, body)
    }
}

fn error(status: u16, exit_code: Option<i32>, field: Option<&str>, text: &str) -> KeysError {
    let envelope = Envelope {
        status: "error".to_string(),
        data: Value::Null,
        messages: vec![Message {
            text: text.to_string(),
            exit_code,
            field: field.map(str::to_string),
            severity: Some("error".to_string()),
        }],
    };
    KeysError::Endpoint(envelope.into_endpoint_error(status))
}

fn content_in_use() -> KeysError {
    error(
        409,
        Some(EXIT_KEY_CONTENT_EXISTS),
        Some("content"),
        "Given public key is already in use. Use different key or delete conflicting key and retry.",
    )
}

fn not_found() -> KeysError {
    error(404, Some(EXIT_KEY_NOT_FOUND), None, "User ssh key not found")
}
