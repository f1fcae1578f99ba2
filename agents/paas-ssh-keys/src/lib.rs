//! PaaS SSH Key Client
//!
//! Lists, registers, updates and deletes the SSH public keys of a
//! platform-as-a-service broker account, and parses or generates the key
//! material that goes with them.

pub mod error;
pub mod generator;
pub mod keys;
pub mod public_key;
pub mod session;
pub mod transport;
pub mod types;

pub use error::{EndpointError, KeysError};
pub use generator::{KeyGenerator, KeyPair, NativeKeygen, SshKeygen};
pub use keys::{KeysCollection, SshKey};
pub use public_key::{KeyMaterial, PublicKey};
pub use session::{Credentials, SessionConfig, UserSession};
pub use transport::{Envelope, HttpTransport, Message, Transport};
pub use types::{KeyRecord, SshKeyType};
