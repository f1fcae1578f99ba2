//! SSH Key Pair Generation
//!
//! Creates RSA or DSA key pairs on disk and reads back the public half.
//! Generation itself is delegated to a [`KeyGenerator`]: in process with
//! the `ssh-key` crate, or by shelling out to `ssh-keygen`.

use rand::rngs::OsRng;
use ssh_key::private::{DsaKeypair, KeypairData, RsaKeypair};
use ssh_key::{LineEnding, PrivateKey};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::error::KeysError;
use crate::public_key::PublicKey;
use crate::types::SshKeyType;

/// Default RSA modulus size for generated keys
pub const DEFAULT_RSA_BITS: usize = 2048;

/// Writes a private/public key pair to the given paths
pub trait KeyGenerator: Send + Sync {
    /// Generate a key pair. An empty passphrase leaves the private key unencrypted.
    fn generate(
        &self,
        key_type: SshKeyType,
        passphrase: &str,
        private_key_path: &Path,
        public_key_path: &Path,
    ) -> Result<(), KeysError>;
}

/// A key pair on disk
#[derive(Clone)]
pub struct KeyPair {
    private_key_path: PathBuf,
    public_key_path: PathBuf,
    passphrase: Option<String>,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new key pair and parse its public half.
    ///
    /// The files are left on disk and belong to the caller.
    pub fn create(
        generator: &dyn KeyGenerator,
        key_type: SshKeyType,
        passphrase: &str,
        private_key_path: impl Into<PathBuf>,
        public_key_path: impl Into<PathBuf>,
    ) -> Result<Self, KeysError> {
        let private_key_path = private_key_path.into();
        let public_key_path = public_key_path.into();

        debug!(
            key_type = %key_type,
            private_key = %private_key_path.display(),
            public_key = %public_key_path.display(),
            "Generating SSH key pair"
        );

        generator.generate(key_type, passphrase, &private_key_path, &public_key_path)?;
        let public_key = PublicKey::from_file(&public_key_path)?;

        Ok(Self {
            private_key_path,
            public_key_path,
            passphrase: (!passphrase.is_empty()).then(|| passphrase.to_string()),
            public_key,
        })
    }

    /// Use a key pair that already exists on disk.
    pub fn load(
        private_key_path: impl Into<PathBuf>,
        public_key_path: impl Into<PathBuf>,
    ) -> Result<Self, KeysError> {
        let private_key_path = private_key_path.into();
        let public_key_path = public_key_path.into();

        std::fs::metadata(&private_key_path).map_err(|e| KeysError::io(&private_key_path, e))?;
        let public_key = PublicKey::from_file(&public_key_path)?;

        Ok(Self {
            private_key_path,
            public_key_path,
            passphrase: None,
            public_key,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn key_type(&self) -> SshKeyType {
        self.public_key.key_type()
    }

    pub fn private_key_path(&self) -> &Path {
        &self.private_key_path
    }

    pub fn public_key_path(&self) -> &Path {
        &self.public_key_path
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key_path", &self.private_key_path)
            .field("public_key_path", &self.public_key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("public_key", &self.public_key)
            .finish()
    }
}

// ============================================================
// Generators
// ============================================================

/// In-process generation using the `ssh-key` crate
#[derive(Debug, Clone)]
pub struct NativeKeygen {
    rsa_bits: usize,
    comment: String,
}

impl NativeKeygen {
    pub fn new() -> Self {
        Self {
            rsa_bits: DEFAULT_RSA_BITS,
            comment: String::new(),
        }
    }

    /// Set the RSA modulus size
    pub fn rsa_bits(mut self, bits: usize) -> Self {
        self.rsa_bits = bits;
        self
    }

    /// Comment to embed in the key
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

impl Default for NativeKeygen {
    fn default() -> Self {
        Self::new()
    }
}

fn keygen_failed(what: &str) -> impl Fn(ssh_key::Error) -> KeysError + '_ {
    move |e| KeysError::KeygenFailed(format!("{what}: {e}"))
}

impl KeyGenerator for NativeKeygen {
    fn generate(
        &self,
        key_type: SshKeyType,
        passphrase: &str,
        private_key_path: &Path,
        public_key_path: &Path,
    ) -> Result<(), KeysError> {
        let keypair = match key_type {
            SshKeyType::Rsa => KeypairData::Rsa(
                RsaKeypair::random(&mut OsRng, self.rsa_bits)
                    .map_err(keygen_failed("Failed to generate RSA key"))?,
            ),
            SshKeyType::Dsa => KeypairData::Dsa(
                DsaKeypair::random(&mut OsRng).map_err(keygen_failed("Failed to generate DSA key"))?,
            ),
        };

        let private_key = PrivateKey::new(keypair, self.comment.as_str())
            .map_err(keygen_failed("Failed to build private key"))?;

        // Public line is taken before encryption so it carries the comment
        let public_line = private_key
            .public_key()
            .to_openssh()
            .map_err(keygen_failed("Failed to encode public key"))?;

        let private_key = if passphrase.is_empty() {
            private_key
        } else {
            private_key
                .encrypt(&mut OsRng, passphrase)
                .map_err(keygen_failed("Failed to encrypt private key"))?
        };

        private_key
            .write_openssh_file(private_key_path, LineEnding::LF)
            .map_err(keygen_failed("Failed to write private key"))?;
        std::fs::write(public_key_path, format!("{public_line}\n"))
            .map_err(|e| KeysError::io(public_key_path, e))?;

        debug!(key_type = %key_type, "Key pair written");
        Ok(())
    }
}

/// Shells out to an external `ssh-keygen`
#[derive(Debug, Clone)]
pub struct SshKeygen {
    program: PathBuf,
}

impl SshKeygen {
    /// Use `ssh-keygen` from `PATH`
    pub fn new() -> Self {
        Self::with_program("ssh-keygen")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for SshKeygen {
    fn generate(
        &self,
        key_type: SshKeyType,
        passphrase: &str,
        private_key_path: &Path,
        public_key_path: &Path,
    ) -> Result<(), KeysError> {
        // ssh-keygen prompts before overwriting an existing file
        for path in [private_key_path, public_key_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(KeysError::io(path, e)),
            }
        }

        let type_arg = match key_type {
            SshKeyType::Rsa => "rsa",
            SshKeyType::Dsa => "dsa",
        };

        debug!(program = %self.program.display(), key_type = %key_type, "Running ssh-keygen");

        let output = Command::new(&self.program)
            .arg("-q")
            .args(["-t", type_arg])
            .args(["-N", passphrase])
            .arg("-f")
            .arg(private_key_path)
            .output()
            .map_err(|e| {
                KeysError::KeygenFailed(format!("Failed to run {}: {e}", self.program.display()))
            })?;

        if !output.status.success() {
            return Err(KeysError::KeygenFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // ssh-keygen always writes the public half next to the private key
        let mut generated = private_key_path.as_os_str().to_owned();
        generated.push(".pub");
        let generated = PathBuf::from(generated);
        if generated != public_key_path {
            std::fs::rename(&generated, public_key_path)
                .map_err(|e| KeysError::io(&generated, e))?;
        }

        Ok(())
    }
}
