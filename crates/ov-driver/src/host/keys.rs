//! SSH key pair generation and installation on the provisioned host.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use tracing::info;

use super::shell::{RemoteShell, ShellTarget};
use crate::error::{DriverError, Result};

/// Comment appended to the installed public key.
pub const KEY_COMMENT: &str = "docker-machine-ov";

/// Timeout for the key installation command.
const INJECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A generated key pair and where it was written.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Private key path.
    pub private_key_path: PathBuf,
    /// Public key path (`<private>.pub`).
    pub public_key_path: PathBuf,
    /// Private key in OpenSSH format.
    pub private_key: String,
    /// Public key in OpenSSH `authorized_keys` format, without comment.
    pub public_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key_path", &self.private_key_path)
            .field("public_key_path", &self.public_key_path)
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Generate an Ed25519 key pair and write it to `path` and `path.pub`.
///
/// # Errors
/// Returns [`DriverError::KeyGen`] if generation fails, or an I/O error if
/// the files cannot be written.
pub fn generate_key_pair(path: &Path) -> Result<KeyPair> {
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .map_err(|e| DriverError::KeyGen(e.to_string()))?;
    let private_key = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| DriverError::KeyGen(e.to_string()))?
        .to_string();
    let public_key = key
        .public_key()
        .to_openssh()
        .map_err(|e| DriverError::KeyGen(e.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_private(path, &private_key)?;
    let public_key_path = public_path(path);
    fs::write(&public_key_path, format!("{public_key} {KEY_COMMENT}\n"))?;

    info!(path = %path.display(), "Generated SSH key pair");
    Ok(KeyPair {
        private_key_path: path.to_path_buf(),
        public_key_path,
        private_key,
        public_key,
    })
}

fn public_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies when the file is created.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

/// Shell command that appends `public_key` to the user's `authorized_keys`.
#[must_use]
pub fn authorize_command(public_key: &str) -> String {
    format!(
        "mkdir -p ~/.ssh; echo \"{} {KEY_COMMENT}\" >> ~/.ssh/authorized_keys; chmod 0600 ~/.ssh/authorized_keys",
        public_key.trim()
    )
}

/// Append `public_key` to `authorized_keys` on `target`. Repeated calls
/// append repeated lines.
///
/// # Errors
/// Returns [`DriverError::Validation`] for an empty key without contacting
/// the host, or the shell error if the command fails.
pub async fn inject_public_key<S>(shell: &S, target: &ShellTarget, public_key: &str) -> Result<()>
where
    S: RemoteShell + ?Sized,
{
    if public_key.trim().is_empty() {
        return Err(DriverError::Validation("public key is empty".into()));
    }
    info!(host = %target, "Installing public key");
    shell
        .exec(target, &authorize_command(public_key), INJECT_TIMEOUT)
        .await
}
