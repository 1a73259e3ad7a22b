//! The provisioned host itself: remote shell, reachability and SSH keys.

pub mod keys;
pub mod reachability;
pub mod shell;

pub use keys::{generate_key_pair, inject_public_key, KeyPair};
pub use reachability::{wait_until_reachable, PollPolicy};
pub use shell::{RemoteShell, Ssh2Shell, ShellTarget};

#[cfg(test)]
pub use shell::MockRemoteShell;
