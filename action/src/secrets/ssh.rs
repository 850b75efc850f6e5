//! Remote URL rewriting and scoped SSH identities

use tempfile::TempDir;
use url::Url;

use crate::errors::ActionError;
use crate::filesys::file::File;

/// `git@host:org/repo.git` or `ssh://git@host[:port]/org/repo.git` to
/// `https://host/org/repo.git`. Returns `None` for non-SSH URLs.
pub fn ssh_to_https(remote: &str) -> Option<String> {
    let remote = remote.trim();

    if remote.starts_with("ssh://") {
        let parsed = Url::parse(remote).ok()?;
        let host = parsed.host_str()?;
        let path = parsed.path().trim_start_matches('/');
        return Some(format!("https://{}/{}", host, path));
    }

    let rest = remote.strip_prefix("git@")?;
    let (host, path) = rest.split_once(':')?;
    if host.is_empty() || path.is_empty() {
        return None;
    }
    Some(format!("https://{}/{}", host, path.trim_start_matches('/')))
}

/// `https://host/org/repo.git` to `git@host:org/repo.git`, dropping any
/// embedded credentials. Returns `None` for non-HTTPS URLs.
pub fn https_to_ssh(remote: &str) -> Option<String> {
    let parsed = Url::parse(remote.trim()).ok()?;
    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return None;
    }
    let host = parsed.host_str()?;
    let path = parsed.path().trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    Some(format!("git@{}:{}", host, path))
}

pub fn is_https(remote: &str) -> bool {
    let remote = remote.trim();
    remote.starts_with("https://") || remote.starts_with("http://")
}

/// Embed a bearer token as basic-auth credentials
pub fn with_token(remote: &str, token: &str) -> Result<String, ActionError> {
    let mut parsed = Url::parse(remote.trim())
        .map_err(|e| ActionError::SetupError(format!("Invalid repository URL: {}", e)))?;
    parsed
        .set_username("x-access-token")
        .and_then(|_| parsed.set_password(Some(token)))
        .map_err(|_| ActionError::SetupError("Repository URL cannot carry credentials".to_string()))?;
    Ok(parsed.to_string())
}

/// Replace every occurrence of `secret` so it never reaches logs or alerts
pub fn redact(message: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => message.replace(secret, "***"),
        _ => message.to_string(),
    }
}

/// A private key and known-hosts file living in a temporary directory that
/// is removed when the identity is dropped
pub struct SshIdentity {
    dir: TempDir,
}

impl SshIdentity {
    pub async fn create(private_key: &str) -> Result<Self, ActionError> {
        let dir = tempfile::Builder::new().prefix("sc-ssh-").tempdir()?;

        let mut key = private_key.trim().to_string();
        key.push('\n');

        let key_file = File::new(dir.path().join("id_key"));
        key_file.write_string(&key).await?;
        key_file.set_permissions_600().await?;

        Ok(Self { dir })
    }

    /// Value for `GIT_SSH_COMMAND`: identity pinned, host keys accepted
    /// without prompting
    pub fn ssh_command(&self) -> String {
        format!(
            "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new -o UserKnownHostsFile={} -o BatchMode=yes",
            self.dir.path().join("id_key").display(),
            self.dir.path().join("known_hosts").display()
        )
    }
}
