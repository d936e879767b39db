//! Credential and key locations that tools must never read or write.

use thiserror::Error;

use crate::shell;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path must be absolute: {0}")]
    Relative(String),
    #[error("path contains control characters")]
    ControlCharacters,
    #[error("path {path} is sensitive ({reason})")]
    Sensitive { path: String, reason: &'static str },
}

/// Exact files.
const SENSITIVE_FILES: &[(&str, &str)] = &[
    ("/etc/shadow", "password hashes"),
    ("/etc/shadow-", "password hashes"),
    ("/etc/gshadow", "password hashes"),
    ("/etc/gshadow-", "password hashes"),
    ("/etc/sudoers", "sudo policy"),
];

/// Directory prefixes; everything beneath is sensitive.
const SENSITIVE_DIRS: &[(&str, &str)] = &[
    ("/etc/sudoers.d/", "sudo policy"),
    ("/etc/ssl/private/", "TLS private keys"),
    ("/etc/pve/priv/", "Proxmox cluster secrets"),
    ("/root/.ssh/", "SSH keys"),
];

/// File names sensitive wherever they live.
const SENSITIVE_SUFFIXES: &[(&str, &str)] = &[
    (".aws/credentials", "cloud credentials"),
    (".docker/config.json", "registry credentials"),
    (".kube/config", "cluster credentials"),
    (".netrc", "stored credentials"),
    (".pgpass", "database credentials"),
    (".git-credentials", "stored credentials"),
    (".my.cnf", "database credentials"),
];

/// Why `path` is sensitive, or `None` when it is not.
pub fn is_sensitive_path(path: &str) -> Option<&'static str> {
    let path = path.trim_matches(|c: char| c == '"' || c == '\'');
    if path.is_empty() {
        return None;
    }
    for &(file, reason) in SENSITIVE_FILES {
        if path == file {
            return Some(reason);
        }
    }
    for &(dir, reason) in SENSITIVE_DIRS {
        if path.starts_with(dir) || path == dir.trim_end_matches('/') {
            return Some(reason);
        }
    }
    for &(suffix, reason) in SENSITIVE_SUFFIXES {
        if path.ends_with(suffix) {
            return Some(reason);
        }
    }

    let name = path.rsplit('/').next().unwrap_or(path);
    if path.contains("/.ssh/") && name.starts_with("id_") && !name.ends_with(".pub") {
        return Some("SSH keys");
    }
    if path.starts_with("/etc/ssh/ssh_host_") && !name.ends_with(".pub") {
        return Some("SSH host keys");
    }
    if let Some(rest) = path.strip_prefix("/proc/") {
        if let Some((pid, tail)) = rest.split_once('/') {
            if tail == "environ" && (pid == "self" || pid.chars().all(|c| c.is_ascii_digit())) {
                return Some("process environment");
            }
        }
    }
    if name == ".env" || name.starts_with(".env.") {
        return Some("environment secrets");
    }
    if name.ends_with(".key") || name.contains("privkey") {
        return Some("private keys");
    }
    None
}

/// First sensitive path a command mentions, as `path: reason`.  Arguments,
/// `--flag=value` payloads and redirect targets are all checked.
pub fn command_touches_sensitive_path(command: &str) -> Option<String> {
    let parsed = shell::parse(command);
    let words = parsed
        .segments
        .iter()
        .flat_map(|s| s.words.iter().map(|w| w.text.as_str()));
    let targets = parsed.redirects().map(|r| r.target.as_str());

    for word in words.chain(targets) {
        let candidate = match word.split_once('=') {
            Some((flag, value)) if flag.starts_with('-') => value,
            _ => word,
        };
        if let Some(reason) = is_sensitive_path(candidate) {
            return Some(format!("{candidate}: {reason}"));
        }
    }
    None
}

/// Validate a path a tool is about to write.
pub fn validate_target_path(path: &str) -> Result<(), PathError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.chars().any(char::is_control) {
        return Err(PathError::ControlCharacters);
    }
    if !path.starts_with('/') {
        return Err(PathError::Relative(path.to_string()));
    }
    if let Some(reason) = is_sensitive_path(path) {
        return Err(PathError::Sensitive {
            path: path.to_string(),
            reason,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_secrets() {
        assert_eq!(is_sensitive_path("/etc/shadow"), Some("password hashes"));
        assert!(is_sensitive_path("/etc/sudoers.d/admins").is_some());
        assert!(is_sensitive_path("/etc/pve/priv/authkey.key").is_some());
        assert!(is_sensitive_path("/etc/ssl/private/server.pem").is_some());
        assert!(is_sensitive_path("/proc/1/environ").is_some());
        assert!(is_sensitive_path("/proc/self/environ").is_some());
    }

    #[test]
    fn ssh_keys_but_not_public_halves() {
        assert!(is_sensitive_path("/home/ops/.ssh/id_ed25519").is_some());
        assert!(is_sensitive_path("/home/ops/.ssh/id_ed25519.pub").is_none());
        assert!(is_sensitive_path("/etc/ssh/ssh_host_rsa_key").is_some());
        assert!(is_sensitive_path("/etc/ssh/ssh_host_rsa_key.pub").is_none());
    }

    #[test]
    fn credential_files_anywhere() {
        assert!(is_sensitive_path("/srv/app/.env").is_some());
        assert!(is_sensitive_path("/srv/app/.env.production").is_some());
        assert!(is_sensitive_path("/home/ops/.aws/credentials").is_some());
        assert!(is_sensitive_path("/etc/letsencrypt/live/x/privkey.pem").is_some());
    }

    #[test]
    fn ordinary_paths() {
        for p in ["/etc/hosts", "/var/log/syslog", "/proc/1/status", "/srv/app/environment.md", ""] {
            assert!(is_sensitive_path(p).is_none(), "{p}");
        }
    }

    #[test]
    fn commands_touching_secrets() {
        assert!(command_touches_sensitive_path("cat /etc/shadow").is_some());
        assert!(command_touches_sensitive_path("grep -r pass /srv/app/.env").is_some());
        assert!(command_touches_sensitive_path("tr '\\0' '\\n' < /proc/1/environ").is_some());
        assert!(command_touches_sensitive_path("curl --netrc-file=/root/.netrc http://x").is_some());
        assert!(command_touches_sensitive_path("tail -n 50 /var/log/syslog").is_none());
    }

    #[test]
    fn write_targets() {
        assert!(validate_target_path("/etc/nginx/nginx.conf").is_ok());
        assert_eq!(validate_target_path("  "), Err(PathError::Empty));
        assert!(matches!(validate_target_path("etc/hosts"), Err(PathError::Relative(_))));
        assert_eq!(validate_target_path("/tmp/a\nb"), Err(PathError::ControlCharacters));
        assert!(matches!(
            validate_target_path("/root/.ssh/authorized_keys"),
            Err(PathError::Sensitive { .. })
        ));
    }
}
