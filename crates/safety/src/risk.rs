//! Coarse risk grading for commands that need approval.

use serde::{Deserialize, Serialize};

use crate::argv::{basename, positionals};
use crate::classify::{classify, strip_wrappers, tags};
use crate::shell;

/// How much damage a command can do if it runs.
///
/// | Level     | Meaning                                                  |
/// |-----------|----------------------------------------------------------|
/// | ReadOnly  | classified read-only; no approval needed for risk alone  |
/// | Medium    | changes state in a recoverable way                       |
/// | High      | destroys data, escalates privileges or stops services    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandRisk {
    ReadOnly,
    Medium,
    High,
}

impl CommandRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandRisk::ReadOnly => "read_only",
            CommandRisk::Medium => "medium",
            CommandRisk::High => "high",
        }
    }
}

impl std::fmt::Display for CommandRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const HIGH_RISK_BINARIES: &[&str] = &[
    "rm", "shutdown", "reboot", "poweroff", "halt", "init", "telinit", "kill", "killall", "pkill",
    "truncate", "chmod", "chown", "chgrp", "useradd", "userdel", "usermod", "groupadd", "groupdel",
    "passwd", "chpasswd", "dd", "wipefs", "shred", "fdisk", "sfdisk", "sgdisk", "mkswap",
];

pub fn classify_risk(command: &str) -> CommandRisk {
    let intent = classify(command);
    if intent.is_read_only() {
        return CommandRisk::ReadOnly;
    }

    let parsed = shell::parse(command);
    if !parsed.balanced {
        // Tokens cannot be trusted; look for dangerous names anywhere.
        let dangerous = command
            .split(|c: char| c.is_whitespace() || matches!(c, ';' | '|' | '&' | '"' | '\''))
            .any(|w| is_high_risk_binary(basename(w)));
        return if dangerous { CommandRisk::High } else { CommandRisk::Medium };
    }

    if matches!(intent.tag(), tags::SUDO | tags::TEE) || parsed.redirects().any(|r| r.writes_file()) {
        return CommandRisk::High;
    }
    for segment in &parsed.segments {
        let words = segment.argv();
        if let Some(inv) = strip_wrappers(&words) {
            if is_high_risk(inv.cmd, &inv.rest) {
                return CommandRisk::High;
            }
        }
    }
    CommandRisk::Medium
}

fn is_high_risk_binary(cmd: &str) -> bool {
    cmd.starts_with("mkfs") || HIGH_RISK_BINARIES.contains(&cmd)
}

fn any_of(pos: &[&str], verbs: &[&str]) -> bool {
    pos.iter().any(|p| verbs.contains(p))
}

fn is_high_risk(cmd: &str, rest: &[&str]) -> bool {
    if is_high_risk_binary(cmd) {
        return true;
    }
    let pos = positionals(rest, &[]);
    match cmd {
        "apt" | "apt-get" | "aptitude" | "yum" | "dnf" | "apk" | "zypper" => any_of(&pos, &[
            "install", "remove", "purge", "upgrade", "dist-upgrade", "full-upgrade", "autoremove",
            "erase", "del", "add",
        ]),
        "systemctl" => any_of(&pos, &[
            "restart", "stop", "start", "disable", "mask", "reload", "kill", "isolate", "poweroff",
            "reboot", "halt",
        ]),
        "service" => matches!(pos.get(1), Some(&"restart" | &"stop" | &"start" | &"reload")),
        "docker" | "podman" => any_of(&pos, &["rm", "rmi", "stop", "kill", "restart", "prune"]),
        "pct" | "qm" => any_of(&pos, &["destroy", "stop", "shutdown", "reset"]),
        "zfs" | "zpool" => any_of(&pos, &["destroy"]),
        "kubectl" => any_of(&pos, &["delete", "drain"]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_commands() {
        assert_eq!(classify_risk("ls -la"), CommandRisk::ReadOnly);
        assert_eq!(classify_risk("docker ps"), CommandRisk::ReadOnly);
    }

    #[test]
    fn high_risk_commands() {
        for cmd in [
            "rm -rf /var/lib/app",
            "sudo apt update",
            "echo x > /etc/hosts",
            "systemctl restart nginx",
            "service nginx stop",
            "docker rm -f app",
            "pct destroy 101",
            "zfs destroy tank/data",
            "apt-get install -y nginx",
            "mkfs.ext4 /dev/sdb1",
            "kill -9 1234",
        ] {
            assert_eq!(classify_risk(cmd), CommandRisk::High, "{cmd}");
        }
    }

    #[test]
    fn medium_risk_commands() {
        for cmd in ["touch /tmp/marker", "mkdir -p /srv/app", "git pull", "docker compose up -d"] {
            assert_eq!(classify_risk(cmd), CommandRisk::Medium, "{cmd}");
        }
    }

    #[test]
    fn unbalanced_input_scans_raw_words() {
        assert_eq!(classify_risk("echo 'x; rm -rf /"), CommandRisk::High);
        assert_eq!(classify_risk("echo 'x; ls"), CommandRisk::Medium);
    }

    #[test]
    fn ordering_and_display() {
        assert!(CommandRisk::High > CommandRisk::Medium);
        assert!(CommandRisk::Medium > CommandRisk::ReadOnly);
        assert_eq!(CommandRisk::High.to_string(), "high");
    }
}
