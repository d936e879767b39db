//! Recovery hints for commands rejected on the read-only path because they
//! need a terminal or never exit.

use serde::Serialize;

use crate::argv::{basename, short_letters};
use crate::classify::{CommandIntent, classify, tags};
use crate::shell;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonInteractiveHint {
    pub category: &'static str,
    /// Rewritten command, present only when it classifies as read-only.
    pub suggested_rewrite: Option<String>,
    pub recovery_hint: &'static str,
}

impl NonInteractiveHint {
    pub fn auto_recoverable(&self) -> bool {
        self.suggested_rewrite.is_some()
    }
}

/// Build a hint for a blocked command.  `None` when the rejection was not
/// about interactivity.
pub fn non_interactive_hint(command: &str, intent: &CommandIntent) -> Option<NonInteractiveHint> {
    let (category, recovery_hint) = match intent.tag() {
        tags::TTY_FLAG => (
            tags::TTY_FLAG,
            "Remove -it/--tty/--interactive; commands run without a terminal.",
        ),
        tags::PAGER => (
            tags::PAGER,
            "Use cat, head or tail instead of a pager or editor.",
        ),
        tags::UNBOUNDED_STREAM => (
            tags::UNBOUNDED_STREAM,
            "Bound the output with -n/--tail/--since, use batch mode (top -b -n 1), or wrap the command in timeout.",
        ),
        tags::INTERACTIVE_REPL => (
            tags::INTERACTIVE_REPL,
            "Pass the statement inline (mysql -e, psql -c, redis-cli CMD, ssh host CMD) or run a script.",
        ),
        _ => return None,
    };
    let suggested_rewrite = rewrite(command, category)
        .filter(|candidate| candidate != command && classify(candidate).is_read_only());
    Some(NonInteractiveHint {
        category,
        suggested_rewrite,
        recovery_hint,
    })
}

fn rewrite(command: &str, category: &str) -> Option<String> {
    match category {
        tags::TTY_FLAG => {
            let words: Vec<&str> = command
                .split_whitespace()
                .filter(|w| {
                    !matches!(
                        *w,
                        "-it" | "-ti" | "--tty" | "--interactive" | "--tty=true" | "--interactive=true"
                    )
                })
                .collect();
            Some(words.join(" "))
        }
        tags::PAGER => rewrite_pager(command),
        tags::UNBOUNDED_STREAM => rewrite_stream(command),
        _ => None,
    }
}

fn rewrite_pager(command: &str) -> Option<String> {
    let parsed = shell::parse(command);
    let last = parsed.segments.last()?;
    if parsed.segments.len() > 1 {
        // `… | less` → drop the trailing pager
        let head = command.trim_end().strip_suffix(last.raw.as_str())?;
        return Some(head.trim_end().trim_end_matches('|').trim_end().to_string());
    }
    let files: Vec<&str> = last
        .argv()
        .into_iter()
        .skip(1)
        .filter(|w| !w.starts_with('-') && !w.starts_with('+'))
        .collect();
    if files.is_empty() {
        return None;
    }
    Some(format!("cat {}", files.join(" ")))
}

fn rewrite_stream(command: &str) -> Option<String> {
    let mut words: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    let idx = words.iter().position(|w| {
        matches!(
            basename(w),
            "tail" | "journalctl" | "docker" | "kubectl" | "top" | "htop" | "atop" | "btop" | "watch" | "ping"
                | "vmstat" | "iostat"
        )
    })?;
    let cmd = basename(&words[idx]).to_string();
    match cmd.as_str() {
        "top" | "htop" | "atop" | "btop" => {
            words.truncate(idx);
            words.extend(["top", "-b", "-n", "1"].map(str::to_string));
        }
        "watch" => {
            let mut j = idx + 1;
            while j < words.len() && words[j].starts_with('-') {
                j += if matches!(words[j].as_str(), "-n" | "--interval") { 2 } else { 1 };
            }
            words.drain(idx..j.min(words.len()));
        }
        "ping" => {
            words.insert(idx + 1, "-c".to_string());
            words.insert(idx + 2, "4".to_string());
        }
        "vmstat" | "iostat" => words.push("5".to_string()),
        "tail" | "journalctl" => {
            strip_follow(&mut words, idx, if cmd == "tail" { "fF" } else { "f" });
            let bound: &[&str] = if cmd == "tail" { &["-n", "100"] } else { &["-n", "200", "--no-pager"] };
            for (k, b) in bound.iter().enumerate() {
                words.insert(idx + 1 + k, b.to_string());
            }
        }
        "docker" | "kubectl" => {
            if cmd == "docker" && words.iter().any(|w| w == "stats") {
                words.push("--no-stream".to_string());
            } else {
                strip_follow(&mut words, idx, "f");
                let logs = words.iter().position(|w| w == "logs")?;
                let bound = if cmd == "docker" { "--tail 100" } else { "--tail=100" };
                for (k, b) in bound.split(' ').enumerate() {
                    words.insert(logs + 1 + k, b.to_string());
                }
            }
        }
        _ => return None,
    }
    Some(words.join(" "))
}

/// Remove follow flags after `idx`, including the letter inside clusters
/// such as `-fu`.
fn strip_follow(words: &mut Vec<String>, idx: usize, letters: &str) {
    let mut out = Vec::with_capacity(words.len());
    for (i, w) in words.drain(..).enumerate() {
        if i <= idx {
            out.push(w);
            continue;
        }
        if w == "--follow" || w.starts_with("--follow=") {
            continue;
        }
        match short_letters(&w) {
            Some(l) if !l.is_empty() && l.chars().any(|c| letters.contains(c)) => {
                let kept: String = w[1..].chars().filter(|c| !letters.contains(*c)).collect();
                if !kept.is_empty() {
                    out.push(format!("-{kept}"));
                }
            }
            _ => out.push(w),
        }
    }
    *words = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(cmd: &str) -> NonInteractiveHint {
        non_interactive_hint(cmd, &classify(cmd)).expect("interactive rejection")
    }

    #[test]
    fn tail_follow_gets_line_bound() {
        let h = hint("tail -f /var/log/syslog");
        assert_eq!(h.category, tags::UNBOUNDED_STREAM);
        assert_eq!(h.suggested_rewrite.as_deref(), Some("tail -n 100 /var/log/syslog"));
        assert!(h.auto_recoverable());
    }

    #[test]
    fn journalctl_follow_cluster() {
        let h = hint("journalctl -fu nginx");
        assert_eq!(h.suggested_rewrite.as_deref(), Some("journalctl -n 200 --no-pager -u nginx"));
    }

    #[test]
    fn docker_and_kubectl_logs() {
        assert_eq!(
            hint("docker logs -f app").suggested_rewrite.as_deref(),
            Some("docker logs --tail 100 app")
        );
        assert_eq!(
            hint("kubectl logs -f web-0").suggested_rewrite.as_deref(),
            Some("kubectl logs --tail=100 web-0")
        );
    }

    #[test]
    fn monitors_become_batch() {
        assert_eq!(hint("htop").suggested_rewrite.as_deref(), Some("top -b -n 1"));
        assert_eq!(hint("watch -n 2 df -h").suggested_rewrite.as_deref(), Some("df -h"));
        assert_eq!(hint("ping 10.0.0.1").suggested_rewrite.as_deref(), Some("ping -c 4 10.0.0.1"));
    }

    #[test]
    fn pagers_become_cat() {
        assert_eq!(hint("less /var/log/syslog").suggested_rewrite.as_deref(), Some("cat /var/log/syslog"));
        assert_eq!(
            hint("journalctl -u nginx -n 50 | less").suggested_rewrite.as_deref(),
            Some("journalctl -u nginx -n 50")
        );
        assert_eq!(hint("vim").suggested_rewrite, None);
    }

    #[test]
    fn tty_rewrite_is_dropped_when_still_unsafe() {
        let h = hint("docker exec -it app sh");
        assert_eq!(h.category, tags::TTY_FLAG);
        assert_eq!(h.suggested_rewrite, None);
        assert!(!h.auto_recoverable());
    }

    #[test]
    fn repl_has_no_rewrite() {
        let h = hint("mysql -u root");
        assert_eq!(h.category, tags::INTERACTIVE_REPL);
        assert!(h.suggested_rewrite.is_none());
        assert!(h.recovery_hint.contains("mysql -e"));
    }

    #[test]
    fn other_rejections_have_no_hint() {
        assert!(non_interactive_hint("rm -rf /x", &classify("rm -rf /x")).is_none());
    }
}
