//! Command intent classification.
//!
//! [`classify`] decides whether a shell command is safe to run on the
//! read-only path.  The pipeline runs in a fixed order and only ever promotes:
//!
//! | Phase                | Outcome on hit                          |
//! |----------------------|-----------------------------------------|
//! | quote scan           | `[unbalanced_quotes]`                   |
//! | mutation guards      | `[sudo]` `[redirect]` `[tee]` `[substitution]` |
//! | terminal guards      | `[tty_flag]` `[pager]` `[unbounded_stream]` |
//! | REPL guard           | `[interactive_repl]`                    |
//! | SQL CLIs             | `[sql_write]` / `[sql_readonly]`        |
//! | known binaries       | `[write_command]` / `[known_read_only]` |
//! | fallback             | `[model-trusted]`                       |
//!
//! Each segment of a chained command is classified on its own; the first
//! write wins, otherwise the weakest read-only verdict is reported.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::argv::{basename, has_flag, has_short, is_assignment, is_number, positionals, short_letters};
use crate::commands::{self, docker_verbs, kubectl_verbs};
use crate::shell::{self, ParsedCommand, Segment};
use crate::sql;

/// Reason tags.  Operators and tests match on these, so they never change.
pub mod tags {
    pub const UNBALANCED_QUOTES: &str = "unbalanced_quotes";
    pub const SUBSTITUTION: &str = "substitution";
    pub const SUDO: &str = "sudo";
    pub const REDIRECT: &str = "redirect";
    pub const TEE: &str = "tee";
    pub const TTY_FLAG: &str = "tty_flag";
    pub const CONTAINER_EXEC: &str = "container_exec";
    pub const PAGER: &str = "pager";
    pub const UNBOUNDED_STREAM: &str = "unbounded_stream";
    pub const INTERACTIVE_REPL: &str = "interactive_repl";
    pub const SQL_NO_INLINE: &str = "sql_no_inline";
    pub const SQL_WRITE: &str = "sql_write";
    pub const SQL_READONLY: &str = "sql_readonly";
    pub const WRITE_COMMAND: &str = "write_command";
    pub const KNOWN_READ_ONLY: &str = "known_read_only";
    pub const MODEL_TRUSTED: &str = "model-trusted";
    pub const EMPTY: &str = "empty";
}

const MAX_DEPTH: usize = 3;

const PRIVILEGE: &[&str] = &["sudo", "doas", "su", "pkexec", "runuser"];

const PAGERS: &[&str] = &[
    "less", "more", "most", "pg", "vim", "vi", "nvim", "view", "vimdiff", "nano", "pico", "emacs",
    "joe", "mcedit", "mc", "ed", "ncdu", "zless", "zmore", "nmtui",
];

const MONITORS: &[&str] = &[
    "htop", "atop", "btop", "bpytop", "glances", "nmon", "iftop", "nload", "bmon", "nethogs",
    "iptraf", "iptraf-ng", "powertop", "watch", "ctop", "lazydocker", "k9s", "systemd-cgtop",
    "slurm",
];

const INTERPRETERS: &[&str] = &[
    "node", "nodejs", "irb", "ruby", "perl", "php", "lua", "luajit", "ipython", "bpython", "pypy",
    "pypy3", "tclsh", "ghci", "iex", "erl", "scala", "jshell",
];

const SHELLS: &[&str] = &["bash", "sh", "zsh", "dash", "ksh", "ash", "fish"];

const SSH_VALUE_FLAGS: &[&str] = &[
    "-b", "-c", "-D", "-E", "-e", "-F", "-I", "-i", "-J", "-L", "-l", "-m", "-O", "-o", "-p", "-Q",
    "-R", "-S", "-W", "-w", "-B",
];

const REDIS_VALUE_FLAGS: &[&str] = &[
    "-h", "-p", "-a", "-n", "-s", "-u", "-r", "-i", "-d", "--user", "--pass", "--cacert", "--cert",
    "--key", "--sni",
];

const REDIS_WRITE: &[&str] = &[
    "SET", "SETEX", "SETNX", "PSETEX", "MSET", "MSETNX", "DEL", "UNLINK", "EXPIRE", "EXPIREAT",
    "PEXPIRE", "PERSIST", "RENAME", "RENAMENX", "INCR", "INCRBY", "INCRBYFLOAT", "DECR", "DECRBY",
    "APPEND", "GETSET", "GETDEL", "HSET", "HSETNX", "HMSET", "HDEL", "HINCRBY", "LPUSH", "RPUSH",
    "LPOP", "RPOP", "LSET", "LREM", "LTRIM", "LINSERT", "SADD", "SREM", "SPOP", "SMOVE", "ZADD",
    "ZREM", "ZINCRBY", "ZPOPMIN", "ZPOPMAX", "XADD", "XDEL", "XTRIM", "FLUSHDB", "FLUSHALL",
    "CONFIG", "SHUTDOWN", "DEBUG", "SAVE", "BGSAVE", "BGREWRITEAOF", "SLAVEOF", "REPLICAOF",
    "MIGRATE", "RESTORE", "MOVE", "SCRIPT", "EVAL", "EVALSHA", "FUNCTION", "CLIENT", "CLUSTER", "ACL",
];

/// Network and database clients that sit at a prompt unless given one of the
/// listed non-interactive flags.
const PROMPT_CLIENTS: &[(&str, &[&str])] = &[
    ("telnet", &[]),
    ("ftp", &[]),
    ("sftp", &["-b"]),
    ("lftp", &["-c", "-f"]),
    ("sqlplus", &[]),
    ("cqlsh", &["-e", "--execute", "-f", "--file"]),
    ("mongo", &["--eval"]),
    ("mongosh", &["--eval", "-f", "--file"]),
    ("clickhouse-client", &["-q", "--query"]),
    ("influx", &["-execute", "--execute"]),
    ("gdb", &["-batch", "--batch"]),
    ("minicom", &[]),
    ("picocom", &[]),
];

/// Clients that only prompt when run with no arguments at all.
const BARE_PROMPT_CLIENTS: &[&str] = &[
    "nslookup", "chronyc", "ntpq", "virsh", "wpa_cli", "bluetoothctl", "gnuplot",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    ReadOnlyCertain,
    ReadOnlyConditional,
    WriteOrUnknown,
}

impl IntentKind {
    pub fn is_read_only(&self) -> bool {
        !matches!(self, IntentKind::WriteOrUnknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandIntent {
    pub kind: IntentKind,
    /// `[tag] detail`
    pub reason: String,
}

impl CommandIntent {
    pub(crate) fn certain(detail: impl Display) -> Self {
        Self::new(IntentKind::ReadOnlyCertain, tags::KNOWN_READ_ONLY, detail)
    }

    pub(crate) fn conditional(tag: &str, detail: impl Display) -> Self {
        Self::new(IntentKind::ReadOnlyConditional, tag, detail)
    }

    pub(crate) fn write(tag: &str, detail: impl Display) -> Self {
        Self::new(IntentKind::WriteOrUnknown, tag, detail)
    }

    fn new(kind: IntentKind, tag: &str, detail: impl Display) -> Self {
        Self {
            kind,
            reason: format!("[{tag}] {detail}"),
        }
    }

    pub fn is_write(&self) -> bool {
        self.kind == IntentKind::WriteOrUnknown
    }

    pub fn is_read_only(&self) -> bool {
        self.kind.is_read_only()
    }

    /// The bracketed tag at the front of `reason`.
    pub fn tag(&self) -> &str {
        self.reason
            .strip_prefix('[')
            .and_then(|r| r.split_once(']'))
            .map(|(tag, _)| tag)
            .unwrap_or_default()
    }
}

/// Classify a shell command.  Pure and deterministic; never inspects
/// anything but the string.
pub fn classify(command: &str) -> CommandIntent {
    let intent = classify_at(command, 0);
    trace!(kind = ?intent.kind, reason = %intent.reason, "classified command");
    intent
}

/// Control verbs that change guest or file state.
pub fn is_write_action(action: &str) -> bool {
    matches!(
        action,
        "start" | "stop" | "restart" | "reboot" | "delete" | "shutdown" | "exec" | "write" | "append"
    )
}

fn classify_at(command: &str, depth: usize) -> CommandIntent {
    let command = command.trim();
    if command.is_empty() {
        return CommandIntent::write(tags::EMPTY, "no command given");
    }
    if depth > MAX_DEPTH {
        return CommandIntent::write(tags::WRITE_COMMAND, "command nesting is too deep to inspect");
    }

    let parsed = shell::parse(command);
    if let Some(blocked) = mutation_guard(&parsed) {
        return blocked;
    }

    let mut weakest: Option<CommandIntent> = None;
    for segment in &parsed.segments {
        let intent = classify_segment(segment, depth);
        match intent.kind {
            IntentKind::WriteOrUnknown => return intent,
            IntentKind::ReadOnlyConditional => {
                if weakest.as_ref().is_none_or(|w| w.kind == IntentKind::ReadOnlyCertain) {
                    weakest = Some(intent);
                }
            }
            IntentKind::ReadOnlyCertain => {
                if weakest.is_none() {
                    weakest = Some(intent);
                }
            }
        }
    }
    match weakest {
        Some(intent) if !parsed.is_chained() => intent,
        Some(intent) if intent.kind == IntentKind::ReadOnlyConditional => intent,
        _ => CommandIntent::certain("every segment is a known inspection command"),
    }
}

// ── Phase 1-2: quote scan and mutation guards ───────────────────────────────

fn mutation_guard(parsed: &ParsedCommand) -> Option<CommandIntent> {
    if !parsed.balanced {
        return Some(CommandIntent::write(
            tags::UNBALANCED_QUOTES,
            "unclosed quote may hide shell chaining",
        ));
    }
    if parsed.substitution {
        return Some(CommandIntent::write(
            tags::SUBSTITUTION,
            "command substitution runs a command that cannot be inspected",
        ));
    }
    for segment in &parsed.segments {
        if let Some(first) = segment.words.first() {
            let cmd = basename(&first.text);
            if PRIVILEGE.contains(&cmd) {
                return Some(CommandIntent::write(tags::SUDO, format!("{cmd} escalates privileges")));
            }
            if cmd == "tee" {
                return Some(CommandIntent::write(tags::TEE, "tee writes its input to files"));
            }
        }
    }
    for redirect in parsed.redirects() {
        if redirect.feeds_stdin() {
            return Some(CommandIntent::write(
                tags::REDIRECT,
                "stdin comes from a file or heredoc that cannot be inspected",
            ));
        }
        if redirect.writes_file() {
            let target = if redirect.target.is_empty() { "a file" } else { &redirect.target };
            return Some(CommandIntent::write(tags::REDIRECT, format!("output is redirected to {target}")));
        }
    }
    None
}

// ── Per-segment phases ──────────────────────────────────────────────────────

pub(crate) struct Invocation<'a> {
    pub(crate) cmd: &'a str,
    pub(crate) rest: Vec<&'a str>,
    pub(crate) timeout: bool,
}

fn skip_flags(words: &[&str], mut j: usize, with_value: &[&str]) -> usize {
    while j < words.len() && words[j].starts_with('-') && words[j].len() > 1 {
        j += if with_value.contains(&words[j]) { 2 } else { 1 };
    }
    j
}

/// Skip assignments and wrappers that run the next word as the real command.
pub(crate) fn strip_wrappers<'a>(words: &[&'a str]) -> Option<Invocation<'a>> {
    let mut i = 0;
    let mut timeout = false;
    while i < words.len() {
        let w = words[i];
        if is_assignment(w) {
            i += 1;
            continue;
        }
        i = match basename(w) {
            "timeout" => {
                timeout = true;
                skip_flags(words, i + 1, &["-s", "--signal", "-k", "--kill-after"]) + 1
            }
            "nice" => skip_flags(words, i + 1, &["-n", "--adjustment"]),
            "ionice" => skip_flags(words, i + 1, &["-c", "-n", "-p", "-P", "-u", "--class", "--classdata"]),
            "stdbuf" => skip_flags(words, i + 1, &["-i", "-o", "-e"]),
            "time" => skip_flags(words, i + 1, &["-f", "--format", "-o", "--output"]),
            "nohup" | "command" | "builtin" | "exec" => skip_flags(words, i + 1, &[]),
            "env" => {
                let mut j = skip_flags(words, i + 1, &["-u", "--unset", "-C", "--chdir", "-S"]);
                while j < words.len() && is_assignment(words[j]) {
                    j += 1;
                }
                if j >= words.len() {
                    break;
                }
                j
            }
            "xargs" => {
                let j = skip_flags(
                    words,
                    i + 1,
                    &["-I", "-n", "-P", "-L", "-d", "-E", "-s", "-a", "--max-args", "--max-procs", "--delimiter", "--arg-file"],
                );
                if j >= words.len() {
                    break;
                }
                j
            }
            _ => break,
        };
    }
    let (first, rest) = words.get(i..)?.split_first()?;
    Some(Invocation {
        cmd: basename(first),
        rest: rest.to_vec(),
        timeout,
    })
}

fn classify_segment(segment: &Segment, depth: usize) -> CommandIntent {
    let words = segment.argv();
    let Some(inv) = strip_wrappers(&words) else {
        return CommandIntent::certain("segment runs no command");
    };
    let (cmd, rest) = (inv.cmd, inv.rest.as_slice());

    if PRIVILEGE.contains(&cmd) {
        return CommandIntent::write(tags::SUDO, format!("{cmd} escalates privileges"));
    }
    if cmd == "tee" {
        return CommandIntent::write(tags::TEE, "tee writes its input to files");
    }
    if let Some(blocked) = terminal_guard(cmd, rest, inv.timeout) {
        return blocked;
    }
    if let Some(intent) = repl_guard(cmd, rest, depth) {
        return intent;
    }
    if sql::is_sql_cli(cmd) {
        return sql::classify_cli(cmd, rest);
    }
    commands::classify_known(cmd, rest).unwrap_or_else(|| {
        CommandIntent::conditional(
            tags::MODEL_TRUSTED,
            format!("{cmd} is not a known command; trusting the read-only claim"),
        )
    })
}

// ── Phase 3-4: terminal, pager and stream guards ────────────────────────────

fn is_tty_flag(arg: &str) -> bool {
    matches!(
        arg,
        "-it" | "-ti" | "--tty" | "--interactive" | "--tty=true" | "--interactive=true"
    )
}

fn terminal_guard(cmd: &str, rest: &[&str], timeout: bool) -> Option<CommandIntent> {
    if let Some(flag) = rest.iter().find(|a| is_tty_flag(a)) {
        return Some(CommandIntent::write(
            tags::TTY_FLAG,
            format!("{cmd} {flag} allocates an interactive terminal"),
        ));
    }
    if is_container_exec(cmd, rest) {
        return Some(CommandIntent::write(
            tags::CONTAINER_EXEC,
            format!("{cmd} runs a command inside a container or guest"),
        ));
    }
    if PAGERS.contains(&cmd) && !(cmd == "emacs" && has_flag(rest, &["--batch"])) {
        return Some(CommandIntent::write(
            tags::PAGER,
            format!("{cmd} needs an interactive terminal"),
        ));
    }
    if is_live_monitor(cmd, rest) {
        return Some(CommandIntent::write(
            tags::UNBOUNDED_STREAM,
            format!("{cmd} refreshes until interrupted"),
        ));
    }
    if let Some(bounded) = follow_state(cmd, rest) {
        if !bounded && !timeout {
            return Some(CommandIntent::write(
                tags::UNBOUNDED_STREAM,
                format!("{cmd} follows output with no line or time bound"),
            ));
        }
    }
    None
}

fn is_container_exec(cmd: &str, rest: &[&str]) -> bool {
    match cmd {
        "docker" | "podman" | "nerdctl" | "crictl" => {
            let (verb, sub) = docker_verbs(rest);
            matches!(verb, Some("exec" | "attach"))
                || (matches!(verb, Some("container" | "compose")) && matches!(sub, Some("exec" | "attach")))
        }
        "docker-compose" => positionals(rest, &[]).first() == Some(&"exec"),
        "kubectl" | "oc" => matches!(kubectl_verbs(rest).0, Some("exec" | "attach")),
        "pct" => matches!(positionals(rest, &[]).first(), Some(&"exec") | Some(&"enter") | Some(&"console")),
        "qm" => {
            let pos = positionals(rest, &[]);
            matches!(pos.first(), Some(&"terminal") | Some(&"monitor"))
                || (pos.first() == Some(&"guest") && pos.get(1) == Some(&"exec"))
        }
        "lxc-attach" | "nsenter" => true,
        "machinectl" => matches!(positionals(rest, &[]).first(), Some(&"shell") | Some(&"login")),
        _ => false,
    }
}

fn is_live_monitor(cmd: &str, rest: &[&str]) -> bool {
    match cmd {
        "top" | "iotop" => {
            let batch = has_short(rest, 'b') || has_flag(rest, &["--batch"]);
            let iterations = has_short(rest, 'n') || has_flag(rest, &["--iter"]);
            !(batch && iterations)
        }
        "mtr" => !(has_short(rest, 'r') || has_short(rest, 'w') || has_flag(rest, &["--report", "--report-wide"])),
        _ => MONITORS.contains(&cmd),
    }
}

/// `Some(bounded)` when the invocation streams until interrupted.
fn follow_state(cmd: &str, rest: &[&str]) -> Option<bool> {
    let follow_flag = |letters: &str| {
        has_flag(rest, &["--follow"])
            || rest
                .iter()
                .filter_map(|a| short_letters(a))
                .any(|l| l.chars().any(|c| letters.contains(c)))
    };
    let line_bound = || {
        has_flag(rest, &["--lines", "--tail", "-c", "--bytes"])
            || has_short(rest, 'n')
            || rest.iter().any(|a| a.len() > 1 && a.starts_with('-') && is_number(&a[1..]))
    };
    let time_bound = || has_flag(rest, &["--since", "--until", "-S", "-U"]);

    match cmd {
        "tail" => follow_flag("fF").then(|| line_bound() || time_bound()),
        "journalctl" => follow_flag("f").then(|| line_bound() || time_bound()),
        "docker" | "podman" | "nerdctl" => {
            let (verb, sub) = docker_verbs(rest);
            let logs = verb == Some("logs")
                || (matches!(verb, Some("container" | "compose" | "service")) && sub == Some("logs"));
            if logs {
                follow_flag("f").then(|| line_bound() || time_bound())
            } else if verb == Some("stats") {
                (!has_flag(rest, &["--no-stream"])).then_some(false)
            } else if verb == Some("events") {
                Some(has_flag(rest, &["--until"]))
            } else {
                None
            }
        }
        "docker-compose" => {
            let logs = positionals(rest, &[]).first() == Some(&"logs");
            (logs && follow_flag("f")).then(|| line_bound() || time_bound())
        }
        "kubectl" | "oc" => {
            let (verb, _) = kubectl_verbs(rest);
            match verb {
                Some("logs") => {
                    let follow = has_flag(rest, &["-f", "--follow"]) || rest.contains(&"--follow=true");
                    follow.then(|| {
                        has_flag(rest, &["--tail", "--since", "--since-time", "--limit-bytes"])
                    })
                }
                Some("port-forward" | "proxy") => Some(false),
                Some(_) => has_flag(rest, &["-w", "--watch", "--watch-only"]).then_some(false),
                None => None,
            }
        }
        "dmesg" => (has_short(rest, 'w') || has_short(rest, 'W') || has_flag(rest, &["--follow", "--follow-new"]))
            .then_some(false),
        "ping" | "ping6" | "arping" => {
            (!(has_short(rest, 'c') || has_short(rest, 'w') || has_flag(rest, &["--count"]))).then_some(false)
        }
        "tcpdump" | "tshark" => (!has_short(rest, 'c')).then_some(false),
        "vmstat" | "iostat" | "mpstat" | "pidstat" | "sar" => {
            let numbers = positionals(rest, &["-p", "-P", "-o", "-f", "-t"])
                .into_iter()
                .filter(|p| is_number(p))
                .count();
            (numbers == 1).then_some(false)
        }
        "zpool" => {
            let pos = positionals(rest, &[]);
            match pos.first() {
                Some(&"iostat") => (pos.iter().filter(|p| is_number(p)).count() == 1).then_some(false),
                Some(&"events") => has_short(rest, 'f').then_some(false),
                _ => None,
            }
        }
        "ceph" => has_flag(rest, &["-w", "--watch", "--watch-debug", "--watch-info"]).then_some(false),
        _ => None,
    }
}

// ── Phase 5: REPLs and nested commands ──────────────────────────────────────

fn repl(cmd: &str, detail: &str) -> Option<CommandIntent> {
    Some(CommandIntent::write(tags::INTERACTIVE_REPL, format!("{cmd} {detail}")))
}

fn repl_guard(cmd: &str, rest: &[&str], depth: usize) -> Option<CommandIntent> {
    if cmd == "ssh" {
        return ssh(rest, depth);
    }
    if cmd == "redis-cli" {
        return redis(rest);
    }
    if SHELLS.contains(&cmd) {
        return shell_interpreter(cmd, rest, depth);
    }
    if cmd.starts_with("python") || INTERPRETERS.contains(&cmd) {
        return interpreter(cmd, rest);
    }
    if let Some((_, batch_flags)) = PROMPT_CLIENTS.iter().find(|(name, _)| *name == cmd) {
        return if has_flag(rest, batch_flags) {
            None
        } else {
            repl(cmd, "opens an interactive session")
        };
    }
    if BARE_PROMPT_CLIENTS.contains(&cmd) {
        let console = cmd == "virsh" && positionals(rest, &["-c", "--connect"]).first() == Some(&"console");
        return (rest.is_empty() || console)
            .then(|| repl(cmd, "without arguments opens an interactive prompt"))
            .flatten();
    }
    match cmd {
        "openssl" => {
            let verb = positionals(rest, &[]).first().copied();
            matches!(verb, Some("s_client" | "s_server"))
                .then(|| repl(cmd, "s_client keeps a TLS session open"))
                .flatten()
        }
        "nc" | "ncat" | "netcat" => {
            if has_short(rest, 'l') || has_flag(rest, &["--listen"]) {
                Some(CommandIntent::write(tags::WRITE_COMMAND, format!("{cmd} -l listens for connections")))
            } else if has_short(rest, 'z') {
                None
            } else {
                repl(cmd, "without -z holds a connection open")
            }
        }
        "tmux" => {
            let verb = positionals(rest, &["-L", "-S", "-f"]).first().copied();
            let listing = matches!(
                verb,
                Some("ls" | "list-sessions" | "list-windows" | "list-panes" | "show-options" | "has-session" | "capture-pane")
            ) || has_flag(rest, &["-V"]);
            (!listing).then(|| repl(cmd, "attaches to a terminal session")).flatten()
        }
        "screen" => {
            let listing = has_flag(rest, &["-ls", "-list", "-v", "-version"]);
            (!listing).then(|| repl(cmd, "attaches to a terminal session")).flatten()
        }
        _ => None,
    }
}

fn ssh(rest: &[&str], depth: usize) -> Option<CommandIntent> {
    let mut i = 0;
    while i < rest.len() && rest[i].starts_with('-') && rest[i].len() > 1 {
        i += if SSH_VALUE_FLAGS.contains(&rest[i]) { 2 } else { 1 };
    }
    if i >= rest.len() {
        if has_flag(rest, &["-V", "-G"]) {
            return Some(CommandIntent::certain("ssh only prints configuration"));
        }
        return repl("ssh", "without a host opens nothing useful");
    }
    let remote = &rest[i + 1..];
    if remote.is_empty() {
        return repl("ssh", "without a remote command opens a login shell");
    }
    Some(classify_at(&remote.join(" "), depth + 1))
}

fn redis(rest: &[&str]) -> Option<CommandIntent> {
    let pos = positionals(rest, REDIS_VALUE_FLAGS);
    let Some(verb) = pos.first() else {
        if has_flag(rest, &["--scan", "--bigkeys", "--memkeys", "--version", "-v", "--help"]) {
            return Some(CommandIntent::conditional(tags::MODEL_TRUSTED, "redis-cli one-shot scan"));
        }
        return repl("redis-cli", "without a command opens an interactive prompt");
    };
    let verb = verb.to_ascii_uppercase();
    if matches!(verb.as_str(), "MONITOR" | "SUBSCRIBE" | "PSUBSCRIBE" | "SSUBSCRIBE") {
        return Some(CommandIntent::write(
            tags::UNBOUNDED_STREAM,
            format!("redis {verb} streams until interrupted"),
        ));
    }
    if REDIS_WRITE.contains(&verb.as_str()) {
        return Some(CommandIntent::write(tags::WRITE_COMMAND, format!("redis {verb} modifies data")));
    }
    Some(CommandIntent::conditional(
        tags::MODEL_TRUSTED,
        format!("redis {verb} is not a known write"),
    ))
}

fn shell_interpreter(cmd: &str, rest: &[&str], depth: usize) -> Option<CommandIntent> {
    let script_flag = rest
        .iter()
        .position(|a| short_letters(a).is_some_and(|l| l.contains('c')));
    if let Some(idx) = script_flag {
        let script = positionals(&rest[idx + 1..], &[]).first().copied();
        return match script {
            Some(script) => Some(classify_at(script, depth + 1)),
            None => repl(cmd, "-c without a script reads from stdin"),
        };
    }
    if has_short(rest, 'i') || positionals(rest, &["-o", "-O"]).is_empty() {
        if has_flag(rest, &["--version", "--help"]) {
            return None;
        }
        return repl(cmd, "without a script or -c starts an interactive shell");
    }
    None
}

fn interpreter(cmd: &str, rest: &[&str]) -> Option<CommandIntent> {
    if has_flag(rest, &["--version", "-V", "--help", "-h", "-v"]) && rest.len() == 1 {
        return None;
    }
    if matches!(cmd, "perl" | "ruby") && has_short(rest, 'i') {
        return Some(CommandIntent::write(
            tags::WRITE_COMMAND,
            format!("{cmd} -i edits files in place"),
        ));
    }
    let interactive = rest.contains(&"-i") || (cmd == "php" && rest.contains(&"-a"));
    if interactive {
        return repl(cmd, "-i starts an interactive session");
    }
    let inline = has_flag(rest, &["-c", "-m", "-r", "--eval", "-p", "--print", "-E"])
        || rest
            .iter()
            .filter_map(|a| short_letters(a))
            .any(|l| l.contains('e'));
    let script = !positionals(rest, &["-W", "-X", "-I", "-M", "-l", "-r"]).is_empty();
    if inline || script {
        return None;
    }
    repl(cmd, "without a script or inline code starts a REPL")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_write(cmd: &str, tag: &str) {
        let intent = classify(cmd);
        assert_eq!(intent.kind, IntentKind::WriteOrUnknown, "{cmd}: {}", intent.reason);
        assert_eq!(intent.tag(), tag, "{cmd}: {}", intent.reason);
    }

    fn assert_read(cmd: &str) {
        let intent = classify(cmd);
        assert!(intent.is_read_only(), "{cmd}: {}", intent.reason);
    }

    fn assert_kind(cmd: &str, kind: IntentKind) {
        let intent = classify(cmd);
        assert_eq!(intent.kind, kind, "{cmd}: {}", intent.reason);
    }

    // ── Shell structure ─────────────────────────────────────────────────────

    #[test]
    fn empty_command_is_not_read_only() {
        assert_write("   ", tags::EMPTY);
    }

    #[test]
    fn unbalanced_quotes_fail_closed() {
        assert_write(r#"sqlite3 db.db "SELECT 1; rm -rf /"#, tags::UNBALANCED_QUOTES);
        assert_write("echo 'unterminated", tags::UNBALANCED_QUOTES);
    }

    #[test]
    fn escaped_quote_exposes_chained_rm() {
        assert_write(r#"sqlite3 db.db "SELECT \"test"; rm -rf /"#, tags::WRITE_COMMAND);
    }

    #[test]
    fn substitution_is_blocked() {
        assert_write("cat $(find / -name passwd)", tags::SUBSTITUTION);
        assert_write("echo `id`", tags::SUBSTITUTION);
        assert_read("echo '$(not expanded)'");
    }

    #[test]
    fn sudo_anywhere_in_chain() {
        assert_write("sudo cat /etc/shadow", tags::SUDO);
        assert_write("uptime && sudo reboot", tags::SUDO);
        assert_write("timeout 5 sudo ls", tags::SUDO);
    }

    #[test]
    fn redirects() {
        assert_write("echo hi > /etc/motd", tags::REDIRECT);
        assert_write("cat a >> b", tags::REDIRECT);
        assert_write("mysql -u root < dump.sql", tags::REDIRECT);
        assert_write("sqlite3 db <<< 'SELECT 1'", tags::REDIRECT);
        assert_read("ls /nonexistent 2>/dev/null");
        assert_read("docker logs --tail 50 app 2>&1 | grep -i error");
        assert_read("cat /etc/hosts > /dev/null");
    }

    #[test]
    fn tee_is_a_write() {
        assert_write("echo x | tee /etc/hosts", tags::TEE);
    }

    #[test]
    fn chained_reads_stay_read() {
        assert_kind("uptime; free -m; df -h", IntentKind::ReadOnlyCertain);
        assert_read("hostname -f | xargs echo");
        assert_read(r#"sqlite3 db.db "SELECT 1" && echo done"#);
        assert_read("ss -tuln | grep -E '3000|9090|9100|22|25'");
    }

    #[test]
    fn chain_with_write_is_write() {
        assert_write("ls && rm -rf /tmp/x", tags::WRITE_COMMAND);
        assert_write("find . -name '*.log' | xargs rm", tags::WRITE_COMMAND);
    }

    #[test]
    fn hash_does_not_hide_chained_rm() {
        let prefixes = [
            "ls #",
            "uptime # check",
            "df -h #note",
            r"echo \#",
            r"cat /tmp/a\ b",
            "grep '#' /etc/hosts",
            r#"echo "a;b # c""#,
        ];
        for c in prefixes {
            let cmd = format!("{c}; rm -rf /");
            assert!(classify(&cmd).is_write(), "{cmd}: {}", classify(&cmd).reason);
        }
        assert!(classify("ls # x && rm -rf /").is_write());
        assert!(classify("ls # x | xargs rm").is_write());
        assert!(classify("ls #\nrm -rf /").is_write());
    }

    // ── Terminal guards ─────────────────────────────────────────────────────

    #[test]
    fn tty_and_container_exec() {
        assert_write("docker run -it ubuntu bash", tags::TTY_FLAG);
        assert_write("kubectl exec -ti pod -- sh", tags::TTY_FLAG);
        assert_write("docker exec app ls", tags::CONTAINER_EXEC);
        assert_write("kubectl -n prod exec pod -- ls", tags::CONTAINER_EXEC);
        assert_write("pct exec 101 -- ls", tags::CONTAINER_EXEC);
    }

    #[test]
    fn pagers_and_editors() {
        assert_write("less /var/log/syslog", tags::PAGER);
        assert_write("cat /var/log/syslog | more", tags::PAGER);
        assert_write("vim /etc/hosts", tags::PAGER);
        assert_write("crontab -e", tags::PAGER);
    }

    #[test]
    fn monitors() {
        assert_write("top", tags::UNBOUNDED_STREAM);
        assert_write("htop", tags::UNBOUNDED_STREAM);
        assert_write("watch df -h", tags::UNBOUNDED_STREAM);
        assert_read("top -b -n 1");
        assert_read("top -bn1");
    }

    #[test]
    fn follow_streams() {
        assert_write("tail -f /var/log/syslog", tags::UNBOUNDED_STREAM);
        assert_write("tail -F /var/log/syslog", tags::UNBOUNDED_STREAM);
        assert_write("journalctl -fu nginx", tags::UNBOUNDED_STREAM);
        assert_write("docker logs -f app", tags::UNBOUNDED_STREAM);
        assert_write("kubectl logs -f pod", tags::UNBOUNDED_STREAM);
        assert_write("kubectl -n prod logs -f pod", tags::UNBOUNDED_STREAM);
        assert_write("ping 8.8.8.8", tags::UNBOUNDED_STREAM);
        assert_write("docker stats", tags::UNBOUNDED_STREAM);
        assert_write("vmstat 1", tags::UNBOUNDED_STREAM);
        assert_write("kubectl get pods -w", tags::UNBOUNDED_STREAM);
    }

    #[test]
    fn bounded_streams_are_read() {
        assert_read("tail -n 100 -f /var/log/syslog");
        assert_read("tail -fn100 /var/log/syslog");
        assert_read("journalctl -f --since '5 min ago'");
        assert_read("docker logs -f --tail 100 app");
        assert_read("kubectl logs -f --tail=100 pod");
        assert_read("timeout 10 tail -f /var/log/syslog");
        assert_read("ping -c 4 8.8.8.8");
        assert_read("docker stats --no-stream");
        assert_read("vmstat 1 5");
    }

    #[test]
    fn f_is_not_follow_for_other_binaries() {
        for cmd in ["hostname -f", "cut -f 1 /etc/passwd", "sort -f names", "grep -f patterns file", "ls -f"] {
            assert_read(cmd);
        }
    }

    // ── REPLs ───────────────────────────────────────────────────────────────

    #[test]
    fn bare_repls() {
        for cmd in ["ssh myhost", "mysql", "psql -h localhost -d mydb", "redis-cli", "python3", "node", "irb", "openssl s_client -connect x:443"] {
            assert_write(cmd, tags::INTERACTIVE_REPL);
        }
    }

    #[test]
    fn non_interactive_forms() {
        assert_kind("ssh myhost uptime", IntentKind::ReadOnlyCertain);
        assert_kind("ssh -p 2222 admin@host 'df -h'", IntentKind::ReadOnlyCertain);
        assert_write("ssh host rm -rf /tmp/x", tags::WRITE_COMMAND);
        assert_kind("python3 -c 'print(1)'", IntentKind::ReadOnlyConditional);
        assert_kind("python3 /opt/check.py", IntentKind::ReadOnlyConditional);
        assert_kind("bash -c 'uptime'", IntentKind::ReadOnlyCertain);
        assert_write("sh -c 'rm -f /x'", tags::WRITE_COMMAND);
        assert_kind("redis-cli -h cache GET session", IntentKind::ReadOnlyConditional);
        assert_write("redis-cli FLUSHALL", tags::WRITE_COMMAND);
        assert_kind("nc -zv host 22", IntentKind::ReadOnlyCertain);
    }

    // ── SQL ─────────────────────────────────────────────────────────────────

    #[test]
    fn sql_cli_inline() {
        assert_write("sqlite3 db.db", tags::SQL_NO_INLINE);
        assert_write(r#"sqlite3 db.db "DELETE FROM t""#, tags::SQL_WRITE);
        assert_kind(r#"sqlite3 db.db "SELECT * FROM t""#, IntentKind::ReadOnlyConditional);
        assert_write(r#"mysql -e "DROP TABLE users""#, tags::SQL_WRITE);
        assert_kind(r#"mysql -u root -e "SHOW DATABASES""#, IntentKind::ReadOnlyConditional);
        assert_kind(r#"psql -c "SELECT 1" mydb"#, IntentKind::ReadOnlyConditional);
        assert_eq!(classify(r#"sqlite3 db.db "SELECT 1""#).tag(), tags::SQL_READONLY);
    }

    #[test]
    fn sql_column_names_with_keywords() {
        for col in ["updated_at", "last_updated", "updated", "is_updated_flag"] {
            assert_read(&format!(r#"sqlite3 db "SELECT {col} FROM t""#));
        }
    }

    #[test]
    fn sql_semicolon_inside_quotes() {
        assert_read(r#"sqlite3 /data/app.db "SELECT Name FROM t ORDER BY Date DESC LIMIT 1;""#);
        assert_read(r#"sqlite3 db.db "SELECT * FROM t WHERE name = \"O'Brien\";""#);
    }

    // ── Known binaries and fallback ─────────────────────────────────────────

    #[test]
    fn allow_list_is_certain() {
        for cmd in ["cat /etc/os-release", "ls -la", "df -h", "free -m", "ps aux", "systemctl status nginx", "pct config 101", "zpool status", "smartctl -a /dev/sda"] {
            assert_kind(cmd, IntentKind::ReadOnlyCertain);
        }
    }

    #[test]
    fn known_writes() {
        for cmd in ["rm -rf /tmp/x", "systemctl restart nginx", "docker rm app", "docker stop app", "kill 1234", "apt install nginx", "chmod 777 /x", "useradd bob"] {
            assert_write(cmd, tags::WRITE_COMMAND);
        }
    }

    #[test]
    fn unknown_binaries_are_model_trusted() {
        assert_write_free("wget -qO- http://localhost/health");
        assert_write_free("./scripts/check.sh");
        assert_eq!(classify("frobnicate --status").tag(), tags::MODEL_TRUSTED);
    }

    fn assert_write_free(cmd: &str) {
        assert_kind(cmd, IntentKind::ReadOnlyConditional);
    }

    #[test]
    fn wrappers_are_transparent() {
        assert_write("LANG=C nice -n 10 rm -rf /x", tags::WRITE_COMMAND);
        assert_kind("env LANG=C ls", IntentKind::ReadOnlyCertain);
        assert_kind("stdbuf -oL cat file", IntentKind::ReadOnlyCertain);
    }

    #[test]
    fn write_actions() {
        for action in ["start", "stop", "restart", "delete", "shutdown", "exec", "write", "append"] {
            assert!(is_write_action(action), "{action}");
        }
        for action in ["status", "read", "list", "get"] {
            assert!(!is_write_action(action), "{action}");
        }
    }

    #[test]
    fn intent_serializes_snake_case() {
        let json = serde_json::to_string(&classify("ls")).unwrap();
        assert!(json.contains("\"read_only_certain\""));
    }
}
