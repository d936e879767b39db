//! Read-only inspection of inline SQL passed to database CLIs.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::classify::{CommandIntent, tags};

/// Keywords that mutate data, schema, transactions or the filesystem.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "REPLACE", "MERGE",
    "BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "VACUUM", "ATTACH", "DETACH", "REINDEX",
    "GRANT", "REVOKE", "COPY", "OUTFILE", "DUMPFILE", "INTO",
];

const READ_LEADING: &[&str] = &[
    "SELECT", "WITH", "EXPLAIN", "SHOW", "DESCRIBE", "DESC", "VALUES", "PRAGMA", "USE", "TABLE",
];

const READ_DOT_COMMANDS: &[&str] = &[
    ".tables", ".schema", ".indexes", ".indices", ".databases", ".dbinfo", ".show", ".headers",
    ".mode", ".help", ".fullschema", ".stats", ".width", ".timer", ".dump", ".eqp",
];

const READ_PSQL_META: &[&str] = &[
    "\\l", "\\l+", "\\list", "\\x", "\\conninfo", "\\timing", "\\?", "\\h", "\\encoding",
];

static PRAGMA_ASSIGN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bPRAGMA\b[^;]*=").unwrap());

const SQL_CLIS: &[&str] = &["sqlite3", "sqlite", "mysql", "mariadb", "psql"];

pub(crate) fn is_sql_cli(cmd: &str) -> bool {
    SQL_CLIS.contains(&cmd)
}

/// Where a database CLI gets its statements from.
#[derive(Debug, Default)]
struct SqlSource<'a> {
    inline: Vec<&'a str>,
    from_file: bool,
    output_file: bool,
}

fn sqlite_source<'a>(rest: &[&'a str]) -> SqlSource<'a> {
    const VALUE_FLAGS: &[&str] = &[
        "separator", "newline", "nullvalue", "vfs", "mmap", "maxsize", "escape",
    ];
    let mut src = SqlSource::default();
    let mut positional = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let a = rest[i];
        match a.strip_prefix("--").or_else(|| a.strip_prefix('-')) {
            Some("cmd") => {
                src.inline.extend(rest.get(i + 1).copied());
                i += 2;
            }
            Some("init") => {
                src.from_file = true;
                i += 2;
            }
            Some(flag) if VALUE_FLAGS.contains(&flag) => i += 2,
            Some(_) => i += 1,
            None => {
                positional.push(a);
                i += 1;
            }
        }
    }
    // first positional is the database file
    src.inline.extend(positional.into_iter().skip(1));
    src
}

fn mysql_source<'a>(rest: &[&'a str]) -> SqlSource<'a> {
    const VALUE_FLAGS: &[&str] = &[
        "-u", "-h", "-P", "-D", "-S", "--user", "--host", "--port", "--database", "--socket",
        "--defaults-file", "--defaults-extra-file",
    ];
    let mut src = SqlSource::default();
    let mut i = 0;
    while i < rest.len() {
        let a = rest[i];
        if a == "-e" || a == "--execute" {
            src.inline.extend(rest.get(i + 1).copied());
            i += 2;
        } else if let Some(sql) = a.strip_prefix("--execute=") {
            src.inline.push(sql);
            i += 1;
        } else if let Some(sql) = a.strip_prefix("-e").filter(|s| !s.is_empty()) {
            src.inline.push(sql);
            i += 1;
        } else if a == "--tee" || a.starts_with("--tee=") {
            src.output_file = true;
            i += 1;
        } else {
            i += if VALUE_FLAGS.contains(&a) { 2 } else { 1 };
        }
    }
    src
}

fn psql_source<'a>(rest: &[&'a str]) -> SqlSource<'a> {
    const VALUE_FLAGS: &[&str] = &[
        "-h", "-p", "-U", "-d", "-v", "-P", "-T", "-F", "-R", "--set", "--pset", "--host",
        "--port", "--username", "--dbname", "--variable",
    ];
    let mut src = SqlSource::default();
    let mut i = 0;
    while i < rest.len() {
        let a = rest[i];
        match a {
            "-c" | "--command" => {
                src.inline.extend(rest.get(i + 1).copied());
                i += 2;
            }
            "-f" | "--file" => {
                src.from_file = true;
                i += 2;
            }
            "-o" | "--output" | "-L" | "--log-file" => {
                src.output_file = true;
                i += 2;
            }
            _ => {
                if let Some(sql) = a.strip_prefix("--command=") {
                    src.inline.push(sql);
                } else if a.starts_with("--file=") {
                    src.from_file = true;
                } else if a.starts_with("--output=") || a.starts_with("--log-file=") {
                    src.output_file = true;
                }
                i += if VALUE_FLAGS.contains(&a) { 2 } else { 1 };
            }
        }
    }
    src
}

/// Classify a database CLI invocation by the SQL it carries inline.
pub(crate) fn classify_cli(cmd: &str, rest: &[&str]) -> CommandIntent {
    let sqlite = matches!(cmd, "sqlite3" | "sqlite");
    let src = match cmd {
        "psql" => psql_source(rest),
        _ if sqlite => sqlite_source(rest),
        _ => mysql_source(rest),
    };
    if src.output_file {
        return CommandIntent::write(tags::SQL_WRITE, format!("{cmd} writes query output to a file"));
    }
    if src.inline.is_empty() {
        if src.from_file {
            return CommandIntent::write(
                tags::SQL_NO_INLINE,
                format!("{cmd} reads SQL from a file that cannot be inspected"),
            );
        }
        if sqlite {
            return CommandIntent::write(
                tags::SQL_NO_INLINE,
                format!("{cmd} without inline SQL reads statements from stdin"),
            );
        }
        return CommandIntent::write(
            tags::INTERACTIVE_REPL,
            format!("{cmd} without -e/-c opens an interactive session"),
        );
    }
    for sql in &src.inline {
        if let Err(keyword) = check_read_only(sql) {
            return CommandIntent::write(tags::SQL_WRITE, format!("inline SQL contains {keyword}"));
        }
    }
    CommandIntent::conditional(tags::SQL_READONLY, "inline SQL only reads")
}

/// Check one inline SQL argument.  `Err` carries the offending keyword or
/// statement head.
pub fn check_read_only(sql: &str) -> Result<(), String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    if trimmed.starts_with('.') {
        let head = trimmed.split_whitespace().next().unwrap_or_default();
        return if READ_DOT_COMMANDS.contains(&head) {
            Ok(())
        } else {
            Err(head.to_string())
        };
    }
    if trimmed.starts_with('\\') {
        let head = trimmed.split_whitespace().next().unwrap_or_default();
        return if head.starts_with("\\d") || READ_PSQL_META.contains(&head) {
            Ok(())
        } else {
            Err(head.to_string())
        };
    }

    let code = strip_literals(trimmed);
    if PRAGMA_ASSIGN.is_match(&code) {
        return Err("PRAGMA =".to_string());
    }
    for word in keywords(&code) {
        if WRITE_KEYWORDS.contains(&word.as_str()) {
            return Err(word);
        }
    }
    for stmt in code.split(';') {
        let Some(head) = keywords(stmt).into_iter().next() else {
            continue;
        };
        if !READ_LEADING.contains(&head.as_str()) {
            return Err(head);
        }
    }
    Ok(())
}

/// Blank out string literals and quoted identifiers so their contents never
/// look like keywords or statement separators.
fn strip_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => {
                if chars.peek() == Some(&q) {
                    chars.next();
                } else {
                    quote = None;
                }
                out.push(' ');
            }
            Some(_) => out.push(' '),
            None if matches!(c, '\'' | '"' | '`') => {
                quote = Some(c);
                out.push(' ');
            }
            None => out.push(c),
        }
    }
    out
}

fn keywords(code: &str) -> Vec<String> {
    code.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| w.chars().next().is_some_and(|c| c.is_ascii_alphabetic()))
        .map(str::to_ascii_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_pass() {
        assert!(check_read_only("SELECT * FROM users LIMIT 10").is_ok());
        assert!(check_read_only("select count(*) from t; select 1;").is_ok());
        assert!(check_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_ok());
        assert!(check_read_only("PRAGMA table_info(users)").is_ok());
        assert!(check_read_only("EXPLAIN QUERY PLAN SELECT 1").is_ok());
    }

    #[test]
    fn writes_are_caught() {
        assert_eq!(check_read_only("DELETE FROM users").unwrap_err(), "DELETE");
        assert_eq!(check_read_only("SELECT 1; DROP TABLE t").unwrap_err(), "DROP");
        assert!(check_read_only("PRAGMA journal_mode = WAL").is_err());
        assert!(check_read_only("SELECT * INTO OUTFILE '/tmp/x' FROM t").is_err());
        assert!(check_read_only("VACUUM").is_err());
    }

    #[test]
    fn column_names_are_not_keywords() {
        assert!(check_read_only("SELECT updated_at, deleted FROM events").is_ok());
    }

    #[test]
    fn literals_are_ignored() {
        assert!(check_read_only("SELECT * FROM t WHERE note = 'DROP TABLE x; DELETE'").is_ok());
        assert!(check_read_only(r#"SELECT * FROM t WHERE name = "O'Brien";"#).is_ok());
        assert!(check_read_only("SELECT 'it''s'").is_ok());
    }

    #[test]
    fn unknown_statement_head_fails() {
        assert_eq!(check_read_only("ANALYZE").unwrap_err(), "ANALYZE");
    }

    #[test]
    fn sources_by_cli() {
        let src = sqlite_source(&["-readonly", "-cmd", ".mode csv", "app.db", "SELECT 1"]);
        assert_eq!(src.inline, vec![".mode csv", "SELECT 1"]);

        let src = mysql_source(&["-u", "root", "-eSELECT 1", "shop"]);
        assert_eq!(src.inline, vec!["SELECT 1"]);
        let src = mysql_source(&["--execute=SHOW TABLES"]);
        assert_eq!(src.inline, vec!["SHOW TABLES"]);

        let src = psql_source(&["-U", "postgres", "-c", "SELECT 1", "app"]);
        assert_eq!(src.inline, vec!["SELECT 1"]);
        assert!(psql_source(&["-f", "migrate.sql"]).from_file);
        assert!(psql_source(&["-o", "/tmp/out", "-c", "SELECT 1"]).output_file);
    }

    #[test]
    fn cli_verdicts() {
        assert_eq!(classify_cli("sqlite3", &["app.db"]).tag(), tags::SQL_NO_INLINE);
        assert_eq!(classify_cli("mysql", &["-u", "root"]).tag(), tags::INTERACTIVE_REPL);
        assert_eq!(classify_cli("psql", &["-f", "x.sql"]).tag(), tags::SQL_NO_INLINE);
        assert_eq!(classify_cli("psql", &["-c", "DELETE FROM t"]).tag(), tags::SQL_WRITE);
        assert_eq!(classify_cli("sqlite3", &["app.db", ".tables"]).tag(), tags::SQL_READONLY);
    }

    #[test]
    fn meta_commands() {
        assert!(check_read_only(".tables").is_ok());
        assert!(check_read_only(".schema users").is_ok());
        assert!(check_read_only(".import data.csv t").is_err());
        assert!(check_read_only("\\dt").is_ok());
        assert!(check_read_only("\\copy t to 'x'").is_err());
    }
}
