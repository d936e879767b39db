//! Small helpers for picking apart argument vectors.

pub(crate) fn basename(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}

/// Letters of a single-dash flag cluster: `-fn100` → `fn`, `-la` → `la`.
/// Long options and bare `-` yield `None`.
pub(crate) fn short_letters(arg: &str) -> Option<&str> {
    let body = arg.strip_prefix('-')?;
    if body.is_empty() || body.starts_with('-') {
        return None;
    }
    let end = body
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(body.len());
    Some(&body[..end])
}

pub(crate) fn has_short(args: &[&str], letter: char) -> bool {
    args.iter()
        .filter_map(|a| short_letters(a))
        .any(|l| l.contains(letter))
}

/// Exact flag or `--flag=value` form.
pub(crate) fn has_flag(args: &[&str], names: &[&str]) -> bool {
    args.iter().any(|a| {
        names.iter().any(|n| {
            *a == *n || (n.starts_with("--") && a.strip_prefix(n).is_some_and(|r| r.starts_with('=')))
        })
    })
}

/// Value of `--flag value`, `--flag=value` or `-f value`.
pub(crate) fn flag_value<'a>(args: &[&'a str], names: &[&str]) -> Option<&'a str> {
    let mut iter = args.iter();
    while let Some(a) = iter.next() {
        for n in names {
            if *a == *n {
                return iter.next().copied();
            }
            if let Some(v) = a.strip_prefix(n).and_then(|r| r.strip_prefix('=')) {
                return Some(v);
            }
        }
    }
    None
}

/// Non-flag arguments.  Flags listed in `value_flags` consume the next word;
/// everything after `--` is positional.
pub(crate) fn positionals<'a>(args: &[&'a str], value_flags: &[&str]) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let a = args[i];
        if a == "--" {
            out.extend_from_slice(&args[i + 1..]);
            break;
        }
        if a.starts_with('-') && a.len() > 1 {
            i += if value_flags.contains(&a) { 2 } else { 1 };
            continue;
        }
        out.push(a);
        i += 1;
    }
    out
}

pub(crate) fn is_number(arg: &str) -> bool {
    !arg.is_empty() && arg.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// `NAME=value` shell assignment.
pub(crate) fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            let mut chars = name.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_letters_cluster() {
        assert_eq!(short_letters("-fn100"), Some("fn"));
        assert_eq!(short_letters("-la"), Some("la"));
        assert_eq!(short_letters("-100"), Some(""));
        assert_eq!(short_letters("--follow"), None);
        assert_eq!(short_letters("-"), None);
        assert_eq!(short_letters("file"), None);
    }

    #[test]
    fn flags_and_values() {
        let args = ["--tail=50", "-n", "prod", "app"];
        assert!(has_flag(&args, &["--tail"]));
        assert!(!has_flag(&args, &["--since"]));
        assert_eq!(flag_value(&args, &["-n", "--namespace"]), Some("prod"));
        assert_eq!(flag_value(&args, &["--tail"]), Some("50"));
    }

    #[test]
    fn positionals_skip_flag_values() {
        let args = ["-p", "2222", "-v", "host", "--", "-x"];
        assert_eq!(positionals(&args, &["-p"]), vec!["host", "-x"]);
    }

    #[test]
    fn assignments() {
        assert!(is_assignment("LANG=C"));
        assert!(is_assignment("_x1=2"));
        assert!(!is_assignment("1x=2"));
        assert!(!is_assignment("--opt=1"));
        assert!(!is_assignment("plain"));
    }
}
