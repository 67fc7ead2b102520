//! Shell quoting for generated pipeline commands.

/// Quote `value` for POSIX shells.
///
/// Values made only of safe characters are returned unchanged so generated
/// commands stay readable.
pub fn quote(value: &str) -> String {
    let plain = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-' | ':' | '@' | '=')
    };
    let safe = !value.is_empty() && value.chars().all(plain);
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Double-quote `value`, leaving `$VAR` expansion intact.
pub fn double_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_values_are_bare() {
        assert_eq!(quote("/app/dev/EcrTag"), "/app/dev/EcrTag");
        assert_eq!(quote("none"), "none");
    }

    #[test]
    fn unsafe_values_are_single_quoted() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn double_quote_keeps_expansion() {
        assert_eq!(double_quote("$STAGE"), "\"$STAGE\"");
        assert_eq!(double_quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }
}
