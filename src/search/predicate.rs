//! Rewriting `email` predicates onto the indexed `email_rev` column
//!
//! Only `email_rev` is stored and indexed. A comparison between `email` and a
//! string literal is rewritten so the literal is reversed instead:
//!
//! ```text
//!   email = 'a@b.com'          →  email_rev = REVERSE('a@b.com')
//!   email LIKE '%@gmail.com'   →  email_rev LIKE REVERSE('%@gmail.com')
//!   'a@b.com' != email         →  REVERSE('a@b.com') != email_rev
//! ```
//!
//! A suffix match on emails becomes a prefix match on `email_rev`, which the
//! index can serve. Patterns whose elements span several characters, GLOB
//! bracket classes and LIKE with an `ESCAPE` clause, do not survive
//! reversal and are left as they are. Any other reference to `email` becomes
//! `reverse(email_rev)`, which is correct but unindexed. Text inside string
//! literals is never touched and everything between rewritten tokens is
//! copied verbatim.

use crate::error::ConfigError;

/// Logical column rewritten by this module
const EMAIL: &str = "email";

/// Stored column it maps to
const EMAIL_REV: &str = "email_rev";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Ident,
    Str,
    Op,
    Dot,
    Other,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: Kind,
    start: usize,
    end: usize,
}

/// Rewrite a predicate so email comparisons use `email_rev`
pub fn rewrite(predicate: &str) -> Result<String, ConfigError> {
    let tokens = tokenize(predicate)?;
    let text = |t: &Token| &predicate[t.start..t.end];

    let mut out = String::with_capacity(predicate.len() + 32);
    let mut copied = 0;
    let mut i = 0;

    while i < tokens.len() {
        let tok = tokens[i];
        if !is_email(predicate, &tokens, i) {
            i += 1;
            continue;
        }

        // email <op> 'literal'
        if let Some(op_len) = operator_len(predicate, &tokens[i + 1..]) {
            let op = &tokens[i + 1..i + 1 + op_len];
            let next = tokens.get(i + 2 + op_len);
            let lit = tokens
                .get(i + 1 + op_len)
                .filter(|t| t.kind == Kind::Str && reverses_cleanly(predicate, op, t, next));
            if let Some(lit) = lit {
                out.push_str(&predicate[copied..tok.start]);
                out.push_str(EMAIL_REV);
                out.push_str(&predicate[tok.end..lit.start]);
                push_reversed(&mut out, text(lit));
                copied = lit.end;
                i += 2 + op_len;
                continue;
            }
        }

        // 'literal' <op> email
        if let Some(lit_idx) = literal_before(&tokens, i, copied) {
            let lit = tokens[lit_idx];
            out.push_str(&predicate[copied..lit.start]);
            push_reversed(&mut out, text(&lit));
            out.push_str(&predicate[lit.end..tok.start]);
            out.push_str(EMAIL_REV);
            copied = tok.end;
            i += 1;
            continue;
        }

        out.push_str(&predicate[copied..tok.start]);
        out.push_str("reverse(");
        out.push_str(EMAIL_REV);
        out.push(')');
        copied = tok.end;
        i += 1;
    }

    out.push_str(&predicate[copied..]);
    Ok(out)
}

fn push_reversed(out: &mut String, literal: &str) {
    out.push_str("REVERSE(");
    out.push_str(literal);
    out.push(')');
}

/// An `email` identifier that is not qualified by or qualifying something else
fn is_email(src: &str, tokens: &[Token], i: usize) -> bool {
    let tok = tokens[i];
    if tok.kind != Kind::Ident || !ident_name(&src[tok.start..tok.end]).eq_ignore_ascii_case(EMAIL) {
        return false;
    }
    let after_dot = i > 0 && tokens[i - 1].kind == Kind::Dot;
    let before_dot = tokens.get(i + 1).is_some_and(|t| t.kind == Kind::Dot);
    !after_dot && !before_dot
}

/// Length in tokens of a comparison operator at the start of `rest`
fn operator_len(src: &str, rest: &[Token]) -> Option<usize> {
    let first = rest.first()?;
    let word = |t: &Token| src[t.start..t.end].to_ascii_uppercase();

    match first.kind {
        Kind::Op => Some(1),
        Kind::Ident => match word(first).as_str() {
            "LIKE" | "GLOB" => Some(1),
            "NOT" => match rest.get(1) {
                Some(t) if t.kind == Kind::Ident && matches!(word(t).as_str(), "LIKE" | "GLOB") => {
                    Some(2)
                }
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

/// Whether reversing `lit` as a whole yields the reversed pattern
///
/// Every element of a `%`/`_`/`*`/`?` pattern is one character, so the
/// reversed text matches the reversed values. A `[...]` class or an escape
/// pair would come out back to front.
fn reverses_cleanly(src: &str, op: &[Token], lit: &Token, next: Option<&Token>) -> bool {
    let Some(last) = op.last() else {
        return false;
    };
    match src[last.start..last.end].to_ascii_uppercase().as_str() {
        "GLOB" => !src[lit.start..lit.end].contains('['),
        "LIKE" => !next.is_some_and(|t| {
            t.kind == Kind::Ident && src[t.start..t.end].eq_ignore_ascii_case("ESCAPE")
        }),
        _ => true,
    }
}

/// Index of a not-yet-copied string literal before `email` across a comparison operator
fn literal_before(tokens: &[Token], i: usize, copied: usize) -> Option<usize> {
    let op = tokens.get(i.checked_sub(1)?)?;
    if op.kind != Kind::Op {
        return None;
    }
    let lit_idx = i.checked_sub(2)?;
    let lit = tokens[lit_idx];
    (lit.kind == Kind::Str && lit.start >= copied).then_some(lit_idx)
}

fn ident_name(raw: &str) -> &str {
    raw.trim_matches(|c| c == '`' || c == '[' || c == ']')
}

fn tokenize(src: &str) -> Result<Vec<Token>, ConfigError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        let kind = match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'\'' | b'"' => {
                i = scan_quoted(bytes, i, c).ok_or_else(|| {
                    ConfigError::InvalidQuery(format!("unterminated string starting at offset {}", start))
                })?;
                Kind::Str
            }
            b'`' | b'[' => {
                let close = if c == b'[' { b']' } else { b'`' };
                i = scan_quoted(bytes, i, close).ok_or_else(|| {
                    ConfigError::InvalidQuery(format!("unterminated identifier at offset {}", start))
                })?;
                Kind::Ident
            }
            b'=' => {
                i += if bytes.get(i + 1) == Some(&b'=') { 2 } else { 1 };
                Kind::Op
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                Kind::Op
            }
            b'<' | b'>' => {
                i += match (c, bytes.get(i + 1)) {
                    (b'<', Some(b'=' | b'>')) | (b'>', Some(b'=')) => 2,
                    _ => 1,
                };
                Kind::Op
            }
            b'.' => {
                i += 1;
                Kind::Dot
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                Kind::Ident
            }
            _ => {
                // One whole UTF-8 character
                i += src[i..].chars().next().map_or(1, char::len_utf8);
                Kind::Other
            }
        };

        tokens.push(Token { kind, start, end: i });
    }

    Ok(tokens)
}

/// End offset (exclusive) of a quoted run opened at `start`
///
/// A doubled closing quote stands for itself, as in SQL.
fn scan_quoted(bytes: &[u8], start: usize, close: u8) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b if b == close => {
                if bytes.get(i + 1) == Some(&close) && close != b']' {
                    i += 2;
                } else {
                    return Some(i + 1);
                }
            }
            _ => i += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw(input: &str) -> String {
        rewrite(input).unwrap()
    }

    #[test]
    fn test_equality_rewrite() {
        assert_eq!(rw("email = 'a@b.com'"), "email_rev = REVERSE('a@b.com')");
        assert_eq!(rw(r#"email = "a@b.com""#), r#"email_rev = REVERSE("a@b.com")"#);
        assert_eq!(rw("EMAIL='a@b.com'"), "email_rev=REVERSE('a@b.com')");
    }

    #[test]
    fn test_all_operators() {
        for op in ["=", "==", "!=", "<>", "<", "<=", ">", ">=", "LIKE", "like", "NOT LIKE", "GLOB"] {
            assert_eq!(
                rw(&format!("email {} 'x@y'", op)),
                format!("email_rev {} REVERSE('x@y')", op),
                "operator {}",
                op
            );
        }
    }

    #[test]
    fn test_literal_first() {
        assert_eq!(rw("'a@b.com' = email"), "REVERSE('a@b.com') = email_rev");
        assert_eq!(
            rw("email = 'a@b' = email"),
            "email_rev = REVERSE('a@b') = reverse(email_rev)"
        );
    }

    #[test]
    fn test_rest_of_predicate_verbatim() {
        assert_eq!(
            rw("(email LIKE '%@gmail.com' OR username = 'bob') AND password IS NOT NULL"),
            "(email_rev LIKE REVERSE('%@gmail.com') OR username = 'bob') AND password IS NOT NULL"
        );
    }

    #[test]
    fn test_literals_untouched() {
        assert_eq!(rw("username = 'email = x'"), "username = 'email = x'");
        assert_eq!(rw("password = 'it''s email'"), "password = 'it''s email'");
    }

    #[test]
    fn test_other_references_fall_back() {
        assert_eq!(rw("email IS NULL"), "reverse(email_rev) IS NULL");
        assert_eq!(
            rw("email IN ('a@b', 'c@d')"),
            "reverse(email_rev) IN ('a@b', 'c@d')"
        );
        assert_eq!(rw("length(email) > 5"), "length(reverse(email_rev)) > 5");
    }

    #[test]
    fn test_identifiers_containing_email_untouched() {
        assert_eq!(rw("email_rev = 'x'"), "email_rev = 'x'");
        assert_eq!(rw("emails = 'x'"), "emails = 'x'");
        assert_eq!(rw("r.email = 'x'"), "r.email = 'x'");
    }

    #[test]
    fn test_quoted_identifier() {
        assert_eq!(rw("`email` = 'a@b'"), "email_rev = REVERSE('a@b')");
    }

    #[test]
    fn test_glob_class_not_reversed() {
        assert_eq!(rw("email GLOB '*@[xy].com'"), "reverse(email_rev) GLOB '*@[xy].com'");
        assert_eq!(
            rw("email NOT GLOB '[a-c]*'"),
            "reverse(email_rev) NOT GLOB '[a-c]*'"
        );
        assert_eq!(rw("email GLOB '*@x.com'"), "email_rev GLOB REVERSE('*@x.com')");
    }

    #[test]
    fn test_like_escape_not_reversed() {
        assert_eq!(
            rw(r"email LIKE '%\_%' ESCAPE '\'"),
            r"reverse(email_rev) LIKE '%\_%' ESCAPE '\'"
        );
        assert_eq!(
            rw(r"email like '%!_%' escape '!' AND username = 'u'"),
            r"reverse(email_rev) like '%!_%' escape '!' AND username = 'u'"
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(rewrite("email = 'oops"), Err(ConfigError::InvalidQuery(_))));
    }
}
