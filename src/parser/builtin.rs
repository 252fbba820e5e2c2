//! Built-in parsers for common dump layouts

use super::ParserRegistry;
use crate::error::ParseError;
use crate::record::Record;
use regex::Regex;
use std::sync::LazyLock;

/// `email<sep>password` where the email must look like one
static EMAIL_PASSWORD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<email>.+@.+\..+)[:;](?P<password>.*)")
        .expect("Invalid email/password regex")
});

/// Register every built-in parser
pub fn register_all(registry: &mut ParserRegistry) {
    registry.register("email-password", email_password);
    registry.register("example", email_password);
    registry.register("collections", collections);
    registry.register("adobe", adobe);
    registry.register("regex-email-password", regex_email_password);
}

/// Split on the first `;`, then `:`, then tab
fn split_pair(line: &str) -> Option<(&str, &str)> {
    [';', ':', '\t']
        .iter()
        .find_map(|sep| line.split_once(*sep))
}

/// `email:password`, `email;password` or `email<TAB>password`
pub fn email_password(line: &str, source: &str) -> Result<Record, ParseError> {
    let (email, password) = split_pair(line).ok_or(ParseError::ColumnCount)?;

    if !email.contains('@') {
        return Err(ParseError::MissingEmail);
    }

    let mut record = Record::new(source);
    record.email = Some(email.to_string());
    record.password = Some(password.to_string());
    Ok(record)
}

/// "Collection #1"-style combo lists
///
/// Same layout as [`email_password`]; kept separately so the two can drift.
pub fn collections(line: &str, source: &str) -> Result<Record, ParseError> {
    email_password(line, source)
}

/// Adobe 2013 leak: `id-|-?-|-email_or_user-|-hash-|-hint|--`
///
/// Rows are attributed to the fixed source label `adobe`.
pub fn adobe(line: &str, _source: &str) -> Result<Record, ParseError> {
    let columns: Vec<&str> = line.split("-|-").collect();
    if columns.len() < 5 {
        return Err(ParseError::ColumnCount);
    }

    let mut record = Record::new("adobe");
    if columns[2].contains('@') {
        record.email = Some(columns[2].to_string());
    } else {
        record.username = Some(columns[2].to_string());
    }
    record.hash = Some(columns[3].to_string());
    record.extra = Some(columns[4].trim_end_matches(['-', '|']).to_string());
    Ok(record)
}

/// Regex-driven `email[:;]password`
///
/// Slower than splitting but stricter about what counts as an email. The
/// email group is greedy, so the password starts after the last `:` or `;`.
pub fn regex_email_password(line: &str, source: &str) -> Result<Record, ParseError> {
    let caps = EMAIL_PASSWORD_REGEX
        .captures(line)
        .ok_or(ParseError::NoMatch)?;

    let mut record = Record::new(source);
    record.email = caps.name("email").map(|m| m.as_str().to_string());
    record.password = caps.name("password").map(|m| m.as_str().to_string());
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_password_colon() {
        let r = email_password("alice@example.com:hash1", "dump.txt").unwrap();
        assert_eq!(r.email.as_deref(), Some("alice@example.com"));
        assert_eq!(r.password.as_deref(), Some("hash1"));
        assert_eq!(r.source, "dump.txt");
    }

    #[test]
    fn test_email_password_prefers_semicolon() {
        let r = email_password("bob@example.com;pa:ss", "s").unwrap();
        assert_eq!(r.email.as_deref(), Some("bob@example.com"));
        assert_eq!(r.password.as_deref(), Some("pa:ss"));
    }

    #[test]
    fn test_email_password_tab() {
        let r = email_password("carol@example.com\tsecret", "s").unwrap();
        assert_eq!(r.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_email_password_errors() {
        assert_eq!(email_password("malformed-line", "s"), Err(ParseError::ColumnCount));
        assert_eq!(email_password("nobody:pw", "s"), Err(ParseError::MissingEmail));
    }

    #[test]
    fn test_adobe() {
        let line = "103238704-|--|-someone@example.com-|-Wjv3J4MzHhM=-|-my dog|--";
        let r = adobe(line, "ignored").unwrap();
        assert_eq!(r.source, "adobe");
        assert_eq!(r.email.as_deref(), Some("someone@example.com"));
        assert_eq!(r.hash.as_deref(), Some("Wjv3J4MzHhM="));
        assert_eq!(r.extra.as_deref(), Some("my dog"));

        let r = adobe("1-|--|-someuser-|-abc=-|-|--", "x").unwrap();
        assert_eq!(r.username.as_deref(), Some("someuser"));
        assert_eq!(r.email, None);

        assert_eq!(adobe("1-|-2", "x"), Err(ParseError::ColumnCount));
    }

    #[test]
    fn test_regex_email_password() {
        let r = regex_email_password("carol@example.com;secret", "s").unwrap();
        assert_eq!(r.email.as_deref(), Some("carol@example.com"));
        assert_eq!(r.password.as_deref(), Some("secret"));

        let r = regex_email_password("dave@mail.example.org:pw;1", "s").unwrap();
        assert_eq!(r.email.as_deref(), Some("dave@mail.example.org:pw"));
        assert_eq!(r.password.as_deref(), Some("1"));

        assert_eq!(regex_email_password("not-an-email:pw", "s"), Err(ParseError::NoMatch));
    }
}
