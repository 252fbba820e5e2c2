//! Normalized record type and the batch-file line format
//!
//! A [`Record`] is one parsed input line. It lives only long enough to be
//! encoded into a tab-separated batch line and handed to the rotating writer.
//!
//! Emails are stored reversed (`email_rev`) because the store only indexes the
//! reversed column, which turns domain (suffix) searches into prefix searches.

/// Columns of a batch line, in the order the bulk loader inserts them
pub const BATCH_COLUMNS: &[&str] = &[
    "source_id",
    "username",
    "email_rev",
    "hash",
    "password",
    "extra",
];

/// A single normalized row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Free-text provenance label (file or archive member path)
    pub source: String,

    /// Interned id for `source`, resolved after parsing
    pub source_id: Option<i64>,

    pub username: Option<String>,
    pub email: Option<String>,
    pub email_rev: Option<String>,
    pub hash: Option<String>,
    pub password: Option<String>,

    /// Data that does not fit another column (password hints etc.)
    pub extra: Option<String>,
}

impl Record {
    /// Create an empty record for the given source label
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Fill whichever of `email`/`email_rev` is missing from the other
    ///
    /// If both are set they are left alone; the parser decided.
    pub fn derive_email_fields(&mut self) {
        match (&self.email, &self.email_rev) {
            (Some(email), None) => self.email_rev = Some(reverse(email)),
            (None, Some(rev)) => self.email = Some(reverse(rev)),
            _ => {}
        }
    }

    /// Encode as one tab-separated batch line (newline-terminated)
    ///
    /// The first column is the interned source id when known, otherwise the
    /// raw source label (used by `process`, which never touches a store).
    pub fn to_batch_line(&self) -> String {
        let source = match self.source_id {
            Some(id) => id.to_string(),
            None => self.source.clone(),
        };

        let email_rev = match (&self.email_rev, &self.email) {
            (Some(rev), _) => rev.clone(),
            (None, Some(email)) => reverse(email),
            (None, None) => String::new(),
        };

        let fields = [
            source.as_str(),
            self.username.as_deref().unwrap_or(""),
            email_rev.as_str(),
            self.hash.as_deref().unwrap_or(""),
            self.password.as_deref().unwrap_or(""),
            self.extra.as_deref().unwrap_or(""),
        ];

        let mut line = String::with_capacity(fields.iter().map(|f| f.len() + 1).sum());
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            escape_field_into(field, &mut line);
        }
        line.push('\n');
        line
    }
}

/// Reverse a string by characters
///
/// `reverse(reverse(s)) == s` for every valid string. The SQL `reverse()`
/// function registered on store connections uses this same routine.
pub fn reverse(s: &str) -> String {
    s.chars().rev().collect()
}

/// Escape backslash, tab, newline and carriage return for a batch field
pub fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    escape_field_into(field, &mut out);
    out
}

fn escape_field_into(field: &str, out: &mut String) {
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

/// Undo [`escape_field`]
///
/// Unknown escape sequences are kept verbatim.
pub fn unescape_field(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
