//! Output formats for search results

use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::str::FromStr;

/// How each result record is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Tab-separated values, NULL as empty
    #[default]
    Text,
    /// One JSON object per line, keys in column order
    JsonLines,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" | "tsv" => Ok(OutputFormat::Text),
            "jsonl" | "json" | "ndjson" => Ok(OutputFormat::JsonLines),
            _ => Err(ConfigError::UnknownOutputFormat(s.to_string())),
        }
    }
}

impl OutputFormat {
    pub fn formatter(self) -> Box<dyn RecordFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
        }
    }
}

/// Writes one record per call
pub trait RecordFormatter: Send + Sync {
    fn write_record(
        &self,
        out: &mut dyn Write,
        columns: &[&str],
        values: &[Option<String>],
    ) -> io::Result<()>;
}

pub struct TextFormatter;

impl RecordFormatter for TextFormatter {
    fn write_record(&self, out: &mut dyn Write, _columns: &[&str], values: &[Option<String>]) -> io::Result<()> {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                out.write_all(b"\t")?;
            }
            if let Some(value) = value {
                out.write_all(value.as_bytes())?;
            }
        }
        out.write_all(b"\n")
    }
}

pub struct JsonLinesFormatter;

impl RecordFormatter for JsonLinesFormatter {
    fn write_record(&self, out: &mut dyn Write, columns: &[&str], values: &[Option<String>]) -> io::Result<()> {
        let object: Map<String, Value> = columns
            .iter()
            .zip(values)
            .map(|(column, value)| {
                let value = value.as_ref().map_or(Value::Null, |v| Value::String(v.clone()));
                (column.to_string(), value)
            })
            .collect();

        serde_json::to_writer(&mut *out, &Value::Object(object))?;
        out.write_all(b"\n")
    }
}
