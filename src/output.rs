use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable result printing for non-interactive runs. Doubles as the
/// silent progress sink, since stdout carries only the final JSON document.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let stdout = io::stdout();
        Self::write(&mut stdout.lock(), value)
    }

    pub fn write<W: Write, T: Serialize>(writer: &mut W, value: &T) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, value).map_err(io::Error::other)?;
        writer.write_all(b"\n")
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn writes_one_pretty_document_per_result() {
        let mut out = Vec::new();
        JsonOutput::write(&mut out, &json!({"runs": 2, "failed": 0})).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.lines().count() > 1);
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["runs"], 2);
    }
}
