//! Comparison output for regenerated signatures.

use crash_signature::SignatureResult;
use std::io::Write;

/// One crash id's worth of output.
pub struct Row {
    pub crash_id: String,
    /// The signature the crash was originally processed with, if any.
    pub old_signature: Option<String>,
    pub result: SignatureResult,
}

impl Row {
    fn old(&self) -> &str {
        self.old_signature.as_deref().unwrap_or("")
    }

    fn same(&self) -> bool {
        self.old() == self.result.signature
    }
}

pub fn write_text(out: &mut dyn Write, rows: &[Row], verbose: bool) -> std::io::Result<()> {
    for row in rows {
        writeln!(out, "Crash id: {}", row.crash_id)?;
        writeln!(out, "Original: {}", row.old())?;
        writeln!(out, "New:      {}", row.result.signature)?;
        writeln!(out, "Same?:    {}", row.same())?;
        if verbose {
            for note in &row.result.notes {
                writeln!(out, "Note:     {note}")?;
            }
            for line in &row.result.debug_log {
                writeln!(out, "Debug:    {line}")?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_csv(out: &mut dyn Write, rows: &[Row]) -> std::io::Result<()> {
    writeln!(out, "crashid,old,new,same")?;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{}",
            csv_escape(&row.crash_id),
            csv_escape(row.old()),
            csv_escape(&row.result.signature),
            row.same()
        )?;
    }
    Ok(())
}

pub fn write_markdown(out: &mut dyn Write, rows: &[Row]) -> std::io::Result<()> {
    writeln!(out, "| crashid | old | new | same |")?;
    writeln!(out, "| --- | --- | --- | --- |")?;
    for row in rows {
        writeln!(
            out,
            "| {} | {} | {} | {} |",
            markdown_escape(&row.crash_id),
            markdown_escape(row.old()),
            markdown_escape(&row.result.signature),
            row.same()
        )?;
    }
    Ok(())
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn markdown_escape(value: &str) -> String {
    value.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(crash_id: &str, old: Option<&str>, new: &str) -> Row {
        let mut result = SignatureResult::default();
        result.set_signature("test", new);
        Row {
            crash_id: crash_id.to_string(),
            old_signature: old.map(str::to_string),
            result,
        }
    }

    #[test]
    fn text_output() {
        let rows = vec![row("id-1", Some("old | sig"), "new | sig")];
        let mut out = Vec::new();
        write_text(&mut out, &rows, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Crash id: id-1"));
        assert!(text.contains("Original: old | sig"));
        assert!(text.contains("New:      new | sig"));
        assert!(text.contains("Same?:    false"));
    }

    #[test]
    fn csv_output_escapes() {
        let rows = vec![row("id-1", Some("has, comma"), "has \"quote\"")];
        let mut out = Vec::new();
        write_csv(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("crashid,old,new,same\n"));
        assert!(text.contains("\"has, comma\""));
        assert!(text.contains("\"has \"\"quote\"\"\""));
    }

    #[test]
    fn markdown_output_escapes_pipes() {
        let rows = vec![row("id-1", Some("a | b"), "c | d")];
        let mut out = Vec::new();
        write_markdown(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("| a \\| b | c \\| d |"));
    }
}
