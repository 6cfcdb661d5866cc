use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::AppResult;

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// `12345` -> `"12 345"`.
pub fn format_int(value: i64) -> String {
    let grouped = group_thousands(&value.unsigned_abs().to_string());
    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

pub fn format_count(value: usize) -> String {
    format_int(value as i64)
}

pub fn format_opt_int(value: Option<i64>) -> String {
    value.map_or_else(|| "-".to_string(), format_int)
}

/// Fixed decimals with grouped integer part, `"-"` when absent.
pub fn format_float(value: Option<f64>, decimals: usize) -> String {
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return "-".to_string();
    };
    let text = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text.as_str(), None),
    };
    let sign = if value < 0.0 && text.chars().any(|c| c != '0' && c != '.') { "-" } else { "" };
    match frac_part {
        Some(frac) => format!("{}{}.{}", sign, group_thousands(int_part), frac),
        None => format!("{}{}", sign, group_thousands(int_part)),
    }
}

/// A value already expressed in percent, one decimal.
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

pub fn format_opt_percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), format_percent)
}

/// Line-oriented Markdown builder.
#[derive(Debug, Clone, Default)]
pub struct MarkdownDoc {
    lines: Vec<String>,
}

impl MarkdownDoc {
    pub fn new(title: &str) -> Self {
        let mut doc = Self::default();
        doc.heading(1, title);
        doc
    }

    pub fn heading(&mut self, level: usize, text: &str) -> &mut Self {
        self.lines.push(format!("{} {}", "#".repeat(level.clamp(1, 6)), text));
        self.lines.push(String::new());
        self
    }

    pub fn paragraph(&mut self, text: impl Into<String>) -> &mut Self {
        self.lines.push(text.into());
        self.lines.push(String::new());
        self
    }

    pub fn bullet(&mut self, text: impl AsRef<str>) -> &mut Self {
        self.lines.push(format!("- {}", text.as_ref()));
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.lines.push(String::new());
        self
    }

    /// Pipe table. Cell text has `|` escaped so labels cannot break columns.
    pub fn table<R, C>(&mut self, headers: &[&str], rows: R) -> &mut Self
    where
        R: IntoIterator<Item = Vec<C>>,
        C: AsRef<str>,
    {
        self.lines.push(format!("| {} |", headers.join(" | ")));
        self.lines.push(format!("|{}", " --- |".repeat(headers.len())));
        for row in rows {
            let cells: Vec<String> = row.iter().map(|c| c.as_ref().replace('|', "\\|")).collect();
            self.lines.push(format!("| {} |", cells.join(" | ")));
        }
        self.lines.push(String::new());
        self
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// Writes report artefacts into one flat output directory.
pub struct ReportWriter {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl ReportWriter {
    pub fn new(dir: impl AsRef<Path>) -> AppResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, written: Vec::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn record(&mut self, path: PathBuf) -> PathBuf {
        tracing::info!("Wrote {}", path.display());
        self.written.push(path.clone());
        path
    }

    pub fn write_markdown(&mut self, name: &str, doc: &MarkdownDoc) -> AppResult<PathBuf> {
        let path = self.dir.join(name);
        fs::write(&path, doc.render())?;
        Ok(self.record(path))
    }

    pub fn write_csv<R>(&mut self, name: &str, headers: &[&str], rows: R) -> AppResult<PathBuf>
    where
        R: IntoIterator<Item = Vec<String>>,
    {
        let path = self.dir.join(name);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(headers)?;
        for row in rows {
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(self.record(path))
    }

    pub fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> AppResult<PathBuf> {
        let path = self.dir.join(name);
        let mut out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut out, value)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(self.record(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_numbers() {
        assert_eq!(format_int(0), "0");
        assert_eq!(format_int(999), "999");
        assert_eq!(format_int(1234567), "1 234 567");
        assert_eq!(format_int(-4500), "-4 500");
        assert_eq!(format_opt_int(None), "-");
        assert_eq!(format_float(Some(12345.678), 1), "12 345.7");
        assert_eq!(format_float(Some(-0.04), 1), "0.0");
        assert_eq!(format_float(Some(-1234.0), 0), "-1 234");
        assert_eq!(format_float(None, 2), "-");
        assert_eq!(format_percent(12.345), "12.3%");
    }

    #[test]
    fn test_markdown_table() {
        let mut doc = MarkdownDoc::new("Titre");
        doc.table(&["A", "B"], vec![vec!["1", "x|y"]]);
        let text = doc.render();
        assert!(text.starts_with("# Titre\n"));
        assert!(text.contains("| A | B |\n| --- | --- |\n| 1 | x\\|y |"));
    }

    #[test]
    fn test_report_writer_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ReportWriter::new(dir.path().join("out")).unwrap();

        writer
            .write_csv("t.csv", &["Nom", "Ville"], vec![vec!["A, B".to_string(), "Lyon".to_string()]])
            .unwrap();
        writer.write_json("t.json", &serde_json::json!({"tam": 1})).unwrap();
        writer.write_markdown("t.md", &MarkdownDoc::new("X")).unwrap();

        let csv = std::fs::read_to_string(dir.path().join("out/t.csv")).unwrap();
        assert_eq!(csv, "Nom,Ville\n\"A, B\",Lyon\n");
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("out/t.json")).unwrap()).unwrap();
        assert_eq!(json["tam"], 1);
        assert_eq!(writer.written().len(), 3);
    }
}
