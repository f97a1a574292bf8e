//! On-disk formats shared by map and reduce tasks.
//!
//! Intermediate files hold one JSON-encoded [`KeyValue`] per line, escaped
//! the way Go's `encoding/json` escapes strings so that files are
//! byte-compatible with Go workers. Every file is written to a temporary sibling and renamed into place, so a
//! re-executed task replaces its earlier output in one step and two
//! attempts racing each other never interleave.

use anyhow::{Context, Result};
use std::fs::{self, File};
use serde::Serialize;
use serde_json::ser::{CharEscape, CompactFormatter, Formatter, Serializer};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::task::TaskId;
use crate::KeyValue;

/// `<map task>-<partition>`
pub fn intermediate_path(dir: &Path, task: TaskId, partition: u32) -> PathBuf {
    dir.join(format!("{task}-{partition}"))
}

/// `mr-out-<partition>`
pub fn output_path(dir: &Path, partition: u32) -> PathBuf {
    dir.join(format!("mr-out-{partition}"))
}

/// Write a file through a temporary sibling and an atomic rename.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create a temporary file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.persist(path)
        .with_context(|| format!("failed to move output into {}", path.display()))?;
    Ok(())
}

/// Compact JSON that additionally escapes `<`, `>`, `&`, U+2028 and U+2029
/// and spells backspace and form feed as `\u00XX`, like Go's encoder.
struct GoCompatFormatter;

impl Formatter for GoCompatFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            let escaped: &[u8] = match c {
                '<' => b"\\u003c",
                '>' => b"\\u003e",
                '&' => b"\\u0026",
                '\u{2028}' => b"\\u2028",
                '\u{2029}' => b"\\u2029",
                _ => continue,
            };
            writer.write_all(fragment[start..i].as_bytes())?;
            writer.write_all(escaped)?;
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }

    fn write_char_escape<W>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        match char_escape {
            CharEscape::Backspace => writer.write_all(b"\\u0008"),
            CharEscape::FormFeed => writer.write_all(b"\\u000c"),
            other => CompactFormatter.write_char_escape(writer, other),
        }
    }
}

pub fn write_records(path: &Path, records: &[KeyValue]) -> Result<()> {
    write_atomically(path, |writer| {
        for kv in records {
            let mut ser = Serializer::with_formatter(&mut *writer, GoCompatFormatter);
            kv.serialize(&mut ser)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    })
}

pub fn read_records(path: &Path) -> Result<Vec<KeyValue>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let kv = serde_json::from_str(&line).with_context(|| {
            format!("bad record at {}:{}", path.display(), line_no + 1)
        })?;
        records.push(kv);
    }
    Ok(records)
}
