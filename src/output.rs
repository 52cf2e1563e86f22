use std::io::{self, Write};

use serde::Serialize;

use crate::app::{BulkResult, LocateResult, ProgressEvent, ProgressSink, SearchResult};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_locate(result: &LocateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_search(result: &SearchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_bulk(result: &BulkResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr, keeping stdout free for results.
pub struct TextProgress;

impl ProgressSink for TextProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_locate(result: &LocateResult, preview: bool) {
        println!("{}", result.status_text());
        if preview {
            println!("Preview image URL: {}", result.preview_url);
        }
        for line in &result.diagnostics {
            eprintln!("  note: {line}");
        }
    }

    pub fn print_search(result: &SearchResult) {
        println!("token: {}", result.token);
        for row in &result.documents {
            println!(
                "{}  [{}]  {}  ({} images)",
                row.id,
                row.collection,
                row.title.as_deref().unwrap_or("-"),
                row.images.len()
            );
        }
    }

    pub fn print_bulk(result: &BulkResult) {
        println!("delivered {} image(s)", result.delivered.len());
        for name in &result.delivered {
            println!("  {name}");
        }
        if !result.failures.is_empty() {
            println!("failed {} image(s)", result.failures.len());
            for failure in &result.failures {
                println!(
                    "  {} {}: {}",
                    failure.document_id,
                    failure.file_name.as_deref().unwrap_or("-"),
                    failure.reason
                );
            }
        }
    }
}
