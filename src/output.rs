use std::io::{self, Write};

use serde::Serialize;

use crate::batch::{BatchResult, ProgressEvent, ProgressSink};
use crate::domain::ObjectKey;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_keys(keys: &[ObjectKey]) -> io::Result<()> {
        Self::print_json(&keys)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Line-per-retrieval progress on the terminal.
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_keys(keys: &[ObjectKey]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for key in keys {
            writeln!(stdout, "{key}")?;
        }
        Ok(())
    }

    pub fn print_summary(result: &BatchResult) {
        let green = "\x1b[32m";
        let red = "\x1b[31m";
        let cyan = "\x1b[36m";
        let reset = "\x1b[0m";

        println!("{cyan}clip-harvest summary{reset}");
        println!(
            "{green}retrieved {} of {} objects ({} bytes){reset}",
            result.succeeded, result.total, result.bytes
        );
        if result.failed > 0 {
            println!("{red}failed: {}{reset}", result.failed);
            for failure in &result.failures {
                println!("{red}  {} [{:?}] {}{reset}", failure.key, failure.kind, failure.message);
            }
        }
        println!("took: {:.6} seconds", result.elapsed_secs);
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        if event.failed {
            eprintln!("{}", event.message);
        } else {
            println!("{}", event.message);
        }
    }
}
