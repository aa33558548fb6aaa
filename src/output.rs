use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ConversionReport, PlanReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(result: &ConversionReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_plan(result: &PlanReport) -> io::Result<()> {
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

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::app::ProgressEvent) {}
}
