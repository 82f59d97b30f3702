use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use plugrpc_rpc::ConfigValue;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// What a `run` session produced.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub socket: String,
    pub codec: &'static str,
    pub warnings: Vec<String>,
    pub ui: Vec<String>,
    pub artifact: ArtifactReport,
}

#[derive(Debug, Serialize)]
pub struct ArtifactReport {
    pub id: String,
    pub builder_id: String,
    pub description: String,
    pub files: Vec<String>,
    pub keep: bool,
}

pub fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let artifact = &report.artifact;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["artifact".to_string(), artifact.id.clone()])
                .add_row(vec!["builder".to_string(), artifact.builder_id.clone()])
                .add_row(vec!["description".to_string(), artifact.description.clone()])
                .add_row(vec!["files".to_string(), artifact.files.join("\n")])
                .add_row(vec!["keep".to_string(), artifact.keep.to_string()]);
            for line in &report.ui {
                table.add_row(vec!["ui".to_string(), line.clone()]);
            }
            for warning in &report.warnings {
                table.add_row(vec!["warning".to_string(), warning.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let artifact = &report.artifact;
            println!("socket={} codec={}", report.socket, report.codec);
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            for line in &report.ui {
                println!("ui: {line}");
            }
            println!(
                "artifact={} builder={} keep={}",
                artifact.id, artifact.builder_id, artifact.keep
            );
            println!("  {}", artifact.description);
            for file in &artifact.files {
                println!("  - {file}");
            }
        }
    }
}

pub fn print_value(value: &ConfigValue, format: OutputFormat) {
    let json = serde_json::Value::from(value.clone());
    match format {
        OutputFormat::Json => println!("{json}"),
        OutputFormat::Pretty => println!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KEY", "VALUE"]);
            match &json {
                serde_json::Value::Object(fields) => {
                    for (key, value) in fields {
                        table.add_row(vec![key.clone(), value.to_string()]);
                    }
                }
                other => {
                    table.add_row(vec!["value".to_string(), other.to_string()]);
                }
            }
            println!("{table}");
        }
    }
}
