#![cfg(not(tarpaulin_include))]

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tablewalk::loader;
use tablewalk::preview::{DEFAULT_ROW_CAP, Preview, PreviewOptions};
use tracing_subscriber::EnvFilter;

/// Print the preview table for a CSV or XLSX file.
#[derive(Parser, Debug)]
#[command(name = "preview")]
struct Cli {
    file: PathBuf,

    /// Rows to show; 0 shows every row
    #[arg(short, long, default_value_t = DEFAULT_ROW_CAP)]
    rows: usize,

    /// Text printed in place of missing values
    #[arg(short, long)]
    placeholder: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dataset = match loader::load_path(&cli.file) {
        Ok(dataset) => dataset,
        Err(e) => {
            eprintln!("Error: {}: {}", cli.file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let options = PreviewOptions {
        row_cap: (cli.rows > 0).then_some(cli.rows),
        missing_placeholder: cli.placeholder,
    };
    print!("{}", Preview::build(&dataset, &options).to_text());
    ExitCode::SUCCESS
}
