//! Aggregate Command

use anyhow::{Context, Result};
use apiscope_harness::{AggregateOptions, AggregateSummary, ReportAggregator};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use crate::output::{print_info, print_item, OutputFormat, TableDisplay};

#[derive(Args, Debug, Clone)]
pub struct AggregateArgs {
    /// Reports directory holding `workers/`
    #[arg(long, env = "APISCOPE_REPORTS_DIR", default_value = "reports")]
    pub reports_dir: PathBuf,

    /// Skip the HTML report
    #[arg(long)]
    pub no_html: bool,

    /// Delete worker files after merging
    #[arg(long)]
    pub clean: bool,
}

/// Summary display wrapper
#[derive(Serialize)]
pub struct SummaryDisplay {
    pub files_read: usize,
    pub files_skipped: usize,
    pub records_in: usize,
    pub duplicates: usize,
    pub records: usize,
    pub json_path: Option<String>,
    pub html_path: Option<String>,
}

fn display_path(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.display().to_string())
}

impl From<&AggregateSummary> for SummaryDisplay {
    fn from(summary: &AggregateSummary) -> Self {
        Self {
            files_read: summary.files_read,
            files_skipped: summary.files_skipped,
            records_in: summary.records_in,
            duplicates: summary.duplicates,
            records: summary.records,
            json_path: display_path(&summary.json_path),
            html_path: display_path(&summary.html_path),
        }
    }
}

impl TableDisplay for SummaryDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Files", "Skipped", "Records In", "Duplicates", "Records", "Report"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.files_read.to_string(),
            self.files_skipped.to_string(),
            self.records_in.to_string(),
            self.duplicates.to_string(),
            self.records.to_string(),
            self.json_path.clone().unwrap_or_else(|| "-".into()),
        ]
    }
}

/// Merge worker files and print the summary
pub fn aggregate(args: &AggregateArgs, format: OutputFormat) -> Result<AggregateSummary> {
    let options = AggregateOptions {
        write_html: !args.no_html,
        clean_workers: args.clean,
    };
    let summary = ReportAggregator::new(&args.reports_dir)
        .aggregate(&options)
        .with_context(|| format!("Failed to aggregate reports in {}", args.reports_dir.display()))?;

    if summary.records == 0 {
        print_info(&format!(
            "No trace records under {}",
            args.reports_dir.join("workers").display()
        ));
    }
    print_item(&SummaryDisplay::from(&summary), format);
    Ok(summary)
}

pub async fn execute(args: AggregateArgs, format: OutputFormat) -> Result<()> {
    aggregate(&args, format)?;
    Ok(())
}
