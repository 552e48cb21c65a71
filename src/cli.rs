use std::env;
use std::path::PathBuf;

use ado_export_core::cleanup::RetryPolicy;
use ado_export_core::config::ExportSettings;
use ado_export_core::export::{run_export, ExportPlan};
use ado_export_core::git::GitCli;
use ado_export_core::report::XlsxReport;
use ado_export_core::report_path::unique_report_path;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use tracing::{info, warn};

use crate::client::AzureDevOpsClient;
use crate::load_config::load_config;

/// Environment variable holding a personal access token when `--accesstoken` is not given.
pub const TOKEN_ENV: &str = "AZURE_DEVOPS_EXT_PAT";

/// Export work items, pipelines and repositories of an Azure DevOps project to a spreadsheet.
#[derive(Parser, Debug)]
#[clap(
    name = "ado-export",
    version,
    about = "Export work items, pipelines and repositories of an Azure DevOps project to an .xlsx report"
)]
pub struct Cli {
    /// Organization or collection url, e.g. https://dev.azure.com/fabrikam
    #[clap(long)]
    pub address: String,

    /// Personal access token. Falls back to AZURE_DEVOPS_EXT_PAT. Without a token the
    /// connection is anonymous and login fails; integrated Windows credentials are not supported.
    #[clap(long)]
    pub accesstoken: Option<String>,

    /// Name of the team project to export
    #[clap(long)]
    pub teamproject: String,

    /// Folder for the report. Defaults to the current directory.
    #[clap(long)]
    pub output: Option<PathBuf>,

    /// Only export work items changed on or after this date (YYYY-MM-DD)
    #[clap(long, value_parser = parse_limit_date)]
    pub limit: Option<NaiveDate>,

    /// Optional YAML settings file
    #[clap(long)]
    pub config: Option<PathBuf>,
}

pub fn parse_limit_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| format!("expected a date as YYYY-MM-DD, got {value:?}: {e}"))
}

fn resolve_token(flag: Option<String>) -> Option<String> {
    flag.filter(|t| !t.is_empty())
        .or_else(|| env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()))
}

/// Runs one export and returns the path of the written report.
pub async fn run(cli: Cli) -> Result<PathBuf> {
    info!(address = %cli.address, project = %cli.teamproject, limit = ?cli.limit, "Starting export");

    let settings = match &cli.config {
        Some(path) => load_config(path)?,
        None => ExportSettings::default(),
    };

    let output_dir = match cli.output {
        Some(dir) => dir,
        None => env::current_dir().context("Cannot determine the current directory")?,
    };
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Cannot create output folder {}", output_dir.display()))?;

    let token = resolve_token(cli.accesstoken);
    if token.is_none() {
        warn!("No access token given, connecting with anonymous credentials");
    }

    let client = AzureDevOpsClient::connect(
        &cli.address,
        token.clone(),
        settings.enumeration.too_many_results_marker.clone(),
    )
    .await
    .with_context(|| format!("Unable to connect to {}", cli.address))?;

    let git = GitCli::new(
        env::temp_dir().join("ado-export"),
        token.as_deref(),
        RetryPolicy::from(settings.cleanup.clone()),
    );
    let mut report = XlsxReport::new()?;
    let plan = ExportPlan {
        passes: settings.passes.clone(),
        ..ExportPlan::new(cli.teamproject.clone(), cli.limit)
    };

    let result = run_export(&client, &git, &mut report, &plan, &settings).await;

    for outcome in git.cleanup().finish().await {
        if !outcome.is_removed() {
            warn!(?outcome, "Clone directory left behind");
        }
    }

    let summary = result.with_context(|| format!("Export of {} failed", cli.teamproject))?;
    let path = unique_report_path(&output_dir, &cli.teamproject);
    report
        .save(&path)
        .with_context(|| format!("Cannot save report to {}", path.display()))?;
    info!(path = %path.display(), ?summary, "Report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serial_test::serial;

    #[test]
    fn limit_accepts_iso_dates_only() {
        assert_eq!(
            parse_limit_date("2023-07-15"),
            Ok(NaiveDate::from_ymd_opt(2023, 7, 15).unwrap())
        );
        assert!(parse_limit_date("15/07/2023").is_err());
        assert!(parse_limit_date("2023-02-30").is_err());
    }

    #[test]
    fn parses_all_flags() {
        let cli = Cli::try_parse_from([
            "ado-export",
            "--address",
            "https://dev.azure.com/fabrikam",
            "--accesstoken",
            "pat",
            "--teamproject",
            "Fiber",
            "--limit",
            "2024-01-01",
            "--output",
            "/tmp/reports",
        ])
        .unwrap();
        assert_eq!(cli.teamproject, "Fiber");
        assert_eq!(cli.limit, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(cli.output, Some(PathBuf::from("/tmp/reports")));
        assert!(cli.config.is_none());
    }

    #[test]
    fn token_help_says_anonymous_login_fails() {
        let command = Cli::command();
        let help = command
            .get_arguments()
            .find(|arg| arg.get_id() == "accesstoken")
            .and_then(|arg| arg.get_help())
            .map(|help| help.to_string())
            .unwrap();
        assert!(help.contains("anonymous"));
        assert!(help.contains("integrated Windows credentials are not supported"));
    }

    #[test]
    fn project_and_address_are_required() {
        assert!(Cli::try_parse_from(["ado-export", "--teamproject", "Fiber"]).is_err());
        assert!(Cli::try_parse_from(["ado-export", "--address", "https://x"]).is_err());
    }

    #[test]
    #[serial]
    fn token_falls_back_to_environment() {
        env::set_var(TOKEN_ENV, "from-env");
        assert_eq!(resolve_token(None).as_deref(), Some("from-env"));
        assert_eq!(resolve_token(Some("flag".into())).as_deref(), Some("flag"));
        assert_eq!(resolve_token(Some(String::new())).as_deref(), Some("from-env"));
        env::remove_var(TOKEN_ENV);
        assert_eq!(resolve_token(None), None);
    }
}
