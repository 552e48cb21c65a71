use ado_export::cli::{run, Cli};
use ado_export::logging::{init_tracing, log_error_chain};
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too.
            if !e.use_stderr() {
                let _ = e.print();
                std::process::exit(0);
            }
            error!(error = %e.kind(), "Error parsing arguments");
            let _ = e.print();
            std::process::exit(2);
        }
    };

    match run(cli).await {
        Ok(path) => {
            println!("Report written to {}", path.display());
        }
        Err(e) => {
            log_error_chain("Export failed", &e);
            std::process::exit(1);
        }
    }
}
