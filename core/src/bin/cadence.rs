/// Cadence CLI
///
/// Evaluates workflow expressions and conditions on the pooled script engine
/// from the command line. Useful for checking a condition before wiring it into
/// a workflow definition.

use cadence_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
