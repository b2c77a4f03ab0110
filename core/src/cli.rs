use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;

use crate::init::InitBuilder;
use crate::script::Variables;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence - evaluate workflow expressions on the pooled script engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log filter when RUST_LOG is unset (overrides config)
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate an expression and print its JSON value
    Eval {
        /// Expression or short script
        expression: String,

        /// Caller variable as NAME=VALUE (VALUE is JSON, else a string)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
    },

    /// Evaluate a condition and print true or false
    Cond {
        /// Condition expression
        expression: String,

        /// Caller variable as NAME=VALUE (VALUE is JSON, else a string)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let mut init = InitBuilder::new();
    if let Some(path) = &cli.config {
        init = init.config_path(path);
    }
    if let Some(filter) = &cli.log {
        init = init.log_filter(filter);
    }
    let runtime = init.init()?;

    match cli.command {
        Commands::Eval { expression, vars } => {
            let variables = parse_vars(&vars)?;
            let value = runtime.execute_async(expression, variables).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }

        Commands::Cond { expression, vars } => {
            let variables = parse_vars(&vars)?;
            let result = runtime.evaluate_condition_async(expression, variables).await?;
            println!("{}", result);
        }
    }

    Ok(())
}

fn parse_vars(vars: &[String]) -> Result<Variables> {
    let mut variables = Variables::new();
    for var in vars {
        let (name, value) = parse_var(var)?;
        variables.insert(name, value);
    }
    Ok(variables)
}

fn parse_var(var: &str) -> Result<(String, JsonValue)> {
    let Some((name, raw)) = var.split_once('=') else {
        bail!("Invalid --var '{}': expected NAME=VALUE", var);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid --var '{}': empty name", var);
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()));
    Ok((name.to_string(), value))
}
