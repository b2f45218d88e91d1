//! fbl - declarative flow runner
//!
//! Main entry point for the fbl CLI.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use console::Style;

mod assignments;
mod logging;
mod run;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// fbl - declarative flow runner
#[derive(Parser, Debug)]
#[command(name = "fbl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Flow file to execute
    pub flow: PathBuf,

    /// Context value, KEY=VALUE (VALUE is YAML, @path loads a file, key "." merges into the root)
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,

    /// Secret value, same syntax as --context
    #[arg(short = 's', long = "secret", value_name = "KEY=VALUE")]
    pub secrets: Vec<String>,

    /// Plugin to register, by package name or path
    #[arg(short = 'p', long = "plugin", value_name = "NAME|PATH")]
    pub plugins: Vec<String>,

    /// Report format (json, yaml or one contributed by a plugin)
    #[arg(short = 'r', long = "report", value_name = "FORMAT")]
    pub report: Option<String>,

    /// Write the report to a file instead of stdout
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Continue when plugin requirements are not satisfied
    #[arg(long = "unsafe-plugins")]
    pub unsafe_plugins: bool,

    /// Continue when flow requirements are not satisfied
    #[arg(long = "unsafe-flows")]
    pub unsafe_flows: bool,

    /// Delimiter of the document-level template pass (default: $)
    #[arg(long, value_name = "CHAR")]
    pub global_template_delimiter: Option<char>,

    /// Delimiter of the per-step template pass (default: %)
    #[arg(long, value_name = "CHAR")]
    pub local_template_delimiter: Option<char>,

    /// User configuration directory
    #[arg(long, env = "FBL_CONFIG_DIR", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match fbl_config::load_config_with_options(None, cli.config_dir.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => return fail(&anyhow::Error::new(e)),
    };

    let _guard = logging::init(cli.verbose, loaded.config.logging.as_ref());
    for warning in &loaded.warnings {
        tracing::warn!(warning = %warning, "configuration");
    }
    for layer in loaded.loaded() {
        tracing::debug!(layer = %layer.kind, path = %layer.path.display(), "loaded configuration");
    }

    match run::execute(&cli, loaded.config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => fail(&e),
    }
}

fn fail(error: &anyhow::Error) -> ExitCode {
    let red = Style::new().red().bold();
    eprintln!("{} {error:#}", red.apply_to("error:"));
    ExitCode::FAILURE
}
