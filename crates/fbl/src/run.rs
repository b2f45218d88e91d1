//! One CLI invocation: build the context, load plugins, run the flow, report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use console::Style;
use fbl_config::{FblConfig, TemplatesConfig};
use fbl_engine::context::assign_path;
use fbl_engine::{ActionSnapshot, Context};
use fbl_plugin::{FlowRunner, PluginLocator, core_plugin};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::Cli;
use crate::assignments;

/// Execute the flow named on the command line. `Ok(false)` means the flow
/// ran but at least one step failed.
pub async fn execute(cli: &Cli, mut config: FblConfig) -> Result<bool> {
    if cli.global_template_delimiter.is_some() || cli.local_template_delimiter.is_some() {
        config.merge(FblConfig {
            templates: Some(TemplatesConfig {
                global_delimiter: cli.global_template_delimiter,
                local_delimiter: cli.local_template_delimiter,
            }),
            ..FblConfig::default()
        });
    }
    config
        .templates
        .clone()
        .unwrap_or_default()
        .validate()?;

    let cwd = std::env::current_dir().context("cannot determine the working directory")?;
    let context = build_context(cli, &config, &cwd)?;

    let mut runner = FlowRunner::new(PluginLocator::with_defaults())
        .allow_unsafe_plugins(cli.unsafe_plugins || config.allow_unsafe_plugins())
        .allow_unsafe_flows(cli.unsafe_flows || config.allow_unsafe_flows());
    runner.register_plugin(Arc::new(core_plugin()));

    let configured = config
        .plugins
        .as_ref()
        .map(|p| p.load.clone())
        .unwrap_or_default();
    for name in configured.iter().chain(&cli.plugins) {
        let plugin = runner
            .locator()
            .locate(name, &cwd)
            .with_context(|| format!("cannot load plugin '{name}'"))?;
        runner.register_plugin(plugin);
    }

    let report = report_target(cli, &config);
    if let Some((format, _)) = &report
        && runner.reporter(format).is_none()
    {
        bail!(
            "unknown report format '{format}' (available: {})",
            runner.reporter_names().join(", ")
        );
    }

    let flow_path = cwd.join(&cli.flow);
    let text = std::fs::read_to_string(&flow_path)
        .with_context(|| format!("cannot read flow '{}'", flow_path.display()))?;
    let wd = flow_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.clone());

    info!(flow = %flow_path.display(), "running flow");
    let snapshot = runner.run_text(&wd, &text, context).await?;

    if let Some((format, output)) = report {
        let reporter = runner
            .reporter(&format)
            .with_context(|| format!("unknown report format '{format}'"))?;
        let rendered = reporter.generate(&snapshot)?;
        match output {
            Some(path) => {
                let path = cwd.join(path);
                std::fs::write(&path, rendered)
                    .with_context(|| format!("cannot write report '{}'", path.display()))?;
                debug!(path = %path.display(), format = %format, "report written");
            }
            None => println!("{rendered}"),
        }
    }

    print_summary(&snapshot);
    Ok(snapshot.successful())
}

fn build_context(cli: &Cli, config: &FblConfig, cwd: &Path) -> Result<Context> {
    let (global, local) = config.delimiters();
    let mut context = Context::new().with_delimiters(global, local);

    if let Some(seed) = &config.context {
        seed_map(&mut context.variables, &seed.values)?;
        seed_map(&mut context.secrets, &seed.secrets)?;
    }
    assignments::apply_all(&cli.context, cwd, &mut context.variables)?;
    assignments::apply_all(&cli.secrets, cwd, &mut context.secrets)?;
    Ok(context)
}

fn seed_map<'a>(
    target: &mut Map<String, Value>,
    values: impl IntoIterator<Item = (&'a String, &'a Value)>,
) -> Result<()> {
    for (key, value) in values {
        assign_path(target, key, value.clone(), false)
            .map_err(|e| anyhow::anyhow!("invalid context key '{key}' in configuration: {e}"))?;
    }
    Ok(())
}

/// Report format and destination. `None` when no report was requested.
///
/// The format falls back to the configuration, then to the output file's
/// extension, then to `json`.
fn report_target(cli: &Cli, config: &FblConfig) -> Option<(String, Option<PathBuf>)> {
    let report = config.report.clone().unwrap_or_default();
    let output = cli.output.clone().or(report.output);
    let format = cli.report.clone().or(report.format);

    match (format, output) {
        (None, None) => None,
        (Some(format), output) => Some((format, output)),
        (None, Some(output)) => {
            let format = match output.extension().and_then(|e| e.to_str()) {
                Some("yml" | "yaml") => "yaml",
                _ => "json",
            };
            Some((format.to_string(), Some(output)))
        }
    }
}

fn print_summary(snapshot: &ActionSnapshot) {
    let mut failures = Vec::new();
    collect_failures(snapshot, "", &mut failures);

    if failures.is_empty() {
        let green = Style::new().green().bold();
        eprintln!("{} flow completed", green.apply_to("success:"));
        return;
    }

    let red = Style::new().red().bold();
    let dim = Style::new().dim();
    eprintln!("{} flow failed", red.apply_to("failure:"));
    for (path, message) in failures {
        eprintln!("  {} {message}", dim.apply_to(format!("{path}:")));
    }
}

fn collect_failures(snapshot: &ActionSnapshot, prefix: &str, out: &mut Vec<(String, String)>) {
    let path = if prefix.is_empty() {
        snapshot.id_or_alias().to_string()
    } else {
        format!("{prefix} > {}[{}]", snapshot.id_or_alias(), snapshot.idx())
    };
    for message in snapshot.failures() {
        out.push((path.clone(), message.to_string()));
    }
    for child in snapshot.children() {
        collect_failures(child, &path, out);
    }
}
