mod classfile;
mod config;
mod descriptor;
mod error;
mod ir;
mod opcodes;
mod patch;
mod report;
mod rewrite;
mod rules;
mod scan;
mod transform;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::Settings;
use crate::patch::patch_inputs;
use crate::rewrite::RewriteSpec;
use crate::scan::{ScanRule, Scanner};
use crate::transform::PatternGatedTransform;

/// CLI arguments for callsite-patcher execution.
#[derive(Parser, Debug)]
#[command(
    name = "callsite-patcher",
    about = "Rule-gated call-site rewriting and call-pattern scanning for JVM class and JAR files.",
    version
)]
struct Cli {
    /// Settings file with rule lists, scan root and platform version.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Only log errors.
    #[arg(long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report archives whose classes call String.contains(CharSequence).
    Scan {
        /// Directory searched recursively for jar files.
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Platform version recorded in the report.
        #[arg(long, value_name = "VERSION")]
        mc_version: Option<String>,
        /// Scan archives on multiple threads.
        #[arg(long)]
        parallel: bool,
    },
    /// Rewrite Pattern.matcher call sites in rule-selected methods and summarize the edits.
    Patch {
        #[arg(long, value_name = "PATH")]
        input: PathBuf,
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    run(cli)
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        log::LevelFilter::Error
    } else if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    match cli.command {
        Command::Scan {
            root,
            output,
            mc_version,
            parallel,
        } => {
            let root = root.unwrap_or_else(|| settings.scan_root.clone());
            let platform_version = mc_version.unwrap_or_else(|| settings.platform_version.clone());
            let report = Scanner::new(ScanRule::string_contains())
                .parallel(parallel)
                .report(&root, &platform_version);
            write_json(output.as_deref(), &report)
        }
        Command::Patch { input, output } => {
            if !input.exists() {
                anyhow::bail!("input not found: {}", input.display());
            }
            let rules = settings.rule_set();
            if rules.is_empty() {
                log::warn!("no rule patterns configured, nothing will be rewritten");
            }
            let transform = PatternGatedTransform::new(&rules, RewriteSpec::regex_matcher()?);
            log::debug!(
                "rewriting {} -> {}",
                transform.spec().original(),
                transform.spec().replacement()
            );

            let started_at = Instant::now();
            let patched = patch_inputs(&input, &transform)?;
            log::info!(
                "patched {} of {} class(es) in {}ms",
                patched.units.len(),
                patched.class_count,
                started_at.elapsed().as_millis()
            );
            write_json(output.as_deref(), &patched)
        }
    }
}

fn write_json<T: Serialize>(output: Option<&Path>, value: &T) -> Result<()> {
    let mut writer = output_writer(output)?;
    serde_json::to_writer_pretty(&mut writer, value).context("failed to serialize output")?;
    writer.write_all(b"\n").context("failed to write output")?;
    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}
