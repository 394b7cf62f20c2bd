//! dnncheck binary.

use std::io;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use console::style;
use dnncheck_common::eltwise::Alg;
use dnncheck_common::{ConfigLoader, DataType, HarnessConfig};
use dnncheck_drivers::BenchContext;
use dnncheck_kernels::Engine;
use dnncheck_kernels::NativeEngine;
use tracing::error;

use dnncheck_cli::args::{Cli, Commands, ConfigAction};
use dnncheck_cli::{EXIT_FAILED, EXIT_SUCCESS, EXIT_USAGE, Report, batch, exit_code, init_thread_pool, logging, runner};

fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            std::process::exit(EXIT_USAGE);
        }
    };
    if let Err(e) = logging::setup_logging(&config.logging) {
        eprintln!("{} {e:#}", style("error:").red().bold());
        std::process::exit(EXIT_USAGE);
    }

    match run(&cli, config) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("command failed: {e}");
            for cause in e.chain().skip(1) {
                error!("  caused by: {cause}");
            }
            std::process::exit(EXIT_FAILED);
        }
    }
}

fn run(cli: &Cli, config: HarnessConfig) -> Result<i32> {
    match &cli.command {
        Some(Commands::Lnorm(args)) => {
            let problems = batch::lnorm_problems(args)?;
            run_cases(cli, config, |ctx, report, out| runner::run_lnorm(ctx, &problems, report, out))
        }
        Some(Commands::Eltwise(args)) => {
            let problems = batch::eltwise_problems(args)?;
            run_cases(cli, config, |ctx, report, out| runner::run_eltwise(ctx, &problems, args.graph, report, out))
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, &config)?;
            Ok(EXIT_SUCCESS)
        }
        Some(Commands::Info) => {
            show_info(&config);
            Ok(EXIT_SUCCESS)
        }
        None => {
            Cli::command().print_help()?;
            Ok(EXIT_USAGE)
        }
    }
}

fn run_cases(
    cli: &Cli,
    config: HarnessConfig,
    body: impl FnOnce(&BenchContext, &mut Report, &mut io::StdoutLock<'static>) -> Result<()>,
) -> Result<i32> {
    init_thread_pool(&config)?;
    let ctx = BenchContext::new(config);
    let mut report = Report::default();
    let mut out = io::stdout().lock();
    body(&ctx, &mut report, &mut out)?;
    drop(out);

    report.print_summary();
    if let Some(path) = &cli.report {
        report.write_json(path)?;
    }
    Ok(exit_code(&report.summary))
}

fn handle_config_command(action: &ConfigAction, config: &HarnessConfig) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let text = toml::to_string_pretty(config).context("failed to serialize configuration")?;
            println!("{text}");
        }
        ConfigAction::Path => {
            println!("{}", ConfigLoader::default_path().display());
        }
    }
    Ok(())
}

fn show_info(config: &HarnessConfig) {
    let engine = NativeEngine::new();
    println!("{}", style("dnncheck").bold().cyan());
    println!();

    println!("{}", style("Version:").bold());
    println!("  dnncheck: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("{}", style("System:").bold());
    println!("  OS: {}", std::env::consts::OS);
    println!("  Architecture: {}", std::env::consts::ARCH);
    println!("  CPU cores: {}", num_cpus::get());
    let threads = config.run.num_threads.map_or_else(|| "one per core".to_string(), |n| n.to_string());
    println!("  Worker threads: {threads}");
    println!();

    println!("{}", style("Engine:").bold());
    println!("  name: {}", engine.name());
    println!("  available: {}", if engine.is_available() { style("yes").green() } else { style("no").red() });
    println!();

    println!("{}", style("Data types:").bold());
    let dts: Vec<&str> = DataType::ALL.iter().map(|dt| dt.as_str()).collect();
    println!("  {}", dts.join(", "));
    println!();

    println!("{}", style("Eltwise algorithms:").bold());
    let algs: Vec<&str> = Alg::ALL.iter().map(|alg| alg.as_str()).collect();
    println!("  {}", algs.join(", "));
}
