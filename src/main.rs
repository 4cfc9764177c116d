// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod bridge;
mod cli;
pub mod config;
mod kubernetes;
mod output;
pub mod progress;
mod query;
mod resources;
mod selector;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::process::ExitCode;
use std::rc::Rc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use bridge::error::describe;
use cli::Args;
use cli::repl::{self, ReplOptions};
use config::Config;
use kubernetes::KubeCluster;
use session::{FATAL_EXIT_CODE, Session, guard};

/// Initialize logging with file output and optional stderr
fn init_logging(verbose: bool, to_stderr: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // Rotate daily or at 10MB, keeping 5 files
    let log_path = log_dir.join("kubelua.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024);

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    let (non_blocking, _guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(_guard);

    let filter = if verbose { "kubelua=debug" } else { "kubelua=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if to_stderr && verbose {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

/// `--namespace`, then the config file, then the context's namespace
fn initial_namespace(args: &Args, config: &Config, cluster: &KubeCluster) -> String {
    args.namespace
        .clone()
        .or_else(|| config.namespace.clone())
        .unwrap_or_else(|| cluster.default_namespace().to_string())
}

fn connect(args: &Args) -> Result<KubeCluster> {
    if args.is_batch() {
        return KubeCluster::connect(args.context.as_deref());
    }
    let target = args.context.as_deref().unwrap_or("current context");
    let spinner = progress::create_spinner(&format!("Connecting to {}...", target));
    let result = KubeCluster::connect(args.context.as_deref());
    spinner.finish_and_clear();
    result
}

fn run(args: &Args) -> Result<ExitCode> {
    let config = Config::load()?;
    let cluster = connect(args)?;
    let namespace = initial_namespace(args, &config, &cluster);
    let number_mode = args.number_mode.unwrap_or(config.number_mode);
    let context = cluster.context().to_string();
    info!(context = %context, namespace = %namespace, ?number_mode, "Starting session");

    let session = Session::new(Rc::new(cluster), &namespace, number_mode)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("Failed to initialize the Lua session")?;

    if args.is_batch() {
        return Ok(run_batch(&session, args));
    }

    let options = ReplOptions {
        context,
        output: args.output.clone(),
        history_path: Config::history_path().ok(),
        history_size: config.history_size,
    };
    match repl::run_repl(Rc::new(session), options)? {
        Some(_) => Ok(ExitCode::from(FATAL_EXIT_CODE as u8)),
        None => Ok(ExitCode::SUCCESS),
    }
}

/// `-e` and `-f`: evaluate, print the results and exit
fn run_batch(session: &Session, args: &Args) -> ExitCode {
    let outcome = guard(|| -> Result<Vec<String>> {
        let values = match (&args.eval, &args.file) {
            (Some(chunk), _) => session
                .eval(chunk, "=eval")
                .map_err(|e| anyhow::anyhow!(describe(&e)))?,
            (None, Some(path)) => session.exec_file(path)?,
            (None, None) => return Ok(Vec::new()),
        };
        session
            .render(&values, &args.output)
            .map_err(|e| anyhow::anyhow!(e.to_string()))
    });

    match outcome {
        Ok(Ok(lines)) => {
            for line in lines {
                println!("{}", line);
            }
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
        Err(signal) => {
            eprintln!("{} {}", style("Fatal:").red().bold(), signal.0);
            ExitCode::from(FATAL_EXIT_CODE as u8)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Always log to file; batch mode with -v also logs to stderr
    init_logging(args.verbose, args.is_batch() && args.verbose);

    // Install rustls crypto provider (aws-lc-rs)
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
