//! # cluster-run 入口
//!
//! 在一个或多个集群目标上执行同一条命令并打印汇总结果。
//!
//! 退出码：全部成功或无目标为 0，存在失败目标为 1，请求本身出错为 2。

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use tracing::{error, info};

use cluster_run::config::{ConfigManager, load_config};
use cluster_run::telemetry::init_tracing_from_config;
use cluster_run::{AggregateResult, CommandRequest, ControllerFactory, Outcome, TargetSelector};

const DESCRIPTION: &str = "Run a command on target machine(s)

Runs one shell command on every selected machine, service unit or unit of
the chosen environment and reports each target's output in order.

eg.

cluster-run -m 1 -e local \"touch /tmp/testfile\"
cluster-run -s wordpress -t 30s \"systemctl status apache2\"
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "cluster-run", version)]
#[command(about = "Run a command on remote targets")]
struct Args {
    /// Print the long description and exit
    #[arg(long)]
    description: bool,

    /// One or more machine ids
    #[arg(short = 'm', long = "machine", value_name = "ID")]
    machines: Vec<String>,

    /// One or more service names; every unit of the service is targeted
    #[arg(short = 's', long = "service", value_name = "NAME")]
    services: Vec<String>,

    /// One or more unit names
    #[arg(short = 'u', long = "unit", value_name = "NAME")]
    units: Vec<String>,

    /// Cluster environment (falls back to CLUSTER_RUN_ENV, then the configured default)
    #[arg(short = 'e', long)]
    environment: Option<String>,

    /// Per-target timeout, e.g. 500ms, 30s, 5m, 1h or bare seconds
    #[arg(short = 't', long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Configuration file or directory
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// The shell command to run
    command: Option<String>,
}

impl Args {
    fn selector(&self) -> TargetSelector {
        TargetSelector {
            machines: self.machines.clone(),
            services: self.services.clone(),
            units: self.units.clone(),
        }
    }

    fn request(&self) -> Result<CommandRequest> {
        let command = self
            .command
            .as_deref()
            .ok_or_else(|| anyhow!("no commands specified"))?;

        let selector = self.selector();
        if selector.is_empty() {
            bail!("you must specify a target with --machine, --service or --unit");
        }

        let mut request = CommandRequest::new(command).with_targets(selector.resolve()?);
        if let Some(timeout) = self.timeout {
            request = request.with_timeout(timeout);
        }
        request.validate()?;
        Ok(request)
    }
}

/// 解析时长：`500ms`、`30s`、`5m`、`1h` 或不带单位的秒数
fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{input}'"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(format!("invalid duration unit in '{input}'")),
    }
}

async fn run(args: Args) -> Result<AggregateResult> {
    let loaded = load_config(args.config.as_deref());
    init_tracing_from_config(loaded.as_ref().ok().map(|loaded| &loaded.config.logging));
    let loaded = loaded.context("failed to load configuration")?;
    loaded.log_origin();
    let config = loaded.config;

    let request = args.request()?;
    let environment = ConfigManager::get_environment(args.environment.as_deref(), &config);
    info!(environment = %environment, command = %request.command(), "running command");

    let dispatcher = ControllerFactory::new()?
        .dispatcher(&config, &environment)
        .with_context(|| format!("failed to load controller for environment '{environment}'"))?;

    Ok(dispatcher.dispatch(&request).await?)
}

fn print_text(out: &mut impl Write, aggregate: &AggregateResult) -> io::Result<()> {
    for result in aggregate.results() {
        match &result.outcome {
            Outcome::Success {
                exit_code,
                stdout,
                stderr,
            } => {
                writeln!(out, "{} (exit {exit_code})", result.target)?;
                write_stream(out, "stdout", stdout)?;
                write_stream(out, "stderr", stderr)?;
            }
            Outcome::Timeout => writeln!(out, "{} timed out", result.target)?,
            Outcome::TransportFailure { message } => {
                writeln!(out, "{} failed: {message}", result.target)?
            }
        }
    }
    writeln!(out, "overall: {}", aggregate.overall())
}

fn write_stream(out: &mut impl Write, name: &str, bytes: &[u8]) -> io::Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let text = String::from_utf8_lossy(bytes);
    for line in text.lines() {
        writeln!(out, "  {name}: {line}")?;
    }
    Ok(())
}

fn print_result(format: OutputFormat, aggregate: &AggregateResult) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Text => print_text(&mut out, aggregate)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, aggregate)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if args.description {
        println!("{DESCRIPTION}");
        return ExitCode::SUCCESS;
    }

    let format = args.format;
    match run(args).await {
        Ok(aggregate) => {
            if let Err(err) = print_result(format, &aggregate) {
                error!(error = %err, "failed to print results");
                return ExitCode::from(2);
            }
            if aggregate.overall().is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
