use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;

use convoy::cli::{Cli, Commands, GraphFormat};
use convoy::config::{load_config, validate::validate};
use convoy::config::model::ConvoyConfig;
use convoy::identity::DeploymentIdentity;
use convoy::orchestrator::graph::ServiceGraph;
use convoy::orchestrator::spec::specs_from_config;
use convoy::orchestrator::{LifecycleSupervisor, RunParams};
use convoy::ui::summary::print_run_report;

const STARTER_CONFIG: &str = r#"# convoy deployment manifest

[deployment]
name = "telemetry"

[run]
# Seconds each service gets to stop voluntarily before it is force-killed.
grace_period_secs = 10
readiness_timeout_secs = 30
readiness_interval_ms = 500

# Environment applied to every native process.
[env]
RUST_LOG = "info"

[container.broker]
image = "eclipse-mosquitto:2"
port = 1883
ready = { type = "tcp", port = 1883 }

[process.databroker]
command = "kuksa-databroker --port 55555"
port = 55555
ready = { type = "tcp", port = 55555 }

[process.exporter]
command = "mqtt-exporter --broker $CONVOY_BROKER_URL"
depends_on = ["broker", "databroker"]
required = false
"#;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Up {
            services,
            grace_period_secs,
            port_wait_attempts,
        } => run_up(
            cli.global.config_file,
            services,
            grace_period_secs,
            port_wait_attempts,
        )
        .await,
        Commands::Validate => run_validate(cli.global.config_file),
        Commands::Graph { format } => run_graph(cli.global.config_file, format),
        Commands::Init => run_init(),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "convoy", &mut std::io::stdout());
            Ok(())
        }
    }
    .map(|_| 0)
    .unwrap_or_else(|e| {
        eprintln!("Error: {e:#}");
        1
    });

    std::process::exit(code);
}

fn resolve_config_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    let path = flag.unwrap_or_else(|| PathBuf::from("convoy.toml"));
    if !path.exists() {
        bail!(
            "config file {} not found (generate one with `convoy init`)",
            path.display()
        );
    }
    Ok(path)
}

/// Load, validate, and report diagnostics. On validation failure every
/// diagnostic is rendered before erroring out.
fn load_checked(path: &Path) -> Result<ConvoyConfig> {
    let (config, source) = load_config(path)?;
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "convoy.toml".to_string());

    if let Err(errors) = validate(&config, &source, &filename) {
        let count = errors.len();
        for err in errors {
            eprintln!("{:?}", miette::Report::new(err));
        }
        bail!("{count} configuration error(s)");
    }
    Ok(config)
}

fn build_graph(config: &ConvoyConfig, config_path: &Path, filter: &[String]) -> Result<ServiceGraph> {
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let specs = specs_from_config(config, config_dir);
    let graph = ServiceGraph::new(specs)?;
    Ok(graph.filtered(filter)?)
}

async fn run_up(
    config_file: Option<PathBuf>,
    services: Vec<String>,
    grace_period_secs: Option<u64>,
    port_wait_attempts: Option<u32>,
) -> Result<()> {
    let path = resolve_config_path(config_file)?;
    let config = load_checked(&path)?;
    let graph = build_graph(&config, &path, &services)?;
    if graph.is_empty() {
        bail!("no services to start");
    }

    let identity = DeploymentIdentity::new(&config.deployment.name, &path)
        .context("computing deployment identity")?;

    let mut params = RunParams::from_config(&config.run);
    if let Some(secs) = grace_period_secs {
        params.grace_period = std::time::Duration::from_secs(secs);
    }
    if let Some(attempts) = port_wait_attempts {
        params.port_guard.max_attempts = attempts;
    }

    let supervisor = LifecycleSupervisor::new(identity, params);
    let result = supervisor.run(graph).await;
    print_run_report(&result);

    if result.success() {
        Ok(())
    } else {
        bail!("one or more required services failed to start")
    }
}

fn run_validate(config_file: Option<PathBuf>) -> Result<()> {
    let path = resolve_config_path(config_file)?;
    let config = load_checked(&path)?;
    // The graph builder catches what per-field validation cannot.
    build_graph(&config, &path, &[])?;
    println!(
        "{}: configuration OK ({} services)",
        path.display(),
        config.process.len() + config.container.len()
    );
    Ok(())
}

fn run_graph(config_file: Option<PathBuf>, format: GraphFormat) -> Result<()> {
    let path = resolve_config_path(config_file)?;
    let config = load_checked(&path)?;
    let graph = build_graph(&config, &path, &[])?;

    match format {
        GraphFormat::Text => {
            for (position, spec) in graph.start_order().iter().enumerate() {
                let deps = if spec.depends_on.is_empty() {
                    String::new()
                } else {
                    format!("  <- {}", spec.depends_on.join(", "))
                };
                println!("{}. {} ({}){}", position + 1, spec.id, spec.kind(), deps);
            }
        }
        GraphFormat::Json => {
            let entries: Vec<serde_json::Value> = graph
                .start_order()
                .iter()
                .map(|spec| {
                    serde_json::json!({
                        "id": spec.id,
                        "kind": spec.kind().to_string(),
                        "required": spec.required,
                        "depends_on": spec.depends_on,
                        "ports": spec.ports,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}

fn run_init() -> Result<()> {
    let path = Path::new("convoy.toml");
    if path.exists() {
        bail!("convoy.toml already exists, refusing to overwrite");
    }
    std::fs::write(path, STARTER_CONFIG).context("writing convoy.toml")?;
    println!("Wrote convoy.toml -- edit it, then run `convoy up`");
    Ok(())
}
