use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use k8s_restart::cli::{format_run_summary, summary_json, Cli, OutputFormat};
use k8s_restart::cluster::KubeCluster;
use k8s_restart::config::{expand_path, RunConfig};
use k8s_restart::events::TracingSink;
use k8s_restart::remote::SshRunner;
use k8s_restart::run::RunCoordinator;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = match RunConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let cluster = match connect(&cli).await {
        Ok(cluster) => cluster,
        Err(e) => {
            error!("Failed to create Kubernetes client: {:#}", e);
            process::exit(1);
        }
    };

    log_settings(&config);

    let remote = SshRunner::new(&config.ssh);
    let events = TracingSink;
    let coordinator = RunCoordinator::new(&cluster, &remote, &config, &events);

    let result = match coordinator.run().await {
        Ok(result) => result,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    match cli.output {
        OutputFormat::Text => print!("{}", format_run_summary(&result)),
        OutputFormat::Json => match summary_json(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to render summary: {}", e),
        },
    }

    process::exit(result.exit_code());
}

async fn connect(cli: &Cli) -> anyhow::Result<KubeCluster> {
    let kubeconfig = cli.kubeconfig.as_deref().map(expand_path);
    let cluster = KubeCluster::connect(kubeconfig.as_deref(), cli.context.as_deref())
        .await
        .with_context(|| match &kubeconfig {
            Some(path) => format!("using kubeconfig {}", path.display()),
            None => "using default kubeconfig".to_string(),
        })?;
    Ok(cluster)
}

fn log_settings(config: &RunConfig) {
    info!(command = %config.reboot_command, "Reboot command");
    info!(opts = %config.ssh.options.join(" "), "SSH options");
    if let Some(key) = &config.ssh.identity_file {
        info!(path = %key.display(), "SSH identity file");
    }
    info!(
        enabled = config.reboot_verification_required,
        "Require reboot verification"
    );
    if config.all_nodes {
        info!(
            exclude_control_plane = config.exclude_control_plane,
            "Processing all nodes"
        );
    }
}
