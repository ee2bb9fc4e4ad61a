mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures_util::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fleet::{
    probe_all, store, Credential, Dispatcher, FleetConfig, ProcessBackend, Target, TargetRegistry,
};
use fleet_protocol::Invocation;

use crate::cli::{Args, CliCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_to_stderr)?;

    let config = FleetConfig::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    info!(
        config = %args.config.display(),
        script_dir = %config.script_dir.display(),
        "fleetctl starting"
    );

    let registry = TargetRegistry::open(config.targets_path.clone())?;
    let registry = Arc::new(RwLock::new(registry));
    let backend = Arc::new(ProcessBackend::new(
        config.script_dir.clone(),
        config.ssh_args.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), backend));

    match args.command {
        CliCommand::Add {
            name,
            address,
            principal,
            secret,
            install_path,
        } => {
            let target = Target {
                name,
                address,
                credential: Credential { principal, secret },
                install_path,
            };
            let summary = target.summary();
            registry.write().await.add(target)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        CliCommand::Remove { name } => {
            let removed = registry.write().await.remove(&name)?;
            if !removed {
                anyhow::bail!("target {name} is not registered");
            }
            println!("removed {name}");
        }
        CliCommand::List => {
            let summaries: Vec<_> = registry
                .read()
                .await
                .list()
                .iter()
                .map(Target::summary)
                .collect();
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        CliCommand::Run {
            target,
            script,
            timeout_secs,
            args,
        } => {
            let arg_string = shell_words::join(args.iter().map(String::as_str));
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.dispatch_timeout());
            let invocation = Invocation::new(target, script, arg_string, timeout);
            let result = dispatcher.dispatch(&invocation).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.succeeded {
                std::process::exit(1);
            }
        }
        CliCommand::Status => {
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
            let mut probes =
                probe_all(Arc::clone(&dispatcher), config.probe_timeout(), cancel).await;
            while let Some(probe) = probes.next().await {
                println!("{}", serde_json::to_string(&probe)?);
            }
        }
        CliCommand::Settings {
            admin_user,
            admin_pass,
            display_name,
            install_path,
        } => {
            let mut settings = store::load_settings(&config.settings_path)?;
            let changed = admin_user.is_some()
                || admin_pass.is_some()
                || display_name.is_some()
                || install_path.is_some();
            if let Some(admin_user) = admin_user {
                settings.admin_user = admin_user;
            }
            if let Some(admin_pass) = admin_pass {
                settings.admin_pass = admin_pass;
            }
            if let Some(display_name) = display_name {
                settings.display_name = display_name;
            }
            if let Some(install_path) = install_path {
                settings.install_path = install_path;
            }
            if changed {
                store::save_settings(&config.settings_path, &settings)?;
                info!("settings updated");
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "admin_user": settings.admin_user,
                    "admin_pass_set": !settings.admin_pass.is_empty(),
                    "display_name": settings.display_name,
                    "install_path": settings.install_path,
                }))?
            );
        }
    }
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    cancel.cancel();
}

fn init_tracing(log_to_stderr: bool) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    );
    if log_to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
    Ok(())
}
