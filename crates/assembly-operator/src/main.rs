//! # assembly-operator
//!
//! Watches `Assembly` resources and reconciles them against LM.
//!
//! ## Usage
//!
//! ```bash
//! # Run the controller (settings from ASSEMBLY_OPERATOR_* and LM_* variables)
//! assembly-operator run
//!
//! # Print the CustomResourceDefinition
//! assembly-operator crd | kubectl apply -f -
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, CustomResourceExt};

use assembly_lm::{LmApi, LmClient, LmConfig};
use assembly_operator::metrics::{OperatorMetrics, init_metrics, serve_metrics};
use assembly_operator::observability::{LogFormat, init_logging};
use assembly_operator::store::kube::KubeAssemblyStore;
use assembly_operator::{
    Assembly, AssemblyReconciler, AssemblyStore, Error, ObjectKey, OperatorConfig,
    RequeueDirective,
};

/// Assembly operator.
#[derive(Debug, Parser)]
#[command(name = "assembly-operator")]
#[command(about = "Reconciles Assembly resources against the lifecycle manager")]
#[command(version)]
struct Args {
    /// Log output format; overrides `ASSEMBLY_OPERATOR_LOG_FORMAT`.
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the controller.
    Run {
        /// Namespace to watch; overrides `ASSEMBLY_OPERATOR_NAMESPACE`.
        #[arg(long)]
        namespace: Option<String>,

        /// LM settings file; overrides `ASSEMBLY_OPERATOR_LM_CONFIG`.
        #[arg(long)]
        lm_config: Option<PathBuf>,
    },

    /// Print the Assembly CustomResourceDefinition as YAML.
    Crd,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Crd => {
            let crd = serde_yaml::to_string(&Assembly::crd()).context("failed to render CRD")?;
            print!("{crd}");
            Ok(())
        }
        Commands::Run {
            namespace,
            lm_config,
        } => {
            let mut config = OperatorConfig::from_env()?;
            if let Some(format) = args.log_format {
                config.log_format = format;
            }
            if namespace.is_some() {
                config.namespace = namespace;
            }
            if let Some(path) = lm_config {
                config.lm_config_path = path;
            }
            run(config).await
        }
    }
}

async fn run(config: OperatorConfig) -> Result<()> {
    init_logging(config.log_format);
    tracing::info!(
        namespace = config.namespace.as_deref().unwrap_or("*"),
        lm_config = %config.lm_config_path.display(),
        process_poll_secs = config.process_poll_interval.as_secs(),
        error_requeue_secs = config.error_requeue_interval.as_secs(),
        metrics_addr = %config.metrics_addr,
        "starting assembly operator"
    );

    init_metrics().context("failed to initialize metrics")?;
    let listener = tokio::net::TcpListener::bind(config.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", config.metrics_addr))?;
    let metrics_app = Router::new().route("/metrics", get(serve_metrics));
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, metrics_app).await {
            tracing::error!(error = %err, "metrics server stopped");
        }
    });

    let lm_config = LmConfig::load(Some(&config.lm_config_path))
        .context("failed to load LM configuration")?;
    tracing::info!(base = %lm_config.base, secure = lm_config.secure, "connecting to LM");
    let lm: Arc<dyn LmApi> = Arc::new(LmClient::new(lm_config)?);

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let api: Api<Assembly> = match config.namespace.as_deref() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };
    let store: Arc<dyn AssemblyStore> = Arc::new(KubeAssemblyStore::new(client));
    let reconciler = Arc::new(AssemblyReconciler::with_metrics(
        lm,
        store,
        config.engine_settings(),
        OperatorMetrics::new(),
    ));

    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    tracing::debug!(resource = %object.name, ?action, "reconciled");
                }
                Err(err) => tracing::warn!(error = %err, "reconcile failed"),
            }
        })
        .await;

    tracing::info!("assembly operator stopped");
    Ok(())
}

async fn reconcile(assembly: Arc<Assembly>, ctx: Arc<AssemblyReconciler>) -> Result<Action, Error> {
    let key = ObjectKey::for_resource(&assembly);
    let outcome = ctx.reconcile(&key).await;
    match outcome.error {
        Some(err) => Err(err),
        None => Ok(action_for(outcome.directive)),
    }
}

fn error_policy(assembly: Arc<Assembly>, err: &Error, ctx: Arc<AssemblyReconciler>) -> Action {
    let key = ObjectKey::for_resource(&assembly);
    let delay = ctx.settings().error_requeue_interval;
    tracing::warn!(resource = %key, error = %err, retry_in_secs = delay.as_secs(), "reconciliation failed");
    Action::requeue(delay)
}

fn action_for(directive: RequeueDirective) -> Action {
    if directive.requeue {
        Action::requeue(directive.requeue_after.unwrap_or(Duration::ZERO))
    } else {
        Action::await_change()
    }
}
