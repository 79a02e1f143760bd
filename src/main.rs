mod approval;
mod cli;
mod cluster;
mod config;
mod connector;
mod error;
mod machine;
mod notify;
mod reconcile;
mod ui;

use std::sync::Arc;

use clap::Parser;
use console::Style;
use tracing_subscriber::EnvFilter;

use crate::approval::{
    ApprovalEvent, ApprovalMachine, ApprovalPayload, StaticApprovalBackend, approval_table,
};
use crate::cli::{Cli, Command, RoleArg};
use crate::cluster::{ConnectClusterClient, ControlPlane, MemoryControlPlane};
use crate::config::FloodgateConfig;
use crate::error::FloodgateError;
use crate::connector::{
    ConnectorEvent, ConnectorMachine, ConnectorPayload, connector_table,
};
use crate::machine::{
    ActionExecutor, EventEmitter, JsonFileStateStore, LogEmitter, MachineSpec, MemoryEmitter,
    MemoryStateStore, StateMachine, StateStore, TransitionCoordinator,
};
use crate::notify::{LogNotifier, MemoryNotifier, Notifier};
use crate::reconcile::{ManagedConnector, Reconciler};
use crate::ui::TransitionProgress;

#[tokio::main]
async fn main() -> Result<(), FloodgateError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = FloodgateConfig::load()?;
    match cli.command {
        Command::Run => run(config).await,
        Command::Status => status(config).await,
        Command::Approve {
            requisition_id,
            operator,
            role,
            reject,
            comment,
        } => approve(config, requisition_id, operator, role, reject, comment).await,
        Command::Demo => demo().await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "floodgate=debug"
    } else {
        "floodgate=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn connector_coordinator(
    config: &FloodgateConfig,
    cluster: Arc<dyn ControlPlane>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn StateStore<ConnectorMachine>>,
    emitter: Arc<dyn EventEmitter>,
) -> Result<Arc<TransitionCoordinator<ConnectorMachine>>, FloodgateError> {
    let table = connector_table(
        cluster,
        notifier,
        config.startup_timeout(),
        config.notify_timeout(),
    )?;
    Ok(Arc::new(TransitionCoordinator::new(
        Arc::new(table),
        store,
        emitter,
        ActionExecutor::new(config.max_concurrent_actions),
    )))
}

fn managed_connectors(config: &FloodgateConfig) -> Vec<ManagedConnector> {
    config
        .connectors
        .iter()
        .map(|def| ManagedConnector {
            id: def.name.clone(),
            payload: ConnectorPayload {
                config: def.config.clone(),
                owner: def.owner.clone(),
                failure_trace: None,
            },
        })
        .collect()
}

/// Reconcile managed connectors against the cluster until interrupted.
async fn run(config: FloodgateConfig) -> Result<(), FloodgateError> {
    let cluster: Arc<dyn ControlPlane> = Arc::new(ConnectClusterClient::new(&config.cluster_url));
    let store = Arc::new(JsonFileStateStore::<ConnectorMachine>::new(&config.state_path));
    let coordinator = connector_coordinator(
        &config,
        cluster.clone(),
        Arc::new(LogNotifier),
        store,
        Arc::new(LogEmitter),
    )?;

    let connectors = managed_connectors(&config);
    tracing::info!(
        cluster = %config.cluster_url,
        connectors = connectors.len(),
        interval_secs = config.poll_interval_secs,
        "floodgate reconciler starting"
    );

    let reconciler = Reconciler::new(cluster, coordinator, connectors, config.restart_failed);
    tokio::select! {
        _ = reconciler.run(config.poll_interval()) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }
    Ok(())
}

/// Print desired (persisted) and actual (cluster) state per connector.
async fn status(config: FloodgateConfig) -> Result<(), FloodgateError> {
    let cluster = ConnectClusterClient::new(&config.cluster_url);
    let store = JsonFileStateStore::<ConnectorMachine>::new(&config.state_path);
    let bold = Style::new().bold();
    let dim = Style::new().dim();

    println!(
        "{:<28} {:<12} {}",
        bold.apply_to("CONNECTOR"),
        bold.apply_to("DESIRED"),
        bold.apply_to("ACTUAL")
    );
    for def in &config.connectors {
        let desired = store
            .load(&def.name)
            .await?
            .unwrap_or_else(ConnectorMachine::seed);
        let actual = match cluster.connector_status(&def.name).await {
            Ok(s) => format!("{:?}", s.state).to_uppercase(),
            Err(e) => dim.apply_to(e.to_string()).to_string(),
        };
        println!("{:<28} {:<12} {}", def.name, desired.to_string(), actual);
    }

    // Subjects with persisted state that are no longer in the managed set.
    let managed: std::collections::HashSet<&str> =
        config.connectors.iter().map(|d| d.name.as_str()).collect();
    for id in store.subjects().await? {
        if !managed.contains(id.as_str()) {
            let desired = store.load(&id).await?.unwrap_or_else(ConnectorMachine::seed);
            println!(
                "{:<28} {:<12} {}",
                id,
                desired.to_string(),
                dim.apply_to("not managed")
            );
        }
    }
    Ok(())
}

/// Record one approval decision through the approval machine.
async fn approve(
    config: FloodgateConfig,
    requisition_id: String,
    operator: String,
    role: RoleArg,
    reject: bool,
    comment: Option<String>,
) -> Result<(), FloodgateError> {
    let backend = Arc::new(StaticApprovalBackend::new(
        config.approvals.dba.clone(),
        config.approvals.owners.clone(),
    ));
    let table = approval_table(backend, Arc::new(LogNotifier), config.notify_timeout())?;
    let store = Arc::new(JsonFileStateStore::<ApprovalMachine>::new(
        &config.approval_state_path,
    ));
    let coordinator = Arc::new(TransitionCoordinator::new(
        Arc::new(table),
        store,
        Arc::new(LogEmitter),
        ActionExecutor::new(config.max_concurrent_actions),
    ));

    let event = match (role, reject) {
        (_, true) => ApprovalEvent::Reject,
        (RoleArg::Dba, false) => ApprovalEvent::DbaApprove,
        (RoleArg::Owner, false) => ApprovalEvent::OwnerApprove,
    };
    let payload = ApprovalPayload {
        operator: operator.clone(),
        comment,
        // Without a requisition registry the review's own account receives
        // the outcome notification.
        proposer: operator,
    };

    let machine = StateMachine::new(requisition_id, coordinator);
    let progress = TransitionProgress::start(machine.subject_id(), &event.to_string());
    match machine.fire(event, payload).await {
        Ok(state) => progress.succeeded(&state.to_string()),
        Err(e) => {
            progress.failed(&e.to_string());
            return Err(e.into());
        }
    }
    Ok(())
}

/// End-to-end demonstration of both machines against in-memory
/// collaborators: conflict absorption, lifecycle events, the approval flow,
/// and the audit trail.
async fn demo() -> Result<(), FloodgateError> {
    let config = FloodgateConfig::default();
    let heading = Style::new().cyan().bold();

    let cluster = Arc::new(MemoryControlPlane::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let emitter = Arc::new(MemoryEmitter::new());

    let connector_store = Arc::new(MemoryStateStore::<ConnectorMachine>::new());
    let connectors = connector_coordinator(
        &config,
        cluster.clone(),
        notifier.clone(),
        connector_store,
        emitter.clone(),
    )?;

    let backend = Arc::new(StaticApprovalBackend::new(
        vec!["dba.lee".into()],
        vec!["owner.kim".into()],
    ));
    let approvals = Arc::new(TransitionCoordinator::new(
        Arc::new(approval_table(
            backend.clone(),
            notifier.clone(),
            config.notify_timeout(),
        )?),
        Arc::new(MemoryStateStore::<ApprovalMachine>::new()),
        emitter.clone(),
        ActionExecutor::new(config.max_concurrent_actions),
    ));

    let payload = ConnectorPayload {
        config: serde_json::json!({"connector.class": "demo"}),
        owner: Some("owner.kim@example.com".into()),
        failure_trace: None,
    };

    println!("{}", heading.apply_to("── Connector lifecycle ──"));

    // A connector that already exists on the cluster: the duplicate create
    // is absorbed and the machine still converges to RUNNING.
    cluster.seed("orders-cdc", cluster::RemoteConnectorState::Running).await;
    let orders = StateMachine::new("orders-cdc", connectors.clone());
    let progress = TransitionProgress::start("orders-cdc", "CREATE_REQUESTED");
    progress.note("cluster already has orders-cdc; expecting conflict absorption");
    match orders.fire(ConnectorEvent::CreateRequested, payload.clone()).await {
        Ok(state) => progress.succeeded(&state.to_string()),
        Err(e) => progress.failed(&e.to_string()),
    }

    // A fresh connector: provision, confirm startup, pause, resume.
    let users = StateMachine::new("users-cdc", connectors.clone());
    for event in [
        ConnectorEvent::CreateRequested,
        ConnectorEvent::PauseRequested,
        ConnectorEvent::ResumeRequested,
    ] {
        let progress = TransitionProgress::start("users-cdc", &event.to_string());
        match users.fire(event, payload.clone()).await {
            Ok(state) => progress.succeeded(&state.to_string()),
            Err(e) => progress.failed(&e.to_string()),
        }
    }

    // A worker crash: the failure is recorded and the owner notified.
    cluster.break_connector("users-cdc").await;
    let mut failed = payload.clone();
    failed.failure_trace = Some("task 0 exited".into());
    let progress = TransitionProgress::start("users-cdc", "EXTERNAL_FAILURE_OBSERVED");
    match users.fire(ConnectorEvent::ExternalFailureObserved, failed).await {
        Ok(state) => progress.succeeded(&state.to_string()),
        Err(e) => progress.failed(&e.to_string()),
    }
    println!("  cluster now runs: {:?}", cluster.deployed().await);

    println!();
    println!("{}", heading.apply_to("── Approval workflow ──"));

    let requisition = StateMachine::new("req-42", approvals.clone());
    let review = |operator: &str| ApprovalPayload {
        operator: operator.to_string(),
        comment: None,
        proposer: "proposer@example.com".into(),
    };

    // An account without review permission: the transition aborts before
    // any effect, and the requisition stays PENDING.
    let progress = TransitionProgress::start("req-42", "DBA_APPROVE (intern.bob)");
    match requisition.fire(ApprovalEvent::DbaApprove, review("intern.bob")).await {
        Ok(state) => progress.succeeded(&state.to_string()),
        Err(e) => progress.failed(&e.to_string()),
    }
    println!("  requisition remains {}", requisition.current().await?);

    for (label, event, operator) in [
        ("DBA_APPROVE (dba.lee)", ApprovalEvent::DbaApprove, "dba.lee"),
        ("OWNER_APPROVE (owner.kim)", ApprovalEvent::OwnerApprove, "owner.kim"),
    ] {
        let progress = TransitionProgress::start("req-42", label);
        match requisition.fire(event, review(operator)).await {
            Ok(state) => progress.succeeded(&state.to_string()),
            Err(e) => progress.failed(&e.to_string()),
        }
    }

    println!();
    println!("{}", heading.apply_to("── Notifications ──"));
    for sent in notifier.sent().await {
        println!("  {:?} -> {}: {}", sent.kind, sent.recipients.join(", "), sent.body);
    }
    for decision in backend.decisions_for("req-42").await {
        println!(
            "  decision: {:?} {} by {}",
            decision.stage,
            if decision.approved { "approved" } else { "rejected" },
            decision.operator
        );
    }
    println!("  connections applied: {:?}", backend.applied().await);

    ui::print_audit_trail(&emitter.records().await);
    Ok(())
}
