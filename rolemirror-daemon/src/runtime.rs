use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};

use rolemirror_core::{Config, GroupId, MemberId, RoleSet};
use rolemirror_sync::{EventDispatcher, GroupReport, Pipeline, ReconcileScope};

use crate::bootstrap::{init_tracing, open_pipeline};
use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{
    DaemonRequest, DaemonResponse, CMD_MEMBER_CHANGED, CMD_MEMBER_REMOVED, CMD_RECONCILE,
    CMD_STATUS, CMD_STOP,
};

/// Last report per group, with the unix time it finished.
pub type ReportLog = HashMap<GroupId, (u64, GroupReport)>;

/// A live member change, applied in arrival order by one consumer.
#[derive(Debug)]
enum Notification {
    Changed {
        group: GroupId,
        member: MemberId,
        roles: RoleSet,
    },
    Removed {
        group: GroupId,
        member: MemberId,
    },
}

struct ReconcileJob {
    scope: ReconcileScope,
    source: &'static str,
    respond_to: Option<oneshot::Sender<Result<Vec<GroupReport>, String>>>,
}

/// Settings for [`run_with`] that do not come from the pipeline itself.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub state_dir: PathBuf,
    /// `None` disables periodic reconciliation.
    pub reconcile_interval: Option<Duration>,
}

impl RuntimeOptions {
    pub fn from_config(config: &Config) -> Result<Self, DaemonError> {
        let state_dir = config
            .state_dir
            .clone()
            .ok_or(rolemirror_core::ConfigError::Missing("state_dir"))?;
        let reconcile_interval = (config.reconcile_interval_secs > 0)
            .then(|| Duration::from_secs(config.reconcile_interval_secs));
        Ok(Self {
            state_dir,
            reconcile_interval,
        })
    }
}

/// Everything a socket request handler needs.
#[derive(Clone)]
struct RuntimeContext {
    pipeline: Pipeline,
    reports: Arc<RwLock<ReportLog>>,
    reconcile_tx: mpsc::Sender<ReconcileJob>,
    notify_tx: mpsc::Sender<Notification>,
    shutdown_tx: broadcast::Sender<()>,
    state_dir: PathBuf,
    started_at_unix: u64,
}

/// Start the continuous-mode runtime and block the current thread until it
/// exits.
pub fn start_blocking(config: Config) -> Result<(), DaemonError> {
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Bootstrap from `config` and run until stopped.
pub async fn run(config: Config) -> Result<(), DaemonError> {
    let options = RuntimeOptions::from_config(&config)?;
    let pipeline = open_pipeline(&config, false).await?;
    run_with(pipeline, options).await
}

/// Run the runtime around an already-bootstrapped pipeline.
///
/// The first full reconciliation is queued immediately; the socket serves
/// status and notifications while it runs.
pub async fn run_with(pipeline: Pipeline, options: RuntimeOptions) -> Result<(), DaemonError> {
    fs::create_dir_all(&options.state_dir).map_err(|e| io_err(&options.state_dir, e))?;

    let reports: Arc<RwLock<ReportLog>> = Arc::new(RwLock::new(HashMap::new()));
    let (reconcile_tx, reconcile_rx) = mpsc::channel::<ReconcileJob>(64);
    let (notify_tx, notify_rx) = mpsc::channel::<Notification>(1024);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let ctx = RuntimeContext {
        pipeline: pipeline.clone(),
        reports: reports.clone(),
        reconcile_tx: reconcile_tx.clone(),
        notify_tx,
        shutdown_tx: shutdown_tx.clone(),
        state_dir: options.state_dir.clone(),
        started_at_unix: unix_seconds_now(),
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let pipeline = pipeline.clone();
        let reports = reports.clone();
        tokio::spawn(async move {
            let result =
                reconcile_processor_task(pipeline, reports, reconcile_rx, shutdown.subscribe())
                    .await;
            let _ = shutdown.send(());
            result
        })
    };

    let notification_handle = {
        let shutdown = shutdown_tx.clone();
        let dispatcher = pipeline.dispatcher().clone();
        tokio::spawn(async move {
            let result = notification_task(dispatcher, notify_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let reconcile_tx = reconcile_tx.clone();
        let interval = options.reconcile_interval;
        tokio::spawn(async move {
            let result = scheduler_task(reconcile_tx, interval, shutdown.subscribe()).await;
            if result.is_err() {
                let _ = shutdown.send(());
            }
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(ctx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!(
                            "ctrl-c handler failed: {err}"
                        ))),
                    }
                }
            }
        })
    };

    // The context holds a queue sender; drop ours so the processor sees the
    // channel close once every task has finished with it.
    drop(ctx);
    drop(reconcile_tx);

    let (processor_result, notification_result, scheduler_result, socket_result, signal_result) =
        tokio::join!(
            processor_handle,
            notification_handle,
            scheduler_handle,
            socket_handle,
            signal_handle
        );

    handle_join("reconcile_processor", processor_result)?;
    handle_join("notifications", notification_result)?;
    handle_join("scheduler", scheduler_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn reconcile_processor_task(
    pipeline: Pipeline,
    reports: Arc<RwLock<ReportLog>>,
    mut reconcile_rx: mpsc::Receiver<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = reconcile_rx.recv() => {
                let Some(job) = maybe_job else { break };
                tracing::info!(scope = ?job.scope, source = job.source, "reconcile started");

                let outcome = match pipeline.run(job.scope).await {
                    Ok(results) => {
                        let now = unix_seconds_now();
                        let mut log = reports.write().await;
                        for report in &results {
                            log.insert(report.group.clone(), (now, report.clone()));
                        }
                        drop(log);
                        Ok(results)
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "reconcile request rejected");
                        Err(err.to_string())
                    }
                };

                if let Some(respond_to) = job.respond_to {
                    let _ = respond_to.send(outcome);
                }
            }
        }
    }

    Ok(())
}

async fn notification_task(
    dispatcher: EventDispatcher,
    mut notify_rx: mpsc::Receiver<Notification>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_event = notify_rx.recv() => {
                let Some(event) = maybe_event else { break };
                let dispatched = match event {
                    Notification::Changed { group, member, roles } => {
                        dispatcher.on_member_changed(&group, &member, roles).await
                    }
                    Notification::Removed { group, member } => {
                        dispatcher.on_member_removed(&group, &member).await
                    }
                };
                tracing::trace!(?dispatched, "notification applied");
            }
        }
    }
    Ok(())
}

async fn scheduler_task(
    reconcile_tx: mpsc::Sender<ReconcileJob>,
    interval: Option<Duration>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    submit(&reconcile_tx, ReconcileScope::All, "startup").await?;

    let Some(period) = interval else {
        // Nothing periodic to do; park until shutdown.
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                submit(&reconcile_tx, ReconcileScope::All, "schedule").await?;
            }
        }
    }
    Ok(())
}

async fn socket_server_task(
    ctx: RuntimeContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&ctx.state_dir);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, ctx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, ctx: RuntimeContext) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == CMD_STOP;
        let response = handle_request(&ctx, request).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

async fn handle_request(ctx: &RuntimeContext, request: DaemonRequest) -> DaemonResponse {
    match request.cmd.as_str() {
        CMD_STATUS => DaemonResponse::ok(build_status_payload(ctx).await),
        CMD_RECONCILE => {
            let scope = match request.group {
                Some(group) => ReconcileScope::Group(GroupId::from(group)),
                None => ReconcileScope::All,
            };
            match enqueue_reconcile(&ctx.reconcile_tx, scope, "socket").await {
                Ok(reports) => DaemonResponse::ok(json!(reports)),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        CMD_MEMBER_CHANGED => {
            let (group, member) = match member_target(&request) {
                Ok(target) => target,
                Err(message) => return DaemonResponse::error(message),
            };
            let roles: RoleSet = request.roles.unwrap_or_default().into_iter().collect();
            accept(ctx, Notification::Changed { group, member, roles }).await
        }
        CMD_MEMBER_REMOVED => {
            let (group, member) = match member_target(&request) {
                Ok(target) => target,
                Err(message) => return DaemonResponse::error(message),
            };
            accept(ctx, Notification::Removed { group, member }).await
        }
        CMD_STOP => {
            let _ = ctx.shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

/// Queue `event` behind every earlier notification and acknowledge it.
async fn accept(ctx: &RuntimeContext, event: Notification) -> DaemonResponse {
    match ctx.notify_tx.send(event).await {
        Ok(()) => DaemonResponse::ok(json!({ "accepted": true })),
        Err(_) => {
            DaemonResponse::error(DaemonError::ChannelClosed("notification queue").to_string())
        }
    }
}

fn member_target(request: &DaemonRequest) -> Result<(GroupId, MemberId), String> {
    let group = request
        .group
        .clone()
        .ok_or_else(|| format!("'{}' requires a group", request.cmd))?;
    let member = request
        .member
        .clone()
        .ok_or_else(|| format!("'{}' requires a member", request.cmd))?;
    Ok((GroupId::from(group), MemberId::from(member)))
}

async fn build_status_payload(ctx: &RuntimeContext) -> Value {
    // Snapshot reports (read lock, dropped before JSON assembly).
    let log: ReportLog = {
        let log = ctx.reports.read().await;
        log.clone()
    };

    let cache = ctx.pipeline.cache();
    let groups: Vec<Value> = ctx
        .pipeline
        .groups()
        .iter()
        .map(|group| {
            let (last_at, last_report) = match log.get(group) {
                Some((at, report)) => (*at, json!(report)),
                None => (0, Value::Null),
            };
            json!({
                "group": group,
                "cached_members": cache.group_len(group),
                "last_reconciled_at_unix": last_at,
                "last_report": last_report,
            })
        })
        .collect();

    let last_reconciled_at_unix = log.values().map(|(at, _)| *at).max().unwrap_or(0);

    json!({
        "running": true,
        "started_at_unix": ctx.started_at_unix,
        "last_reconciled_at_unix": last_reconciled_at_unix,
        "cached_members": cache.len(),
        "groups": groups,
        "socket": socket_path(&ctx.state_dir).display().to_string(),
    })
}

async fn submit(
    reconcile_tx: &mpsc::Sender<ReconcileJob>,
    scope: ReconcileScope,
    source: &'static str,
) -> Result<(), DaemonError> {
    reconcile_tx
        .send(ReconcileJob {
            scope,
            source,
            respond_to: None,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile queue"))
}

async fn enqueue_reconcile(
    reconcile_tx: &mpsc::Sender<ReconcileJob>,
    scope: ReconcileScope,
    source: &'static str,
) -> Result<Vec<GroupReport>, DaemonError> {
    let (tx, rx) = oneshot::channel();
    reconcile_tx
        .send(ReconcileJob {
            scope,
            source,
            respond_to: Some(tx),
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
