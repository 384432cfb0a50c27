// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `telfio serve` command implementation.
//!
//! Wires storage, the three streaming providers, the session registry, the
//! dialing control plane, the webhook dispatcher, and the gateway, then
//! serves until SIGTERM/SIGINT and drains live sessions before exit.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use telfio_config::{RuntimeSettings, TelfioConfig, validate_config};
use telfio_core::{CallStore, Result, TelfioError};
use telfio_dialer::{CampaignRunner, Dialer, EslSwitch, ScheduleRunner, SessionFactory};
use telfio_gateway::AppState;
use telfio_llm::ChatClient;
use telfio_session::{GreetingCache, SessionRegistry, SessionTimings};
use telfio_storage::SqliteStore;
use telfio_stt::RealtimeSttClient;
use telfio_tts::HttpTtsClient;
use telfio_webhook::WebhookDispatcher;

/// Runs the `telfio serve` command.
pub async fn run_serve(config: TelfioConfig) -> Result<()> {
    init_tracing(&config.agent.log_level);
    info!("starting telfio serve");

    let errors = validate_config(&config);
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("error: {error}");
        }
        return Err(TelfioError::Config(format!(
            "{} configuration error(s)",
            errors.len()
        )));
    }

    // Storage first: everything else hangs off it.
    let store: Arc<SqliteStore> = Arc::new(SqliteStore::open(&config.storage.database_path).await?);

    // Crash recovery: in-memory sessions did not survive; their rows are
    // failed, and campaigns that were mid-flight wait for the operator.
    let stale = store.mark_stale_calls_failed().await?;
    if stale > 0 {
        info!(count = stale, "marked stale in-flight calls as failed");
    }
    pause_interrupted_campaigns(store.as_ref()).await?;

    // Settings: file config overlaid with database rows, reloadable.
    let settings = RuntimeSettings::new(config.clone());
    settings.reload(store.as_ref()).await?;
    let snapshot = settings.current();

    // Providers. Missing keys are tolerated at boot so operators can
    // finish setup through the API; `telfio doctor` reports them.
    for (name, key) in [
        ("stt", &snapshot.stt_api_key),
        ("llm", &snapshot.llm_api_key),
        ("tts", &snapshot.tts_api_key),
    ] {
        if key.is_none() {
            warn!(provider = name, "API key not configured; calls will fail until it is set");
        }
    }
    let stt = Arc::new(RealtimeSttClient::new(
        snapshot.stt_api_key.as_deref().unwrap_or_default(),
        &config.stt.base_url,
        &config.stt.model,
        config.stt.endpointing_ms,
    ));
    let llm = Arc::new(ChatClient::new(
        snapshot.llm_api_key.as_deref().unwrap_or_default(),
        &config.llm.base_url,
        config.llm.max_tokens,
    )?);
    let tts = Arc::new(HttpTtsClient::new(
        snapshot.tts_api_key.as_deref().unwrap_or_default(),
        &config.tts.base_url,
        &config.tts.style,
    )?);

    // Engine plumbing.
    let (bus, _) = broadcast::channel(1024);
    let registry = SessionRegistry::new();
    let greetings = Arc::new(GreetingCache::new());
    let factory = SessionFactory {
        stt,
        llm,
        tts,
        store: store.clone(),
        bus: bus.clone(),
        greetings,
        timings: timings_from(&config),
        settings: settings.clone(),
    };

    let switch = Arc::new(EslSwitch::new(
        &config.switch.esl_host,
        config.switch.esl_port,
        config
            .switch
            .esl_password
            .as_deref()
            .unwrap_or("ClueCon"),
        &config.switch.sip_gateway,
        &config.switch.tech_prefix,
        &config.switch.default_country_code,
        &config.gateway.media_ws_base,
    ));

    let dialer = Dialer::new(switch, registry.clone(), store.clone(), factory);
    let campaigns = CampaignRunner::new(store.clone(), dialer.clone(), bus.clone());
    let schedules = ScheduleRunner::new(store.clone(), dialer.clone(), bus.clone());
    let webhooks = WebhookDispatcher::new(store.clone());

    // Background loops, all stopped by the same token.
    let cancel = install_signal_handler();
    let schedule_task = schedules.spawn(cancel.clone());
    let webhook_task = webhooks.spawn(bus.subscribe(), cancel.clone());

    let state = AppState {
        store: store.clone(),
        registry: registry.clone(),
        dialer,
        campaigns,
        webhooks,
        settings,
        bus,
        bind_grace: Duration::from_secs(5),
        unknown_frames: Arc::new(AtomicU64::new(0)),
        started_at: std::time::Instant::now(),
    };

    telfio_gateway::start_server(&config.gateway.host, config.gateway.port, state, cancel.clone())
        .await?;

    // Gateway returned: signal received. Drain live calls, stop loops.
    info!("shutting down, draining live sessions");
    registry
        .drain(Duration::from_secs(config.session.drain_timeout_secs.max(2)))
        .await;
    let _ = schedule_task.await;
    let _ = webhook_task.await;
    store.close().await?;

    info!("telfio serve shutdown complete");
    Ok(())
}

fn timings_from(config: &TelfioConfig) -> SessionTimings {
    let session = &config.session;
    SessionTimings {
        connect_timeout: Duration::from_secs(session.connect_timeout_secs),
        inactivity_timeout: Duration::from_secs(session.inactivity_timeout_secs),
        llm_first_token_timeout: Duration::from_secs(session.llm_first_token_timeout_secs),
        tts_first_frame_warn: Duration::from_secs(session.tts_first_frame_warn_secs),
        tts_first_frame_timeout: Duration::from_secs(session.tts_first_frame_timeout_secs),
        drain_timeout: Duration::from_secs(session.drain_timeout_secs),
        barge_in_min_chars: session.barge_in_min_chars,
    }
}

/// Campaigns that were `running` when the process died resume only on an
/// operator's explicit start.
async fn pause_interrupted_campaigns(store: &dyn CallStore) -> Result<()> {
    for campaign in store.list_campaigns().await? {
        if campaign.status == "running" {
            info!(campaign_id = campaign.id, "pausing campaign interrupted by restart");
            store.set_campaign_status(campaign.id, "paused").await?;
        }
    }
    Ok(())
}

/// Installs signal handlers for SIGTERM and SIGINT.
///
/// Returns a [`CancellationToken`] cancelled when either signal arrives.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("telfio={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
