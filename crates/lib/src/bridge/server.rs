//! Process wiring: connectors, the HTTP endpoint and the single consumer loop.

use crate::bridge::dispatch::{Bridge, Completion};
use crate::channels::{
    ChannelRegistry, DiscordClient, DiscordEvent, DiscordGateway, InboundMessage, TelegramChannel,
    TelegramUpdate,
};
use crate::config::Settings;
use crate::schedule::HttpScheduleSource;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const WEBHOOK_SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub telegram: Arc<TelegramChannel>,
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub webhook_secret: Option<String>,
    /// "webhook" or "polling"; the webhook route is only served in webhook mode.
    pub telegram_mode: &'static str,
    pub port: u16,
}

/// `GET /` health, plus `POST /telegram/webhook` in webhook mode.
pub fn http_router(state: HttpState) -> Router {
    let mut router = Router::new().route("/", get(health_http));
    if state.telegram_mode == "webhook" {
        router = router.route("/telegram/webhook", post(telegram_webhook));
    }
    router.with_state(state)
}

/// Run the bridge until SIGINT/SIGTERM.
pub async fn run_bridge(settings: Settings) -> Result<()> {
    let telegram = Arc::new(TelegramChannel::new(
        settings.telegram.bot_token.clone(),
        settings.telegram.api_base.clone(),
    ));
    let discord = Arc::new(DiscordClient::new(
        settings.discord.token.clone(),
        settings.discord.api_base.clone(),
    ));
    let gateway = Arc::new(DiscordGateway::new(settings.discord.token.clone(), None));
    let schedule = Arc::new(
        HttpScheduleSource::new(
            settings.schedule.login_url.clone(),
            settings.schedule.schedule_url.clone(),
            settings.schedule.login.clone(),
            settings.schedule.password.clone(),
        )
        .context("building schedule client")?,
    );

    let registry = ChannelRegistry::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(256);
    let (events_tx, events_rx) = mpsc::channel::<DiscordEvent>(64);
    let (completions_tx, completions_rx) = mpsc::channel::<Completion>(64);

    let webhook_url = settings.telegram.webhook_url.clone();
    if let Some(ref url) = webhook_url {
        if let Err(e) = telegram
            .set_webhook(url, settings.telegram.webhook_secret.as_deref())
            .await
        {
            log::warn!("telegram set_webhook failed: {}", e);
        } else {
            log::info!("telegram channel registered (webhook mode): {}", url);
        }
    } else {
        if let Err(e) = telegram.delete_webhook().await {
            log::debug!("telegram delete_webhook before polling: {}", e);
        }
        tasks.push(telegram.clone().start_inbound(inbound_tx.clone()));
        log::info!("telegram channel registered and getUpdates loop started");
    }
    registry.register(telegram.clone()).await;
    tasks.push(gateway.clone().start(events_tx));
    registry.register(gateway).await;
    log::info!("connectors running: {}", registry.ids().await.join(", "));

    let app = http_router(HttpState {
        telegram: telegram.clone(),
        inbound_tx,
        webhook_secret: settings.telegram.webhook_secret.clone(),
        telegram_mode: settings.telegram_mode(),
        port: settings.server.port,
    });
    let bind_addr = format!("{}:{}", settings.server.bind, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("bridge listening on {}", bind_addr);
    let (stop_http_tx, mut stop_http_rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        let stopped = async move {
            let _ = stop_http_rx.changed().await;
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stopped).await {
            log::error!("http server exited: {}", e);
        }
    });

    let bridge = Bridge::new(&settings, telegram.clone(), discord, schedule, completions_tx);
    run_loop(bridge, inbound_rx, events_rx, completions_rx, shutdown_signal()).await;

    log::info!("shutdown signal received, stopping connectors");
    registry.stop_all().await;
    let _ = stop_http_tx.send(true);
    if webhook_url.is_some() {
        if let Err(e) = telegram.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }
    for h in tasks {
        let _ = h.await;
    }
    let _ = server.await;
    log::info!("bridge stopped");
    Ok(())
}

/// The consumer loop: one event at a time until `shutdown` completes. Handlers never wait on the
/// network; spawned work reports back through `completions_rx`.
pub async fn run_loop(
    mut bridge: Bridge,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    mut events_rx: mpsc::Receiver<DiscordEvent>,
    mut completions_rx: mpsc::Receiver<Completion>,
    shutdown: impl Future<Output = ()>,
) {
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(msg) = inbound_rx.recv() => bridge.handle_inbound(msg).await,
            Some(event) = events_rx.recv() => bridge.handle_discord(event).await,
            Some(done) = completions_rx.recv() => bridge.handle_completion(done).await,
            _ = tick.tick() => bridge.handle_tick(Instant::now()).await,
        }
    }
    log::debug!(
        "bridge loop stopped with {} pending album(s) and {} tracked review(s)",
        bridge.pending_groups(),
        bridge.tracker().index().len()
    );
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// POST /telegram/webhook: verifies the optional secret, records the update and queues the message.
async fn telegram_webhook(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.webhook_secret {
        let provided = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(inbound) = state.telegram.ingest(update) else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON.
async fn health_http(State(state): State<HttpState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "telegramMode": state.telegram_mode,
        "port": state.port,
    }))
}
