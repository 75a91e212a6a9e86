use crate::api::{AppState, ApiServer};
use crate::audit::{AuditSink, TracingAuditSink};
use crate::calls::{CallController, DisabledCallController, TwilioCallController};
use crate::chat::ChatManager;
use crate::cli::ServeArgs;
use crate::config::Config;
use crate::gateway::Gateway;
use crate::recording::{DisabledRecordingController, EgressRecordingController, RecordingController};
use crate::state_sync::{BackingStore, RedisStore, ReplicatedCache};
use crate::token::{JwtTokenIssuer, TokenIssuer};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything the server needs, wired from one configuration.
pub struct Services {
    pub cache: Arc<ReplicatedCache>,
    pub chat: Arc<ChatManager>,
    pub state: AppState,
}

impl Services {
    pub async fn build(config: &Config) -> Self {
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink::new(config.audit.enabled));

        let cache = Arc::new(ReplicatedCache::new(connect_store(config).await));
        if cache.connect().await {
            info!("Replicated state enabled");
        } else {
            info!("Running with local-only state");
        }

        let chat = Arc::new(ChatManager::new(
            cache.clone(),
            audit.clone(),
            config.chat.clone(),
        ));
        chat.initialize().await;

        let recordings: Arc<dyn RecordingController> = if config.recording.enabled {
            Arc::new(EgressRecordingController::new(
                &config.recording,
                &config.livekit,
                audit.clone(),
            ))
        } else {
            info!("Recording disabled");
            Arc::new(DisabledRecordingController)
        };

        let calls: Arc<dyn CallController> = if config.calls.enabled {
            Arc::new(TwilioCallController::new(
                &config.calls,
                config.livekit.url.clone(),
                audit.clone(),
            ))
        } else {
            info!("Phone calls disabled");
            Arc::new(DisabledCallController)
        };

        let tokens: Arc<dyn TokenIssuer> = Arc::new(JwtTokenIssuer::new(&config.livekit, audit));

        let gateway = Arc::new(Gateway::new(chat.clone(), recordings.clone(), calls.clone()));

        Self {
            cache,
            chat,
            state: AppState {
                gateway,
                recordings,
                calls,
                tokens,
                livekit_url: config.livekit.url.clone(),
            },
        }
    }

    pub async fn shutdown(&self) {
        self.chat.shutdown().await;
        self.cache.disconnect().await;
    }
}

async fn connect_store(config: &Config) -> Option<Arc<dyn BackingStore>> {
    if !config.replication.enabled {
        return None;
    }
    match RedisStore::connect(&config.replication.redis_url).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("Replication unavailable, continuing local-only: {:#}", e);
            None
        }
    }
}

pub async fn run_service(mut config: Config, args: ServeArgs) -> Result<()> {
    info!("Starting roomsync service");

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let services = Services::build(&config).await;
    let server = ApiServer::new(
        config.server.host.clone(),
        config.server.port,
        services.state.clone(),
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    let result = server.start(shutdown).await;
    if let Err(e) = &result {
        error!("API server failed: {}", e);
    }

    services.shutdown().await;
    info!("roomsync stopped");
    result
}
