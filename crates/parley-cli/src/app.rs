//! Wiring: stores, providers, delivery and orchestration for one bot process.

use crate::config::ParleyConfig;
use parley_agent::{ContextAssembler, ProviderEntry, ProviderRouter, UsageLedger};
use parley_channels::{
    ChannelEvent, StreamingDelivery, TelegramChannel, TelegraphPublisher, Transport,
};
use parley_orchestrator::{DebateSession, MultiModelOrchestrator};
use parley_session::{ChatStore, PreferenceStore, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Everything a handler needs, shared across event tasks.
pub struct App {
    pub config: ParleyConfig,
    pub telegram: Arc<TelegramChannel>,
    pub router: Arc<ProviderRouter>,
    pub context: ContextAssembler,
    pub delivery: StreamingDelivery,
    pub orchestrator: MultiModelOrchestrator,
    pub usage: Arc<UsageLedger>,
    /// Last text each user sent, replayed by "regenerate" and "ask another".
    pub last_prompts: Arc<SessionStore<String>>,
}

/// Background tasks owned by the running bot.
pub struct Tasks {
    pub sweepers: Vec<JoinHandle<()>>,
}

impl Tasks {
    pub fn abort(self) {
        for handle in self.sweepers {
            handle.abort();
        }
    }
}

impl App {
    /// Build the app and hand back the inbound event stream.
    pub async fn build(
        config: ParleyConfig,
    ) -> anyhow::Result<(Arc<Self>, mpsc::Receiver<ChannelEvent>, Tasks)> {
        if config.telegram.bot_token.is_empty() {
            anyhow::bail!("Telegram bot token missing; set TELEGRAM_BOT_TOKEN or [telegram].bot_token");
        }

        let (chat_store, preferences) = open_store(&config).await?;

        let mut channel = TelegramChannel::new(&config.telegram.bot_token, config.telegram.event_buffer);
        if let Some(api_base) = &config.telegram.api_base {
            channel = channel.with_api_base(api_base);
        }
        let events = channel
            .take_event_receiver()
            .ok_or_else(|| anyhow::anyhow!("Telegram event receiver already taken"))?;
        let telegram = Arc::new(channel);

        let providers = config
            .providers
            .iter()
            .map(ProviderEntry::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        let ttl = config.session_ttl();
        let sweep_every = Duration::from_secs(config.sessions.sweep_interval_secs.max(1));
        let provider_cache: Arc<SessionStore<String>> = Arc::new(SessionStore::new(ttl));
        let debates: Arc<SessionStore<DebateSession>> = Arc::new(SessionStore::new(ttl));
        let last_prompts: Arc<SessionStore<String>> = Arc::new(SessionStore::new(ttl));
        let sweepers = vec![
            provider_cache.spawn_sweeper("provider_cache", sweep_every),
            debates.spawn_sweeper("debates", sweep_every),
            last_prompts.spawn_sweeper("last_prompts", sweep_every),
        ];

        let router = Arc::new(ProviderRouter::new(
            providers,
            config.default_provider.clone(),
            provider_cache,
            preferences,
        ));
        let usage = Arc::new(UsageLedger::new());

        let transport: Arc<dyn Transport> = telegram.clone();
        let mut delivery = StreamingDelivery::new(transport, config.streaming.delivery_config());
        if config.publish.enabled {
            let mut publisher = TelegraphPublisher::new();
            if let Some(api_base) = &config.publish.api_base {
                publisher = publisher.with_api_base(api_base);
            }
            delivery = delivery.with_publisher(Arc::new(publisher));
        }

        let orchestrator = MultiModelOrchestrator::new(router.clone(), usage.clone(), debates)
            .with_system_prompt(config.system_prompt.clone());
        let context = ContextAssembler::new(chat_store, config.context.window_size);

        info!(
            providers = ?router.available_providers(),
            default = router.default_provider(),
            window = context.window_size(),
            publish = config.publish.enabled,
            "Parley initialized"
        );

        let app = Arc::new(Self {
            config,
            telegram,
            router,
            context,
            delivery,
            orchestrator,
            usage,
            last_prompts,
        });
        Ok((app, events, Tasks { sweepers }))
    }

    pub fn system_prompt(&self) -> &str {
        &self.config.system_prompt
    }
}

type Stores = (Arc<dyn ChatStore>, Arc<dyn PreferenceStore>);

fn share<S: ChatStore + 'static>(store: S) -> Stores {
    let store = Arc::new(store);
    (store.clone(), store)
}

#[cfg(feature = "sqlite")]
async fn open_store(config: &ParleyConfig) -> anyhow::Result<Stores> {
    let path = config.database_path();
    let store = parley_session::SqliteStore::open(&path).await?;
    info!(path = %path.display(), "SQLite store opened");
    Ok(share(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_config: &ParleyConfig) -> anyhow::Result<Stores> {
    info!("Using in-memory store; history is lost on restart");
    Ok(share(parley_session::MemoryStore::new()))
}
