//! Process-wide wiring
//!
//! Every long-lived handle (HTTP client, sqlite pool, adapters, the bus) is
//! built once here and shared read-only through `Arc`. Nothing in `App` is
//! mutated after `build` returns.

use crate::channels::chat::ChatAnnouncer;
use crate::channels::{ChatAdapter, HttpSender};
use crate::config::Config;
use crate::db::{CheckInStore, Database};
use crate::dispatcher::{routes_from_config, FanOutDispatcher, NotificationDispatcher};
use crate::llm::{ContentPersonalizer, HttpAgent, LlmContentGenerator};
use crate::message_bus::{DetailType, EventBus, EventHandler, EventPattern};
use crate::monitor::StalenessMonitor;
use crate::recorder::CheckInRecorder;
use crate::retry::RetryPolicy;
use crate::speech::{HttpSpeechToText, HttpTextToSpeech};
use crate::voice::{HttpTelephony, VoiceGateway, VoiceServices};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared handles for one running process
pub struct App {
    pub config: Config,
    pub database: Database,
    pub store: Arc<dyn CheckInStore>,
    pub bus: Arc<EventBus>,
    pub dispatcher: Arc<FanOutDispatcher>,
    pub monitor: Arc<StalenessMonitor>,
    pub gateway: Arc<VoiceGateway>,
}

impl App {
    /// Open the store and build every collaborator
    ///
    /// Must be called from within a tokio runtime; bus handlers start here.
    pub async fn build(config: Config) -> Result<Self> {
        let database = Database::new(&config.db_path())
            .await
            .context("Failed to open check-in store")?;
        let store: Arc<dyn CheckInStore> = Arc::new(database.check_ins());

        let http = reqwest::Client::builder()
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let personalizer: Option<Arc<dyn ContentPersonalizer>> = if config.content.enabled {
            Some(Arc::new(LlmContentGenerator::new(
                http.clone(),
                config.content.clone(),
            )))
        } else {
            None
        };

        let mut dispatcher = FanOutDispatcher::new(routes_from_config(&config.channels, &http));
        if let Some(personalizer) = &personalizer {
            dispatcher =
                dispatcher.with_personalizer(Arc::clone(personalizer), config.content.preferences);
        }
        let dispatcher = Arc::new(dispatcher);

        let bus = Arc::new(Self::build_bus(&config, &http, &store, &dispatcher));

        let monitor = StalenessMonitor::new(Arc::clone(&store), config.monitor.clone())
            .with_bus(Arc::clone(&bus))
            .with_dispatcher(Arc::clone(&dispatcher) as Arc<dyn NotificationDispatcher>);

        let services = VoiceServices {
            telephony: Arc::new(HttpTelephony::new(http.clone(), &config.voice)),
            stt: Arc::new(HttpSpeechToText::new(http.clone(), config.speech.clone())),
            tts: Arc::new(HttpTextToSpeech::new(http.clone(), config.speech.clone())),
            agent: Arc::new(HttpAgent::new(http.clone(), config.agent.clone())),
            personalizer,
            store: Arc::clone(&store),
            voice_profile: config.speech.voice_profile.clone(),
            frame_bytes: config.voice.frame_bytes,
        };
        let gateway = VoiceGateway::new(
            Arc::new(services),
            config.voice.subject_directory.clone(),
            config.voice.max_call_duration(),
        );

        info!(
            channels = dispatcher.channel_count(),
            subscribers = bus.subscriber_count(),
            db = %config.db_path().display(),
            "Vigil components ready"
        );

        Ok(Self {
            config,
            database,
            store,
            bus,
            dispatcher,
            monitor: Arc::new(monitor),
            gateway: Arc::new(gateway),
        })
    }

    fn build_bus(
        config: &Config,
        http: &reqwest::Client,
        store: &Arc<dyn CheckInStore>,
        dispatcher: &Arc<FanOutDispatcher>,
    ) -> EventBus {
        let delivery = RetryPolicy::new(
            config.bus.max_delivery_attempts,
            Duration::from_millis(config.monitor.retry.initial_backoff_ms),
            Duration::from_millis(config.monitor.retry.max_backoff_ms),
        );

        let mut builder = EventBus::builder()
            .buffer_size(config.bus.buffer_size)
            .send_timeout(Duration::from_millis(config.bus.send_timeout_ms))
            .delivery_policy(delivery);

        builder.subscribe_handler(
            EventPattern::detail_type(DetailType::TimeForCheckin),
            Arc::clone(dispatcher) as Arc<dyn EventHandler>,
        );
        builder.subscribe_handler(
            EventPattern::detail_type(DetailType::CheckInRecorded),
            Arc::new(CheckInRecorder::new(Arc::clone(store))),
        );

        let chat = &config.channels.chat;
        if chat.enabled {
            let http = HttpSender::new(http.clone(), chat.endpoint.clone(), chat.token());
            builder.subscribe_handler(
                EventPattern::detail_type(DetailType::CheckInRequired)
                    .or_detail_type(DetailType::CheckInRecorded),
                Arc::new(ChatAnnouncer::new(
                    Arc::new(ChatAdapter::new(http)),
                    chat.destination.clone(),
                )),
            );
        }

        builder.build()
    }

    /// Stop accepting events, let handlers finish, then flush the store
    pub async fn shutdown(self) -> Result<()> {
        let grace = self.config.bus.drain_timeout();
        if !self.bus.shutdown(grace).await {
            warn!("Closing the store with event deliveries still running");
        }
        self.database.close().await
    }
}
