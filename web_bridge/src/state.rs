use chassis_lib::BridgeConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::broker::BrokerLink;
use crate::multiplexer::MultiplexerHandle;
use crate::security::ClientRateLimiter;
use crate::session::SessionRegistry;
use crate::translator::CommandTranslator;

/// Everything the request and socket handlers share.
pub struct AppState {
    pub config: BridgeConfig,
    pub link: Arc<dyn BrokerLink>,
    pub sessions: SessionRegistry,
    pub multiplexer: MultiplexerHandle,
    pub translator: CommandTranslator,
    pub auth_rate_limiter: ClientRateLimiter,
    pub command_rate_limiter: ClientRateLimiter,
}

impl AppState {
    pub fn new(
        config: BridgeConfig,
        link: Arc<dyn BrokerLink>,
        multiplexer: MultiplexerHandle,
    ) -> Self {
        let sessions = SessionRegistry::new(
            &config.auth,
            Duration::from_secs(config.session.ttl_secs),
        );
        let translator = CommandTranslator::new(
            link.clone(),
            config.mqtt.control_prefix.clone(),
            config.defaults.clone(),
            config.limits.clone(),
        );
        let auth_rate_limiter = ClientRateLimiter::per_minute(config.rate_limit.auth_per_minute);
        let command_rate_limiter =
            ClientRateLimiter::per_second(config.rate_limit.commands_per_second);

        Self {
            config,
            link,
            sessions,
            multiplexer,
            translator,
            auth_rate_limiter,
            command_rate_limiter,
        }
    }

    /// Periodically drop expired sessions.
    pub fn spawn_session_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::clone(self);
        let period = Duration::from_secs(state.config.session.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let purged = state.sessions.purge_expired();
                if purged > 0 {
                    tracing::info!("Expired {} session(s)", purged);
                }
            }
        })
    }
}
