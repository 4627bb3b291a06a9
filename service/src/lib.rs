use config::Config;
use events::EventPublisher;
use hub::{Hub, HubDomainEventHandler};
use log::info;
use std::sync::Arc;

pub mod config;
pub mod logging;

/// Builds the process-wide hub from `config`, rejecting inconsistent heartbeat or mailbox settings.
pub fn init_hub(config: &Config) -> hub::Result<Hub> {
    let hub_config = config.hub_config()?;
    info!(
        "Hub config: write_wait={:?}, pong_wait={:?}, ping_period={:?}, \
         max_frame_size={}, mailbox_capacity={}, overflow_policy={}",
        hub_config.write_wait,
        hub_config.pong_wait,
        hub_config.ping_period,
        hub_config.max_frame_size,
        hub_config.mailbox_capacity,
        hub_config.overflow_policy,
    );
    Hub::try_new(hub_config)
}

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub hub: Arc<Hub>,
    pub event_publisher: EventPublisher,
}

impl AppState {
    /// Wires `hub` behind an event publisher so domain events reach connected clients.
    pub fn new(app_config: Config, hub: &Arc<Hub>) -> Self {
        let event_publisher = EventPublisher::new()
            .with_handler(Arc::new(HubDomainEventHandler::new(Arc::clone(hub))));
        Self {
            config: app_config,
            hub: Arc::clone(hub),
            event_publisher,
        }
    }
}
