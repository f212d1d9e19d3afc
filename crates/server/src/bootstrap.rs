use std::sync::Arc;

use tracing::info;
use turnero_chat::events::reservation_dispatcher;
use turnero_chat::gateway::{
    ChatTransport, GatewayRunner, NoopChatTransport, ReconnectPolicy, TransportDirectory,
    TransportNotifier,
};
use turnero_core::config::{AppConfig, TransportMode};
use turnero_core::{ReservationService, SystemClock};

use crate::console::ConsoleTransport;

pub struct Application {
    pub config: AppConfig,
    pub service: ReservationService,
    pub gateway: GatewayRunner,
}

pub fn bootstrap_with_config(config: AppConfig) -> Application {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        storage_path = %config.storage.path.display(),
        "starting application bootstrap"
    );

    let transport: Arc<dyn ChatTransport> = match config.chat.transport {
        TransportMode::Noop => Arc::new(NoopChatTransport::new()),
        TransportMode::Console => Arc::new(ConsoleTransport::stdio()),
    };

    let store = Arc::new(turnero_store::open(config.storage.path.clone()));
    let service = ReservationService::new(
        store,
        Arc::new(SystemClock),
        Arc::new(TransportNotifier::new(transport.clone())),
        config.reminders.settings(),
    );
    let dispatcher = reservation_dispatcher(
        service.clone(),
        Arc::new(TransportDirectory::new(transport.clone())),
        &config.chat.command_prefix,
    );
    let gateway = GatewayRunner::new(transport, dispatcher, ReconnectPolicy::default());

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        transport_mode = ?config.chat.transport,
        reminder_lead_minutes = config.reminders.lead_minutes,
        "application wired"
    );

    Application { config, service, gateway }
}
