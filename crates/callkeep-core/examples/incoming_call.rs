//! Walks one incoming call through alert, answer, hold, mute and hang-up.
//!
//! Run with `RUST_LOG=callkeep_core=debug` to see every transition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callkeep_core::logging::setup_logging;
use callkeep_core::{
    AppEvent, AppEventDispatcher, ApplicationEventHandler, CallKeepConfig, CallKeepService,
    ConnectionEvent, InMemoryRelay,
};
use tracing::info;

struct PrintingHandler;

#[async_trait]
impl ApplicationEventHandler for PrintingHandler {
    async fn on_event(&self, event: AppEvent) {
        info!(
            "app <- {} for {} ({} attributes)",
            event.kind,
            event.call_id,
            event.attributes.len()
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CallKeepConfig::from_toml_str(
        r#"
        event_channel_capacity = 32

        [logging]
        level = "info"

        [notification]
        app_id = "com.example.phone"
        channel_name = "Incoming calls"
        "#,
    )?;

    setup_logging(&config.logging)?;

    let relay = Arc::new(InMemoryRelay::new());
    let (service, rx) = CallKeepService::new(config, relay.clone())?;
    let dispatcher = AppEventDispatcher::spawn(rx, Arc::new(PrintingHandler));

    let call_id = uuid::Uuid::new_v4().to_string();
    service.report_incoming_call(
        call_id.as_str(),
        [("callerName", "Alice"), ("number", "tel:+15550100")]
            .into_iter()
            .collect(),
    )?;

    let alert = relay
        .alert(&call_id)
        .ok_or_else(|| anyhow::anyhow!("alert was not shown"))?;
    info!(
        "Alert {} on channel {} for {:?}",
        alert.notification_id, alert.channel_id, alert.caller_name
    );

    // user taps "answer" on the alert
    service.receiver().handle(alert.answer.fire())?;

    service.dispatch(&call_id, ConnectionEvent::AudioStateChanged { muted: true })?;
    let held = service.dispatch(&call_id, ConnectionEvent::Hold)?;
    info!("Call is now {}", held.state());
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.dispatch(&call_id, ConnectionEvent::Unhold)?;
    service.dispatch(&call_id, ConnectionEvent::PlayDtmfTone('1'))?;
    service.dispatch(&call_id, ConnectionEvent::ReportDisconnect(2))?;

    drop(service);
    let delivered = dispatcher.join().await;
    info!("Delivered {} application events", delivered);
    Ok(())
}
