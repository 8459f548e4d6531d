//! Message normalisation and routing core.

pub mod forwarder;
pub mod router;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

pub use forwarder::Forwarder;

use crate::{
    mqtt::{InboundMessage, Publisher},
    notify::Notifier,
    records::{HistoryIds, RecordBuilder},
    store::Store,
    topics::Topics,
};

/// Everything the router needs, owned in one place. Collaborators are
/// trait objects so tests can swap in fakes.
pub struct Bridge {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    forwarder: Forwarder,
    topics: Topics,
    builder: RecordBuilder,
    ids: HistoryIds,
    auto_control: bool,
}

impl Bridge {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn Publisher>,
        notifier: Arc<dyn Notifier>,
        topics: Topics,
        builder: RecordBuilder,
        auto_control: bool,
    ) -> Self {
        Self {
            store,
            notifier,
            forwarder: Forwarder::new(publisher, topics.clone()),
            topics,
            builder,
            ids: HistoryIds::new(),
            auto_control,
        }
    }

    /// Consume inbound messages one at a time until the channel closes.
    ///
    /// Each message runs on its own task and is awaited before the next is
    /// taken, so a panicking handler loses only its own message.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>) {
        info!("Router started");
        while let Some(msg) = inbound.recv().await {
            let topic = msg.topic.clone();
            let bridge = Arc::clone(&self);
            if let Err(e) = tokio::spawn(async move { bridge.handle(msg).await }).await {
                error!(topic = %topic, error = %e, "Message handler aborted");
            }
        }
        info!("Inbound channel closed; router stopped");
    }
}
