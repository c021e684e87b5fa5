use crate::model::Provider;

/// Completions reported back to the engine loop by background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    AccountSwitched {
        account_id: String,
        result: Result<(), String>,
    },
    AccountAdded {
        provider: Provider,
        count: usize,
    },
    LoginCompleted {
        provider: Provider,
    },
    /// An optimistic local change needs the authoritative state.
    ReconcileRequested,
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<EngineEvent>;

pub(crate) fn emit(events: &EventSender, event: EngineEvent) {
    if events.send(event).is_err() {
        tracing::debug!("engine loop has stopped; dropping background event");
    }
}
