//! Supervisor notifications
//!
//! Handlers are plain synchronous callbacks, invoked outside of any
//! supervisor lock in subscription order. Forwarding to async consumers is
//! the handler's job (the WebSocket server pushes into channels).

use crate::fsm::AppState;
use nimbus_app::MaintainingCommandStatus;
use nimbus_core::AppErrorInfo;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// An application's lifecycle state changed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChanged {
    /// Application name
    pub app: String,
    /// New state
    pub state: AppState,
    /// Error kept by the state machine, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppErrorInfo>,
}

/// An application's maintaining message changed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkingMessageChanged {
    /// Application name
    pub app: String,
    /// New message
    pub message: String,
    /// Maintaining status at the time of the message
    pub status: Option<MaintainingCommandStatus>,
}

type StatusHandler = Arc<dyn Fn(&StatusChanged) + Send + Sync>;
type WorkingMessageHandler = Arc<dyn Fn(&WorkingMessageChanged) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Status,
    WorkingMessage,
}

/// Handler registry shared by the supervisor and its state machines
#[derive(Default)]
pub(crate) struct SupervisorEvents {
    next_id: AtomicU64,
    status: RwLock<Vec<(u64, StatusHandler)>>,
    working_message: RwLock<Vec<(u64, WorkingMessageHandler)>>,
}

impl SupervisorEvents {
    pub(crate) fn on_status_changed(
        self: &Arc<Self>,
        handler: StatusHandler,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.status.write().push((id, handler));
        Subscription::new(self, Channel::Status, id)
    }

    pub(crate) fn on_working_message_changed(
        self: &Arc<Self>,
        handler: WorkingMessageHandler,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.working_message.write().push((id, handler));
        Subscription::new(self, Channel::WorkingMessage, id)
    }

    pub(crate) fn status_changed(&self, event: StatusChanged) {
        let handlers: Vec<StatusHandler> = self
            .status
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(&event);
        }
    }

    pub(crate) fn working_message_changed(&self, event: WorkingMessageChanged) {
        let handlers: Vec<WorkingMessageHandler> = self
            .working_message
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(&event);
        }
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.status.read().len() + self.working_message.read().len()
    }

    fn remove(&self, channel: Channel, id: u64) -> bool {
        match channel {
            Channel::Status => remove_handler(&mut self.status.write(), id),
            Channel::WorkingMessage => remove_handler(&mut self.working_message.write(), id),
        }
    }
}

fn remove_handler<H>(handlers: &mut Vec<(u64, H)>, id: u64) -> bool {
    let before = handlers.len();
    handlers.retain(|(existing, _)| *existing != id);
    handlers.len() != before
}

impl fmt::Debug for SupervisorEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorEvents")
            .field("status_handlers", &self.status.read().len())
            .field("working_message_handlers", &self.working_message.read().len())
            .finish()
    }
}

/// Handle to a supervisor subscription
///
/// Dropping the handle keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    events: Weak<SupervisorEvents>,
    channel: Channel,
    id: u64,
}

impl Subscription {
    fn new(events: &Arc<SupervisorEvents>, channel: Channel, id: u64) -> Self {
        Self {
            events: Arc::downgrade(events),
            channel,
            id,
        }
    }

    /// Remove the handler; returns whether it was still registered
    pub fn unsubscribe(self) -> bool {
        self.events
            .upgrade()
            .map(|events| events.remove(self.channel, self.id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn status(app: &str, state: AppState) -> StatusChanged {
        StatusChanged {
            app: app.to_string(),
            state,
            error: None,
        }
    }

    #[test]
    fn test_status_handlers_receive_events() {
        let events = Arc::new(SupervisorEvents::default());
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();

        let subscription = events.on_status_changed(Arc::new(move |event| {
            assert_eq!(event.app, "main");
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        events.status_changed(status("main", AppState::Running));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(subscription.unsubscribe());
        events.status_changed(status("main", AppState::Stopped));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(events.handler_count(), 0);
    }

    #[test]
    fn test_unsubscribe_after_drop_of_registry() {
        let events = Arc::new(SupervisorEvents::default());
        let subscription = events.on_working_message_changed(Arc::new(|_| {}));
        drop(events);
        assert!(!subscription.unsubscribe());
    }

    #[test]
    fn test_status_serialization() {
        let value = serde_json::to_value(status("crm", AppState::NotFound)).unwrap();
        assert_eq!(value, serde_json::json!({ "app": "crm", "state": "not_found" }));
    }
}
