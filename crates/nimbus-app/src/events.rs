//! Lifecycle events
//!
//! Listeners are async and awaited one after another in registration order,
//! so a lifecycle phase only continues once every listener has finished. A
//! listener error aborts the phase that emitted the event.

use crate::application::Application;
use crate::maintaining::MaintainingCommandStatus;
use async_trait::async_trait;
use nimbus_core::Result;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event emitted by an [`Application`]
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// Before plugin `load` hooks run
    BeforeLoad,
    /// After plugin `load` hooks ran
    AfterLoad,
    /// At the end of a reload
    AfterReload,
    /// Before start listeners
    BeforeStart,
    /// After start listeners
    AfterStart,
    /// Internal: the application finished starting
    Started {
        /// Snapshot of the maintaining status at start
        maintaining_status: Option<MaintainingCommandStatus>,
    },
    /// Before the database is closed
    BeforeStop,
    /// After the database is closed
    AfterStop,
    /// Before teardown
    BeforeDestroy,
    /// After teardown
    AfterDestroy,
    /// Before plugin install hooks
    BeforeInstall,
    /// After the version was recorded
    AfterInstall,
    /// Before migrations run
    BeforeUpgrade,
    /// After the version was recorded
    AfterUpgrade,
    /// Internal: a restart completed
    Restarted,
    /// Maintaining status changed
    Maintaining(MaintainingCommandStatus),
    /// Maintaining message changed
    MaintainingMessageChanged {
        /// New message
        message: String,
        /// Status at the time of the message
        maintaining_status: Option<MaintainingCommandStatus>,
    },
}

/// Discriminant of [`AppEvent`] used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`AppEvent::BeforeLoad`]
    BeforeLoad,
    /// [`AppEvent::AfterLoad`]
    AfterLoad,
    /// [`AppEvent::AfterReload`]
    AfterReload,
    /// [`AppEvent::BeforeStart`]
    BeforeStart,
    /// [`AppEvent::AfterStart`]
    AfterStart,
    /// [`AppEvent::Started`]
    Started,
    /// [`AppEvent::BeforeStop`]
    BeforeStop,
    /// [`AppEvent::AfterStop`]
    AfterStop,
    /// [`AppEvent::BeforeDestroy`]
    BeforeDestroy,
    /// [`AppEvent::AfterDestroy`]
    AfterDestroy,
    /// [`AppEvent::BeforeInstall`]
    BeforeInstall,
    /// [`AppEvent::AfterInstall`]
    AfterInstall,
    /// [`AppEvent::BeforeUpgrade`]
    BeforeUpgrade,
    /// [`AppEvent::AfterUpgrade`]
    AfterUpgrade,
    /// [`AppEvent::Restarted`]
    Restarted,
    /// [`AppEvent::Maintaining`]
    Maintaining,
    /// [`AppEvent::MaintainingMessageChanged`]
    MaintainingMessageChanged,
}

impl EventKind {
    /// Event name as exposed to listeners and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BeforeLoad => "beforeLoad",
            EventKind::AfterLoad => "afterLoad",
            EventKind::AfterReload => "afterReload",
            EventKind::BeforeStart => "beforeStart",
            EventKind::AfterStart => "afterStart",
            EventKind::Started => "__started",
            EventKind::BeforeStop => "beforeStop",
            EventKind::AfterStop => "afterStop",
            EventKind::BeforeDestroy => "beforeDestroy",
            EventKind::AfterDestroy => "afterDestroy",
            EventKind::BeforeInstall => "beforeInstall",
            EventKind::AfterInstall => "afterInstall",
            EventKind::BeforeUpgrade => "beforeUpgrade",
            EventKind::AfterUpgrade => "afterUpgrade",
            EventKind::Restarted => "__restarted",
            EventKind::Maintaining => "maintaining",
            EventKind::MaintainingMessageChanged => "maintainingMessageChanged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppEvent {
    /// Subscription key of this event
    pub fn kind(&self) -> EventKind {
        match self {
            AppEvent::BeforeLoad => EventKind::BeforeLoad,
            AppEvent::AfterLoad => EventKind::AfterLoad,
            AppEvent::AfterReload => EventKind::AfterReload,
            AppEvent::BeforeStart => EventKind::BeforeStart,
            AppEvent::AfterStart => EventKind::AfterStart,
            AppEvent::Started { .. } => EventKind::Started,
            AppEvent::BeforeStop => EventKind::BeforeStop,
            AppEvent::AfterStop => EventKind::AfterStop,
            AppEvent::BeforeDestroy => EventKind::BeforeDestroy,
            AppEvent::AfterDestroy => EventKind::AfterDestroy,
            AppEvent::BeforeInstall => EventKind::BeforeInstall,
            AppEvent::AfterInstall => EventKind::AfterInstall,
            AppEvent::BeforeUpgrade => EventKind::BeforeUpgrade,
            AppEvent::AfterUpgrade => EventKind::AfterUpgrade,
            AppEvent::Restarted => EventKind::Restarted,
            AppEvent::Maintaining(_) => EventKind::Maintaining,
            AppEvent::MaintainingMessageChanged { .. } => EventKind::MaintainingMessageChanged,
        }
    }
}

/// Async event listener
#[async_trait]
pub trait Listener: Send + Sync {
    /// Handle an event emitted by `app`
    async fn on_event(&self, app: &Application, event: &AppEvent) -> Result<()>;
}

/// Adapter turning a synchronous closure into a [`Listener`]
pub struct FnListener<F> {
    f: F,
}

impl<F> fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Listener for FnListener<F>
where
    F: Fn(&Application, &AppEvent) + Send + Sync,
{
    async fn on_event(&self, app: &Application, event: &AppEvent) -> Result<()> {
        (self.f)(app, event);
        Ok(())
    }
}

/// Wrap a closure as a listener
pub fn listener_fn<F>(f: F) -> Arc<dyn Listener>
where
    F: Fn(&Application, &AppEvent) + Send + Sync + 'static,
{
    Arc::new(FnListener { f })
}

/// Handle returned by a subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: EventKind,
    listener: Arc<dyn Listener>,
    reinitializable: bool,
}

/// Ordered listener registry owned by an application
#[derive(Default)]
pub(crate) struct EventBus {
    next_id: AtomicU64,
    registrations: RwLock<Vec<Registration>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.registrations.read().len())
            .finish()
    }
}

impl EventBus {
    pub(crate) fn on(&self, kind: EventKind, listener: Arc<dyn Listener>) -> ListenerId {
        self.register(kind, listener, false)
    }

    /// Listener dropped by the next [`EventBus::remove_reinitializable`]
    pub(crate) fn on_reinitializable(
        &self,
        kind: EventKind,
        listener: Arc<dyn Listener>,
    ) -> ListenerId {
        self.register(kind, listener, true)
    }

    fn register(
        &self,
        kind: EventKind,
        listener: Arc<dyn Listener>,
        reinitializable: bool,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registrations.write().push(Registration {
            id,
            kind,
            listener,
            reinitializable,
        });
        id
    }

    pub(crate) fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| !(r.id == id && r.kind == kind));
        registrations.len() != before
    }

    pub(crate) fn listener_count(&self, kind: EventKind) -> usize {
        self.registrations
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    pub(crate) fn remove_reinitializable(&self) -> usize {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| !r.reinitializable);
        before - registrations.len()
    }

    fn listeners(&self, kind: EventKind) -> Vec<Arc<dyn Listener>> {
        self.registrations
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| Arc::clone(&r.listener))
            .collect()
    }

    /// Await every listener for the event's kind in order
    pub(crate) async fn emit(&self, app: &Application, event: &AppEvent) -> Result<()> {
        let kind = event.kind();
        for listener in self.listeners(kind) {
            listener.on_event(app, event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn Listener> {
        listener_fn(|_, _| {})
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(AppEvent::BeforeLoad.kind().as_str(), "beforeLoad");
        assert_eq!(
            AppEvent::Started {
                maintaining_status: None
            }
            .kind()
            .as_str(),
            "__started"
        );
        assert_eq!(EventKind::Restarted.to_string(), "__restarted");
    }

    #[test]
    fn test_off_and_count() {
        let bus = EventBus::default();
        let first = bus.on(EventKind::BeforeLoad, noop());
        bus.on(EventKind::BeforeLoad, noop());
        bus.on(EventKind::AfterLoad, noop());

        assert_eq!(bus.listener_count(EventKind::BeforeLoad), 2);
        assert!(!bus.off(EventKind::AfterLoad, first));
        assert!(bus.off(EventKind::BeforeLoad, first));
        assert_eq!(bus.listener_count(EventKind::BeforeLoad), 1);
    }

    #[test]
    fn test_remove_reinitializable_keeps_others() {
        let bus = EventBus::default();
        bus.on(EventKind::AfterStop, noop());
        bus.on_reinitializable(EventKind::AfterStop, noop());
        bus.on_reinitializable(EventKind::BeforeLoad, noop());

        assert_eq!(bus.remove_reinitializable(), 2);
        assert_eq!(bus.listener_count(EventKind::AfterStop), 1);
        assert_eq!(bus.listener_count(EventKind::BeforeLoad), 0);
    }
}
