use std::collections::BTreeMap;
use std::sync::Arc;

use super::controller::{FormController, FormResult, read_lock, write_lock};

/// Change notification delivered to subscribers. Names are display names as of the
/// change.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FormEvent {
    FieldChanged(String),
    FieldArrayChanged(String),
    FormChanged,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(u64);

pub(super) type Listener = Arc<dyn Fn(&FormEvent) + Send + Sync>;

#[derive(Default)]
pub(super) struct Observers {
    next_id: u64,
    listeners: BTreeMap<SubscriptionId, Listener>,
}

impl FormController {
    /// Registers a listener. Listeners run after the state lock is released, so they may
    /// read the form, and before the mutating call returns.
    pub fn subscribe(
        &self,
        listener: impl Fn(&FormEvent) + Send + Sync + 'static,
    ) -> FormResult<SubscriptionId> {
        let mut observers = write_lock(&self.observers, "subscribing to form events")?;
        observers.next_id += 1;
        let id = SubscriptionId(observers.next_id);
        observers.listeners.insert(id, Arc::new(listener));
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> FormResult<bool> {
        Ok(write_lock(&self.observers, "unsubscribing from form events")?
            .listeners
            .remove(&id)
            .is_some())
    }

    pub(super) fn notify(&self, events: Vec<FormEvent>) -> FormResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let listeners = read_lock(&self.observers, "notifying form listeners")?
            .listeners
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for event in &events {
            for listener in &listeners {
                listener(event);
            }
        }
        Ok(())
    }
}
