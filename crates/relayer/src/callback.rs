use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use pn_types::callback::{CallbackKind, DomainEvent};

pub type Callback = Arc<dyn Fn(DomainEvent) + Send + Sync>;

/// One subscriber per kind; registering again replaces the previous one.
#[derive(Default)]
pub struct CallbackDispatcher {
    callbacks: RwLock<HashMap<CallbackKind, Callback>>,
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: CallbackKind, callback: Callback) {
        if self.callbacks.write().insert(kind, callback).is_some() {
            log::debug!("replaced {:?} callback", kind);
        }
    }

    /// Returns whether a subscriber received the event.
    pub fn dispatch(&self, event: DomainEvent) -> bool {
        let kind = event.kind();
        // clone out so the callback runs without the lock held
        let callback = self.callbacks.read().get(&kind).cloned();
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }
}
