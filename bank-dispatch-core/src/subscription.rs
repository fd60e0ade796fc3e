//! Live-state notifications for actions
//!
//! An action is *live* while it sits in a list and its instance has been told
//! about it through the definition's `subscribe` hook. The lifecycle remembers
//! the definition each live action was subscribed with, so `unsubscribe`
//! still reaches the right definition after the instance has left the
//! registry, and runs at most once per subscription.

use std::collections::HashMap;
use std::sync::Arc;

use crate::action::{Action, ActionId};
use crate::bank::{BankId, Direction};
use crate::registry::{ActionDefinition, InstanceRegistry};

/// Position of an action: ids are only unique within one list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    pub bank: BankId,
    pub direction: Direction,
    pub id: ActionId,
}

impl Slot {
    pub fn new(bank: BankId, direction: Direction, id: ActionId) -> Self {
        Self {
            bank,
            direction,
            id,
        }
    }

    pub fn of(bank: BankId, direction: Direction, action: &Action) -> Self {
        Self::new(bank, direction, action.id.clone())
    }
}

pub struct SubscriptionLifecycle {
    registry: Arc<dyn InstanceRegistry>,
    live: HashMap<Slot, Arc<dyn ActionDefinition>>,
}

impl SubscriptionLifecycle {
    pub fn new(registry: Arc<dyn InstanceRegistry>) -> Self {
        Self {
            registry,
            live: HashMap::new(),
        }
    }

    /// Make an action live. No-op if it already is, or if its instance or
    /// definition is unknown.
    pub fn subscribe(&mut self, slot: Slot, action: &Action) {
        if self.live.contains_key(&slot) {
            return;
        }
        let Some(definition) = self.registry.definition(&action.instance_id, &action.kind) else {
            return;
        };
        if definition.has_subscribe() {
            definition.subscribe(action);
        }
        self.live.insert(slot, definition);
    }

    /// Take an action out of live state. No-op if it is not live.
    pub fn unsubscribe(&mut self, slot: &Slot, action: &Action) {
        if let Some(definition) = self.live.remove(slot) {
            if definition.has_unsubscribe() {
                definition.unsubscribe(action);
            }
        }
    }

    pub fn is_live(&self, slot: &Slot) -> bool {
        self.live.contains_key(slot)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn registry(&self) -> &Arc<dyn InstanceRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for SubscriptionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionLifecycle")
            .field("live", &self.live.len())
            .finish()
    }
}
