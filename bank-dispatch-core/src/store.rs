//! Per-bank action lists
//!
//! The [`ActionStore`] owns the press and release lists of every bank and is
//! the only place they are mutated. Mutations keep the subscription lifecycle
//! in step (unsubscribe before a change, subscribe after) and report the
//! follow-up work they need as [`StoreEffect`]s.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::action::{Action, ActionId, Options};
use crate::bank::{BankId, Direction};
use crate::config::PersistenceKeys;
use crate::effect::{Outcome, StoreEffect};
use crate::error::EngineError;
use crate::host::Persistence;
use crate::registry::InstanceRegistry;
use crate::subscription::{Slot, SubscriptionLifecycle};

type Lists = BTreeMap<BankId, Vec<Action>>;

/// Persisted layout: page -> bank -> actions, with string keys. Missing and
/// null entries are tolerated.
type PersistedLists = BTreeMap<String, Option<BTreeMap<String, Option<Vec<Option<Action>>>>>>;

/// Owner of every bank's press and release action lists.
pub struct ActionStore {
    press: Lists,
    release: Lists,
    lifecycle: SubscriptionLifecycle,
}

impl ActionStore {
    pub fn new(registry: Arc<dyn InstanceRegistry>) -> Self {
        Self {
            press: Lists::new(),
            release: Lists::new(),
            lifecycle: SubscriptionLifecycle::new(registry),
        }
    }

    /// Load both lists from persistence. Missing keys start empty.
    pub fn load(
        registry: Arc<dyn InstanceRegistry>,
        persistence: &dyn Persistence,
        keys: &PersistenceKeys,
    ) -> Result<Self, EngineError> {
        let mut store = Self::new(registry);
        store.press = decode_lists(persistence.get(&keys.press), &keys.press)?;
        store.release = decode_lists(persistence.get(&keys.release), &keys.release)?;
        debug!(
            press_banks = store.press.len(),
            release_banks = store.release.len(),
            "Loaded action lists"
        );
        Ok(store)
    }

    /// Write both lists and flush.
    pub fn persist(&self, persistence: &dyn Persistence, keys: &PersistenceKeys) {
        persistence.set(&keys.press, encode_lists(&self.press));
        persistence.set(&keys.release, encode_lists(&self.release));
        persistence.save();
    }

    fn lists(&self, direction: Direction) -> &Lists {
        match direction {
            Direction::Press => &self.press,
            Direction::Release => &self.release,
        }
    }

    fn split_mut(&mut self, direction: Direction) -> (&mut Lists, &mut SubscriptionLifecycle) {
        match direction {
            Direction::Press => (&mut self.press, &mut self.lifecycle),
            Direction::Release => (&mut self.release, &mut self.lifecycle),
        }
    }

    /// The list for a bank, or an empty slice if it was never materialized.
    pub fn get(&self, bank: BankId, direction: Direction) -> &[Action] {
        self.lists(direction)
            .get(&bank)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The list for a bank, if it was ever materialized.
    pub fn try_get(&self, bank: BankId, direction: Direction) -> Option<&[Action]> {
        self.lists(direction).get(&bank).map(Vec::as_slice)
    }

    /// The list for a bank, materializing an empty one on first read.
    pub fn list(&mut self, bank: BankId, direction: Direction) -> &[Action] {
        let (lists, _) = self.split_mut(direction);
        lists.entry(bank).or_default()
    }

    pub fn find(&self, bank: BankId, direction: Direction, id: &ActionId) -> Option<&Action> {
        self.get(bank, direction).iter().find(|a| &a.id == id)
    }

    /// Banks that have a materialized list in the given direction.
    pub fn banks(&self, direction: Direction) -> impl Iterator<Item = BankId> + '_ {
        self.lists(direction).keys().copied()
    }

    /// A new action for `instance_id`/`kind` with options defaulted from the
    /// definition, or `None` if the instance is unknown.
    pub fn action_defaults(&self, instance_id: &str, kind: &str) -> Option<Action> {
        let registry = self.lifecycle.registry();
        registry.instance(instance_id)?;

        let mut action = Action::new(instance_id, kind);
        if let Some(definition) = registry.definition(instance_id, kind) {
            for option in definition.options() {
                action
                    .options
                    .insert(option.id.clone(), option.default.clone());
            }
        }
        Some(action)
    }

    /// Append a new action. Unknown instances are ignored.
    pub fn add(
        &mut self,
        bank: BankId,
        direction: Direction,
        instance_id: &str,
        kind: &str,
    ) -> Outcome<StoreEffect> {
        let Some(action) = self.action_defaults(instance_id, kind) else {
            debug!(bank = %bank, instance = instance_id, "Ignoring action for unknown instance");
            return Outcome::unchanged();
        };

        let (lists, lifecycle) = self.split_mut(direction);
        lifecycle.subscribe(Slot::of(bank, direction, &action), &action);
        lists.entry(bank).or_default().push(action);
        Outcome::saved(bank)
    }

    pub fn delete(
        &mut self,
        bank: BankId,
        direction: Direction,
        id: &ActionId,
    ) -> Outcome<StoreEffect> {
        let (lists, lifecycle) = self.split_mut(direction);
        let Some(list) = lists.get_mut(&bank) else {
            return Outcome::unchanged();
        };
        let Some(index) = list.iter().position(|a| &a.id == id) else {
            return Outcome::unchanged();
        };

        let slot = Slot::new(bank, direction, id.clone());
        lifecycle.unsubscribe(&slot, &list[index]);
        list.remove(index);
        Outcome::saved(bank)
    }

    /// Edit one action in place, taking it out of live state for the edit.
    fn edit<F>(&mut self, bank: BankId, direction: Direction, id: &ActionId, f: F) -> bool
    where
        F: FnOnce(&mut Action),
    {
        let (lists, lifecycle) = self.split_mut(direction);
        let Some(action) = lists
            .get_mut(&bank)
            .and_then(|list| list.iter_mut().find(|a| &a.id == id))
        else {
            return false;
        };

        let slot = Slot::new(bank, direction, id.clone());
        lifecycle.unsubscribe(&slot, action);
        f(action);
        lifecycle.subscribe(slot, action);
        true
    }

    pub fn update_option(
        &mut self,
        bank: BankId,
        direction: Direction,
        id: &ActionId,
        key: &str,
        value: Value,
    ) -> Outcome<StoreEffect> {
        let edited = self.edit(bank, direction, id, |action| {
            action.options.insert(key.to_string(), value);
        });
        if edited {
            Outcome::saved(bank)
        } else {
            Outcome::unchanged()
        }
    }

    /// Replace all options of an action (learned values).
    pub fn set_options(
        &mut self,
        bank: BankId,
        direction: Direction,
        id: &ActionId,
        options: Options,
    ) -> Outcome<StoreEffect> {
        let edited = self.edit(bank, direction, id, |action| {
            action.options = options;
        });
        if edited {
            Outcome::saved(bank)
        } else {
            Outcome::unchanged()
        }
    }

    /// Delay does not affect live state, so no resubscription happens.
    pub fn update_delay(
        &mut self,
        bank: BankId,
        direction: Direction,
        id: &ActionId,
        delay: u64,
    ) -> Outcome<StoreEffect> {
        let (lists, _) = self.split_mut(direction);
        match lists
            .get_mut(&bank)
            .and_then(|list| list.iter_mut().find(|a| &a.id == id))
        {
            Some(action) => {
                action.delay = delay;
                Outcome::saved(bank)
            }
            None => Outcome::unchanged(),
        }
    }

    /// Move the action at `from` to `to`. Out-of-range `from` is ignored and
    /// `to` is clamped to the end of the list.
    pub fn reorder(
        &mut self,
        bank: BankId,
        direction: Direction,
        from: usize,
        to: usize,
    ) -> Outcome<StoreEffect> {
        let (lists, _) = self.split_mut(direction);
        let Some(list) = lists.get_mut(&bank) else {
            return Outcome::unchanged();
        };
        if from >= list.len() {
            return Outcome::unchanged();
        }

        let action = list.remove(from);
        let to = to.min(list.len());
        list.insert(to, action);
        Outcome::saved(bank)
    }

    /// Clear both lists of a bank.
    pub fn reset_bank(&mut self, bank: BankId) -> Outcome<StoreEffect> {
        self.unsubscribe_bank(bank);
        self.press.insert(bank, Vec::new());
        self.release.insert(bank, Vec::new());
        debug!(bank = %bank, "Bank reset");
        Outcome::saved(bank)
    }

    /// Make every action of a bank live.
    pub fn subscribe_bank(&mut self, bank: BankId) {
        for direction in [Direction::Press, Direction::Release] {
            let (lists, lifecycle) = self.split_mut(direction);
            for action in lists.get(&bank).into_iter().flatten() {
                lifecycle.subscribe(Slot::of(bank, direction, action), action);
            }
        }
    }

    /// Take every action of a bank out of live state.
    pub fn unsubscribe_bank(&mut self, bank: BankId) {
        for direction in [Direction::Press, Direction::Release] {
            let (lists, lifecycle) = self.split_mut(direction);
            for action in lists.get(&bank).into_iter().flatten() {
                lifecycle.unsubscribe(&Slot::of(bank, direction, action), action);
            }
        }
    }

    /// Make every stored action live.
    pub fn activate_all(&mut self) {
        for direction in [Direction::Press, Direction::Release] {
            let (lists, lifecycle) = self.split_mut(direction);
            for (bank, list) in lists.iter() {
                for action in list {
                    lifecycle.subscribe(Slot::of(*bank, direction, action), action);
                }
            }
        }
    }

    /// Remove every action whose instance does not satisfy `keep`.
    fn retain_instances<F>(&mut self, keep: F) -> Outcome<StoreEffect>
    where
        F: Fn(&str) -> bool,
    {
        let mut outcome = Outcome::unchanged();
        for direction in [Direction::Press, Direction::Release] {
            let (lists, lifecycle) = self.split_mut(direction);
            for (bank, list) in lists.iter_mut() {
                let before = list.len();
                list.retain(|action| {
                    if keep(&action.instance_id) {
                        return true;
                    }
                    debug!(
                        bank = %bank,
                        direction = %direction,
                        action = %action.id,
                        "Removing action of missing instance"
                    );
                    lifecycle.unsubscribe(&Slot::of(*bank, direction, action), action);
                    false
                });
                if list.len() != before {
                    outcome = outcome.merge(Outcome::changed_with(StoreEffect::CheckStatus(*bank)));
                }
            }
        }
        if outcome.changed {
            outcome = outcome.with(StoreEffect::Save);
        }
        outcome
    }

    /// Drop every action whose instance is not in `known`.
    pub fn prune(&mut self, known: &HashSet<String>) -> Outcome<StoreEffect> {
        self.retain_instances(|id| known.contains(id))
    }

    /// Drop every action of one instance.
    pub fn remove_instance(&mut self, instance_id: &str) -> Outcome<StoreEffect> {
        self.retain_instances(|id| id != instance_id)
    }

    /// Ensure buttons `1..=max_buttons` have (possibly empty) lists on every
    /// known page.
    pub fn materialize_grid(&mut self, max_buttons: u32) -> Outcome<StoreEffect> {
        let pages: BTreeSet<u32> = self
            .press
            .keys()
            .chain(self.release.keys())
            .map(|bank| bank.page)
            .collect();

        let mut changed = false;
        for page in pages {
            for index in 1..=max_buttons {
                let bank = BankId::new(page, index);
                for lists in [&mut self.press, &mut self.release] {
                    if !lists.contains_key(&bank) {
                        lists.insert(bank, Vec::new());
                        changed = true;
                    }
                }
            }
        }

        if changed {
            Outcome::changed_with(StoreEffect::Save)
        } else {
            Outcome::unchanged()
        }
    }

    /// Every action in one direction that references `instance_id`.
    pub fn actions_for_instance(&self, instance_id: &str, direction: Direction) -> Vec<Action> {
        self.lists(direction)
            .values()
            .flatten()
            .filter(|action| action.instance_id == instance_id)
            .cloned()
            .collect()
    }

    /// Banks with an action for `instance_id` in either list.
    pub fn banks_referencing(&self, instance_id: &str) -> BTreeSet<BankId> {
        self.press
            .iter()
            .chain(self.release.iter())
            .filter(|(_, list)| list.iter().any(|a| a.instance_id == instance_id))
            .map(|(bank, _)| *bank)
            .collect()
    }

    pub fn lifecycle(&self) -> &SubscriptionLifecycle {
        &self.lifecycle
    }
}

impl std::fmt::Debug for ActionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionStore")
            .field("press_banks", &self.press.len())
            .field("release_banks", &self.release.len())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

fn decode_lists(value: Option<Value>, key: &str) -> Result<Lists, EngineError> {
    let Some(value) = value else {
        return Ok(Lists::new());
    };
    let persisted: PersistedLists =
        serde_json::from_value(value).map_err(|source| EngineError::Decode {
            key: key.to_string(),
            source,
        })?;

    let mut lists = Lists::new();
    for (page_key, banks) in persisted {
        let Ok(page) = page_key.parse::<u32>() else {
            warn!(key, page = %page_key, "Skipping non-numeric page");
            continue;
        };
        for (bank_key, actions) in banks.into_iter().flatten() {
            let Ok(index) = bank_key.parse::<u32>() else {
                warn!(key, page, bank = %bank_key, "Skipping non-numeric bank");
                continue;
            };
            let actions = actions.into_iter().flatten().flatten().collect();
            lists.insert(BankId::new(page, index), actions);
        }
    }
    Ok(lists)
}

fn encode_lists(lists: &Lists) -> Value {
    let mut pages: BTreeMap<String, BTreeMap<String, &Vec<Action>>> = BTreeMap::new();
    for (bank, actions) in lists {
        pages
            .entry(bank.page.to_string())
            .or_default()
            .insert(bank.bank.to_string(), actions);
    }
    serde_json::to_value(pages).unwrap_or(Value::Null)
}
