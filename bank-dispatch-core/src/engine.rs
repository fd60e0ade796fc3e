//! The dispatch engine
//!
//! [`Engine`] ties the action store, latch state, delay scheduler, running
//! indication and status memo together behind one `&mut self` API. It is
//! single-threaded: every method runs to completion before the next input is
//! looked at, and handlers that want to change the engine go through an
//! [`EngineHandle`](crate::runtime::EngineHandle) instead of re-entering it.
//!
//! Timers and deferred handlers need a tokio runtime; call the engine from
//! within one.

use std::collections::HashSet;
use std::task::{Context, Poll};
use std::time::Duration;

use tracing::{debug, info};

use crate::action::{Action, ActionId, Options};
use crate::bank::{BankId, Direction, GroupKey, RunSource};
use crate::command::{BankCommand, Response};
use crate::config::EngineConfig;
use crate::dispatcher::{is_runnable, run_action, DispatchOutcome, SkipReason};
use crate::effect::{Outcome, StoreEffect};
use crate::error::EngineError;
use crate::host::Host;
use crate::latch::{LatchDecision, LatchStateMachine, PageNav, Suppression};
use crate::learn::{LearnCoordinator, LearnRequest};
use crate::running::RunningTracker;
use crate::scheduler::{effective_delays, DelayScheduler, Expired};
use crate::status::{Severity, StatusAggregator};
use crate::store::ActionStore;

/// Counts for one batch handed to the scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Executed synchronously, or handed off as deferred work.
    pub immediate: usize,
    /// Armed as timers.
    pub delayed: usize,
    /// Not run because the instance was missing or disabled.
    pub skipped: usize,
    /// Run now, but the handler failed, panicked or was missing.
    pub failed: usize,
}

/// What a button event did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PressOutcome {
    Suppressed(Suppression),
    Navigated(PageNav),
    /// Push was indicated but the list was empty.
    NoActions,
    Dispatched(RunSummary),
}

/// Where learned options go once they arrive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LearnTarget {
    pub bank: BankId,
    pub direction: Direction,
    pub id: ActionId,
}

/// A learn command waiting on its instance.
#[derive(Debug)]
pub struct PendingLearn {
    pub target: Option<LearnTarget>,
    request: LearnRequest,
}

impl PendingLearn {
    /// Run the learn request. Never fails; failures are logged and yield no
    /// options.
    pub async fn resolve(self) -> LearnResult {
        LearnResult {
            target: self.target,
            options: self.request.resolve().await,
        }
    }
}

/// Answer to a [`PendingLearn`], to be applied with [`Engine::apply_learned`].
#[derive(Clone, Debug, PartialEq)]
pub struct LearnResult {
    pub target: Option<LearnTarget>,
    pub options: Option<Options>,
}

/// How a command was answered.
#[derive(Debug)]
pub enum CommandReply {
    Ready(Response),
    /// The command waits on a learn request.
    Learn(PendingLearn),
}

/// Result of [`Engine::handle_command`].
#[derive(Debug)]
pub struct Handled {
    pub reply: CommandReply,
    /// Whether an action list was modified.
    pub changed: bool,
}

impl Handled {
    fn ready(response: Response, changed: bool) -> Self {
        Self {
            reply: CommandReply::Ready(response),
            changed,
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    host: Host,
    store: ActionStore,
    scheduler: DelayScheduler,
    running: RunningTracker,
    latch: LatchStateMachine,
    status: StatusAggregator,
    learn: LearnCoordinator,
    ready: bool,
}

impl Engine {
    /// Load the action lists from persistence. Dispatch is refused until
    /// [`instances_loaded`](Self::instances_loaded) is called.
    pub fn new(host: Host, config: EngineConfig) -> Result<Self, EngineError> {
        let store = ActionStore::load(
            host.registry.clone(),
            host.persistence.as_ref(),
            &config.persistence,
        )?;
        Ok(Self {
            latch: LatchStateMachine::new(config.default_device_id.clone(), config.home_page),
            learn: LearnCoordinator::new(config.learn_timeout()),
            store,
            scheduler: DelayScheduler::new(),
            running: RunningTracker::new(),
            status: StatusAggregator::new(),
            ready: false,
            config,
            host,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &ActionStore {
        &self.store
    }

    /// The registry finished loading with these instances.
    ///
    /// Prunes actions of unknown instances, fills in the button grid, makes
    /// every remaining action live and enables dispatch.
    pub fn instances_loaded<I, S>(&mut self, instance_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known: HashSet<String> = instance_ids.into_iter().map(Into::into).collect();
        let outcome = self
            .store
            .prune(&known)
            .merge(self.store.materialize_grid(self.config.max_buttons))
            .with(StoreEffect::Save);
        self.store.activate_all();
        self.apply(outcome);

        self.ready = true;
        info!(
            instances = known.len(),
            live = self.store.lifecycle().live_count(),
            "Instances loaded, dispatch enabled"
        );
    }

    /// An instance was deleted: drop every action that referenced it.
    pub fn remove_instance(&mut self, instance_id: &str) {
        let outcome = self.store.remove_instance(instance_id);
        if outcome.changed {
            debug!(instance = instance_id, "Removed actions of deleted instance");
        }
        self.apply(outcome);
    }

    /// An instance's status changed: recheck every bank that references it.
    pub fn instance_status_changed(&mut self, instance_id: &str) {
        for bank in self.store.banks_referencing(instance_id) {
            self.check_bank(bank);
        }
    }

    /// Handle a press or release of a button.
    pub fn bank_pressed(
        &mut self,
        bank: BankId,
        direction: Direction,
        device_id: Option<&str>,
    ) -> Result<PressOutcome, EngineError> {
        if !self.ready {
            return Err(EngineError::NotReady);
        }

        let config = self.host.banks.bank_config(bank);
        let surface = self.host.surface.clone();
        let decision =
            self.latch
                .decide(bank, direction, device_id, &config, || surface.is_pushed(bank));

        match decision {
            LatchDecision::Suppressed(reason) => {
                debug!(bank = %bank, direction = %direction, ?reason, "Button event suppressed");
                Ok(PressOutcome::Suppressed(reason))
            }
            LatchDecision::Navigate { nav, device_id } => {
                let paging = &self.host.paging;
                match nav {
                    PageNav::Up => paging.page_up(device_id.as_deref()),
                    PageNav::Set(page) => paging.page_set(device_id.as_deref(), page),
                    PageNav::Down => paging.page_down(device_id.as_deref()),
                }
                Ok(PressOutcome::Navigated(nav))
            }
            LatchDecision::Run {
                direction,
                device_id,
            } => {
                surface.indicate_push(bank, direction.is_press(), device_id.as_deref());

                // Snapshot: handlers may edit this list while it runs
                let actions = self.store.get(bank, direction).to_vec();
                if actions.is_empty() {
                    return Ok(PressOutcome::NoActions);
                }
                debug!(bank = %bank, direction = %direction, count = actions.len(), "Running bank actions");

                let source = RunSource::new(bank, device_id);
                let summary = self.run_actions(
                    &actions,
                    GroupKey::Bank(bank),
                    config.relative_delay,
                    Some(source),
                )?;
                Ok(PressOutcome::Dispatched(summary))
            }
        }
    }

    /// Run a list of actions as one dispatch group.
    ///
    /// Zero-delay actions run now, in list order; the rest are armed as
    /// timers. If anything was armed the group is marked running and its
    /// bank redrawn right away.
    pub fn run_actions(
        &mut self,
        actions: &[Action],
        group: GroupKey,
        relative_delay: bool,
        source: Option<RunSource>,
    ) -> Result<RunSummary, EngineError> {
        if !self.ready {
            return Err(EngineError::NotReady);
        }

        let registry = self.host.registry.clone();
        let mut summary = RunSummary::default();

        for (action, delay) in actions.iter().zip(effective_delays(actions, relative_delay)) {
            if !is_runnable(registry.as_ref(), action) {
                debug!(action = %action.id, instance = %action.instance_id, "Not running action for disabled instance");
                summary.skipped += 1;
                continue;
            }

            if delay > 0 {
                let id = self.scheduler.arm(
                    group.clone(),
                    action.clone(),
                    source.clone(),
                    Duration::from_millis(delay),
                );
                debug!(group = %group, action = %action.id, delay, timer = %id, "Delayed action armed");
                summary.delayed += 1;
            } else {
                match run_action(registry.as_ref(), action, source.as_ref()) {
                    DispatchOutcome::Executed | DispatchOutcome::Deferred => summary.immediate += 1,
                    DispatchOutcome::Failed | DispatchOutcome::Skipped(SkipReason::NoHandler) => {
                        summary.failed += 1
                    }
                    DispatchOutcome::Skipped(_) => summary.skipped += 1,
                }
            }
        }

        if summary.delayed > 0 {
            self.running.mark(group.clone());
            if let Some(bank) = group.bank() {
                self.host.surface.invalidate(bank);
            }
        }
        Ok(summary)
    }

    /// Poll the scheduler for timers that are due, in firing order.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Vec<Expired>> {
        self.scheduler.poll_batch(cx)
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.scheduler.is_empty()
    }

    /// Dispatch a batch of expired timers, then settle their groups.
    ///
    /// A group stops running once its last timer has fired. Timers that share
    /// a deadline arrive in one batch, so each group is settled at most once.
    pub fn handle_expired<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = Expired>,
    {
        let mut fired = 0;
        let mut groups: Vec<GroupKey> = Vec::new();
        for expired in batch {
            run_action(
                self.host.registry.as_ref(),
                &expired.action,
                expired.source.as_ref(),
            );
            fired += 1;
            if !groups.contains(&expired.group) {
                groups.push(expired.group);
            }
        }

        for group in groups {
            if self.scheduler.has_group(&group) || !self.running.clear(&group) {
                continue;
            }
            debug!(group = %group, "Delayed actions finished");
            if let Some(bank) = group.bank() {
                self.host.surface.invalidate(bank);
            }
        }
        fired
    }

    /// Handle every timer that has already expired. Returns how many fired.
    pub fn fire_expired(&mut self) -> usize {
        let expired = self.scheduler.drain_expired();
        self.handle_expired(expired)
    }

    /// Cancel every pending timer and clear all running indication.
    pub fn abort_all(&mut self) {
        let cancelled = self.scheduler.cancel_all();
        let groups = self.running.drain();
        info!(timers = cancelled, groups = groups.len(), "Aborting delayed actions");

        for bank in groups.iter().filter_map(GroupKey::bank) {
            self.host.surface.invalidate(bank);
        }
    }

    /// Cancel the pending timers of one bank. With `unlatch` the button is
    /// shown released and its next release event is dropped.
    ///
    /// Returns how many timers were cancelled.
    pub fn abort_bank(&mut self, bank: BankId, unlatch: bool) -> usize {
        let group = GroupKey::Bank(bank);
        self.running.clear(&group);
        let cancelled = self.scheduler.cancel_group(&group);
        if cancelled > 0 {
            info!(bank = %bank, timers = cancelled, "Aborting button");
        }

        if unlatch {
            self.host.surface.indicate_push(bank, false, None);
            self.latch.set_skip_up(bank);
        }

        if cancelled > 0 {
            self.host.surface.invalidate(bank);
        }
        cancelled
    }

    pub fn is_running(&self, bank: BankId) -> bool {
        self.running.contains(&GroupKey::Bank(bank))
    }

    pub fn is_group_running(&self, group: &GroupKey) -> bool {
        self.running.contains(group)
    }

    pub fn running_groups(&self) -> usize {
        self.running.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.len()
    }

    pub fn bank_status(&self, bank: BankId) -> Option<Severity> {
        self.status.bank_status(bank)
    }

    pub fn actions(&self, bank: BankId, direction: Direction) -> &[Action] {
        self.store.get(bank, direction)
    }

    pub fn actions_for_instance(&self, instance_id: &str) -> Vec<Action> {
        self.store.actions_for_instance(instance_id, Direction::Press)
    }

    pub fn release_actions_for_instance(&self, instance_id: &str) -> Vec<Action> {
        self.store
            .actions_for_instance(instance_id, Direction::Release)
    }

    /// Make a bank's actions live, e.g. after it was copied into place.
    pub fn subscribe_bank(&mut self, bank: BankId) {
        self.store.subscribe_bank(bank);
    }

    /// Take a bank's actions out of live state, e.g. before it is moved.
    pub fn unsubscribe_bank(&mut self, bank: BankId) {
        self.store.unsubscribe_bank(bank);
    }

    /// Handle a transport command.
    pub fn handle_command(&mut self, command: BankCommand) -> Handled {
        match command {
            BankCommand::ListActions { bank, direction } => {
                Handled::ready(Response::Actions(self.store.list(bank, direction).to_vec()), false)
            }
            BankCommand::AddAction {
                bank,
                direction,
                instance_id,
                kind,
            } => {
                let outcome = self.store.add(bank, direction, &instance_id, &kind);
                if !outcome.changed {
                    return Handled::ready(Response::Ignored, false);
                }
                self.reply_with_list(bank, direction, outcome)
            }
            BankCommand::DeleteAction {
                bank,
                direction,
                id,
            } => {
                let outcome = self.store.delete(bank, direction, &id);
                self.reply_with_list(bank, direction, outcome)
            }
            BankCommand::UpdateDelay {
                bank,
                direction,
                id,
                delay,
            } => {
                let outcome = self.store.update_delay(bank, direction, &id, delay);
                self.reply_with_list(bank, direction, outcome)
            }
            BankCommand::UpdateOption {
                bank,
                direction,
                id,
                key,
                value,
            } => {
                let outcome = self.store.update_option(bank, direction, &id, &key, value);
                self.reply_with_list(bank, direction, outcome)
            }
            BankCommand::Reorder {
                bank,
                direction,
                from,
                to,
            } => {
                let outcome = self.store.reorder(bank, direction, from, to);
                self.reply_with_list(bank, direction, outcome)
            }
            BankCommand::ResetBank { bank } => {
                let outcome = self.store.reset_bank(bank);
                self.reply_with_list(bank, Direction::Press, outcome)
            }
            BankCommand::ActionDefaults { instance_id, kind } => Handled::ready(
                Response::Defaults(self.store.action_defaults(&instance_id, &kind)),
                false,
            ),
            BankCommand::LearnSingle { action } => self.start_learn(&action, None),
            BankCommand::LearnAction {
                bank,
                direction,
                id,
            } => match self.store.find(bank, direction, &id).cloned() {
                Some(action) => self.start_learn(
                    &action,
                    Some(LearnTarget {
                        bank,
                        direction,
                        id,
                    }),
                ),
                None => Handled::ready(Response::Ignored, false),
            },
        }
    }

    fn start_learn(&self, action: &Action, target: Option<LearnTarget>) -> Handled {
        match self.learn.prepare(self.host.registry.as_ref(), action) {
            Ok(request) => Handled {
                reply: CommandReply::Learn(PendingLearn { target, request }),
                changed: false,
            },
            Err(err) => {
                debug!(action = %action.id, error = %err, "Learn not started");
                let id = target.map(|t| t.id);
                Handled::ready(Response::Learned { id, options: None }, false)
            }
        }
    }

    /// Apply learned options to their target action, if any, and build the
    /// reply. Returns whether a list changed.
    pub fn apply_learned(&mut self, result: LearnResult) -> (Response, bool) {
        let LearnResult { target, options } = result;
        let Some(target) = target else {
            return (Response::Learned { id: None, options }, false);
        };

        let mut changed = false;
        if let Some(options) = &options {
            let outcome =
                self.store
                    .set_options(target.bank, target.direction, &target.id, options.clone());
            changed = self.apply(outcome);
        }
        (
            Response::Learned {
                id: Some(target.id),
                options,
            },
            changed,
        )
    }

    fn reply_with_list(
        &mut self,
        bank: BankId,
        direction: Direction,
        outcome: Outcome<StoreEffect>,
    ) -> Handled {
        let changed = self.apply(outcome);
        Handled::ready(
            Response::Actions(self.store.list(bank, direction).to_vec()),
            changed,
        )
    }

    /// Process store effects. Returns whether the store changed.
    fn apply(&mut self, outcome: Outcome<StoreEffect>) -> bool {
        for effect in outcome.unique_effects() {
            match effect {
                StoreEffect::Save => self.save(),
                StoreEffect::CheckStatus(bank) => self.check_bank(bank),
            }
        }
        outcome.changed
    }

    /// Write both action lists to persistence.
    pub fn save(&self) {
        self.store
            .persist(self.host.persistence.as_ref(), &self.config.persistence);
    }

    fn check_bank(&mut self, bank: BankId) {
        let list = self.store.try_get(bank, Direction::Press);
        if let Some(severity) = self
            .status
            .check_bank(bank, list, self.host.registry.as_ref())
        {
            self.host.surface.bank_status_changed(bank, severity);
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("ready", &self.ready)
            .field("store", &self.store)
            .field("scheduler", &self.scheduler)
            .field("running", &self.running)
            .finish()
    }
}
