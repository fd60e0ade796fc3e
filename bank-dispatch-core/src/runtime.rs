//! Runtime loop for the dispatch engine
//!
//! [`EngineRuntime`] owns an [`Engine`] and serializes every input through
//! one loop: button events, transport commands, expired timers and learn
//! completions. [`EngineHandle`] is the cloneable way in. Action handlers
//! that need to edit lists or abort buttons hold a handle too; their
//! requests are queued and handled after the current dispatch returns.
//!
//! ```ignore
//! let runtime = EngineRuntime::new(engine)
//!     .with_middleware(LoggingMiddleware::new())
//!     .with_command_log();
//! let handle = runtime.handle();
//! let task = tokio::spawn(runtime.run());
//!
//! handle.instances_loaded(registry.ids())?;
//! handle.press(BankId::new(1, 1), Direction::Press, Some("sd:1"))?;
//! let list = handle.request(BankCommand::ListActions { bank, direction }).await?;
//!
//! handle.shutdown()?;
//! let engine = task.await?;
//! ```

use std::future::poll_fn;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::bank::{BankId, Direction, GroupKey, RunSource};
use crate::command::{BankCommand, Command, Response};
use crate::command_log::{CommandLoggerMiddleware, SharedCommandLog};
use crate::engine::{CommandReply, Engine, LearnResult};
use crate::error::EngineError;
use crate::middleware::{ComposedMiddleware, Middleware};

#[derive(Debug)]
enum Message {
    Press {
        bank: BankId,
        direction: Direction,
        device_id: Option<String>,
    },
    Command {
        command: BankCommand,
        reply: Option<oneshot::Sender<Response>>,
    },
    RunActions {
        actions: Vec<Action>,
        group: GroupKey,
        relative_delay: bool,
        source: Option<RunSource>,
    },
    InstancesLoaded(Vec<String>),
    InstanceRemoved(String),
    InstanceStatusChanged(String),
    AbortAll,
    AbortBank {
        bank: BankId,
        unlatch: bool,
    },
    Shutdown,
}

/// A learn request that finished off the loop.
struct LearnDone {
    command: &'static str,
    result: LearnResult,
    reply: Option<oneshot::Sender<Response>>,
}

/// Cloneable sender into a running [`EngineRuntime`].
///
/// Every method fails with [`EngineError::RuntimeClosed`] once the runtime
/// has stopped.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl EngineHandle {
    fn send(&self, message: Message) -> Result<(), EngineError> {
        self.tx
            .send(message)
            .map_err(|_| EngineError::RuntimeClosed)
    }

    /// Queue a button event.
    pub fn press(
        &self,
        bank: BankId,
        direction: Direction,
        device_id: Option<&str>,
    ) -> Result<(), EngineError> {
        self.send(Message::Press {
            bank,
            direction,
            device_id: device_id.map(str::to_string),
        })
    }

    /// Send a command and wait for its response.
    pub async fn request(&self, command: BankCommand) -> Result<Response, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Command {
            command,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| EngineError::RuntimeClosed)
    }

    /// Queue a command without waiting for its response.
    pub fn submit(&self, command: BankCommand) -> Result<(), EngineError> {
        self.send(Message::Command {
            command,
            reply: None,
        })
    }

    /// Queue a batch run under `group`.
    pub fn run_actions(
        &self,
        actions: Vec<Action>,
        group: impl Into<GroupKey>,
        relative_delay: bool,
        source: Option<RunSource>,
    ) -> Result<(), EngineError> {
        self.send(Message::RunActions {
            actions,
            group: group.into(),
            relative_delay,
            source,
        })
    }

    pub fn instances_loaded<I, S>(&self, instance_ids: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send(Message::InstancesLoaded(
            instance_ids.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn instance_removed(&self, instance_id: impl Into<String>) -> Result<(), EngineError> {
        self.send(Message::InstanceRemoved(instance_id.into()))
    }

    pub fn instance_status_changed(
        &self,
        instance_id: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.send(Message::InstanceStatusChanged(instance_id.into()))
    }

    pub fn abort_all(&self) -> Result<(), EngineError> {
        self.send(Message::AbortAll)
    }

    pub fn abort_bank(&self, bank: BankId, unlatch: bool) -> Result<(), EngineError> {
        self.send(Message::AbortBank { bank, unlatch })
    }

    /// Stop the loop. Pending timers are cancelled.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.send(Message::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owns an [`Engine`] and drives it from queued input and timers.
pub struct EngineRuntime {
    engine: Engine,
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    learn_tx: mpsc::UnboundedSender<LearnDone>,
    learn_rx: mpsc::UnboundedReceiver<LearnDone>,
    middleware: ComposedMiddleware<BankCommand>,
    command_log: Option<SharedCommandLog>,
    cancel: CancellationToken,
}

impl EngineRuntime {
    pub fn new(engine: Engine) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (learn_tx, learn_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            tx,
            rx,
            learn_tx,
            learn_rx,
            middleware: ComposedMiddleware::new(),
            command_log: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Wrap command handling in `middleware`. Middleware added first sees
    /// each command first and its result last.
    pub fn with_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Middleware<BankCommand> + 'static,
    {
        self.middleware.add(middleware);
        self
    }

    /// Record commands into an in-memory log configured by the engine's
    /// `command_log` settings, in addition to any middleware set before.
    pub fn with_command_log(self) -> Self {
        let logger = CommandLoggerMiddleware::with_log(self.engine.config().command_log.clone());
        let log = logger.log_handle();
        let mut runtime = self.with_middleware(logger);
        runtime.command_log = log;
        runtime
    }

    /// The log installed by [`with_command_log`](Self::with_command_log).
    pub fn command_log(&self) -> Option<SharedCommandLog> {
        self.command_log.clone()
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.tx.clone(),
        }
    }

    /// Token that stops the loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run until shutdown or cancellation, then hand the engine back.
    pub async fn run(mut self) -> Engine {
        info!("Engine runtime started");
        loop {
            let timers = self.engine.has_pending_timers();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                expired = poll_fn(|cx| self.engine.poll_expired(cx)), if timers => {
                    self.engine.handle_expired(expired);
                }

                Some(done) = self.learn_rx.recv() => self.finish_learn(done),

                Some(message) = self.rx.recv() => {
                    if !self.handle_message(message) {
                        break;
                    }
                }

                else => break,
            }
        }

        self.engine.abort_all();
        info!("Engine runtime stopped");
        self.engine
    }

    /// Returns `false` when the loop should stop.
    fn handle_message(&mut self, message: Message) -> bool {
        match message {
            Message::Press {
                bank,
                direction,
                device_id,
            } => {
                if let Err(err) = self.engine.bank_pressed(bank, direction, device_id.as_deref())
                {
                    warn!(bank = %bank, direction = %direction, error = %err, "Button event dropped");
                }
            }
            Message::Command { command, reply } => self.handle_command(command, reply),
            Message::RunActions {
                actions,
                group,
                relative_delay,
                source,
            } => {
                if let Err(err) =
                    self.engine
                        .run_actions(&actions, group.clone(), relative_delay, source)
                {
                    warn!(group = %group, error = %err, "Batch run dropped");
                }
            }
            Message::InstancesLoaded(ids) => self.engine.instances_loaded(ids),
            Message::InstanceRemoved(id) => self.engine.remove_instance(&id),
            Message::InstanceStatusChanged(id) => self.engine.instance_status_changed(&id),
            Message::AbortAll => self.engine.abort_all(),
            Message::AbortBank { bank, unlatch } => {
                self.engine.abort_bank(bank, unlatch);
            }
            Message::Shutdown => return false,
        }
        true
    }

    fn handle_command(&mut self, command: BankCommand, reply: Option<oneshot::Sender<Response>>) {
        self.middleware.before(&command);
        let name = command.name();
        let handled = self.engine.handle_command(command.clone());
        // Learned options land later and are not reported as a change here
        self.middleware.after(&command, handled.changed);

        match handled.reply {
            CommandReply::Ready(response) => respond(reply, response),
            CommandReply::Learn(pending) => {
                debug!(command = %name, "Waiting for learn result");
                let learn_tx = self.learn_tx.clone();
                tokio::spawn(async move {
                    let result = pending.resolve().await;
                    let _ = learn_tx.send(LearnDone {
                        command: name,
                        result,
                        reply,
                    });
                });
            }
        }
    }

    fn finish_learn(&mut self, done: LearnDone) {
        let (response, changed) = self.engine.apply_learned(done.result);
        debug!(command = %done.command, changed, "Learn finished");
        respond(done.reply, response);
    }
}

impl std::fmt::Debug for EngineRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntime")
            .field("engine", &self.engine)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn respond(reply: Option<oneshot::Sender<Response>>, response: Response) {
    if let Some(reply) = reply {
        // The requester may have gone away
        let _ = reply.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::action::ActionId;
    use crate::command_log::{CommandFilter, CommandLogConfig, CommandLoggerMiddleware};
    use crate::middleware::LoggingMiddleware;
    use crate::registry::{ActionDefinition, Capabilities, Execution};
    use crate::testing::{FakeDefinition, FakeInstance, HostEvent, Recorder, TestRig};
    use serde_json::json;

    const B1: BankId = BankId::new(1, 1);

    fn spawn(rig: &TestRig) -> (EngineHandle, tokio::task::JoinHandle<Engine>) {
        let runtime = EngineRuntime::new(rig.ready_engine());
        let handle = runtime.handle();
        (handle, tokio::spawn(runtime.run()))
    }

    async fn add(handle: &EngineHandle, direction: Direction, kind: &str) -> ActionId {
        let response = handle
            .request(BankCommand::AddAction {
                bank: B1,
                direction,
                instance_id: "obs".into(),
                kind: kind.into(),
            })
            .await
            .unwrap();
        response.actions().unwrap().last().unwrap().id.clone()
    }

    /// Deletes the action after it in the list, through the handle.
    struct DeletesNext {
        recorder: Recorder,
        handle: Mutex<Option<EngineHandle>>,
        target: Mutex<Option<ActionId>>,
    }

    impl ActionDefinition for DeletesNext {
        fn capabilities(&self) -> Capabilities {
            Capabilities::EXECUTE
        }

        fn execute(&self, action: &Action, _source: Option<&RunSource>) -> Execution {
            self.recorder.record(HostEvent::Executed {
                instance: action.instance_id.clone(),
                kind: action.kind.clone(),
                id: action.id.clone(),
                device_id: None,
            });
            let handle = self.handle.lock().unwrap().clone();
            let target = self.target.lock().unwrap().clone();
            if let (Some(handle), Some(id)) = (handle, target) {
                handle
                    .submit(BankCommand::DeleteAction {
                        bank: B1,
                        direction: Direction::Press,
                        id,
                    })
                    .unwrap();
            }
            Execution::done()
        }
    }

    #[tokio::test]
    async fn test_commands_round_trip() {
        let rig = TestRig::new();
        rig.instance("obs", &["scene"]);
        let (handle, task) = spawn(&rig);

        let id = add(&handle, Direction::Press, "scene").await;
        let response = handle
            .request(BankCommand::UpdateOption {
                bank: B1,
                direction: Direction::Press,
                id,
                key: "scene".into(),
                value: json!("Wide"),
            })
            .await
            .unwrap();
        assert_eq!(response.actions().unwrap()[0].options["scene"], json!("Wide"));

        handle.shutdown().unwrap();
        let engine = task.await.unwrap();
        assert_eq!(engine.actions(B1, Direction::Press).len(), 1);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.request(BankCommand::ResetBank { bank: B1 }).await,
            Err(EngineError::RuntimeClosed)
        ));
    }

    #[tokio::test]
    async fn test_handler_edits_are_queued_behind_dispatch() {
        let rig = TestRig::new();
        let deleter = Arc::new(DeletesNext {
            recorder: rig.recorder.clone(),
            handle: Mutex::new(None),
            target: Mutex::new(None),
        });
        rig.registry.insert(
            "obs",
            FakeInstance::new("OBS")
                .with_shared_definition("delete", deleter.clone())
                .with_definition("scene", FakeDefinition::new(&rig.recorder)),
        );
        let (handle, task) = spawn(&rig);
        *deleter.handle.lock().unwrap() = Some(handle.clone());

        let first = add(&handle, Direction::Press, "delete").await;
        let second = add(&handle, Direction::Press, "scene").await;
        *deleter.target.lock().unwrap() = Some(second.clone());

        let list = BankCommand::ListActions {
            bank: B1,
            direction: Direction::Press,
        };
        handle.press(B1, Direction::Press, None).unwrap();
        // The delete is queued behind this request
        handle.request(list.clone()).await.unwrap();
        let response = handle.request(list).await.unwrap();

        // The press ran its snapshot in full; the delete landed afterwards
        assert_eq!(rig.recorder.drain_executed(), vec![first.clone(), second]);
        let remaining: Vec<_> = response.actions().unwrap().iter().map(|a| a.id.clone()).collect();
        assert_eq!(remaining, vec![first]);

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_fire_inside_loop() {
        let rig = TestRig::new();
        rig.instance("obs", &["scene"]);
        let (handle, task) = spawn(&rig);
        let id = add(&handle, Direction::Press, "scene").await;
        handle
            .request(BankCommand::UpdateDelay {
                bank: B1,
                direction: Direction::Press,
                id: id.clone(),
                delay: 100,
            })
            .await
            .unwrap();
        rig.recorder.drain();

        handle.press(B1, Direction::Press, None).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rig.recorder.drain_executed().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rig.recorder.drain_executed(), vec![id]);

        handle.shutdown().unwrap();
        let engine = task.await.unwrap();
        assert!(!engine.is_running(B1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_timers() {
        let rig = TestRig::new();
        rig.instance("obs", &["scene"]);
        let (handle, task) = spawn(&rig);
        handle
            .run_actions(
                vec![Action::new("obs", "scene").with_delay(1_000)],
                "schedule",
                false,
                None,
            )
            .unwrap();
        handle.shutdown().unwrap();

        let engine = task.await.unwrap();
        assert_eq!(engine.pending_timers(), 0);
        assert_eq!(engine.running_groups(), 0);
        assert!(rig.recorder.drain_executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_learn_resolves_off_loop() {
        let rig = TestRig::new();
        let mut learned = crate::action::Options::new();
        learned.insert("scene".into(), json!("Live"));
        rig.registry.insert(
            "obs",
            FakeInstance::new("OBS").with_definition(
                "scene",
                FakeDefinition::new(&rig.recorder)
                    .learning(Some(learned.clone()))
                    .learn_delay(Duration::from_millis(500)),
            ),
        );
        let (handle, task) = spawn(&rig);
        let id = add(&handle, Direction::Press, "scene").await;

        let response = handle
            .request(BankCommand::LearnAction {
                bank: B1,
                direction: Direction::Press,
                id: id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(
            response,
            Response::Learned {
                id: Some(id),
                options: Some(learned.clone())
            }
        );

        handle.shutdown().unwrap();
        let engine = task.await.unwrap();
        assert_eq!(engine.actions(B1, Direction::Press)[0].options, learned);
    }

    #[tokio::test]
    async fn test_command_log_follows_config() {
        let rig = TestRig::new();
        rig.instance("obs", &["scene"]);
        let runtime = EngineRuntime::new(rig.ready_engine()).with_command_log();
        let log = runtime.command_log().unwrap();
        let handle = runtime.handle();
        let task = tokio::spawn(runtime.run());

        add(&handle, Direction::Press, "scene").await;
        handle
            .request(BankCommand::ListActions {
                bank: B1,
                direction: Direction::Press,
            })
            .await
            .unwrap();
        handle.shutdown().unwrap();
        task.await.unwrap();

        // ListActions is excluded by the default filter
        let log = log.lock().unwrap();
        let names: Vec<_> = log.entries().map(|entry| entry.name).collect();
        assert_eq!(names, vec!["AddAction"]);
        assert_eq!(log.entries().next().unwrap().changed, Some(true));
        assert_eq!(log.entries().next().unwrap().bank, Some(B1));
    }

    #[tokio::test]
    async fn test_custom_middleware() {
        let rig = TestRig::new();
        let logger = CommandLoggerMiddleware::with_log(CommandLogConfig {
            capacity: 10,
            filter: CommandFilter::all(),
        });
        let log = logger.log_handle().unwrap();
        let runtime = EngineRuntime::new(rig.ready_engine()).with_middleware(logger);
        assert!(runtime.command_log().is_none());
        let handle = runtime.handle();
        let task = tokio::spawn(runtime.run());

        handle
            .request(BankCommand::ResetBank { bank: B1 })
            .await
            .unwrap();
        handle.shutdown().unwrap();
        task.await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.recent(1).next().unwrap().name, "ResetBank");
    }

    /// Counts handled commands into a shared cell.
    struct Counting(Arc<Mutex<(usize, usize)>>);

    impl Middleware<BankCommand> for Counting {
        fn before(&mut self, _command: &BankCommand) {
            self.0.lock().unwrap().0 += 1;
        }

        fn after(&mut self, _command: &BankCommand, changed: bool) {
            if changed {
                self.0.lock().unwrap().1 += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_middleware_stacks_with_command_log() {
        let rig = TestRig::new();
        rig.instance("obs", &["scene"]);
        let counts = Arc::new(Mutex::new((0, 0)));
        let runtime = EngineRuntime::new(rig.ready_engine())
            .with_middleware(LoggingMiddleware::new())
            .with_middleware(Counting(counts.clone()))
            .with_command_log();
        let log = runtime.command_log().unwrap();
        let handle = runtime.handle();
        let task = tokio::spawn(runtime.run());

        add(&handle, Direction::Press, "scene").await;
        handle
            .request(BankCommand::ListActions {
                bank: B1,
                direction: Direction::Press,
            })
            .await
            .unwrap();
        handle.shutdown().unwrap();
        task.await.unwrap();

        assert_eq!(*counts.lock().unwrap(), (2, 1));
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log.entries().next().unwrap().mutating);
    }

    #[tokio::test]
    async fn test_press_before_ready_is_dropped() {
        let rig = TestRig::new();
        rig.instance("obs", &["scene"]);
        let runtime = EngineRuntime::new(rig.engine());
        let handle = runtime.handle();
        let task = tokio::spawn(runtime.run());

        handle.press(B1, Direction::Press, None).unwrap();
        handle.instances_loaded(["obs"]).unwrap();
        handle.press(B1, Direction::Press, None).unwrap();
        handle.shutdown().unwrap();
        let engine = task.await.unwrap();

        assert!(engine.is_ready());
        let events = rig.recorder.drain();
        assert_eq!(crate::count_recorded!(events, HostEvent::Indicated { .. }), 1);
    }
}
