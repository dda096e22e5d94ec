//! Drives a [`Session`] from a single task.
//!
//! User commands, transport events and timer ticks all land on this task and
//! are applied one at a time, so two transitions never interleave. The
//! resulting effects are executed here too: this is the only place that owns
//! connection handles and the search timer.

use std::{collections::HashMap, time::Duration};

use anyhow::Result;
use shared::{
    domain::{ConnectionId, LocalIdentity, SessionSnapshot, TimerId},
    error::SessionError,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::{interval_at, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    session::{Effect, Session, SessionInput, TransportEvent, UserCommand},
    transport::{spawn_connection, websocket_url, ConnectionHandle},
    ClientEvent,
};

const COMMAND_QUEUE_DEPTH: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub server_url: String,
    pub search_tick: Duration,
}

impl RuntimeConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            search_tick: Duration::from_secs(1),
        }
    }
}

enum RuntimeCommand {
    User {
        command: UserCommand,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable front door used by the presentation layer.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<RuntimeCommand>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionHandle {
    pub async fn start_search(&self) -> Result<(), SessionError> {
        self.user(UserCommand::StartSearch).await
    }

    pub async fn stop_search(&self) -> Result<(), SessionError> {
        self.user(UserCommand::StopSearch).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.user(UserCommand::Disconnect).await
    }

    pub async fn next_partner(&self) -> Result<(), SessionError> {
        self.user(UserCommand::NextPartner).await
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.user(UserCommand::SendMessage(text.into())).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RuntimeCommand::Snapshot(reply))
            .await
            .map_err(|_| SessionError::RuntimeStopped)?;
        rx.await.map_err(|_| SessionError::RuntimeStopped)
    }

    /// Stops the timer, closes the connection and ends the runtime task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(RuntimeCommand::Shutdown(reply))
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    async fn user(&self, command: UserCommand) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RuntimeCommand::User { command, reply })
            .await
            .map_err(|_| SessionError::RuntimeStopped)?;
        rx.await.map_err(|_| SessionError::RuntimeStopped)?
    }
}

pub struct SessionRuntime {
    session: Session,
    server_url: String,
    search_tick: Duration,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    timer: Option<(TimerId, JoinHandle<()>)>,
    commands: mpsc::Receiver<RuntimeCommand>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    tick_tx: mpsc::UnboundedSender<TimerId>,
    tick_rx: mpsc::UnboundedReceiver<TimerId>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionRuntime {
    /// Validates the server url and spawns the runtime task.
    pub fn spawn(
        config: RuntimeConfig,
        identity: Option<LocalIdentity>,
    ) -> Result<(SessionHandle, JoinHandle<()>)> {
        let server_url = websocket_url(&config.server_url)?;
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();

        let runtime = Self {
            session: Session::new(identity),
            server_url,
            search_tick: config.search_tick,
            connections: HashMap::new(),
            timer: None,
            commands,
            transport_tx,
            transport_rx,
            tick_tx,
            tick_rx,
            events: events.clone(),
        };
        let task = tokio::spawn(runtime.run());
        Ok((
            SessionHandle {
                commands: commands_tx,
                events,
            },
            task,
        ))
    }

    async fn run(mut self) {
        info!(server_url = %self.server_url, "runtime: started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.teardown();
                        break;
                    };
                    match command {
                        RuntimeCommand::User { command, reply } => {
                            let result = self.handle(SessionInput::User(command));
                            let _ = reply.send(result);
                        }
                        RuntimeCommand::Snapshot(reply) => {
                            let _ = reply.send(self.session.snapshot());
                        }
                        RuntimeCommand::Shutdown(reply) => {
                            self.teardown();
                            let _ = reply.send(());
                            break;
                        }
                    }
                }
                Some(event) = self.transport_rx.recv() => {
                    if let TransportEvent::Closed(id) = &event {
                        self.connections.remove(id);
                    }
                    let _ = self.handle(SessionInput::Transport(event));
                }
                Some(timer) = self.tick_rx.recv() => {
                    let _ = self.handle(SessionInput::Tick(timer));
                }
            }
        }
        info!("runtime: stopped");
    }

    fn handle(&mut self, input: SessionInput) -> Result<(), SessionError> {
        let effects = self.session.apply(input)?;
        for effect in effects {
            self.execute(effect);
        }
        let _ = self
            .events
            .send(ClientEvent::Updated(self.session.snapshot()));
        Ok(())
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenConnection(id) => {
                let handle = spawn_connection(id, self.server_url.clone(), self.transport_tx.clone());
                self.connections.insert(id, handle);
            }
            Effect::Send(id, request) => {
                let Some(connection) = self.connections.get(&id) else {
                    warn!(connection_id = id.0, request = request.kind(), "runtime: no handle for send");
                    return;
                };
                if let Err(err) = connection.send(&request) {
                    warn!(connection_id = id.0, "runtime: send failed: {err}");
                    let _ = self.events.send(ClientEvent::Error(err.to_string()));
                }
            }
            Effect::CloseConnection(id) => {
                if let Some(connection) = self.connections.get(&id) {
                    connection.close();
                }
            }
            Effect::StartTimer(id) => {
                self.stop_timer();
                let tick_tx = self.tick_tx.clone();
                let period = self.search_tick;
                let task = tokio::spawn(async move {
                    let mut interval = interval_at(Instant::now() + period, period);
                    loop {
                        interval.tick().await;
                        if tick_tx.send(id).is_err() {
                            break;
                        }
                    }
                });
                self.timer = Some((id, task));
            }
            Effect::StopTimer(id) => {
                if self.timer.as_ref().is_some_and(|(active, _)| *active == id) {
                    self.stop_timer();
                }
            }
        }
    }

    fn stop_timer(&mut self) {
        if let Some((id, task)) = self.timer.take() {
            debug!(timer_id = id.0, "runtime: search timer stopped");
            task.abort();
        }
    }

    fn teardown(&mut self) {
        for effect in self.session.shutdown() {
            self.execute(effect);
        }
        self.stop_timer();
        // Dropped handles finish their close handshake on their own.
        self.connections.clear();
        let _ = self
            .events
            .send(ClientEvent::Updated(self.session.snapshot()));
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
