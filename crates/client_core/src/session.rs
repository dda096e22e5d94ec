//! Pairing-and-chat lifecycle as explicit state plus transitions.
//!
//! [`Session::apply`] consumes one input and returns the side effects the
//! runtime must perform. Nothing in here touches a socket or a clock other
//! than stamping transcript entries, so every transition can be driven from
//! tests without a live transport.

use chrono::Utc;
use shared::{
    domain::{
        ConnectionId, LocalIdentity, MessageId, MessageOrigin, SessionSnapshot, SessionStatus,
        TimerId, TranscriptMessage,
    },
    error::{SessionError, UserAction},
    protocol::{ClientRequest, ServerEvent},
};
use tracing::{debug, info, warn};

const MISSING_IDENTITY_TEXT: &str = "Error: no local identity available, cannot start search";
const PARTNER_LEFT_TEXT: &str = "Your partner left the chat";
const SEARCH_TIMEOUT_TEXT: &str = "Search timed out, no partner found";
const CONNECTION_ERROR_TEXT: &str = "Connection error";
const CONNECTION_LOST_TEXT: &str = "Connection to the server was lost";
const SERVER_ERROR_TEXT: &str = "Server reported an error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    StartSearch,
    StopSearch,
    Disconnect,
    NextPartner,
    SendMessage(String),
}

impl UserCommand {
    pub fn action(&self) -> UserAction {
        match self {
            Self::StartSearch => UserAction::StartSearch,
            Self::StopSearch => UserAction::StopSearch,
            Self::Disconnect => UserAction::Disconnect,
            Self::NextPartner => UserAction::NextPartner,
            Self::SendMessage(_) => UserAction::SendMessage,
        }
    }
}

/// Lifecycle notifications from a connection task, tagged with the
/// connection they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened(ConnectionId),
    Received(ConnectionId, ServerEvent),
    Failed(ConnectionId, String),
    /// Always the last event of a connection, whether or not it ever opened.
    Closed(ConnectionId),
}

impl TransportEvent {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Opened(id) | Self::Received(id, _) | Self::Failed(id, _) | Self::Closed(id) => {
                *id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    User(UserCommand),
    Transport(TransportEvent),
    Tick(TimerId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenConnection(ConnectionId),
    Send(ConnectionId, ClientRequest),
    CloseConnection(ConnectionId),
    StartTimer(TimerId),
    StopTimer(TimerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectionSlot {
    id: ConnectionId,
    open: bool,
}

#[derive(Debug, Clone)]
pub struct Session {
    identity: Option<LocalIdentity>,
    status: SessionStatus,
    partner_id: Option<String>,
    room_id: Option<String>,
    elapsed_search_seconds: u64,
    transcript: Vec<TranscriptMessage>,
    connection: Option<ConnectionSlot>,
    timer: Option<TimerId>,
    restart_after_close: Option<ConnectionId>,
    next_message_id: u64,
    next_connection_id: u64,
    next_timer_id: u64,
}

impl Session {
    pub fn new(identity: Option<LocalIdentity>) -> Self {
        Self {
            identity,
            status: SessionStatus::Idle,
            partner_id: None,
            room_id: None,
            elapsed_search_seconds: 0,
            transcript: Vec::new(),
            connection: None,
            timer: None,
            restart_after_close: None,
            next_message_id: 1,
            next_connection_id: 1,
            next_timer_id: 1,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn partner_id(&self) -> Option<&str> {
        self.partner_id.as_deref()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn elapsed_search_seconds(&self) -> u64 {
        self.elapsed_search_seconds
    }

    pub fn transcript(&self) -> &[TranscriptMessage] {
        &self.transcript
    }

    pub fn identity(&self) -> Option<&LocalIdentity> {
        self.identity.as_ref()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.map(|slot| slot.id)
    }

    pub fn is_connection_open(&self) -> bool {
        self.connection.is_some_and(|slot| slot.open)
    }

    pub fn active_timer(&self) -> Option<TimerId> {
        self.timer
    }

    /// Connection whose close acknowledgment will restart the search.
    pub fn pending_restart(&self) -> Option<ConnectionId> {
        self.restart_after_close
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            partner_id: self.partner_id.clone(),
            room_id: self.room_id.clone(),
            elapsed_search_seconds: self.elapsed_search_seconds,
            transcript: self.transcript.clone(),
        }
    }

    pub fn apply(&mut self, input: SessionInput) -> Result<Vec<Effect>, SessionError> {
        match input {
            SessionInput::User(command) => self.handle_user(command),
            SessionInput::Transport(event) => Ok(self.handle_transport(event)),
            SessionInput::Tick(timer) => {
                self.tick(timer);
                Ok(Vec::new())
            }
        }
    }

    pub fn handle_user(&mut self, command: UserCommand) -> Result<Vec<Effect>, SessionError> {
        match command {
            UserCommand::StartSearch => self.start_search(),
            UserCommand::StopSearch => self.stop_search(),
            UserCommand::Disconnect => Ok(self.disconnect()),
            UserCommand::NextPartner => self.next_partner(),
            UserCommand::SendMessage(text) => self.send_message(&text),
        }
    }

    pub fn start_search(&mut self) -> Result<Vec<Effect>, SessionError> {
        if self.identity.is_none() {
            warn!("session: start_search rejected, no local identity");
            self.push_message(MessageOrigin::System, MISSING_IDENTITY_TEXT);
            return Ok(Vec::new());
        }
        if self.status == SessionStatus::Paired {
            return Err(self.invalid(UserAction::StartSearch));
        }

        let mut effects = Vec::new();
        self.begin_search(&mut effects);
        Ok(effects)
    }

    pub fn stop_search(&mut self) -> Result<Vec<Effect>, SessionError> {
        match self.status {
            SessionStatus::Idle => {
                self.restart_after_close = None;
                Ok(Vec::new())
            }
            SessionStatus::Paired => Err(self.invalid(UserAction::StopSearch)),
            SessionStatus::Searching => {
                let mut effects = Vec::new();
                self.send_best_effort(ClientRequest::StopSearch, &mut effects);
                self.close_connection(&mut effects);
                self.stop_timer(&mut effects);
                self.status = SessionStatus::Idle;
                info!("session: search stopped");
                Ok(effects)
            }
        }
    }

    pub fn disconnect(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.status == SessionStatus::Idle {
            self.restart_after_close = None;
            return effects;
        }
        self.teardown(&mut effects);
        effects
    }

    /// Tears down the current pairing and searches again once the old
    /// connection has acknowledged its close.
    pub fn next_partner(&mut self) -> Result<Vec<Effect>, SessionError> {
        if self.status == SessionStatus::Idle {
            if self.restart_after_close.is_some() {
                return Ok(Vec::new());
            }
            return self.start_search();
        }

        let mut effects = Vec::new();
        match self.teardown(&mut effects) {
            Some(closing) => {
                debug!(connection_id = closing.0, "session: waiting for close before re-search");
                self.restart_after_close = Some(closing);
            }
            None => self.begin_search(&mut effects),
        }
        Ok(effects)
    }

    pub fn send_message(&mut self, text: &str) -> Result<Vec<Effect>, SessionError> {
        let text = text.trim();
        if text.is_empty() || self.status != SessionStatus::Paired {
            return Ok(Vec::new());
        }
        let Some(identity) = self.identity.as_ref() else {
            return Ok(Vec::new());
        };
        let Some(slot) = self.connection.filter(|slot| slot.open) else {
            return Err(SessionError::TransportNotReady);
        };

        let request = ClientRequest::chat_message(text, identity, self.partner_id.as_deref());
        self.push_message(MessageOrigin::Own, text);
        Ok(vec![Effect::Send(slot.id, request)])
    }

    pub fn handle_transport(&mut self, event: TransportEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        let connection_id = event.connection_id();

        if let TransportEvent::Closed(id) = &event {
            if self.restart_after_close == Some(*id) {
                self.restart_after_close = None;
                debug!(connection_id = id.0, "session: close acknowledged, searching again");
                if self.identity.is_some() {
                    self.begin_search(&mut effects);
                }
                return effects;
            }
        }

        if self.connection_id() != Some(connection_id) {
            debug!(connection_id = connection_id.0, "session: ignoring stale transport event");
            return effects;
        }

        match event {
            TransportEvent::Opened(id) => self.on_opened(id, &mut effects),
            TransportEvent::Received(_, server_event) => {
                self.on_server_event(server_event, &mut effects)
            }
            TransportEvent::Failed(id, reason) => {
                warn!(connection_id = id.0, %reason, "session: transport failure");
                if let Some(slot) = self.connection.as_mut() {
                    slot.open = false;
                }
                if self.status != SessionStatus::Idle {
                    self.teardown(&mut effects);
                }
                self.push_message(MessageOrigin::System, CONNECTION_ERROR_TEXT);
            }
            TransportEvent::Closed(id) => {
                // The handle is already dead; forget it before tearing down so
                // nothing is sent or closed on it.
                self.connection = None;
                if self.status != SessionStatus::Idle {
                    warn!(connection_id = id.0, "session: transport closed unexpectedly");
                    self.teardown(&mut effects);
                    self.push_message(MessageOrigin::System, CONNECTION_LOST_TEXT);
                }
            }
        }
        effects
    }

    pub fn tick(&mut self, timer: TimerId) {
        if self.timer == Some(timer) && self.status == SessionStatus::Searching {
            self.elapsed_search_seconds += 1;
        }
    }

    /// Final cleanup when the owner goes away.
    pub fn shutdown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.restart_after_close = None;
        if self.status != SessionStatus::Idle {
            self.teardown(&mut effects);
        }
        self.close_connection(&mut effects);
        self.stop_timer(&mut effects);
        effects
    }

    fn on_opened(&mut self, id: ConnectionId, effects: &mut Vec<Effect>) {
        if let Some(slot) = self.connection.as_mut() {
            slot.open = true;
        }
        info!(connection_id = id.0, "session: connected to server");
        if self.status != SessionStatus::Searching {
            return;
        }
        if let Some(identity) = &self.identity {
            effects.push(Effect::Send(id, ClientRequest::find_partner(identity)));
        }
    }

    fn on_server_event(&mut self, event: ServerEvent, effects: &mut Vec<Effect>) {
        match event {
            ServerEvent::PartnerFound {
                partner_id,
                room_id,
            } => {
                if self.status != SessionStatus::Searching {
                    debug!(status = self.status.label(), "session: ignoring partner_found");
                    return;
                }
                self.stop_timer(effects);
                info!(partner_id = %partner_id, "session: partner found");
                self.push_message(
                    MessageOrigin::System,
                    format!("Partner found! ID: {partner_id}"),
                );
                self.partner_id = Some(partner_id);
                self.room_id = room_id;
                self.status = SessionStatus::Paired;
            }
            ServerEvent::PartnerDisconnected => {
                if self.status != SessionStatus::Paired {
                    return;
                }
                info!("session: partner disconnected");
                self.push_message(MessageOrigin::System, PARTNER_LEFT_TEXT);
                self.begin_search(effects);
            }
            ServerEvent::Message { message } => {
                if self.status == SessionStatus::Paired {
                    self.push_message(MessageOrigin::Remote, message);
                } else {
                    debug!(status = self.status.label(), "session: dropping unpaired message");
                }
            }
            ServerEvent::Searching { message } => {
                if self.status == SessionStatus::Searching && !message.trim().is_empty() {
                    self.push_message(MessageOrigin::System, message);
                }
            }
            ServerEvent::SearchTimeout { message } => {
                if self.status != SessionStatus::Searching {
                    return;
                }
                info!("session: search timed out");
                let text = message
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| SEARCH_TIMEOUT_TEXT.to_string());
                self.push_message(MessageOrigin::System, text);
                self.close_connection(effects);
                self.stop_timer(effects);
                self.status = SessionStatus::Idle;
            }
            ServerEvent::Error { message } => {
                warn!(%message, "session: server error");
                let text = if message.trim().is_empty() {
                    SERVER_ERROR_TEXT.to_string()
                } else {
                    message
                };
                self.push_message(MessageOrigin::System, text);
            }
            ServerEvent::Unknown => {}
        }
    }

    fn begin_search(&mut self, effects: &mut Vec<Effect>) {
        self.restart_after_close = None;
        self.transcript.clear();
        self.partner_id = None;
        self.room_id = None;
        self.elapsed_search_seconds = 0;

        self.close_connection(effects);
        self.stop_timer(effects);

        let connection = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        self.connection = Some(ConnectionSlot {
            id: connection,
            open: false,
        });
        effects.push(Effect::OpenConnection(connection));

        let timer = TimerId(self.next_timer_id);
        self.next_timer_id += 1;
        self.timer = Some(timer);
        effects.push(Effect::StartTimer(timer));

        self.status = SessionStatus::Searching;
        info!(connection_id = connection.0, "session: searching for partner");
    }

    /// Returns the connection that was closed, if there was one.
    fn teardown(&mut self, effects: &mut Vec<Effect>) -> Option<ConnectionId> {
        self.send_best_effort(ClientRequest::Disconnect, effects);
        let closed = self.close_connection(effects);
        self.stop_timer(effects);
        self.partner_id = None;
        self.room_id = None;
        self.transcript.clear();
        self.status = SessionStatus::Idle;
        info!("session: disconnected");
        closed
    }

    fn send_best_effort(&self, request: ClientRequest, effects: &mut Vec<Effect>) {
        match self.connection {
            Some(slot) if slot.open => effects.push(Effect::Send(slot.id, request)),
            _ => debug!(request = request.kind(), "session: transport not open, skipping send"),
        }
    }

    fn close_connection(&mut self, effects: &mut Vec<Effect>) -> Option<ConnectionId> {
        let slot = self.connection.take()?;
        effects.push(Effect::CloseConnection(slot.id));
        Some(slot.id)
    }

    fn stop_timer(&mut self, effects: &mut Vec<Effect>) {
        if let Some(timer) = self.timer.take() {
            effects.push(Effect::StopTimer(timer));
        }
    }

    fn push_message(&mut self, origin: MessageOrigin, text: impl Into<String>) {
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;
        self.transcript.push(TranscriptMessage {
            id,
            text: text.into(),
            origin,
            sent_at: Utc::now(),
        });
    }

    fn invalid(&self, action: UserAction) -> SessionError {
        SessionError::InvalidTransition {
            action,
            status: self.status,
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
