use thiserror::Error;

use crate::domain::SessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    StartSearch,
    StopSearch,
    Disconnect,
    NextPartner,
    SendMessage,
}

impl UserAction {
    pub fn name(self) -> &'static str {
        match self {
            Self::StartSearch => "start_search",
            Self::StopSearch => "stop_search",
            Self::Disconnect => "disconnect",
            Self::NextPartner => "next_partner",
            Self::SendMessage => "send_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("transport is not ready; message was not sent")]
    TransportNotReady,
    #[error("{} is not allowed while {}", .action.name(), .status.label())]
    InvalidTransition {
        action: UserAction,
        status: SessionStatus,
    },
    #[error("session runtime has stopped")]
    RuntimeStopped,
}
