use std::io::{self, Write};

use chrono::Local;
use shared::domain::{MessageId, MessageOrigin, SessionSnapshot, SessionStatus, TranscriptMessage};

/// Prints status changes and transcript entries not shown yet.
#[derive(Debug, Default)]
pub struct Renderer {
    last_status: Option<SessionStatus>,
    last_printed: Option<MessageId>,
}

impl Renderer {
    pub fn render(&mut self, snapshot: &SessionSnapshot, out: &mut impl Write) -> io::Result<()> {
        if self.last_status != Some(snapshot.status) {
            self.last_status = Some(snapshot.status);
            writeln!(out, "{}", status_line(snapshot))?;
        }
        for message in &snapshot.transcript {
            if self.last_printed.is_some_and(|last| message.id <= last) {
                continue;
            }
            writeln!(out, "{}", format_message(message))?;
            self.last_printed = Some(message.id);
        }
        out.flush()
    }
}

pub fn status_line(snapshot: &SessionSnapshot) -> String {
    match (snapshot.status, snapshot.partner_id.as_deref()) {
        (SessionStatus::Searching, _) => format!(
            "== {} {}",
            snapshot.status_text(),
            snapshot.formatted_search_time()
        ),
        (SessionStatus::Paired, Some(partner)) => {
            format!("== {} (partner {partner})", snapshot.status_text())
        }
        _ => format!("== {}", snapshot.status_text()),
    }
}

fn format_message(message: &TranscriptMessage) -> String {
    let time = message.sent_at.with_timezone(&Local).format("%H:%M");
    match message.origin {
        MessageOrigin::Own => format!("[{time}] you: {}", message.text),
        MessageOrigin::Remote => format!("[{time}] stranger: {}", message.text),
        MessageOrigin::System => format!("[{time}] * {}", message.text),
    }
}
