use shared::domain::LocalIdentity;

use crate::config::Settings;

/// A configured Telegram id wins; otherwise an anonymous `dev_` id is
/// generated when allowed.
pub fn resolve_identity(settings: &Settings) -> Option<LocalIdentity> {
    if let Some(telegram_id) = settings.telegram_id.as_deref().map(str::trim) {
        if !telegram_id.is_empty() {
            return Some(LocalIdentity::telegram(telegram_id));
        }
    }
    settings
        .anonymous
        .then(LocalIdentity::generate_anonymous)
}

pub fn welcome_text(identity: Option<&LocalIdentity>) -> String {
    match identity {
        Some(identity) if identity.is_generated() => {
            format!("Development mode, your ID: {}", identity.id)
        }
        Some(identity) => format!("Welcome! Your ID: {}", identity.id),
        None => "No identity configured; pass --telegram-id or enable anonymous mode".into(),
    }
}
