use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use crate::model::Ms;

/// What a booking confirmation mail carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingConfirmation {
    pub booking_id: Ulid,
    pub user_id: Ulid,
    pub username: String,
    pub email: Option<String>,
    pub room_code: String,
    pub start: Ms,
    pub end: Ms,
    pub confirm_code: String,
    pub title: Option<String>,
}

#[derive(Debug)]
pub enum MailError {
    NoRecipient(Ulid),
    Transport(String),
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::NoRecipient(user) => write!(f, "no email address for user {user}"),
            MailError::Transport(e) => write!(f, "mail transport error: {e}"),
        }
    }
}

impl std::error::Error for MailError {}

/// Outbound mail. Fire-and-forget from the booking path: errors are logged
/// by the caller and never undo a committed booking.
pub trait Mailer: Send + Sync {
    fn send_booking_confirmation(&self, msg: &BookingConfirmation) -> Result<(), MailError>;
}

/// Writes confirmations to the log instead of an SMTP relay.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_booking_confirmation(&self, msg: &BookingConfirmation) -> Result<(), MailError> {
        let to = msg.email.as_deref().ok_or(MailError::NoRecipient(msg.user_id))?;
        let body = serde_json::to_string(msg).map_err(|e| MailError::Transport(e.to_string()))?;
        info!(to, booking = %msg.booking_id, code = %msg.confirm_code, "booking confirmation: {body}");
        Ok(())
    }
}
