use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use pgwire::api::auth::sasl::scram::{SCRAM_ITERATIONS, gen_salted_password};
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{Credential, Role, User};
use crate::observability::AUTH_FAILURES_TOTAL;

/// The caller of a core operation. Resolved once per statement by the wire
/// layer and passed explicitly; nothing reads identity from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Ulid,
    pub username: String,
    pub role: Role,
}

impl Identity {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), EngineError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Permission("admin role required"))
        }
    }

    /// Owners act on their own records; admins act on anyone's.
    pub fn can_act_for(&self, owner: Ulid) -> bool {
        self.is_admin() || self.user_id == owner
    }
}

impl Credential {
    /// Salt and hash a cleartext password the way SCRAM-SHA-256 expects.
    pub fn from_password(password: &str) -> Self {
        // The random half of a fresh ULID is 80 bits of salt.
        let salt = Ulid::new().to_bytes()[6..].to_vec();
        let salted_password = gen_salted_password(password, &salt, SCRAM_ITERATIONS);
        Self { salt, salted_password }
    }

    pub fn verify(&self, password: &str) -> bool {
        gen_salted_password(password, &self.salt, SCRAM_ITERATIONS) == self.salted_password
    }
}

/// Password policy for account credentials: at least eight characters
/// with an uppercase letter, a lowercase letter and a digit.
pub fn check_password(password: &str) -> Result<(), EngineError> {
    if password.chars().count() < 8 {
        return Err(EngineError::Validation("password must be at least 8 characters"));
    }
    if password.len() > crate::limits::MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("password too long"));
    }
    let upper = password.chars().any(|c| c.is_uppercase());
    let lower = password.chars().any(|c| c.is_lowercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());
    if !(upper && lower && digit) {
        return Err(EngineError::Validation(
            "password needs an uppercase letter, a lowercase letter and a digit",
        ));
    }
    Ok(())
}

/// Per-connection SCRAM credential lookup.
///
/// A login that names an account must present that account's password;
/// locked and deleted accounts are refused before the exchange starts. A
/// login with no account authenticates with the shared server password and
/// the connection is marked as a guest, which may only register itself.
pub struct MeetbookAuthSource {
    engine: Arc<Engine>,
    guest_credential: Arc<Credential>,
    guest: AtomicBool,
}

impl MeetbookAuthSource {
    pub fn new(engine: Arc<Engine>, guest_credential: Arc<Credential>) -> Self {
        Self {
            engine,
            guest_credential,
            guest: AtomicBool::new(false),
        }
    }

    /// Whether this connection authenticated with the shared server password.
    pub fn is_guest(&self) -> bool {
        self.guest.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MeetbookAuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeetbookAuthSource")
            .field("guest", &self.is_guest())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthSource for MeetbookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let Some(name) = login.user() else {
            return Err(refused("no user name in startup message".into()));
        };
        match self.engine.user_by_name(name) {
            Some(user) if user.deleted => Err(refused(format!("account {name} has been removed"))),
            Some(user) if user.locked => Err(refused(format!("account {name} is locked"))),
            Some(user) => {
                self.guest.store(false, Ordering::Release);
                Ok(Password::new(
                    Some(user.credential.salt),
                    user.credential.salted_password,
                ))
            }
            None => {
                self.guest.store(true, Ordering::Release);
                Ok(Password::new(
                    Some(self.guest_credential.salt.clone()),
                    self.guest_credential.salted_password.clone(),
                ))
            }
        }
    }
}

fn refused(message: String) -> PgWireError {
    metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "FATAL".to_owned(),
        "28000".to_owned(),
        message,
    )))
}
