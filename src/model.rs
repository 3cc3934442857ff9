use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Start of the UTC day containing `t`.
pub fn day_start(t: Ms) -> Ms {
    t.div_euclid(DAY_MS) * DAY_MS
}

/// Wall clock in unix milliseconds.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// The UTC day `[day_start, day_start + 24h)` containing `t`. The last
    /// representable day is clamped at `Ms::MAX`.
    pub fn day_of(t: Ms) -> Self {
        let start = day_start(t);
        Self::new(start, start.saturating_add(DAY_MS))
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Booking lifecycle: `pending -> confirmed -> {cancelled, expired}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    /// Active bookings occupy their room; cancelled and expired ones don't.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Expired)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    /// Six characters from `[A-Z0-9]`, shown to the user on confirmation.
    pub confirm_code: String,
    pub title: Option<String>,
    pub created_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "member" | "student" | "user" => Some(Role::Member),
            _ => None,
        }
    }
}

/// SCRAM-SHA-256 secret: the PBKDF2-salted password and its salt. The
/// cleartext password is never stored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub salt: Vec<u8>,
    pub salted_password: Vec<u8>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    /// Blocks new bookings while set.
    pub suspended: bool,
    /// Refused at login while set.
    pub locked: bool,
    /// Removed account; its bookings are orphans.
    pub deleted: bool,
    pub credential: Credential,
}

impl User {
    pub fn status(&self) -> UserStatus {
        if self.deleted {
            UserStatus::Deleted
        } else if self.locked {
            UserStatus::Locked
        } else if self.suspended {
            UserStatus::Suspended
        } else {
            UserStatus::Active
        }
    }

    /// Admin that can still log in.
    pub fn is_active_admin(&self) -> bool {
        self.role == Role::Admin && !self.deleted && !self.locked
    }
}

/// Account status as listed to admins. Locked wins over suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserStatus {
    Active,
    Suspended,
    Locked,
    Deleted,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Locked => "locked",
            UserStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<UserStatus> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(UserStatus::Active),
            "suspended" => Some(UserStatus::Suspended),
            "locked" => Some(UserStatus::Locked),
            "deleted" => Some(UserStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Maintenance,
    Retired,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Maintenance => "maintenance",
            RoomStatus::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<RoomStatus> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Some(RoomStatus::Available),
            "maintenance" => Some(RoomStatus::Maintenance),
            "retired" => Some(RoomStatus::Retired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub code: String,
    pub display_name: Option<String>,
    pub location: Option<String>,
    pub capacity: u32,
    pub facilities: Vec<String>,
    pub status: RoomStatus,
}

impl Room {
    pub fn has_facility(&self, name: &str) -> bool {
        self.facilities.iter().any(|f| f.eq_ignore_ascii_case(name))
    }
}

/// A room plus every booking ever made for it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// All bookings regardless of status, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.room.id
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Remove booking by id (used when moving a booking to a new start).
    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn set_status(&mut self, id: Ulid, status: BookingStatus) -> Option<BookingStatus> {
        let booking = self.bookings.iter_mut().find(|b| b.id == id)?;
        let prev = booking.status;
        booking.status = status;
        Some(prev)
    }

    /// Bookings (any status) whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.is_active())
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    UserRegistered {
        user: User,
    },
    UserUpdated {
        user: User,
    },
    BookingConfirmed {
        booking: Booking,
    },
    BookingRescheduled {
        id: Ulid,
        room_id: Ulid,
        span: Span,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
    },
}

impl Event {
    /// Room the event applies to, if any.
    pub fn room_id(&self) -> Option<Ulid> {
        match self {
            Event::RoomCreated { room } | Event::RoomUpdated { room } => Some(room.id),
            Event::BookingConfirmed { booking } => Some(booking.room_id),
            Event::BookingRescheduled { room_id, .. } | Event::BookingStatusChanged { room_id, .. } => {
                Some(*room_id)
            }
            Event::UserRegistered { .. } | Event::UserUpdated { .. } => None,
        }
    }

    /// Booking the event applies to, if any.
    pub fn booking_id(&self) -> Option<Ulid> {
        match self {
            Event::BookingConfirmed { booking } => Some(booking.id),
            Event::BookingRescheduled { id, .. } | Event::BookingStatusChanged { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::RoomCreated { .. } => "room_created",
            Event::RoomUpdated { .. } => "room_updated",
            Event::UserRegistered { .. } => "user_registered",
            Event::UserUpdated { .. } => "user_updated",
            Event::BookingConfirmed { .. } => "booking_confirmed",
            Event::BookingRescheduled { .. } => "booking_rescheduled",
            Event::BookingStatusChanged { .. } => "booking_status_changed",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSchedule {
    pub room_id: Ulid,
    pub room_code: String,
    pub day: Span,
    pub bookings: Vec<Booking>,
    pub free: Vec<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequentBooker {
    pub user_id: Ulid,
    pub username: String,
    pub booking_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomFilter {
    pub code: Option<String>,
    pub min_capacity: Option<u32>,
    pub max_capacity: Option<u32>,
    pub location: Option<String>,
    pub facilities: Vec<String>,
    pub only_available: bool,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room) -> bool {
        if room.status == RoomStatus::Retired {
            return false;
        }
        if self.only_available && room.status != RoomStatus::Available {
            return false;
        }
        if let Some(code) = &self.code
            && !contains_ignore_case(&room.code, code)
        {
            return false;
        }
        if self.min_capacity.is_some_and(|min| room.capacity < min) {
            return false;
        }
        if self.max_capacity.is_some_and(|max| room.capacity > max) {
            return false;
        }
        if let Some(loc) = &self.location
            && !room.location.as_deref().is_some_and(|l| contains_ignore_case(l, loc))
        {
            return false;
        }
        self.facilities.iter().all(|f| room.has_facility(f))
    }
}

/// Optional bounds on a booking listing. A booking is kept when its span
/// overlaps `[start, end)`; a missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
}

impl TimeWindow {
    pub fn is_bounded(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    pub fn admits(&self, span: &Span) -> bool {
        self.start.is_none_or(|s| span.end > s) && self.end.is_none_or(|e| span.start < e)
    }
}

/// Admin user listing filter. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    /// Case-insensitive substring of the username.
    pub username: Option<String>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        if self.role.is_some_and(|r| r != user.role) {
            return false;
        }
        match self.status {
            Some(status) if status != user.status() => return false,
            // Deleted accounts are listed only when asked for.
            None if user.deleted => return false,
            _ => {}
        }
        self.username
            .as_deref()
            .is_none_or(|needle| contains_ignore_case(&user.username, needle))
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
