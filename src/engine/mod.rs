mod availability;
mod conflict;
mod directory;
mod error;
mod lifecycle;
mod queries;
mod sweep;

pub use availability::{free_slots, merge_overlapping, subtract_intervals};
pub use directory::{RoomUpdate, UserUpdate};
pub use error::EngineError;
pub use sweep::{SweepPolicy, SweepReport, Violation};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::mailer::{BookingConfirmation, LogMailer, Mailer};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then one
/// fsync answers the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let append_err = batch
        .iter()
        .find_map(|(event, _)| wal.append_buffered(event).err());
    // Flush even after an append error so half-written bytes don't leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    let failure = append_err.or(flush_err);
    for (_, tx) in batch.drain(..) {
        let r = match &failure {
            None => Ok(()),
            Some(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory scheduler state: rooms with their bookings, plus the user directory.
///
/// Every room sits behind its own lock; a booking mutation holds that room's
/// write lock across the conflict check, the WAL append and the in-memory
/// apply, so two requests for the same room can never both pass the check.
/// `write_gate` is taken (shared) by every mutation before any room lock and
/// exclusively by compaction, so a snapshot never misses an in-flight append.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) users: DashMap<Ulid, User>,
    pub(super) usernames: DashMap<String, Ulid>,
    /// Reverse lookup: booking id → room id
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    /// Serializes user-directory mutations (username uniqueness).
    pub(super) directory_lock: Mutex<()>,
    pub(super) write_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) mailer: Arc<dyn Mailer>,
    pub(super) policy: SweepPolicy,
    /// Bookings whose WAL appends fail, for exercising error paths.
    #[cfg(test)]
    pub(super) wal_faults: dashmap::DashSet<Ulid>,
}

/// Apply a room-scoped event to a RoomState (caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { room } => rs.room = room.clone(),
        Event::BookingConfirmed { booking } => {
            booking_index.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingRescheduled { id, span, .. } => {
            if let Some(mut booking) = rs.remove_booking(*id) {
                booking.span = *span;
                rs.insert_booking(booking);
            }
        }
        Event::BookingStatusChanged { id, status, .. } => {
            rs.set_status(*id, *status);
        }
        // Room creation happens at the map level; users live outside rooms.
        Event::RoomCreated { .. } | Event::UserRegistered { .. } | Event::UserUpdated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (events, wal) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            users: DashMap::new(),
            usernames: DashMap::new(),
            booking_to_room: DashMap::new(),
            directory_lock: Mutex::new(()),
            write_gate: RwLock::new(()),
            wal_tx,
            notify,
            mailer: Arc::new(LogMailer),
            policy: SweepPolicy::default(),
            #[cfg(test)]
            wal_faults: dashmap::DashSet::new(),
        };

        // We are the sole owner of every lock during replay, so try_write
        // always succeeds. Never block here: this may run inside a runtime.
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                Event::UserRegistered { user } | Event::UserUpdated { user } => {
                    engine.apply_user(user);
                }
                other => {
                    let Some(room_id) = other.room_id() else { continue };
                    let Some(entry) = engine.rooms.get(&room_id) else {
                        warn!("replay: event for unknown room {room_id}");
                        continue;
                    };
                    let rs = entry.value().clone();
                    drop(entry);
                    match rs.try_write() {
                        Ok(mut guard) => apply_to_room(&mut guard, other, &engine.booking_to_room),
                        Err(_) => warn!("replay: room {room_id} unexpectedly locked"),
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_policy(mut self, policy: SweepPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &SweepPolicy {
        &self.policy
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        #[cfg(test)]
        if event.booking_id().is_some_and(|id| self.wal_faults.contains(&id)) {
            return Err(EngineError::WalError("write refused".into()));
        }
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Shared half of the write gate; take it before any room lock.
    pub(super) async fn gate(&self) -> RwLockReadGuard<'_, ()> {
        self.write_gate.read().await
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    fn apply_user(&self, user: &User) {
        self.usernames.insert(user.username.clone(), user.id);
        self.users.insert(user.id, user.clone());
    }

    /// WAL-append + apply + notify for a room-scoped event.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room);
        self.notify.send(rs.id(), event);
        Ok(())
    }

    /// WAL-append + apply for a user-directory event.
    pub(super) async fn persist_user(&self, user: User, created: bool) -> Result<User, EngineError> {
        let event = if created {
            Event::UserRegistered { user: user.clone() }
        } else {
            Event::UserUpdated { user: user.clone() }
        };
        self.wal_append(&event).await?;
        self.apply_user(&user);
        Ok(user)
    }

    /// Lookup booking → room, acquire the room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        Ok(rs.write_owned().await)
    }

    /// Deliver the confirmation mail. Failures are logged, never propagated.
    pub(super) fn send_confirmation(&self, booking: &Booking, room_code: &str) {
        let Some(user) = self.get_user(&booking.user_id) else { return };
        let msg = BookingConfirmation {
            booking_id: booking.id,
            user_id: user.id,
            username: user.username,
            email: user.email,
            room_code: room_code.to_string(),
            start: booking.span.start,
            end: booking.span.end,
            confirm_code: booking.confirm_code.clone(),
            title: booking.title.clone(),
        };
        if let Err(e) = self.mailer.send_booking_confirmation(&msg) {
            metrics::counter!(crate::observability::MAIL_FAILURES_TOTAL).increment(1);
            warn!(booking = %booking.id, "confirmation mail not sent: {e}");
        }
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.write_gate.write().await;

        let mut events: Vec<Event> = self
            .users
            .iter()
            .map(|e| Event::UserRegistered { user: e.value().clone() })
            .collect();

        let room_states: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in room_states {
            let guard = rs.read().await;
            events.push(Event::RoomCreated { room: guard.room.clone() });
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingConfirmed { booking: b.clone() }),
            );
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Six-character `[A-Z0-9]` confirmation code from a ULID's random bits.
pub(crate) fn confirm_code(seed: Ulid) -> String {
    const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut bits = seed.random();
    (0..6)
        .map(|_| {
            let c = ALPHABET[(bits % 36) as usize] as char;
            bits /= 36;
            c
        })
        .collect()
}
