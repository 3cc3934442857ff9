use std::collections::HashMap;

use ulid::Ulid;

use crate::auth::Identity;
use crate::limits::*;
use crate::model::*;

use super::availability::free_slots;
use super::conflict::find_conflict;
use super::{Engine, EngineError, SharedRoomState};

/// Client-supplied instants must fall in the supported range before any
/// arithmetic touches them.
fn check_instant(t: Ms) -> Result<(), EngineError> {
    if (MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        Ok(())
    } else {
        Err(EngineError::LimitExceeded("timestamp out of range"))
    }
}

fn check_window(window: &TimeWindow) -> Result<(), EngineError> {
    if let (Some(start), Some(end)) = (window.start, window.end)
        && start >= end
    {
        return Err(EngineError::Validation("start must be before end"));
    }
    Ok(())
}

impl Engine {
    fn room_states(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    /// Whether `[start, end)` overlaps an active booking in the room, ignoring
    /// `excluding`. Unknown rooms and empty intervals never conflict.
    pub async fn has_conflict(&self, room_id: Ulid, start: Ms, end: Ms, excluding: Option<Ulid>) -> bool {
        if start >= end {
            return false;
        }
        let Some(rs) = self.get_room_state(&room_id) else {
            return false;
        };
        let guard = rs.read().await;
        find_conflict(&guard, &Span::new(start, end), excluding).is_some()
    }

    /// Active bookings in a room overlapping `[start, end)`, by start time.
    pub async fn find_active_bookings(&self, room_id: Ulid, start: Ms, end: Ms) -> Result<Vec<Booking>, EngineError> {
        if start >= end {
            return Err(EngineError::Validation("start must be before end"));
        }
        check_instant(start)?;
        check_instant(end)?;
        if end - start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.active_overlapping(&Span::new(start, end)).cloned().collect())
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Option<Booking> {
        let rs = self.get_room_state(&self.room_for_booking(&booking_id)?)?;
        let guard = rs.read().await;
        guard.booking(booking_id).cloned()
    }

    async fn collect_bookings(&self, room: Option<Ulid>, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let room_states = match room {
            Some(rid) => self.get_room_state(&rid).into_iter().collect(),
            None => self.room_states(),
        };
        let mut out = Vec::new();
        for rs in room_states {
            let guard = rs.read().await;
            out.extend(guard.bookings.iter().filter(|&b| keep(b)).cloned());
        }
        out.sort_by_key(|b| (b.span.start, b.id));
        out
    }

    /// A user's booking history in every status, optionally for one room
    /// and narrowed to bookings overlapping `window`.
    pub async fn user_bookings(
        &self,
        user_id: Ulid,
        room: Option<Ulid>,
        window: TimeWindow,
        newest_first: bool,
    ) -> Result<Vec<Booking>, EngineError> {
        check_window(&window)?;
        let mut bookings = self
            .collect_bookings(room, |b| b.user_id == user_id && window.admits(&b.span))
            .await;
        if newest_first {
            bookings.reverse();
        }
        Ok(bookings)
    }

    /// Admin listing across all users, narrowed by room, user and window.
    pub async fn filtered_bookings(
        &self,
        who: &Identity,
        room: Option<Ulid>,
        user: Option<Ulid>,
        window: TimeWindow,
    ) -> Result<Vec<Booking>, EngineError> {
        who.require_admin()?;
        check_window(&window)?;
        Ok(self
            .collect_bookings(room, |b| {
                user.is_none_or(|u| b.user_id == u) && window.admits(&b.span)
            })
            .await)
    }

    /// A room's bookings and free slots for the UTC day containing `day`.
    pub async fn room_schedule(&self, room_id: Ulid, day: Ms, now: Ms) -> Result<RoomSchedule, EngineError> {
        check_instant(day)?;
        let window = Span::day_of(day);
        if window.end <= now {
            return Err(EngineError::Validation("schedule date is in the past"));
        }
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        if guard.room.status == RoomStatus::Retired {
            return Err(EngineError::NotFound(room_id));
        }
        Ok(RoomSchedule {
            room_id,
            room_code: guard.room.code.clone(),
            day: window,
            bookings: guard.active_overlapping(&window).cloned().collect(),
            free: free_slots(&guard, &window),
        })
    }

    /// Users ranked by how many bookings they start on the given day.
    /// Cancelled bookings don't count.
    pub async fn frequent_bookers(&self, day: Ms, ascending: bool) -> Result<Vec<FrequentBooker>, EngineError> {
        check_instant(day)?;
        let window = Span::day_of(day);
        let mut counts: HashMap<Ulid, usize> = HashMap::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            for b in &guard.bookings {
                if b.status != BookingStatus::Cancelled && window.contains_instant(b.span.start) {
                    *counts.entry(b.user_id).or_default() += 1;
                }
            }
        }

        let mut out: Vec<FrequentBooker> = counts
            .into_iter()
            .map(|(user_id, booking_count)| FrequentBooker {
                user_id,
                username: self.get_user(&user_id).map(|u| u.username).unwrap_or_default(),
                booking_count,
            })
            .collect();
        out.sort_by(|a, b| {
            let by_count = if ascending {
                a.booking_count.cmp(&b.booking_count)
            } else {
                b.booking_count.cmp(&a.booking_count)
            };
            by_count.then_with(|| a.username.cmp(&b.username))
        });
        Ok(out)
    }

    /// Room catalog search. Retired rooms never appear.
    pub async fn list_rooms(&self, filter: &RoomFilter) -> Vec<Room> {
        let mut out = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            if filter.matches(&guard.room) {
                out.push(guard.room.clone());
            }
        }
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }
}
