use tracing::{debug, info};
use ulid::Ulid;

use crate::auth::Identity;
use crate::limits::*;
use crate::model::*;

use super::conflict::{active_on_day, check_no_conflict, validate_span};
use super::{Engine, EngineError, confirm_code};

impl Engine {
    /// Reserve `room_id` for `[start, end)` on behalf of `who`.
    pub async fn book(
        &self,
        who: &Identity,
        id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        title: Option<String>,
    ) -> Result<Booking, EngineError> {
        self.book_at(who, id, room_id, start, end, title, now_ms()).await
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn book_at(
        &self,
        who: &Identity,
        id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        title: Option<String>,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        let span = validate_span(start, end, now)?;
        if title.as_ref().is_some_and(|t| t.len() > MAX_TITLE_LEN) {
            return Err(EngineError::LimitExceeded("title too long"));
        }
        self.check_may_book(who)?;

        let _gate = self.gate().await;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        check_room_open(&guard.room)?;
        if self.booking_to_room.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.bookings.iter().filter(|b| b.is_active()).count() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        let threshold = self.policy.booking_threshold;
        if active_on_day(&guard, who.user_id, span.start, None) >= threshold {
            return Err(EngineError::ThresholdExceeded(threshold));
        }
        if let Err(e) = check_no_conflict(&guard, &span, None) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let booking = Booking {
            id,
            room_id,
            user_id: who.user_id,
            span,
            status: BookingStatus::Confirmed,
            confirm_code: confirm_code(id),
            title,
            created_at: now,
        };
        let event = Event::BookingConfirmed { booking: booking.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        let room_code = guard.room.code.clone();
        drop(guard);

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(booking = %id, room = %room_id, user = %who.user_id, "booking confirmed");
        self.send_confirmation(&booking, &room_code);
        Ok(booking)
    }

    /// Suspension is read from the directory, not from the possibly stale identity.
    fn check_may_book(&self, who: &Identity) -> Result<(), EngineError> {
        let user = self
            .get_user(&who.user_id)
            .filter(|u| !u.deleted)
            .ok_or(EngineError::Permission("unknown or deleted account"))?;
        if user.suspended {
            return Err(EngineError::Permission("booking permission suspended"));
        }
        Ok(())
    }

    /// Owner cancellation. Another user's booking looks like a missing one
    /// unless the caller is an admin.
    pub async fn cancel(&self, who: &Identity, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.cancel_at(who, booking_id, now_ms(), true).await
    }

    /// Cancellation that skips the ownership check; requires admin.
    pub async fn admin_cancel(&self, who: &Identity, booking_id: Ulid) -> Result<Booking, EngineError> {
        who.require_admin()?;
        self.cancel_at(who, booking_id, now_ms(), false).await
    }

    pub(crate) async fn cancel_at(
        &self,
        who: &Identity,
        booking_id: Ulid,
        now: Ms,
        check_owner: bool,
    ) -> Result<Booking, EngineError> {
        let _gate = self.gate().await;
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if check_owner && !who.can_act_for(booking.user_id) {
            return Err(EngineError::NotFound(booking_id));
        }
        if !booking.is_active() {
            return Err(EngineError::InvalidState("booking is not active"));
        }
        if booking.span.start <= now {
            return Err(EngineError::InvalidState("cannot cancel an already started booking"));
        }

        let event = Event::BookingStatusChanged {
            id: booking_id,
            room_id: booking.room_id,
            status: BookingStatus::Cancelled,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(booking = %booking_id, by = %who.user_id, "booking cancelled");
        Ok(Booking {
            status: BookingStatus::Cancelled,
            ..booking
        })
    }

    /// Move a booking to a new interval in the same room. The conflict check
    /// ignores the booking being moved.
    pub async fn reschedule(
        &self,
        who: &Identity,
        booking_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Booking, EngineError> {
        self.reschedule_at(who, booking_id, start, end, now_ms()).await
    }

    pub(crate) async fn reschedule_at(
        &self,
        who: &Identity,
        booking_id: Ulid,
        start: Ms,
        end: Ms,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        let span = validate_span(start, end, now)?;
        self.check_may_book(who)?;

        let _gate = self.gate().await;
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if !who.can_act_for(booking.user_id) {
            return Err(EngineError::NotFound(booking_id));
        }
        if !booking.is_active() {
            return Err(EngineError::InvalidState("booking is not active"));
        }
        if booking.span.start <= now {
            return Err(EngineError::InvalidState("cannot move an already started booking"));
        }
        check_room_open(&guard.room)?;
        let threshold = self.policy.booking_threshold;
        if active_on_day(&guard, booking.user_id, span.start, Some(booking_id)) >= threshold {
            return Err(EngineError::ThresholdExceeded(threshold));
        }
        if let Err(e) = check_no_conflict(&guard, &span, Some(booking_id)) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::BookingRescheduled {
            id: booking_id,
            room_id: booking.room_id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %booking_id, start, end, "booking rescheduled");
        Ok(Booking { span, ..booking })
    }

    /// Close out bookings whose end has passed. Returns how many changed.
    pub async fn expire_finished(&self, now: Ms) -> usize {
        let mut expired = 0;
        let room_states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in room_states {
            let _gate = self.gate().await;
            let mut guard = rs.write().await;
            let finished: Vec<(Ulid, BookingStatus)> = guard
                .bookings
                .iter()
                .filter(|b| b.is_active() && b.span.end <= now)
                .map(|b| (b.id, b.status))
                .collect();
            for (id, status) in finished {
                let next = if status.can_transition_to(BookingStatus::Expired) {
                    BookingStatus::Expired
                } else {
                    BookingStatus::Cancelled
                };
                let event = Event::BookingStatusChanged {
                    id,
                    room_id: guard.id(),
                    status: next,
                };
                match self.persist_and_apply(&mut guard, &event).await {
                    Ok(()) => expired += 1,
                    Err(e) => debug!("expiry skip {id}: {e}"),
                }
            }
        }
        if expired > 0 {
            metrics::counter!(crate::observability::BOOKINGS_EXPIRED_TOTAL).increment(expired as u64);
        }
        expired
    }
}

fn check_room_open(room: &Room) -> Result<(), EngineError> {
    match room.status {
        RoomStatus::Available => Ok(()),
        RoomStatus::Maintenance => Err(EngineError::InvalidState("room is under maintenance")),
        RoomStatus::Retired => Err(EngineError::NotFound(room.id)),
    }
}
