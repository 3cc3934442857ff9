use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Shape checks on a requested booking interval, in the order callers see them.
pub(crate) fn validate_span(start: Ms, end: Ms, now: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::Validation("start must be before end"));
    }
    if start <= now {
        return Err(EngineError::Validation("start must be in the future"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(Span::new(start, end))
}

/// First active booking in `room` overlapping `span`, skipping `excluding`.
pub(crate) fn find_conflict(room: &RoomState, span: &Span, excluding: Option<Ulid>) -> Option<Ulid> {
    room.active_overlapping(span)
        .find(|b| Some(b.id) != excluding)
        .map(|b| b.id)
}

pub(crate) fn check_no_conflict(
    room: &RoomState,
    span: &Span,
    excluding: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(room, span, excluding) {
        Some(existing) => Err(EngineError::Conflict(existing)),
        None => Ok(()),
    }
}

/// Active bookings `user_id` holds in `room` on the UTC day of `t`.
pub(crate) fn active_on_day(room: &RoomState, user_id: Ulid, t: Ms, excluding: Option<Ulid>) -> usize {
    let day = Span::day_of(t);
    room.bookings
        .iter()
        .filter(|b| {
            b.user_id == user_id
                && b.is_active()
                && day.contains_instant(b.span.start)
                && Some(b.id) != excluding
        })
        .count()
}
