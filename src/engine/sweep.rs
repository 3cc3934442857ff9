use std::collections::{HashMap, HashSet};

use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::DEFAULT_BOOKING_THRESHOLD;
use crate::model::*;

use super::Engine;

/// Which bookings the compliance sweeper treats as non-compliant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Max active bookings per user, per room, per UTC day. Also enforced at booking time.
    pub booking_threshold: usize,
    /// Cancel bookings in rooms placed under maintenance.
    pub cancel_on_maintenance: bool,
    /// Cancel upcoming bookings of suspended users.
    pub cancel_suspended: bool,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            booking_threshold: DEFAULT_BOOKING_THRESHOLD,
            cancel_on_maintenance: true,
            cancel_suspended: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Violation {
    OrphanedRoom,
    OrphanedUser,
    RoomMaintenance,
    SuspendedOwner,
    OverThreshold,
}

impl Violation {
    pub fn as_str(self) -> &'static str {
        match self {
            Violation::OrphanedRoom => "orphaned_room",
            Violation::OrphanedUser => "orphaned_user",
            Violation::RoomMaintenance => "room_maintenance",
            Violation::SuspendedOwner => "suspended_owner",
            Violation::OverThreshold => "over_threshold",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cancelled: Vec<(Ulid, Violation)>,
    /// Bookings that should have been cancelled but weren't (logged).
    pub failed: Vec<Ulid>,
}

impl SweepReport {
    pub fn any_cancelled(&self) -> bool {
        !self.cancelled.is_empty()
    }
}

/// Bookings beyond the per-user daily threshold, oldest-created kept first.
fn over_threshold(candidates: &[&Booking], threshold: usize) -> HashSet<Ulid> {
    let mut groups: HashMap<(Ulid, Ms), Vec<&Booking>> = HashMap::new();
    for b in candidates {
        groups
            .entry((b.user_id, day_start(b.span.start)))
            .or_default()
            .push(b);
    }
    let mut excess = HashSet::new();
    for mut group in groups.into_values() {
        if group.len() <= threshold {
            continue;
        }
        group.sort_by_key(|b| (b.created_at, b.id));
        excess.extend(group[threshold..].iter().map(|b| b.id));
    }
    excess
}

impl Engine {
    fn violation_for(&self, room: &Room, booking: &Booking, excess: &HashSet<Ulid>) -> Option<Violation> {
        if room.status == RoomStatus::Retired {
            return Some(Violation::OrphanedRoom);
        }
        let owner = self.get_user(&booking.user_id);
        match owner {
            None => return Some(Violation::OrphanedUser),
            Some(ref u) if u.deleted => return Some(Violation::OrphanedUser),
            _ => {}
        }
        if self.policy.cancel_on_maintenance && room.status == RoomStatus::Maintenance {
            return Some(Violation::RoomMaintenance);
        }
        if self.policy.cancel_suspended && owner.is_some_and(|u| u.suspended) {
            return Some(Violation::SuspendedOwner);
        }
        excess.contains(&booking.id).then_some(Violation::OverThreshold)
    }

    /// Cancel every active, not-yet-finished booking that violates the
    /// policy. A failure on one booking is logged and the sweep moves on.
    pub async fn sweep_non_compliant(&self, now: Ms) -> SweepReport {
        let mut report = SweepReport::default();
        let room_states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();

        for rs in room_states {
            let _gate = self.gate().await;
            let mut guard = rs.write().await;

            let live: Vec<&Booking> = guard
                .bookings
                .iter()
                .filter(|b| b.is_active() && b.span.end > now)
                .collect();
            let excess = over_threshold(&live, self.policy.booking_threshold);
            let doomed: Vec<(Ulid, Violation)> = live
                .iter()
                .filter_map(|b| self.violation_for(&guard.room, b, &excess).map(|v| (b.id, v)))
                .collect();

            for (id, violation) in doomed {
                let event = Event::BookingStatusChanged {
                    id,
                    room_id: guard.id(),
                    status: BookingStatus::Cancelled,
                };
                match self.persist_and_apply(&mut guard, &event).await {
                    Ok(()) => {
                        info!(booking = %id, reason = violation.as_str(), "sweeper cancelled booking");
                        report.cancelled.push((id, violation));
                    }
                    Err(e) => {
                        warn!(booking = %id, "sweeper could not cancel booking: {e}");
                        report.failed.push(id);
                    }
                }
            }
        }

        metrics::counter!(crate::observability::SWEEP_CANCELLED_TOTAL)
            .increment(report.cancelled.len() as u64);
        report
    }
}
