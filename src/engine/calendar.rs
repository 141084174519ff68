use crate::limits::*;
use crate::model::*;

use super::EngineError;
use super::error::BusyReason;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Check order and bounds on a caller-supplied date pair before anything
/// else looks at it.
pub(crate) fn validate_range(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::Validation("start date must be before end date"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("rental span too wide"));
    }
    Ok(Span::new(start, end))
}

/// What a candidate range must steer clear of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Occupancy {
    /// Bookings and owner blocks alike: a renter reserving.
    Everything,
    /// Bookings only: an owner blocking dates may overlap existing blocks.
    BookingsOnly,
}

/// Reject `span` if anything in scope occupies it. Holds past their
/// expiry read as free even before the sweep has cancelled them.
pub(crate) fn check_free(
    vs: &VehicleState,
    span: &Span,
    now: Ms,
    scope: Occupancy,
) -> Result<(), EngineError> {
    for entry in vs.overlapping(span) {
        match &entry.kind {
            EntryKind::Hold { expires_at } if *expires_at <= now => continue,
            EntryKind::Hold { .. } | EntryKind::Booked => {
                return Err(EngineError::Busy {
                    entry_id: entry.id,
                    reason: BusyReason::Booked,
                });
            }
            EntryKind::Blocked { .. } => {
                if scope == Occupancy::Everything {
                    return Err(EngineError::Busy {
                        entry_id: entry.id,
                        reason: BusyReason::Blocked,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Open sub-ranges of `window` on this vehicle's calendar.
pub(crate) fn free_windows(vs: &VehicleState, window: &Span, now: Ms) -> Vec<Span> {
    let mut taken: Vec<Span> = Vec::new();
    for entry in vs.overlapping(window) {
        if let EntryKind::Hold { expires_at } = entry.kind
            && expires_at <= now
        {
            continue;
        }
        taken.push(Span::new(
            entry.span.start.max(window.start),
            entry.span.end.min(window.end),
        ));
    }
    taken.sort_by_key(|s| s.start);
    subtract_spans(&[*window], &merge_spans(&taken))
}

/// Collapse sorted spans into disjoint ones, joining overlap and adjacency.
pub(crate) fn merge_spans(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for &span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `base` minus `holes`, both sorted by start, holes disjoint.
pub(crate) fn subtract_spans(base: &[Span], holes: &[Span]) -> Vec<Span> {
    let mut out = Vec::new();
    for &b in base {
        let mut cursor = b.start;
        for h in holes {
            if h.end <= cursor {
                continue;
            }
            if h.start >= b.end {
                break;
            }
            if h.start > cursor {
                out.push(Span::new(cursor, h.start));
            }
            cursor = cursor.max(h.end);
            if cursor >= b.end {
                break;
            }
        }
        if cursor < b.end {
            out.push(Span::new(cursor, b.end));
        }
    }
    out
}
