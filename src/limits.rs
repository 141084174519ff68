//! Hard bounds on inputs. Everything here is checked before any state is
//! touched, so a hostile or buggy caller cannot bloat a calendar or write
//! absurd timestamps into the journal.

use crate::model::Ms;

/// 2020-01-01T00:00:00Z. Rentals before the platform existed are noise.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 1_577_836_800_000;

/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single rental or block: 180 days.
pub const MAX_SPAN_DURATION_MS: Ms = 180 * 24 * 3_600_000;

/// Widest free-window query: 366 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_VEHICLES: usize = 100_000;

/// Calendar entries per vehicle (blocks + holds + booked ranges).
pub const MAX_ENTRIES_PER_VEHICLE: usize = 4_096;

/// Spans accepted in a single block request.
pub const MAX_SPANS_PER_BLOCK: usize = 32;

pub const MAX_NOTE_LEN: usize = 512;
pub const MAX_REASON_LEN: usize = 512;
pub const MAX_LOCATION_LEN: usize = 256;
pub const MAX_PROMO_CODE_LEN: usize = 64;

/// Per check record.
pub const MAX_DAMAGES_PER_RECORD: usize = 64;
pub const MAX_PHOTOS_PER_RECORD: usize = 32;
pub const MAX_DAMAGE_TEXT_LEN: usize = 256;

/// Signatures arrive as encoded image blobs.
pub const MAX_SIGNATURE_LEN: usize = 16_384;
