//! Hard limits on tenant input. Checked at the engine boundary so a single
//! client cannot grow a tenant's memory or WAL without bound.

use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4096;

pub const MAX_BRANCHES_PER_TENANT: usize = 10_000;
pub const MAX_CALENDAR_ENTRIES_PER_BRANCH: usize = 4_096;
pub const MAX_APPOINTMENTS_PER_TENANT: usize = 2_000_000;

pub const MAX_SERVICES_PER_APPOINTMENT: usize = 16;
pub const MAX_STYLISTS_PER_QUERY: usize = 16;

/// A single appointment can occupy at most one day.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
