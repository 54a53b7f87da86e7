//! Hard input bounds. Violations surface as `EngineError::LimitExceeded`.

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 64;

/// Lazily created date records kept per tenant.
pub const MAX_SCHEDULES_PER_TENANT: usize = 4096;

/// Slots one weekday template entry may offer.
pub const MAX_SLOTS_PER_DAY: usize = 96;
pub const MAX_TIME_LABEL_LEN: usize = 16;

pub const MAX_PATIENT_NAME_LEN: usize = 128;
pub const MIN_MOBILE_LEN: usize = 7;
pub const MAX_MOBILE_LEN: usize = 20;
pub const MAX_EMAIL_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 512;
