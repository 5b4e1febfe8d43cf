//! Hard limits applied at the registry and tenant boundaries.

/// Longest accepted doctor id, in bytes.
pub const MAX_ID_LEN: usize = 128;

/// Longest accepted specialization name, in bytes.
pub const MAX_CATEGORY_LEN: usize = 128;

/// Largest daily quota a single doctor may be registered with.
pub const MAX_CAPACITY: u32 = 100_000;

pub const MAX_RESOURCES_PER_TENANT: usize = 100_000;

pub const MAX_TENANTS: usize = 1024;

pub const MAX_TENANT_NAME_LEN: usize = 256;
