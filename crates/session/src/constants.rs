//! Wire and persistence constants shared with the backend.

/// Renewal endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Login endpoint, relative to the API base URL
pub const LOGIN_PATH: &str = "/auth/login";

/// Header carrying the active tenant identifier
pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// Persistence key for the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Persistence key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Persistence key for the active tenant
pub const TENANT_ID_KEY: &str = "tenant_id";

/// Persistence key for the access token expiry (unix milliseconds)
pub const EXPIRES_AT_KEY: &str = "expires_at";
