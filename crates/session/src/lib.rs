//! Session state for the API client core
//!
//! Holds the access/refresh credential pair and the active tenant, persists
//! them through a key-value boundary, and talks to the backend's token
//! endpoints. This crate has no knowledge of request retry policy; the
//! `api-client` crate drives it.
//!
//! Session lifecycle:
//! 1. `SessionStore::hydrate()` reads persisted keys once at start-up
//! 2. `token::login()` exchanges user credentials for a token pair
//! 3. `SessionStore::set_session()` installs the pair and tenant
//! 4. `token::refresh_session()` renews the pair on an expired credential
//! 5. `SessionStore::update_credentials()` installs the renewed pair
//! 6. `SessionStore::clear()` on logout or irrecoverable refresh failure

pub mod constants;
pub mod error;
pub mod jwt;
pub mod persistence;
pub mod session;
pub mod store;
pub mod token;

pub use constants::*;
pub use error::{Error, Result};
pub use persistence::{FileStore, KeyValueStore, MemoryStore};
pub use session::{Credentials, Session, now_millis};
pub use store::{AuthHeaders, SessionStore};
pub use token::{LoginRequest, TokenResponse, login, refresh_session};
