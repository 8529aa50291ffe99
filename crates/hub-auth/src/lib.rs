//! # hub-auth
//!
//! HS256 session tokens for the realtime handshake. [`JwtIdentityProvider`]
//! implements [`hub_core::IdentityProvider`]; [`issue_token`] mints tokens
//! for the same secret (used by the gateway's `token` command and tests).

#![deny(unsafe_code)]

pub mod errors;
pub mod jwt;

pub use errors::AuthError;
pub use jwt::{Claims, JwtIdentityProvider, issue_token};
