//! # relay-auth
//!
//! Handshake authentication for the relay session gateway.
//!
//! A client proves its identity once, on the WebSocket upgrade request, with
//! a bearer JWT. This crate provides:
//!
//! - [`extract_credential`]: pulls the token from the `Authorization` header
//!   or the `token` query parameter
//! - [`JwtConfig`] / [`JwtManager`]: HS256 verification (and issuing, for
//!   tooling and tests)
//! - [`Identity`]: the claims bound to a connection for its lifetime

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod credential;
pub mod error;
pub mod jwt;

pub use credential::{extract_credential, token_from_query, AUTHORIZATION_HEADER, TOKEN_QUERY_PARAM};
pub use error::{AuthError, AuthResult};
pub use jwt::{Identity, JwtConfig, JwtManager, SessionClaims, MIN_SECRET_LEN};
