//! Shared foundation for the sky-auth crates.
//!
//! This crate carries everything the token broker and the CSRF pipeline have
//! in common: the token error taxonomy, the redirect decider that maps a
//! failure condition to a navigation or a typed rejection, the collaborator
//! traits for things the library deliberately does not own (outbound
//! navigation), and the token/response types shared across both halves.
//!
//! The two consumers never share mutable state; they share only the types
//! and the policy defined here.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod domain;
pub mod error;
pub mod navigation;
pub mod redirect;
pub mod testing;
pub mod types;

pub use domain::StsDomain;
pub use error::{TokenError, TokenErrorCode};
pub use navigation::Navigator;
pub use redirect::{Disposition, RedirectDecider};
pub use types::{GetTokenArgs, TokenResponse};
