//! Token acquisition for web clients: a cross-origin token broker plus a
//! CSRF-protected request pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐         ┌──────────────────┐
//! │   TokenBroker    │         │    CsrfClient    │
//! │ (frame messages) │         │  (HTTP + CSRF)   │
//! └────────┬─────────┘         └────────┬─────────┘
//!          │                            │
//!          └────────────┬───────────────┘
//!                       ▼
//!             RedirectDecider + TokenError
//!              (shared policy, sky-auth-common)
//! ```
//!
//! [`broker::TokenBroker`] talks to a trusted hosted frame on another origin
//! through message passing, correlating concurrent requests by id and gating
//! every send on the frame's readiness announcement.
//!
//! [`csrf::CsrfClient`] acquires a one-time anti-forgery token before each
//! state-changing HTTP call, classifies failures, and either redirects the
//! user or surfaces a typed [`sky_auth_common::TokenError`].
//!
//! The two halves share no mutable state; they share only the error taxonomy
//! and the redirect policy from `sky-auth-common`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod broker;
pub mod csrf;

pub use broker::{BrokerBuilder, FrameHost, FramePort, MessageEnvelope, TokenBroker};
pub use csrf::{CsrfClient, CsrfClientBuilder, TokenRequestOptions};
pub use sky_auth_common::{
    Disposition, GetTokenArgs, Navigator, RedirectDecider, StsDomain, TokenError, TokenErrorCode,
    TokenResponse,
};
