//! Client library for the exoplanet simulation portal.
//!
//! The portal runs simulations as background tasks: a submission returns a
//! task id immediately, and the outcome is observed by polling the task
//! status endpoint (or the run history) on a fixed interval until the task
//! reaches a terminal state.
//!
//! Layering, bottom to top:
//! - [`protocol`]: wire shapes shared with the portal (status payloads,
//!   history pages, error envelopes)
//! - [`results`]: typed result payloads per simulation type
//! - [`client`]: HTTP access behind the [`client::PortalBackend`] trait
//! - [`poll`]: single-owner fixed-interval polling sessions
//! - [`render`]: plain-text rendering of everything above
//! - [`config`]: portal location, credentials and poll cadence

pub mod client;
pub mod config;
pub mod poll;
pub mod protocol;
pub mod render;
pub mod results;
