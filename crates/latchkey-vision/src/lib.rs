//! `latchkey-vision` – Face Presence & Comparison
//!
//! The external vision capability the authorization stage relies on.
//!
//! # Modules
//!
//! - [`service`] – the [`VisionService`] trait.
//! - [`labels`] – converts detected labels into a presence confidence,
//!   vetoing faces shown on a screen.
//! - [`http`] – [`HttpVisionService`], a blocking `reqwest` client.
//! - [`sim`] – [`ScriptedVision`] with call counters.

pub mod http;
pub mod labels;
pub mod service;
pub mod sim;

pub use http::HttpVisionService;
pub use labels::{Label, presence_confidence};
pub use service::VisionService;
pub use sim::{ScriptedVision, VisionCalls};
