//! `motion_client`
//!
//! Client-side movement reconciliation:
//! - Speculative player steps with confirm/deny/resync handling (`walker`)
//! - Server-driven boat interpolation with passengers (`boat`)
//! - Pixel offset interpolation between tiles (`interp`)
//! - Input mapping (`input`)
//! - Single-threaded session context wiring it together (`session`)
//! - Async connection wrapper (`client`)

pub mod boat;
pub mod client;
pub mod input;
pub mod interp;
pub mod session;
pub mod walker;

pub use client::GameClient;
pub use session::Session;
