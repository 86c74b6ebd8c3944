//! `motion_server`
//!
//! Reference authoritative server for the movement protocol:
//! - Fixed timestep loop draining one shared inbound queue
//! - Step validation by sequence number and fast-walk key
//! - Resync answers
//! - Boats that carry the players standing on them
//!
//! Networking model:
//! - TCP only, length-prefixed JSON frames

pub mod server;

pub use server::GameServer;
