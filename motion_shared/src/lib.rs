//! `motion_shared`
//!
//! Libraries used by both the movement client and the reference server.
//!
//! Design goals:
//! - Deterministic where practical: time enters as plain milliseconds.
//! - Collaborators behind narrow traits (`EntityStore`, `PacketSink`, `Clock`).
//! - No `unsafe`.

pub mod clock;
pub mod config;
pub mod math;
pub mod net;
pub mod world;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::world::*;
}
