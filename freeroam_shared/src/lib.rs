//! `freeroam_shared`
//!
//! Wire-level building blocks shared by the server and tooling.
//!
//! Design goals:
//! - Closed enums for every wire concept (packet categories, argument kinds)
//!   so adding a kind is compile-time checked at every match site.
//! - Decode failures surface as "no value", never as a panic or an error that
//!   crosses the protocol boundary.
//! - No `unsafe`.

pub mod codec;
pub mod config;
pub mod manifest;
pub mod math;
pub mod natives;
pub mod protocol;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::codec::*;
    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::natives::*;
    pub use crate::protocol::*;
}
