//! Infrastructure layer: everything that touches disks, sockets, or the
//! process environment.

pub mod config;
pub mod keys;
pub mod logging;
pub mod privval;
pub mod storage;
pub mod transport;
