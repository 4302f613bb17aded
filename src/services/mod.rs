//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! `room` and `drift` are pure state and arithmetic. `registry` owns room
//! lifetime, `sync` applies events and publishes through `broadcast`, and
//! `session` binds one connection to at most one room. Route handlers stay
//! focused on protocol translation.

pub mod broadcast;
pub mod drift;
pub mod registry;
pub mod room;
pub mod session;
pub mod sync;
