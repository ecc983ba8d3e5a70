//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own relay state transitions so the route handler can stay
//! focused on protocol translation.

pub mod relay;
