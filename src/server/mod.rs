//! HTTP surface: router construction, control-plane and user-traffic
//! handlers, and the transparent proxy engine.

pub mod handlers;
pub mod proxy;
pub mod service;
