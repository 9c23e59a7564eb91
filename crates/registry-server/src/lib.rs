// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service registry server.
//!
//! Registrants connect to the registration port, register one instance and
//! keep its lease alive with heartbeats. Subscribers connect to the discovery
//! port, declare an interest and receive every matching registry change,
//! one acknowledged message at a time.
//!
//! Both ports speak length-prefixed JSON (see [`server::connection`]).

pub mod config;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use server::{
    ConnectionOptions, FramedConnection, InstanceRegistry, InterestNotificationMultiplexer,
    RegisterOutcome, RegistrationChannel, RegistrationState, RegistryError, RegistryServer,
    ServerError,
};
