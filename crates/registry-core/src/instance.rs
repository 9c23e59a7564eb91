// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registered instance model and field-level deltas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Instance lifecycle status as reported by the registrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Up,
    Down,
    OutOfService,
    #[default]
    Unknown,
}

/// A registered service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Unique instance identifier
    pub id: String,

    /// Application (service) name
    pub app: String,

    /// Host name
    #[serde(default)]
    pub hostname: Option<String>,

    /// IP address (textual)
    #[serde(default)]
    pub ip_address: Option<String>,

    /// Service ports
    #[serde(default)]
    pub ports: Vec<u16>,

    /// Status
    #[serde(default)]
    pub status: InstanceStatus,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl InstanceInfo {
    /// Create an instance with the given id and application.
    pub fn new(id: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            app: app.into(),
            hostname: None,
            ip_address: None,
            ports: Vec::new(),
            status: InstanceStatus::Unknown,
            metadata: BTreeMap::new(),
        }
    }

    /// Builder-style status setter.
    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    /// Deltas turning `self` into `newer`.
    ///
    /// Fields are compared in a fixed order (app, hostname, ip address,
    /// ports, status, metadata) and the result follows that order. The id is
    /// not compared.
    pub fn diff(&self, newer: &InstanceInfo) -> Vec<Delta> {
        let mut fields = Vec::new();

        if self.app != newer.app {
            fields.push(DeltaField::App(newer.app.clone()));
        }
        if self.hostname != newer.hostname {
            fields.push(DeltaField::Hostname(newer.hostname.clone()));
        }
        if self.ip_address != newer.ip_address {
            fields.push(DeltaField::IpAddress(newer.ip_address.clone()));
        }
        if self.ports != newer.ports {
            fields.push(DeltaField::Ports(newer.ports.clone()));
        }
        if self.status != newer.status {
            fields.push(DeltaField::Status(newer.status));
        }
        if self.metadata != newer.metadata {
            fields.push(DeltaField::Metadata(newer.metadata.clone()));
        }

        fields
            .into_iter()
            .map(|field| Delta {
                instance_id: newer.id.clone(),
                field,
            })
            .collect()
    }

    /// Apply a single delta in place.
    pub fn apply_delta(&mut self, delta: &Delta) {
        match &delta.field {
            DeltaField::App(v) => self.app = v.clone(),
            DeltaField::Hostname(v) => self.hostname = v.clone(),
            DeltaField::IpAddress(v) => self.ip_address = v.clone(),
            DeltaField::Ports(v) => self.ports = v.clone(),
            DeltaField::Status(v) => self.status = *v,
            DeltaField::Metadata(v) => self.metadata = v.clone(),
        }
    }
}

/// One field-level change of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Instance the change applies to
    pub instance_id: String,

    /// Changed field and its new value
    pub field: DeltaField,
}

/// Changed field with its new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum DeltaField {
    App(String),
    Hostname(Option<String>),
    IpAddress(Option<String>),
    Ports(Vec<u16>),
    Status(InstanceStatus),
    Metadata(BTreeMap<String, String>),
}
