// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change notifications produced by the notification multiplexer.

use crate::instance::{Delta, InstanceInfo};

/// A change inside a subscriber's interest scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotification {
    /// Instance registered.
    Add(InstanceInfo),
    /// Instance removed (by id).
    Delete(String),
    /// Instance changed; deltas are applied in order.
    Modify(InstanceInfo, Vec<Delta>),
}

impl ChangeNotification {
    /// Id of the instance this notification is about.
    pub fn instance_id(&self) -> &str {
        match self {
            Self::Add(info) | Self::Modify(info, _) => &info.id,
            Self::Delete(id) => id,
        }
    }

    /// Short kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Delete(_) => "delete",
            Self::Modify(..) => "modify",
        }
    }
}
