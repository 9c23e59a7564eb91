// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interest filters: which instances a subscriber wants to hear about.

use crate::instance::InstanceInfo;
use serde::{Deserialize, Serialize};

/// Subscriber interest.
///
/// Interests are replaced wholesale on every registration, never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interest {
    /// Matches nothing.
    #[default]
    None,
    /// Matches every instance.
    Full,
    /// Matches instances of one application.
    Application { name: String },
    /// Matches a single instance id.
    Instance { id: String },
    /// Matches if any member matches.
    Composite { interests: Vec<Interest> },
}

impl Interest {
    pub fn application(name: impl Into<String>) -> Self {
        Self::Application { name: name.into() }
    }

    pub fn instance(id: impl Into<String>) -> Self {
        Self::Instance { id: id.into() }
    }

    /// Collapse a registered interest list into a single interest.
    pub fn composite(mut interests: Vec<Interest>) -> Self {
        match interests.len() {
            0 => Self::None,
            1 => interests.remove(0),
            _ => Self::Composite { interests },
        }
    }

    /// Check whether `instance` falls inside this interest.
    pub fn matches(&self, instance: &InstanceInfo) -> bool {
        match self {
            Self::None => false,
            Self::Full => true,
            Self::Application { name } => instance.app == *name,
            Self::Instance { id } => instance.id == *id,
            Self::Composite { interests } => interests.iter().any(|i| i.matches(instance)),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}
