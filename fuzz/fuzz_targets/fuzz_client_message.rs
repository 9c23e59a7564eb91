// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use registry_core::{ClientMessage, InstanceInfo, Interest};

fuzz_target!(|data: &[u8]| {
    // Inbound frame bodies come straight from the peer
    let Ok(message) = serde_json::from_slice::<ClientMessage>(data) else {
        return;
    };
    let _ = message.name();

    // Interests must be matchable whatever their nesting
    if let ClientMessage::InterestRegistration { interests } = message {
        let interest = Interest::composite(interests);
        let _ = interest.matches(&InstanceInfo::new("fuzz", "fuzz"));
    }
});
