// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use registry_core::InstanceInfo;

fuzz_target!(|data: &[u8]| {
    // Input: two JSON instances separated by a NUL byte
    let Some(split) = data.iter().position(|&b| b == 0) else {
        return;
    };
    let (Ok(older), Ok(newer)) = (
        serde_json::from_slice::<InstanceInfo>(&data[..split]),
        serde_json::from_slice::<InstanceInfo>(&data[split + 1..]),
    ) else {
        return;
    };
    if older.id != newer.id {
        return;
    }

    let mut patched = older.clone();
    for delta in older.diff(&newer) {
        patched.apply_delta(&delta);
    }
    assert_eq!(patched, newer);
});
