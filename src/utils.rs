// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Small helpers shared across modules: resume-token generation and
//! constant-time comparisons for anything derived from a secret.

use rand::RngCore;
use subtle::ConstantTimeEq;

/// Generates a fresh 32-byte resume token from the process CSPRNG.
pub fn generate_resume_token() -> [u8; 32] {
    let mut token = [0u8; 32];
    rand::rng().fill_bytes(&mut token);
    token
}

/// Compares two fixed-size byte buffers in constant time.
///
/// Used for resume-token lookups and shared-secret checks; never use `==`
/// on anything that holds a secret or a value derived from one.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
