// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection token store backing the `pseudonymize` column policy.
//! One store lives per `(session, connection name)` pair so a given real
//! value maps to the same pseudonym for the lifetime of the session,
//! regardless of strategy.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::RngCore;

use super::arena::{Arena, ArenaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudonymizeStrategy {
    /// Same `(connection, column, value)` always yields the same token,
    /// even across sessions.
    Deterministic,
    /// Stable only within the owning session; a fresh token per session.
    Randomized,
}

#[derive(Debug, Default)]
pub struct TokenStore {
    forward: HashMap<String, String>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pseudonym for `real_value`, minting one against `arena`
    /// if this is the first time this store has seen it.
    pub fn get_or_assign(
        &mut self,
        arena: &mut Arena,
        strategy: PseudonymizeStrategy,
        connection: &str,
        column: &str,
        real_value: &str,
    ) -> Result<String, ArenaError> {
        if let Some(existing) = self.forward.get(real_value) {
            return Ok(existing.clone());
        }
        let token = match strategy {
            PseudonymizeStrategy::Deterministic => {
                deterministic_token(connection, column, real_value)
            }
            PseudonymizeStrategy::Randomized => randomized_token(),
        };
        arena.reserve(real_value.len() + token.len())?;
        self.forward.insert(real_value.to_string(), token.clone());
        Ok(token)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

fn deterministic_token(connection: &str, column: &str, real_value: &str) -> String {
    let mut hasher = DefaultHasher::new();
    connection.hash(&mut hasher);
    column.hash(&mut hasher);
    real_value.hash(&mut hasher);
    format!("tok_det_{:016x}", hasher.finish())
}

fn randomized_token() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    format!("tok_rnd_{}", u64::from_be_bytes(bytes))
}
