// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// The catalog's `safetyPolicy.readOnly` string, restricted to the two
/// values the schema allows.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOnlyMode {
    #[serde(rename = "yes")]
    Yes,
    #[serde(rename = "no unsafe")]
    NoUnsafe,
}

impl fmt::Display for ReadOnlyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReadOnlyMode::Yes => "yes",
            ReadOnlyMode::NoUnsafe => "no unsafe",
        })
    }
}

impl ReadOnlyMode {
    pub fn as_bool(self) -> bool {
        matches!(self, ReadOnlyMode::Yes)
    }
}

/// The only database `type` the catalog schema currently recognizes.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseTypeTag {
    #[serde(rename = "postgres")]
    Postgres,
}
