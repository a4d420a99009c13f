// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to bind control socket at {path:?}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to set permissions on {path:?}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to verify peer credentials: {0}")]
    PeerCredentials(std::io::Error),
}
