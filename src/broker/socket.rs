// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Binding the broker's control socket: the containing directory is
//! created with mode 0700 and the socket file itself with mode 0600, and
//! a stale socket left behind by a previous crashed run is unlinked
//! before binding.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tokio::net::UnixListener;
use tracing::info;

use super::error::BrokerError;

pub fn bind(path: &Path) -> Result<UnixListener, BrokerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| BrokerError::Bind {
                path: path.to_path_buf(),
                source,
            })?;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|source| {
                BrokerError::Permissions {
                    path: parent.to_path_buf(),
                    source,
                }
            })?;
        }
    }

    if path.exists() {
        info!(?path, "removing stale control socket from a previous run");
        fs::remove_file(path).map_err(|source| BrokerError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let listener = UnixListener::bind(path).map_err(|source| BrokerError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
        BrokerError::Permissions {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(listener)
}
