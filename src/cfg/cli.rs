// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};

const SOCKET_ENV_VAR: &str = "MCP_SQL_BROKER_SOCKET";
const SOCKET_FILE_NAME: &str = "mcp-sql-broker.sock";
const SECRET_ENV_VAR: &str = "MCP_SQL_BROKER_SECRET";
const LOGGER_CONFIG_ENV_VAR: &str = "MCP_SQL_BROKER_LOG_CONFIG";
const DEFAULT_LOGGER_CONFIG_PATH: &str = "config/logging.yaml";

/// Resolves a (possibly relative) path given on the command line to an
/// absolute, canonical one.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))
}

/// Picks the control socket path: an explicit env var override, else the
/// platform runtime directory, else a temp-dir fallback.
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = env::var(SOCKET_ENV_VAR) {
        return PathBuf::from(path);
    }
    let base = dirs::runtime_dir().unwrap_or_else(env::temp_dir);
    base.join(SOCKET_FILE_NAME)
}

/// Picks the logging config path: an explicit env var override, else a
/// path relative to the current directory.
pub fn default_logger_config_path() -> PathBuf {
    match env::var(LOGGER_CONFIG_ENV_VAR) {
        Ok(path) => PathBuf::from(path),
        Err(_) => PathBuf::from(DEFAULT_LOGGER_CONFIG_PATH),
    }
}

/// Reads the 32-byte shared secret (spec.md §3/§4) from the environment
/// as 64 hex characters. There is no catalog field for this (it is
/// provisioned to the broker and its front-end peer out of band), so an
/// env var is the natural seam — the same convention this module already
/// uses for the control socket path.
pub fn load_shared_secret() -> Result<[u8; 32]> {
    let hex = env::var(SECRET_ENV_VAR)
        .with_context(|| format!("{SECRET_ENV_VAR} is not set"))?;
    decode_hex_32(&hex)
}

fn decode_hex_32(hex: &str) -> Result<[u8; 32]> {
    ensure!(
        hex.len() == 64,
        "{SECRET_ENV_VAR} must be 64 hex characters (32 bytes), got {} characters",
        hex.len()
    );
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        let pair = &hex[i * 2..i * 2 + 2];
        *byte = u8::from_str_radix(pair, 16)
            .with_context(|| format!("{SECRET_ENV_VAR} contains invalid hex at byte {i}"))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn env_override_wins_over_the_runtime_dir() {
        // SAFETY: `#[serial]` keeps this test from racing other tests in
        // this process over the shared env var.
        unsafe {
            env::set_var(SOCKET_ENV_VAR, "/tmp/custom.sock");
        }
        assert_eq!(default_socket_path(), PathBuf::from("/tmp/custom.sock"));
        unsafe {
            env::remove_var(SOCKET_ENV_VAR);
        }
    }

    #[test]
    fn decode_hex_32_round_trips_a_known_value() {
        let hex = "00".repeat(31) + "ff";
        let decoded = decode_hex_32(&hex).expect("decode");
        assert_eq!(decoded[31], 0xff);
        assert_eq!(decoded[0], 0x00);
    }

    #[test]
    fn decode_hex_32_rejects_the_wrong_length() {
        let err = decode_hex_32("abcd").expect_err("must reject");
        assert!(err.to_string().contains("64 hex characters"));
    }

    #[test]
    #[serial_test::serial]
    fn load_shared_secret_reads_the_env_var() {
        let hex = "11".repeat(32);
        unsafe {
            env::set_var(SECRET_ENV_VAR, &hex);
        }
        let secret = load_shared_secret().expect("load");
        assert_eq!(secret, [0x11u8; 32]);
        unsafe {
            env::remove_var(SECRET_ENV_VAR);
        }
    }
}
