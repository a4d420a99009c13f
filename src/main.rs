// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use mcp_sql_broker::backend::memory::InMemoryBackend;
use mcp_sql_broker::broker::{socket, Broker, RuntimeLimits};
use mcp_sql_broker::cfg::cli::{
    default_logger_config_path, default_socket_path, load_shared_secret, resolve_config_path,
};
use mcp_sql_broker::cfg::config::Catalog;
use mcp_sql_broker::cfg::logger::init_logger;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let logger_config_path = default_logger_config_path();
    let _logger_guard = init_logger(
        logger_config_path
            .to_str()
            .context("logger config path is not valid UTF-8")?,
    )?;

    let catalog_arg = std::env::args()
        .nth(1)
        .context("usage: mcp-sql-broker <catalog.json>")?;
    let catalog_path = resolve_config_path(&catalog_arg).context("failed to resolve catalog path")?;
    let catalog = Catalog::load_from_file(&catalog_path).context("failed to load catalog")?;
    info!(databases = catalog.len(), version = %catalog.version, "catalog loaded");

    let shared_secret = load_shared_secret().context("failed to load shared secret")?;

    let socket_path = default_socket_path();
    let listener = socket::bind(&socket_path).context("failed to bind control socket")?;
    info!(?socket_path, "listening");

    // `InMemoryBackend` stands in for a real pooled PostgreSQL driver,
    // which spec.md §1 places out of scope for this codebase. Swapping in
    // a real backend only requires a `DatabaseBackend` impl; the reactor
    // and admission path are backend-agnostic.
    let mut backend = InMemoryBackend::new();
    for profile in catalog.profiles() {
        backend.register_profile(profile);
    }
    let backend = Arc::new(backend);

    let mut broker = Broker::new(backend, shared_secret, listener, RuntimeLimits::default());
    broker.run().await
}
