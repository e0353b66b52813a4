// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the Courier delivery pipeline.
//!
//! Provides WAL-mode SQLite storage with embedded migrations and a
//! single-writer concurrency model via `tokio-rusqlite`. Holds the
//! group-send token cache and the retry placeholders used by resends.

pub mod database;
pub mod migrations;
pub mod models;
pub mod placeholders;
pub mod queries;
pub mod token_cache;

pub use database::Database;
pub use models::*;
pub use placeholders::RetryPlaceholderStore;
pub use token_cache::GroupSendTokenCache;
