// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the token cache and placeholder tables.

pub mod group_send_tokens;
pub mod placeholders;
