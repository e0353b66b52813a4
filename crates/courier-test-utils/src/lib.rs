// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Courier integration tests.
//!
//! In-memory implementations of every collaborator trait, with scripted
//! failures and captured calls for assertion.
//!
//! # Components
//!
//! - [`MockDirectory`] - prekey bundles per account, scripted HTTP failures
//! - [`MockTransport`] - scripted send results, captured envelopes
//! - [`MockProtocolStore`] - session states, archive and reset log
//! - [`MockConversations`] - conversations, access keys, sent log
//! - [`RecordingSink`] - captured sink reports
//! - [`fixtures`] - bundle and conversation builders

pub mod fixtures;
pub mod mock_conversations;
pub mod mock_directory;
pub mod mock_protocol;
pub mod mock_transport;
pub mod recording_sink;

pub use mock_conversations::MockConversations;
pub use mock_directory::{DirectoryCall, MockDirectory};
pub use mock_protocol::MockProtocolStore;
pub use mock_transport::{MockTransport, SentBatch};
pub use recording_sink::{RecordingSink, SinkEvent};
