// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Courier outgoing-message delivery pipeline.
//!
//! This crate provides the closed send-error taxonomy, the types that flow
//! between pipeline components, and the collaborator traits (directory,
//! transport, protocol store, conversation store, delivery sink) that the
//! pipeline consumes.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{CourierError, ProtocolError, RecipientError, SendError, TransportError};
pub use types::{
    Address, ContentHint, Conversation, ConversationKind, Credential, DestinationId,
    DestinationKind, DeviceId, GroupId, LocalIdentity, QualifiedAddress, SendOutcome, ServiceId,
};

// Re-export all collaborator traits at crate root.
pub use traits::{ConversationStore, DeliverySink, DirectoryService, ProtocolStore, Transport};
