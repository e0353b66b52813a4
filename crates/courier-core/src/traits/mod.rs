// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator trait definitions consumed by the delivery pipeline.
//!
//! Every collaborator uses `#[async_trait]` for dynamic dispatch, so the
//! pipeline can hold them as `Arc<dyn Trait>`.

pub mod conversations;
pub mod directory;
pub mod protocol;
pub mod sink;
pub mod transport;

pub use conversations::ConversationStore;
pub use directory::DirectoryService;
pub use protocol::ProtocolStore;
pub use sink::DeliverySink;
pub use transport::Transport;
