// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline wired to in-memory collaborators.

#![allow(dead_code)]

use std::sync::Arc;

use courier_config::CourierConfig;
use courier_core::{
    ContentHint, Conversation, DestinationId, DeviceId, GroupId, LocalIdentity, ServiceId,
};
use courier_pipeline::{Collaborators, JobPayload, Pipeline};
use courier_storage::Database;
use courier_test_utils::{
    fixtures, MockConversations, MockDirectory, MockProtocolStore, MockTransport, RecordingSink,
};

pub struct Harness {
    pub our: LocalIdentity,
    pub directory: Arc<MockDirectory>,
    pub transport: Arc<MockTransport>,
    pub protocol: Arc<MockProtocolStore>,
    pub conversations: Arc<MockConversations>,
    pub sink: Arc<RecordingSink>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(CourierConfig::default()).await
    }

    pub async fn with_config(config: CourierConfig) -> Self {
        let our = fixtures::local_identity();
        let directory = Arc::new(MockDirectory::new());
        let transport = Arc::new(MockTransport::new());
        let protocol = Arc::new(MockProtocolStore::new());
        let conversations = Arc::new(MockConversations::new());
        let sink = Arc::new(RecordingSink::new());
        let db = Database::open_in_memory()
            .await
            .expect("in-memory database should open");

        let pipeline = Pipeline::new(
            &config,
            our.clone(),
            Collaborators {
                directory: directory.clone(),
                transport: transport.clone(),
                protocol: protocol.clone(),
                conversations: conversations.clone(),
                sink: sink.clone(),
            },
            db,
        );
        Self {
            our,
            directory,
            transport,
            protocol,
            conversations,
            sink,
            pipeline,
        }
    }

    /// A direct conversation `destination` with `peer`, whose devices are in the directory.
    pub async fn add_contact(&self, destination: &str, peer: &str, devices: &[DeviceId]) -> DestinationId {
        self.directory.insert(peer, fixtures::bundle(devices)).await;
        self.conversations
            .insert(Conversation::direct(destination, ServiceId::from(peer)))
            .await;
        DestinationId::from(destination)
    }

    /// A group conversation including ourselves; every member has one device.
    pub async fn add_group(&self, destination: &str, group: &str, members: &[&str]) -> DestinationId {
        let mut roster = vec![self.our.service_id.clone()];
        for member in members {
            self.directory.insert(*member, fixtures::bundle(&[1])).await;
            roster.push(ServiceId::from(*member));
        }
        self.conversations
            .insert(Conversation::group(destination, GroupId::from(group), roster))
            .await;
        DestinationId::from(destination)
    }
}

pub fn text(body: &str) -> JobPayload {
    JobPayload::UserMessage {
        body: body.to_string(),
        content_hint: ContentHint::Resendable,
    }
}

pub fn svc(id: &str) -> ServiceId {
    ServiceId::from(id)
}
