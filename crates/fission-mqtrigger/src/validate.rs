// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Topic name rules per broker.

use std::sync::LazyLock;

use fission_core::Error;
use fission_core::types::MessageQueueType;
use regex::Regex;

static KAFKA_TOPIC: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9\-._]*[a-zA-Z0-9]$").ok());

static AZURE_QUEUE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9]|-(?:[a-z0-9]))*$").ok());

const KAFKA_MAX_LEN: usize = 249;

fn matches(re: &LazyLock<Option<Regex>>, topic: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(topic))
}

/// Whether `topic` is a valid Kafka topic name.
pub fn is_valid_kafka_topic(topic: &str) -> bool {
    topic.len() <= KAFKA_MAX_LEN && topic != "." && topic != ".." && matches(&KAFKA_TOPIC, topic)
}

/// Whether `subject` is a valid NATS subject to publish to or consume.
pub fn is_valid_nats_subject(subject: &str) -> bool {
    !subject.is_empty()
        && !subject.chars().any(char::is_whitespace)
        && subject.split('.').all(|token| !token.is_empty())
}

/// Whether `queue` is a valid Azure storage queue name.
pub fn is_valid_azure_queue(queue: &str) -> bool {
    (3..=63).contains(&queue.len()) && matches(&AZURE_QUEUE, queue)
}

/// Check `topic` against the rules of `queue_type`.
pub fn validate_topic(queue_type: MessageQueueType, topic: &str) -> fission_core::Result<()> {
    let valid = match queue_type {
        MessageQueueType::Kafka => is_valid_kafka_topic(topic),
        MessageQueueType::Nats => is_valid_nats_subject(topic),
        MessageQueueType::AzureStorageQueue => is_valid_azure_queue(topic),
        MessageQueueType::Memory => !topic.is_empty(),
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "'{}' is not a valid {} topic",
            topic, queue_type
        )))
    }
}
