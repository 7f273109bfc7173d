// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Azure storage queue backend.
//!
//! Talks to the queue REST API directly, signing every request with
//! SharedKeyLite. Each trigger polls its queue in batches: a full or partial
//! batch is handled and the next one fetched once every message in it has
//! been deleted, while an empty batch puts the consumer to sleep. Messages
//! are deleted once handled; a message that exhausted its retries is also
//! copied to `<queue>-poison`.
//!
//! A fetched message stays invisible for the visibility timeout only. The
//! consumer does not poll while it still holds messages, but a handler that
//! outlives the timeout lets its message reappear for other consumers of the
//! same queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashSet;
use fission_core::types::{MessageQueueTrigger, MessageQueueType};
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::broker::{
    BrokerSettings, ConsumerTask, InboundMessage, MessageQueue, OutboundMessage, Producer,
    dispatch_batch,
};
use crate::error::{BrokerError, Result};
use crate::handler::MessageHandler;

/// Secret (or environment variable) holding the storage account name.
pub const ACCOUNT_NAME_KEY: &str = "AZURE_STORAGE_ACCOUNT_NAME";
/// Secret (or environment variable) holding the base64 account key.
pub const ACCOUNT_KEY_KEY: &str = "AZURE_STORAGE_ACCOUNT_KEY";

const API_VERSION: &str = "2019-12-12";

/// Polling and timeout settings.
#[derive(Debug, Clone)]
pub struct AzureQueueConfig {
    /// How long a fetched message stays invisible to other consumers.
    pub visibility_timeout: Duration,
    /// Messages fetched per request (the service allows at most 32).
    pub batch_size: u32,
    /// Sleep after an empty batch.
    pub empty_poll_interval: Duration,
    /// HTTP timeout of function calls.
    pub invoke_timeout: Duration,
    /// HTTP timeout of queue REST calls.
    pub request_timeout: Duration,
}

impl Default for AzureQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(60),
            batch_size: 10,
            empty_poll_interval: Duration::from_secs(60),
            invoke_timeout: Duration::from_secs(600),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A message as returned by Get Messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Message id.
    pub id: String,
    /// Receipt required to delete the message.
    pub pop_receipt: String,
    /// How often the message has been fetched.
    pub dequeue_count: u32,
    /// Decoded message body.
    pub payload: Bytes,
}

/// Storage account credentials and endpoint.
#[derive(Debug, Clone)]
pub struct AzureCredentials {
    /// Account name.
    pub account: String,
    /// Decoded account key.
    key: Vec<u8>,
    /// Queue service endpoint, e.g. `https://<account>.queue.core.windows.net`.
    pub endpoint: Url,
}

impl AzureCredentials {
    /// Credentials for `account` with its base64 `key`. An empty `endpoint`
    /// selects the public cloud endpoint of the account.
    pub fn new(account: &str, key: &str, endpoint: &str) -> Result<Self> {
        let key = BASE64
            .decode(key.trim())
            .map_err(|e| BrokerError::Config(format!("account key is not valid base64: {}", e)))?;
        let endpoint = if endpoint.is_empty() {
            format!("https://{}.queue.core.windows.net", account)
        } else {
            endpoint.to_string()
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| BrokerError::Config(format!("invalid queue endpoint {}: {}", endpoint, e)))?;
        Ok(Self {
            account: account.to_string(),
            key,
            endpoint,
        })
    }

    fn from_settings(settings: &BrokerSettings) -> Result<Self> {
        let account = setting(settings, ACCOUNT_NAME_KEY)?;
        let key = setting(settings, ACCOUNT_KEY_KEY)?;
        Self::new(&account, &key, &settings.url)
    }
}

fn setting(settings: &BrokerSettings, name: &str) -> Result<String> {
    settings
        .secret(name)
        .map(str::to_string)
        .or_else(|| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .ok_or_else(|| BrokerError::Config(format!("required setting '{}' is not set", name)))
}

/// SharedKeyLite string-to-sign for the queue service.
///
/// `ms_headers` are the `x-ms-*` headers of the request; they are lowercased
/// and sorted here. `comp` is the value of the `comp` query parameter, the
/// only parameter that takes part in the lite canonical resource.
pub fn string_to_sign(
    method: &str,
    content_type: &str,
    ms_headers: &[(&str, &str)],
    account: &str,
    path: &str,
    comp: Option<&str>,
) -> String {
    let mut headers: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
        .collect();
    headers.sort();

    let mut s = format!("{}\n\n{}\n\n", method, content_type);
    for (k, v) in headers {
        s.push_str(&k);
        s.push(':');
        s.push_str(v);
        s.push('\n');
    }
    s.push('/');
    s.push_str(account);
    s.push_str(path);
    if let Some(comp) = comp {
        s.push_str("?comp=");
        s.push_str(comp);
    }
    s
}

/// Base64 HMAC-SHA256 of `string_to_sign` under the decoded account key.
pub fn sign(key: &[u8], string_to_sign: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| BrokerError::Config(format!("unusable account key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Parse a `QueueMessagesList` document.
///
/// Message text is base64 on the wire; text that does not decode is kept as
/// is, which is what other SDKs writing raw text produce.
pub fn parse_messages(xml: &str) -> Result<Vec<QueueMessage>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| BrokerError::Protocol(format!("failed to parse queue XML: {}", e)))?;

    let mut messages = Vec::new();
    for node in doc
        .root_element()
        .children()
        .filter(|n| n.has_tag_name("QueueMessage"))
    {
        let field = |name: &str| {
            node.children()
                .find(|c| c.has_tag_name(name))
                .and_then(|c| c.text())
                .unwrap_or_default()
                .to_string()
        };
        let id = field("MessageId");
        if id.is_empty() {
            return Err(BrokerError::Protocol("queue message without MessageId".into()));
        }
        let text = field("MessageText");
        let payload = match BASE64.decode(text.trim()) {
            Ok(decoded) => Bytes::from(decoded),
            Err(_) => Bytes::from(text),
        };
        messages.push(QueueMessage {
            id,
            pop_receipt: field("PopReceipt"),
            dequeue_count: field("DequeueCount").parse().unwrap_or(0),
            payload,
        });
    }
    Ok(messages)
}

/// Signed REST client for one storage account.
pub struct AzureQueueClient {
    http: reqwest::Client,
    credentials: AzureCredentials,
}

impl AzureQueueClient {
    /// Create a client.
    pub fn new(credentials: AzureCredentials, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, credentials })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.credentials.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| BrokerError::Config("queue endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<String>,
    ) -> Result<reqwest::Response> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let content_type = if body.is_some() { "application/xml" } else { "" };
        let to_sign = string_to_sign(
            method.as_str(),
            content_type,
            &[("x-ms-date", &date), ("x-ms-version", API_VERSION)],
            &self.credentials.account,
            url.path(),
            None,
        );
        let signature = sign(&self.credentials.key, &to_sign)?;

        let mut request = self
            .http
            .request(method, url)
            .query(query)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header(
                "Authorization",
                format!("SharedKeyLite {}:{}", self.credentials.account, signature),
            );
        if let Some(body) = body {
            request = request.header("Content-Type", content_type).body(body);
        }
        Ok(request.send().await?)
    }

    /// Create `queue`; an existing queue is fine.
    pub async fn create_queue(&self, queue: &str) -> Result<()> {
        let response = self.send(Method::PUT, self.url(&[queue])?, &[], None).await?;
        match response.status() {
            s if s.is_success() || s == StatusCode::CONFLICT => Ok(()),
            s => Err(unexpected("create queue", queue, s, response).await),
        }
    }

    /// Fetch up to `batch_size` messages, hiding them for `visibility`.
    pub async fn get_messages(
        &self,
        queue: &str,
        batch_size: u32,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let query = [
            ("numofmessages", batch_size.to_string()),
            ("visibilitytimeout", visibility.as_secs().to_string()),
        ];
        let response = self
            .send(Method::GET, self.url(&[queue, "messages"])?, &query, None)
            .await?;
        if !response.status().is_success() {
            return Err(unexpected("get messages", queue, response.status(), response).await);
        }
        parse_messages(&response.text().await?)
    }

    /// Append a message to `queue`.
    pub async fn put_message(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let body = format!(
            "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
            BASE64.encode(payload)
        );
        let response = self
            .send(Method::POST, self.url(&[queue, "messages"])?, &[], Some(body))
            .await?;
        if !response.status().is_success() {
            return Err(unexpected("put message", queue, response.status(), response).await);
        }
        Ok(())
    }

    /// Delete a fetched message.
    pub async fn delete_message(&self, queue: &str, id: &str, pop_receipt: &str) -> Result<()> {
        let query = [("popreceipt", pop_receipt.to_string())];
        let response = self
            .send(Method::DELETE, self.url(&[queue, "messages", id])?, &query, None)
            .await?;
        if !response.status().is_success() {
            return Err(unexpected("delete message", queue, response.status(), response).await);
        }
        Ok(())
    }
}

async fn unexpected(op: &str, queue: &str, status: StatusCode, response: reqwest::Response) -> BrokerError {
    let body = response.text().await.unwrap_or_default();
    BrokerError::Protocol(format!("{} on {} returned {}: {}", op, queue, status, body))
}

/// Azure storage queue backend.
#[derive(Clone)]
pub struct AzureQueueBroker {
    client: Arc<AzureQueueClient>,
    config: AzureQueueConfig,
    created: Arc<DashSet<String>>,
}

impl AzureQueueBroker {
    /// Connect with credentials from `settings` (secrets first, then the
    /// environment) and default polling settings.
    pub fn connect(settings: &BrokerSettings) -> Result<Self> {
        Self::with_config(AzureCredentials::from_settings(settings)?, AzureQueueConfig::default())
    }

    /// Create a backend from explicit credentials and settings.
    pub fn with_config(credentials: AzureCredentials, config: AzureQueueConfig) -> Result<Self> {
        info!(
            account = %credentials.account,
            endpoint = %credentials.endpoint,
            "Azure storage queue backend ready"
        );
        Ok(Self {
            client: Arc::new(AzureQueueClient::new(credentials, config.request_timeout)?),
            config,
            created: Arc::new(DashSet::new()),
        })
    }

    async fn ensure_queue(&self, queue: &str) -> Result<()> {
        if self.created.contains(queue) {
            return Ok(());
        }
        self.client.create_queue(queue).await?;
        self.created.insert(queue.to_string());
        Ok(())
    }
}

#[async_trait]
impl Producer for AzureQueueBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let publish = async {
            self.ensure_queue(&message.topic).await?;
            self.client.put_message(&message.topic, &message.payload).await
        };
        publish.await.map_err(|e| BrokerError::Publish {
            topic: message.topic.clone(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl MessageQueue for AzureQueueBroker {
    fn queue_type(&self) -> MessageQueueType {
        MessageQueueType::AzureStorageQueue
    }

    fn producer(&self) -> Arc<dyn Producer> {
        Arc::new(self.clone())
    }

    fn uses_poison_queue(&self) -> bool {
        true
    }

    fn invoke_timeout(&self) -> Option<Duration> {
        Some(self.config.invoke_timeout)
    }

    async fn subscribe(
        &self,
        trigger: &MessageQueueTrigger,
        handler: Arc<MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<ConsumerTask> {
        let queue = trigger.spec.topic.clone();
        self.ensure_queue(&queue).await?;

        let client = self.client.clone();
        let config = self.config.clone();
        Ok(tokio::spawn(async move {
            info!(trigger = %handler.trigger(), queue = %queue, "Polling Azure storage queue");
            loop {
                let batch = tokio::select! {
                    biased;

                    _ = cancel.cancelled() => return Ok(()),

                    batch = client.get_messages(&queue, config.batch_size, config.visibility_timeout) => batch,
                };

                let messages = match batch {
                    Ok(messages) => messages,
                    Err(BrokerError::Http(e)) if e.is_connect() => {
                        return Err(BrokerError::ConnectionLost(e.to_string()));
                    }
                    Err(e) => {
                        warn!(trigger = %handler.trigger(), queue = %queue, error = %e, "Failed to get queue messages");
                        Vec::new()
                    }
                };

                if messages.is_empty() {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(config.empty_poll_interval) => continue,
                    }
                }

                debug!(trigger = %handler.trigger(), queue = %queue, count = messages.len(), "Received queue messages");
                let batch: Vec<_> = messages
                    .into_iter()
                    .map(|message| {
                        let client = client.clone();
                        let queue = queue.clone();
                        let inbound = InboundMessage::new(message.payload.clone());
                        let ack = move || async move {
                            client
                                .delete_message(&queue, &message.id, &message.pop_receipt)
                                .await
                        };
                        (inbound, ack)
                    })
                    .collect();

                // Unsubscribing abandons the batch; its messages reappear
                // once their visibility timeout lapses.
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    _ = dispatch_batch(&handler, batch) => {}
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_sign_lite_layout() {
        let s = string_to_sign(
            "GET",
            "",
            &[
                ("x-ms-version", "2019-12-12"),
                ("X-MS-Date", "Mon, 06 Jan 2025 10:00:00 GMT"),
            ],
            "accountname",
            "/inputqueue/messages",
            None,
        );
        assert_eq!(
            s,
            "GET\n\n\n\nx-ms-date:Mon, 06 Jan 2025 10:00:00 GMT\nx-ms-version:2019-12-12\n/accountname/inputqueue/messages"
        );
    }

    #[test]
    fn test_string_to_sign_keeps_comp() {
        let s = string_to_sign("GET", "", &[], "acct", "/", Some("list"));
        assert!(s.ends_with("/acct/?comp=list"));
    }

    #[test]
    fn test_signature_matches_known_value() {
        let key = BASE64.decode("bm90IGEga2V5").unwrap();
        let s = "GET\n\n\n\nx-ms-date:Mon, 06 Jan 2025 10:00:00 GMT\nx-ms-version:2019-12-12\n/accountname/inputqueue/messages";
        assert_eq!(
            sign(&key, s).unwrap(),
            "dZwDArCHLJxw9kDdwCz3VyV0xn5XI+qm2KkDGtTXC58="
        );
    }

    #[test]
    fn test_parse_messages() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<QueueMessagesList>
  <QueueMessage>
    <MessageId>5974b586-0df3-4e2d-ad0c-18e3892bfca2</MessageId>
    <InsertionTime>Fri, 09 Oct 2009 21:04:30 GMT</InsertionTime>
    <ExpirationTime>Fri, 16 Oct 2009 21:04:30 GMT</ExpirationTime>
    <PopReceipt>YzQ4Yzg1MDIGM0MDFiZDAwYzEw</PopReceipt>
    <TimeNextVisible>Fri, 09 Oct 2009 23:29:20 GMT</TimeNextVisible>
    <DequeueCount>1</DequeueCount>
    <MessageText>aW5wdXQ=</MessageText>
  </QueueMessage>
  <QueueMessage>
    <MessageId>second</MessageId>
    <PopReceipt>r2</PopReceipt>
    <DequeueCount>3</DequeueCount>
    <MessageText>plain text!</MessageText>
  </QueueMessage>
</QueueMessagesList>"#;

        let messages = parse_messages(xml).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "5974b586-0df3-4e2d-ad0c-18e3892bfca2");
        assert_eq!(messages[0].pop_receipt, "YzQ4Yzg1MDIGM0MDFiZDAwYzEw");
        assert_eq!(messages[0].dequeue_count, 1);
        assert_eq!(&messages[0].payload[..], b"input");
        assert_eq!(&messages[1].payload[..], b"plain text!");
        assert_eq!(messages[1].dequeue_count, 3);
    }

    #[test]
    fn test_parse_empty_list() {
        let messages = parse_messages("<QueueMessagesList />").unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_messages("not xml"),
            Err(BrokerError::Protocol(_))
        ));
    }

    #[test]
    fn test_credentials_default_endpoint() {
        let creds = AzureCredentials::new("acct", "bm90IGEga2V5", "").unwrap();
        assert_eq!(creds.endpoint.as_str(), "https://acct.queue.core.windows.net/");
        assert!(AzureCredentials::new("acct", "%%%", "").is_err());
    }

    #[test]
    fn test_missing_account_is_config_error() {
        let settings = BrokerSettings::new(MessageQueueType::AzureStorageQueue, "");
        // Only meaningful when the variables are not set in the test environment.
        if std::env::var(ACCOUNT_NAME_KEY).is_err() {
            assert!(matches!(
                AzureQueueBroker::connect(&settings).err(),
                Some(BrokerError::Config(_))
            ));
        }
    }
}
