//! AWS SQS backend using FIFO queues.
//!
//! A FIFO queue per file keeps row order (one message group per queue) and
//! lets SQS drop re-sent rows whose `messageId` it has already seen within
//! its deduplication window.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::types::{MessageAttributeValue, QueueAttributeName};
use aws_sdk_sqs::Client;
use sha2::{Digest, Sha256};
use tracing::info;

use enqueuer_core::config::AwsConfig;

use crate::broker::{BrokerChannel, BrokerConnector, MessageHeaders};
use crate::error::QueueError;

/// SQS queue names: at most 80 chars including the `.fifo` suffix.
const MAX_FIFO_BASE_LEN: usize = 75;
/// SQS deduplication IDs: at most 128 chars.
const MAX_DEDUP_ID_LEN: usize = 128;

/// Map a queue name onto SQS's allowed character set and add the FIFO suffix.
pub fn fifo_queue_name(queue: &str) -> String {
    let base: String = queue
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_FIFO_BASE_LEN)
        .collect();
    format!("{base}.fifo")
}

/// Deduplication ID for a message id: the id itself when SQS accepts it,
/// otherwise its SHA-256 hex digest.
pub fn dedup_id(message_id: &str) -> String {
    let acceptable = message_id.len() <= MAX_DEDUP_ID_LEN
        && message_id.chars().all(|c| c.is_ascii_graphic());
    if acceptable {
        message_id.to_string()
    } else {
        let digest = Sha256::digest(message_id.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// SQS-backed publisher connector.
pub struct SqsConnector {
    client: Client,
    region: String,
}

impl SqsConnector {
    /// Create a new SQS connector from project config.
    pub fn new(aws: &AwsConfig) -> Self {
        let region = aws_sdk_sqs::config::Region::new(aws.region.clone());

        // Built directly rather than via aws_config::defaults(): AWS_ENDPOINT_URL
        // usually points at the S3-compatible store, not at SQS.
        let mut sqs_config = aws_sdk_sqs::Config::builder()
            .region(region)
            .behavior_version(BehaviorVersion::latest());

        if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
            let creds = Credentials::new(
                key_id,
                secret,
                aws.session_token.clone(),
                None,
                "enqueuer-queue-static",
            );
            sqs_config = sqs_config.credentials_provider(creds);
        }

        if let Some(ref endpoint) = aws.queue_endpoint_url {
            let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("https://{endpoint}")
            };
            sqs_config = sqs_config.endpoint_url(&url);
        }

        info!(region = %aws.region, "SQS connector initialized");

        Self {
            client: Client::from_conf(sqs_config.build()),
            region: aws.region.clone(),
        }
    }
}

#[async_trait]
impl BrokerConnector for SqsConnector {
    /// SQS is connectionless; a cheap ListQueues call stands in for the
    /// handshake so unreachable endpoints surface here and get retried.
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, QueueError> {
        self.client
            .list_queues()
            .max_results(1)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS connection check failed: {e:?}")))?;

        Ok(Box::new(SqsChannel {
            client: self.client.clone(),
            queue_urls: HashMap::new(),
        }))
    }

    fn endpoint(&self) -> String {
        format!("sqs://{}", self.region)
    }
}

struct SqsChannel {
    client: Client,
    queue_urls: HashMap<String, String>,
}

fn string_attr(value: &str) -> Result<MessageAttributeValue, QueueError> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .map_err(|e| QueueError::Provider(format!("invalid message attribute: {e}")))
}

fn number_attr(value: u64) -> Result<MessageAttributeValue, QueueError> {
    MessageAttributeValue::builder()
        .data_type("Number")
        .string_value(value.to_string())
        .build()
        .map_err(|e| QueueError::Provider(format!("invalid message attribute: {e}")))
}

#[async_trait]
impl BrokerChannel for SqsChannel {
    async fn declare_durable_queue(&mut self, queue: &str) -> Result<(), QueueError> {
        let name = fifo_queue_name(queue);
        // CreateQueue returns the existing URL when attributes match.
        let resp = self
            .client
            .create_queue()
            .queue_name(&name)
            .attributes(QueueAttributeName::FifoQueue, "true")
            .send()
            .await
            .map_err(|e| QueueError::Declare {
                queue: name.clone(),
                reason: format!("{e:?}"),
            })?;

        let url = resp.queue_url().ok_or_else(|| QueueError::Declare {
            queue: name.clone(),
            reason: "CreateQueue returned no queue URL".into(),
        })?;
        self.queue_urls.insert(queue.to_string(), url.to_string());
        Ok(())
    }

    async fn publish_persistent(
        &mut self,
        queue: &str,
        payload: &[u8],
        message_id: &str,
        headers: &MessageHeaders,
    ) -> Result<(), QueueError> {
        let url = self.queue_urls.get(queue).ok_or_else(|| QueueError::Publish {
            queue: queue.to_string(),
            reason: "queue not declared on this channel".into(),
        })?;

        let body = String::from_utf8_lossy(payload).into_owned();

        self.client
            .send_message()
            .queue_url(url)
            .message_body(body)
            .message_group_id(queue)
            .message_deduplication_id(dedup_id(message_id))
            .message_attributes("messageId", string_attr(message_id)?)
            .message_attributes("filename", string_attr(&headers.filename)?)
            .message_attributes("rowNumber", number_attr(headers.row_number)?)
            .message_attributes("totalRows", number_attr(headers.total_rows)?)
            .send()
            .await
            .map_err(|e| QueueError::Publish {
                queue: queue.to_string(),
                reason: format!("SQS send failed: {e:?}"),
            })?;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        self.queue_urls.clear();
        Ok(())
    }
}
