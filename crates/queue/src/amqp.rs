//! RabbitMQ (AMQP 0-9-1) backend.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::info;

use enqueuer_core::config::BrokerConfig;

use crate::broker::{BrokerChannel, BrokerConnector, MessageHeaders};
use crate::error::QueueError;

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Connects to RabbitMQ with publisher confirms enabled.
pub struct AmqpConnector {
    uri: AMQPUri,
}

impl AmqpConnector {
    pub fn new(cfg: &BrokerConfig) -> Self {
        let mut uri = AMQPUri::default();
        uri.authority.host = cfg.host.clone();
        uri.authority.port = cfg.port;
        uri.authority.userinfo.username = cfg.username.clone();
        uri.authority.userinfo.password = cfg.password.clone();
        uri.vhost = cfg.vhost.clone();
        uri.query.heartbeat = Some(cfg.heartbeat_secs);

        info!(
            host = %cfg.host,
            port = cfg.port,
            vhost = %cfg.vhost,
            "AMQP connector initialized"
        );

        Self { uri }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, QueueError> {
        let connection = Connection::connect_uri(self.uri.clone(), ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(format!("AMQP connect failed: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(format!("AMQP channel open failed: {e}")))?;

        // Confirms make publish() wait for the broker to take ownership.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::Connection(format!("AMQP confirm mode failed: {e}")))?;

        Ok(Box::new(AmqpChannel {
            connection,
            channel,
        }))
    }

    fn endpoint(&self) -> String {
        format!(
            "amqp://{}:{}/{}",
            self.uri.authority.host, self.uri.authority.port, self.uri.vhost
        )
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

fn header_table(headers: &MessageHeaders) -> FieldTable {
    let mut table = FieldTable::default();
    table.insert(
        ShortString::from("filename"),
        AMQPValue::LongString(LongString::from(headers.filename.clone())),
    );
    table.insert(
        ShortString::from("rowNumber"),
        AMQPValue::LongLongInt(headers.row_number as i64),
    );
    table.insert(
        ShortString::from("totalRows"),
        AMQPValue::LongLongInt(headers.total_rows as i64),
    );
    table
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_durable_queue(&mut self, queue: &str) -> Result<(), QueueError> {
        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map_err(|e| QueueError::Declare {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn publish_persistent(
        &mut self,
        queue: &str,
        payload: &[u8],
        message_id: &str,
        headers: &MessageHeaders,
    ) -> Result<(), QueueError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type(ShortString::from("application/json"))
            .with_message_id(ShortString::from(message_id.to_string()))
            .with_headers(header_table(headers));

        let publish_err = |reason: String| QueueError::Publish {
            queue: queue.to_string(),
            reason,
        };

        // Empty exchange name = default exchange, routed straight to `queue`.
        let confirm = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), payload, properties)
            .await
            .map_err(|e| publish_err(e.to_string()))?;

        let confirmation = confirm.await.map_err(|e| publish_err(e.to_string()))?;
        if confirmation.is_nack() {
            return Err(publish_err("broker nacked message".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(200, "OK")
            .await
            .map_err(|e| QueueError::Connection(format!("AMQP close failed: {e}")))
    }
}
