//! RabbitMQ transport for change notifications.
//!
//! Declares a durable topic exchange and one durable, shared queue bound to
//! every routing key of interest. The channel prefetch bounds how many
//! unacknowledged deliveries this replica holds at once.

use crate::domain::ports::{
    Acknowledger, Broker, Delivery, Disposition, Subscription, SubscriptionSpec,
};
use crate::utils::error::{GatekeeperError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};

pub struct LapinBroker {
    url: String,
    consumer_tag: String,
}

impl LapinBroker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            consumer_tag: format!("orggatekeeper-{}", uuid::Uuid::new_v4()),
        }
    }

    async fn open_channel(&self) -> Result<(Connection, Channel)> {
        let connection = Connection::connect(
            &self.url,
            ConnectionProperties::default().with_connection_name("orggatekeeper".into()),
        )
        .await
        .map_err(|e| GatekeeperError::broker(format!("amqp connect: {}", e)))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| GatekeeperError::broker(format!("amqp channel: {}", e)))?;
        Ok((connection, channel))
    }

    async fn declare(&self, channel: &Channel, spec: &SubscriptionSpec) -> Result<()> {
        channel
            .basic_qos(spec.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| GatekeeperError::broker(format!("amqp qos: {}", e)))?;

        channel
            .exchange_declare(
                &spec.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| GatekeeperError::broker(format!("amqp exchange declare: {}", e)))?;

        channel
            .queue_declare(
                &spec.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| GatekeeperError::broker(format!("amqp queue declare: {}", e)))?;

        for routing_key in &spec.bindings {
            channel
                .queue_bind(
                    &spec.queue,
                    &spec.exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    GatekeeperError::broker(format!("amqp bind {}: {}", routing_key, e))
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for LapinBroker {
    async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<Box<dyn Subscription>> {
        let (connection, channel) = self.open_channel().await?;
        self.declare(&channel, spec).await?;

        let consumer = channel
            .basic_consume(
                &spec.queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| GatekeeperError::broker(format!("amqp consume: {}", e)))?;

        tracing::info!(
            exchange = %spec.exchange,
            queue = %spec.queue,
            bindings = ?spec.bindings,
            "AMQP subscription established"
        );
        Ok(Box::new(LapinSubscription {
            _connection: connection,
            _channel: channel,
            consumer,
        }))
    }
}

struct LapinSubscription {
    // Dropping the connection closes the consumer.
    _connection: Connection,
    _channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl Subscription for LapinSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        let delivery = self.consumer.next().await?;
        Some(
            delivery
                .map(|d| Delivery {
                    routing_key: d.routing_key.as_str().to_string(),
                    body: d.data,
                    redelivered: d.redelivered,
                    acker: Box::new(LapinAcker(d.acker)),
                })
                .map_err(|e| GatekeeperError::broker(format!("amqp delivery: {}", e))),
        )
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn settle(&self, disposition: Disposition) -> Result<()> {
        let result = match disposition {
            Disposition::Ack => self.0.ack(BasicAckOptions::default()).await,
            Disposition::Requeue => self.0.reject(BasicRejectOptions { requeue: true }).await,
            Disposition::Drop => self.0.reject(BasicRejectOptions { requeue: false }).await,
        };
        result.map_err(|e| GatekeeperError::broker(format!("amqp settle {:?}: {}", disposition, e)))
    }
}
