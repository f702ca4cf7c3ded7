use async_trait::async_trait;
use futures::stream::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client as RedisClient};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::{Broker, BrokerStream};
use crate::error::{Error, Result};

/// Initial backoff delay for subscriber reconnection
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum backoff delay for subscriber reconnection
const MAX_BACKOFF_SECS: u64 = 30;

/// Messages buffered between the Redis subscription and its consumer
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Redis Pub/Sub broker
///
/// Publishing shares one multiplexed connection that is re-established on
/// the next publish after a failure. Each subscription owns a dedicated
/// Pub/Sub connection driven by a background task that reconnects with
/// exponential backoff until the consumer drops the stream or the broker
/// shuts down. Messages published while a subscription is reconnecting are
/// lost.
pub struct RedisBroker {
    client: RedisClient,
    publisher: Mutex<Option<MultiplexedConnection>>,
    op_timeout: Duration,
    cancel_token: CancellationToken,
}

impl RedisBroker {
    pub fn new(redis_url: &str, op_timeout: Duration) -> Result<Self> {
        let client = RedisClient::open(redis_url)?;

        Ok(Self {
            client,
            publisher: Mutex::new(None),
            op_timeout,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Stop every subscription task
    pub fn shutdown(&self) {
        info!("Shutting down Redis broker");
        self.cancel_token.cancel();
    }

    /// Cached publishing connection, connecting without holding the cache lock
    async fn publisher_connection(&self) -> Result<MultiplexedConnection> {
        let cached = self.publisher.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let conn = timeout(self.op_timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| Error::Timeout("getting Redis connection for publishing".to_string()))??;

        // A concurrent publish may have connected first; keep that one
        let mut cached = self.publisher.lock();
        if let Some(existing) = cached.as_ref() {
            return Ok(existing.clone());
        }
        info!("Redis publisher connection established");
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Forward messages of one subscription until the connection drops.
    async fn run_subscriber(
        client: &RedisClient,
        destination: &str,
        op_timeout: Duration,
        tx: &mpsc::Sender<String>,
    ) -> SubscriberExit {
        let mut pubsub = match timeout(op_timeout, client.get_async_pubsub()).await {
            Ok(Ok(ps)) => ps,
            Ok(Err(e)) => return SubscriberExit::ConnectFailed(Error::from(e)),
            Err(_) => {
                return SubscriberExit::ConnectFailed(Error::Timeout(
                    "getting Redis Pub/Sub connection".to_string(),
                ));
            }
        };

        match timeout(op_timeout, pubsub.subscribe(destination)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return SubscriberExit::ConnectFailed(Error::from(e)),
            Err(_) => {
                return SubscriberExit::ConnectFailed(Error::Timeout(format!(
                    "subscribing to {destination}"
                )));
            }
        }

        info!(destination = %destination, "Redis subscriber connected");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, destination = %destination, "Invalid payload");
                    continue;
                }
            };

            if tx.send(payload).await.is_err() {
                return SubscriberExit::ConsumerGone;
            }
        }

        SubscriberExit::Disconnected
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, destination: &str, payload: String) -> Result<()> {
        let mut conn = self.publisher_connection().await?;

        let result: Result<usize> = match timeout(self.op_timeout, conn.publish(destination, payload)).await {
            Ok(Ok(receivers)) => Ok(receivers),
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::Timeout(format!("publishing to {destination}"))),
        };

        match result {
            Ok(receivers) => {
                debug!(destination = %destination, receivers = receivers, "Published to Redis");
                Ok(())
            }
            Err(e) => {
                // Reconnect on the next publish
                self.publisher.lock().take();
                Err(e)
            }
        }
    }

    async fn subscribe(&self, destination: &str) -> Result<BrokerStream> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.client.clone();
        let destination = destination.to_string();
        let op_timeout = self.op_timeout;
        let cancel = self.cancel_token.clone();

        let task = async move {
            let mut backoff_secs = INITIAL_BACKOFF_SECS;

            loop {
                let exit = tokio::select! {
                    () = cancel.cancelled() => {
                        info!(destination = %destination, "Redis subscriber task cancelled");
                        return;
                    }
                    exit = Self::run_subscriber(&client, &destination, op_timeout, &tx) => exit,
                };

                match exit {
                    SubscriberExit::ConsumerGone => {
                        debug!(destination = %destination, "Subscription consumer dropped, stopping");
                        return;
                    }
                    SubscriberExit::Disconnected => {
                        // The server was reachable, start over with a short delay
                        error!(
                            destination = %destination,
                            "Redis subscriber stream ended (connection lost), reconnecting after {}s",
                            INITIAL_BACKOFF_SECS
                        );
                        backoff_secs = INITIAL_BACKOFF_SECS;
                    }
                    SubscriberExit::ConnectFailed(e) => {
                        error!(
                            error = %e,
                            destination = %destination,
                            backoff_secs = backoff_secs,
                            "Redis subscriber failed to connect, retrying after backoff"
                        );
                    }
                }

                tokio::select! {
                    () = cancel.cancelled() => {
                        info!(destination = %destination, "Redis subscriber task cancelled during backoff");
                        return;
                    }
                    () = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                }

                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        };
        tokio::spawn(task.in_current_span());

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Describes how the subscriber loop exited, enabling proper backoff behavior.
enum SubscriberExit {
    /// Connection was established but the stream ended. Backoff is reset.
    Disconnected,
    /// Failed to connect or subscribe. Backoff keeps increasing.
    ConnectFailed(Error),
    /// The receiving side of the subscription was dropped
    ConsumerGone,
}
