//! Publishing on a connected [`Client`].

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::client::{Client, PendingPublish};
use crate::error::{Error, Result};
use crate::topic::validate_topic;
use crate::types::{MessageId, PublishRequest, QoS};

/// How `publish_batch` paces its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Issue each request as soon as the previous one was handed to the
    /// transport.
    #[default]
    Pipelined,
    /// Wait for each request's completion before issuing the next.
    AwaitEach,
}

/// A publish whose completion can be awaited.
#[derive(Debug)]
pub struct PublishHandle {
    id: MessageId,
    done: oneshot::Receiver<Result<()>>,
}

impl PublishHandle {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Wait for completion: the broker's PUBACK (QoS 1) or PUBCOMP (QoS 2),
    /// or the hand-off to the transport for QoS 0.
    ///
    /// Fails with `NotConnected` if the session ends first.
    pub async fn wait(self) -> Result<MessageId> {
        let Self { id, done } = self;
        match done.await {
            Ok(Ok(())) => Ok(id),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::NotConnected),
        }
    }

    /// Like [`wait`](Self::wait), bounded by `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<MessageId> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| Error::Timeout("publish completion"))?
    }
}

impl Client {
    /// Publish a message.
    ///
    /// Returns once the request is handed to the transport; completion is
    /// reported to the [`on_publish_complete`](Client::on_publish_complete)
    /// observer. Requests from one caller go out in call order.
    pub async fn publish(&self, request: PublishRequest) -> Result<MessageId> {
        self.issue_publish(request, None).await
    }

    /// Publish a message and get a handle to await its completion.
    pub async fn publish_tracked(&self, request: PublishRequest) -> Result<PublishHandle> {
        let (tx, done) = oneshot::channel();
        let id = self.issue_publish(request, Some(tx)).await?;
        Ok(PublishHandle { id, done })
    }

    /// Publish requests in order, halting at the first failure.
    ///
    /// On success returns the ids of all issued messages. On failure returns
    /// [`Error::PublishBatchPartialFailure`] with the failing index and the
    /// number of requests handed to the transport before halting. In
    /// [`BatchMode::AwaitEach`] a request whose completion failed counts as
    /// issued.
    pub async fn publish_batch<I>(&self, requests: I, mode: BatchMode) -> Result<Vec<MessageId>>
    where
        I: IntoIterator<Item = PublishRequest>,
    {
        let mut ids = Vec::new();

        for (index, request) in requests.into_iter().enumerate() {
            let partial = |issued: usize, e: Error| Error::PublishBatchPartialFailure {
                index,
                issued,
                source: Box::new(e),
            };

            match mode {
                BatchMode::Pipelined => {
                    let id = self
                        .publish(request)
                        .await
                        .map_err(|e| partial(index, e))?;
                    ids.push(id);
                }
                BatchMode::AwaitEach => {
                    let handle = self
                        .publish_tracked(request)
                        .await
                        .map_err(|e| partial(index, e))?;
                    let id = handle.wait().await.map_err(|e| partial(index + 1, e))?;
                    ids.push(id);
                }
            }
        }

        debug!("Batch of {} publishes issued", ids.len());
        Ok(ids)
    }

    async fn issue_publish(
        &self,
        request: PublishRequest,
        done: Option<oneshot::Sender<Result<()>>>,
    ) -> Result<MessageId> {
        let session = self.inner.connected_session()?;
        validate_topic(&request.topic)?;

        let _order = session.send_lock.lock().await;
        let id = self.inner.next_message_id();
        let pending = PendingPublish { id, done };

        if request.qos == QoS::AtMostOnce {
            session.requester.publish(&request).await?;
            // Nothing will acknowledge it; complete once handed off.
            session.complete_synthetic(pending);
        } else {
            session.publishes.lock().push(pending);
            if let Err(e) = session.requester.publish(&request).await {
                session.publishes.lock().rollback();
                return Err(e);
            }
        }

        debug!(
            "Publish {} issued on {} ({} bytes, QoS {})",
            id,
            request.topic,
            request.payload.len(),
            request.qos
        );
        Ok(id)
    }
}
