//! Subscriptions, inbound message handling and the blocking run loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::client::{Client, PendingSubscribe};
use crate::error::{Error, Result};
use crate::topic::validate_filter;
use crate::types::{
    ConnectionState, DisconnectReason, Message, QoS, SubscribeReturnCode, Subscription,
};

/// Receiver of inbound messages.
///
/// Called on the connection's network loop, one message at a time, in
/// arrival order. Implemented for any `Fn(&Message)` closure.
pub trait Handler: Send + Sync {
    fn handle_message(&self, msg: &Message);
}

impl<F> Handler for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn handle_message(&self, msg: &Message) {
        self(msg)
    }
}

/// How [`Client::run_until_cancelled`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The cancel signal fired and the client disconnected gracefully.
    Cancelled,
    /// The connection ended on its own.
    Disconnected(DisconnectReason),
}

impl Client {
    /// Register the inbound message handler, replacing any previous one.
    pub fn on_message<H>(&self, handler: H)
    where
        H: Handler + 'static,
    {
        self.set_handler(Arc::new(handler));
    }

    /// Register a shared message handler, replacing any previous one.
    pub fn set_handler(&self, handler: Arc<dyn Handler>) {
        *self.inner.handler_slot().write() = Some(handler);
    }

    /// Remove the message handler. Later messages are dropped.
    pub fn clear_handler(&self) {
        *self.inner.handler_slot().write() = None;
    }

    /// Subscribe to topic filters.
    ///
    /// All filters go out in a single SUBSCRIBE. Returns once it is handed
    /// to the transport; the SUBACK is logged when it arrives. A filter
    /// listed twice is sent once with the last requested QoS.
    pub async fn subscribe<I>(&self, subscriptions: I) -> Result<()>
    where
        I: IntoIterator<Item = Subscription>,
    {
        self.issue_subscribe(subscriptions, None).await?;
        Ok(())
    }

    /// Subscribe and wait for the broker's SUBACK.
    ///
    /// Returns the granted codes in filter order, or `SubscribeRejected`
    /// naming the first filter the broker refused.
    pub async fn subscribe_and_wait<I>(
        &self,
        subscriptions: I,
        timeout: Duration,
    ) -> Result<Vec<SubscribeReturnCode>>
    where
        I: IntoIterator<Item = Subscription>,
    {
        let (tx, rx) = oneshot::channel();
        let filters = self.issue_subscribe(subscriptions, Some(tx)).await?;
        if filters.is_empty() {
            return Ok(Vec::new());
        }

        let codes = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(codes)) => codes,
            Ok(Err(_)) => return Err(Error::NotConnected),
            Err(_) => return Err(Error::Timeout("SUBACK")),
        };

        if let Some((filter, _)) = filters
            .iter()
            .zip(&codes)
            .find(|(_, code)| **code == SubscribeReturnCode::Failure)
        {
            return Err(Error::SubscribeRejected(filter.clone()));
        }
        Ok(codes)
    }

    /// Filters subscribed on the current connection, sorted by filter.
    ///
    /// Empty when disconnected: subscriptions do not outlive a connection.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let Ok(session) = self.inner.connected_session() else {
            return Vec::new();
        };
        let mut subs: Vec<Subscription> = session
            .subscriptions
            .lock()
            .iter()
            .map(|(filter, qos)| Subscription::new(filter.clone(), *qos))
            .collect();
        subs.sort_by(|a, b| a.filter.cmp(&b.filter));
        subs
    }

    /// Block until `cancel` resolves or the connection ends.
    ///
    /// On cancellation the client disconnects gracefully before returning.
    pub async fn run_until_cancelled<F>(&self, cancel: F) -> Result<Termination>
    where
        F: Future,
    {
        if self.state() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        tokio::select! {
            _ = cancel => {
                info!("Cancellation requested, disconnecting");
                self.disconnect().await?;
                Ok(Termination::Cancelled)
            }
            _ = self.wait_disconnected() => {
                let reason = self
                    .last_disconnect_reason()
                    .unwrap_or(DisconnectReason::ClientRequested);
                Ok(Termination::Disconnected(reason))
            }
        }
    }

    /// Returns the filters actually sent.
    async fn issue_subscribe<I>(
        &self,
        subscriptions: I,
        done: Option<oneshot::Sender<Vec<SubscribeReturnCode>>>,
    ) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = Subscription>,
    {
        let session = self.inner.connected_session()?;

        let mut subs: Vec<Subscription> = Vec::new();
        for sub in subscriptions {
            validate_filter(&sub.filter)?;
            match subs.iter_mut().find(|s| s.filter == sub.filter) {
                Some(existing) => existing.qos = sub.qos,
                None => subs.push(sub),
            }
        }
        if subs.is_empty() {
            debug!("Subscribe called with no filters");
            return Ok(Vec::new());
        }

        let filters: Vec<String> = subs.iter().map(|s| s.filter.clone()).collect();

        let _order = session.send_lock.lock().await;

        // Recorded before sending: a rejecting SUBACK may arrive before
        // the transport call returns.
        let previous: Vec<(String, Option<QoS>)> = {
            let mut active = session.subscriptions.lock();
            subs.iter()
                .map(|s| (s.filter.clone(), active.insert(s.filter.clone(), s.qos)))
                .collect()
        };
        session.subscribes.lock().push(PendingSubscribe {
            filters: filters.clone(),
            done,
        });

        if let Err(e) = session.requester.subscribe(&subs).await {
            session.subscribes.lock().rollback();
            let mut active = session.subscriptions.lock();
            for (filter, qos) in previous {
                match qos {
                    Some(qos) => active.insert(filter, qos),
                    None => active.remove(&filter),
                };
            }
            return Err(e);
        }

        for sub in &subs {
            info!("Subscribed to {} (QoS {})", sub.filter, sub.qos);
        }
        Ok(filters)
    }
}
