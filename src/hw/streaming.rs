use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::connection::Connection;
use super::hardware::NotificationStream;
use crate::codec::{DecodedEvent, Sample, TelemetryCodec};
use crate::error::InteractionError;
use crate::protocol::{EndpointId, Opcode};
use crate::utils::format_hex;

#[derive(Debug)]
struct Subscription {
    cancel: CancellationToken,
    listener: JoinHandle<()>,
}

impl Subscription {
    /// Stops delivery and waits until the listener has returned.
    async fn detach(self) {
        self.cancel.cancel();
        if let Err(error) = self.listener.await {
            debug!(?error, "notification listener ended abnormally");
        }
    }
}

/// Owns the at-most-one telemetry subscription of a connection.
#[derive(Debug, Default)]
pub struct StreamingSession {
    subscription: Option<Subscription>,
}

impl StreamingSession {
    /// Creates an idle streaming session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a listener is attached and still receiving.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|subscription| !subscription.listener.is_finished())
    }

    /// Returns whether a subscription handle is held, live or not.
    pub(crate) fn has_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    /// Sends `start measurement` and forwards every decoded sample to `on_sample`.
    ///
    /// Samples from one packet are forwarded in packet order. The listener ends
    /// on [`StreamingSession::stop`] or when `connection` is torn down. Starting
    /// while a subscription is live is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the command write or the subscription fails. A
    /// failed subscription is followed by a best-effort `stop measurement`.
    #[instrument(skip_all, level = "info", fields(device_id = connection.device().device_id()))]
    pub async fn start<F>(
        &mut self,
        connection: &Connection,
        on_sample: F,
    ) -> Result<(), InteractionError>
    where
        F: FnMut(Sample) + Send + 'static,
    {
        if self.is_active() {
            debug!("measurement already streaming");
            return Ok(());
        }
        if let Some(stale) = self.subscription.take() {
            stale.detach().await;
        }

        let link = connection.link();
        let notifications = link.notifications(EndpointId::DataPoint).await?;
        connection.send(Opcode::StartMeasurement).await?;
        if let Err(error) = link.subscribe(EndpointId::DataPoint).await {
            if let Err(stop_error) = connection.send(Opcode::StopMeasurement).await {
                debug!(?stop_error, "failed to stop measurement after subscribe error");
            }
            return Err(error);
        }

        let cancel = connection.teardown_token().child_token();
        let listener = tokio::spawn(forward_notifications(
            notifications,
            cancel.clone(),
            on_sample,
        ));
        info!("measurement started");
        self.subscription = Some(Subscription { cancel, listener });
        Ok(())
    }

    /// Detaches the listener, then sends `stop measurement` and unsubscribes.
    ///
    /// When this returns no further samples will be delivered, so the caller
    /// can clear its buffer. Stopping an idle session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the stop command cannot be written.
    #[instrument(skip_all, level = "info")]
    pub async fn stop(&mut self, connection: &Connection) -> Result<(), InteractionError> {
        let Some(subscription) = self.subscription.take() else {
            debug!("no measurement to stop");
            return Ok(());
        };
        subscription.detach().await;

        connection.send(Opcode::StopMeasurement).await?;
        if let Err(error) = connection.link().unsubscribe(EndpointId::DataPoint).await {
            debug!(?error, "failed to unsubscribe cleanly");
        }
        info!("measurement stopped");
        Ok(())
    }

    /// Drops the subscription without any wire traffic, for torn-down links.
    pub(crate) async fn discard(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.detach().await;
            debug!("discarded subscription of a closed connection");
        }
    }
}

async fn forward_notifications<F>(
    mut notifications: NotificationStream,
    cancel: CancellationToken,
    mut on_sample: F,
) where
    F: FnMut(Sample),
{
    loop {
        let payload = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = notifications.next() => match next {
                Some(payload) => payload,
                None => {
                    debug!("notification stream closed");
                    break;
                }
            },
        };

        let event = TelemetryCodec::decode_notification(&payload);
        trace!(payload = %format_hex(&payload), kind = event.label(), "notification");
        match event {
            DecodedEvent::Samples(samples) => {
                trace!(count = samples.len(), "sample batch");
                for sample in samples {
                    on_sample(sample);
                }
            }
            DecodedEvent::BatteryAck => info!("battery voltage sample acknowledged"),
            DecodedEvent::LowPowerWarning => warn!("sensor reported low power"),
            DecodedEvent::Unknown(response_type) => {
                debug!(response_type, "ignoring unknown notification type");
            }
            DecodedEvent::NoData => debug!("dropping empty notification"),
        }
    }
}
