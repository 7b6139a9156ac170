//! Publishes the alarm list to `SleepAsAndroid/{topic}/alarms`

use super::alarm::{AlarmRecord, AlarmSource};
use super::PublisherError;
use crate::transport::mqtt::{
    MqttSession, PayloadFormat, PublishRequest, PublishResult, QoS, TopicBuilder,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

const CONTENT_TYPE_JSON: &str = "application/json";

/// Turns alarm lists into retained publishes on one session
#[derive(Debug, Clone)]
pub struct AlarmPublisher {
    session: MqttSession,
    topic: String,
}

impl AlarmPublisher {
    /// `topic_name` becomes the middle level of the alarms topic
    pub fn new(session: MqttSession, topic_name: &str) -> Result<Self, PublisherError> {
        let topic = TopicBuilder::build_alarms_topic(topic_name)
            .map_err(|_| PublisherError::InvalidTopicName(topic_name.to_string()))?;
        Ok(Self { session, topic })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn session(&self) -> &MqttSession {
        &self.session
    }

    /// Wire request for an alarm list (pure function)
    pub fn build_request(
        topic: &str,
        alarms: &[AlarmRecord],
    ) -> Result<PublishRequest, PublisherError> {
        let payload = serde_json::to_vec(alarms)?;
        let request = PublishRequest::builder()
            .topic(topic)
            .payload(payload)
            .qos(QoS::AtLeastOnce)
            .retain(true)
            .content_type(CONTENT_TYPE_JSON)
            .payload_format(PayloadFormat::Utf8)
            .build()?;
        Ok(request)
    }

    /// Publish `alarms` and wait for the broker's PUBACK
    pub async fn publish_alarms(
        &self,
        alarms: &[AlarmRecord],
    ) -> Result<PublishResult, PublisherError> {
        let request = Self::build_request(&self.topic, alarms)?;

        debug!(topic = %self.topic, count = alarms.len(), "Publishing alarms");
        let result = self.session.publish(&request).await?;
        info!(
            topic = %self.topic,
            count = alarms.len(),
            packet_id = ?result.packet_id,
            "Published alarms"
        );
        Ok(result)
    }

    /// Fetch from `source` and publish what it returns
    pub async fn sync_once<S>(&self, source: &S) -> Result<PublishResult, PublisherError>
    where
        S: AlarmSource + ?Sized,
    {
        let alarms = source.fetch_alarms().await?;
        self.publish_alarms(&alarms).await
    }

    /// Republish on every (re)connection and every `interval` tick until shutdown
    ///
    /// Failed syncs are logged and retried on the next trigger. Returns the
    /// number of successful syncs.
    pub async fn run<S>(
        &self,
        source: &S,
        interval: Option<Duration>,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize
    where
        S: AlarmSource + ?Sized,
    {
        let span = crate::lifecycle_span!(event = "alarm_sync", topic = %self.topic);
        async {
            let mut states = self.session.watch_state();
            let mut ticker = interval.map(|period| {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker
            });
            let mut synced = 0;

            let connected = states.borrow_and_update().is_connected();
            if connected && self.sync_logged(source).await {
                synced += 1;
            }

            loop {
                if *shutdown.borrow() {
                    break;
                }

                let connected = tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        states.borrow_and_update().is_connected()
                    }
                    _ = next_tick(&mut ticker) => self.session.current_state().is_connected(),
                };

                if connected && self.sync_logged(source).await {
                    synced += 1;
                }
            }

            info!(synced, "Alarm sync stopped");
            synced
        }
        .instrument(span)
        .await
    }

    async fn sync_logged<S>(&self, source: &S) -> bool
    where
        S: AlarmSource + ?Sized,
    {
        match self.sync_once(source).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, topic = %self.topic, "Alarm sync failed");
                false
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockAlarmSource, MockConnector};
    use crate::transport::mqtt::{ConnectionConfig, MqttError, SessionState};

    fn session() -> (MqttSession, MockConnector) {
        let connector = MockConnector::new();
        let config = ConnectionConfig::builder("localhost", 1883).build().unwrap();
        (MqttSession::new(config, connector.clone()), connector)
    }

    #[test]
    fn test_build_request_matches_wire_format() {
        let alarms = vec![AlarmRecord::new(7, 15)];

        let request =
            AlarmPublisher::build_request("SleepAsAndroid/bedroom/alarms", &alarms).unwrap();

        assert_eq!(request.topic(), "SleepAsAndroid/bedroom/alarms");
        assert_eq!(request.qos(), QoS::AtLeastOnce);
        assert!(request.retain());
        assert_eq!(request.content_type(), Some("application/json"));
        assert_eq!(request.payload_format(), Some(PayloadFormat::Utf8));

        let decoded: Vec<AlarmRecord> = serde_json::from_slice(request.payload()).unwrap();
        assert_eq!(decoded, alarms);
    }

    #[test]
    fn test_empty_alarm_list_is_an_empty_array() {
        let request = AlarmPublisher::build_request("t", &[]).unwrap();
        assert_eq!(request.payload().as_ref(), b"[]");
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_topic_names() {
        let (session, _) = session();
        for name in ["", "a/b", "+", "#"] {
            let result = AlarmPublisher::new(session.clone(), name);
            assert!(
                matches!(result, Err(PublisherError::InvalidTopicName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let (session, _) = session();
        let publisher = AlarmPublisher::new(session, "bedroom").unwrap();

        let result = publisher.publish_alarms(&[AlarmRecord::new(6, 0)]).await;

        assert!(matches!(
            result,
            Err(PublisherError::Mqtt(MqttError::NotConnected {
                state: SessionState::Disconnected
            }))
        ));
    }

    #[tokio::test]
    async fn test_sync_once_publishes_source_alarms() {
        let (session, connector) = session();
        session.connect(None).await.unwrap();
        let publisher = AlarmPublisher::new(session, "bedroom").unwrap();
        let source = MockAlarmSource::new(vec![AlarmRecord::new(6, 0), AlarmRecord::new(8, 30)]);

        let result = publisher.sync_once(&source).await.unwrap();

        assert_eq!(result.topic, "SleepAsAndroid/bedroom/alarms");
        assert!(result.packet_id.is_some());
        let published = connector.last_link().unwrap().published();
        assert_eq!(published.len(), 1);
        let decoded: Vec<AlarmRecord> = serde_json::from_slice(published[0].payload()).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_once_surfaces_source_failure() {
        let (session, connector) = session();
        session.connect(None).await.unwrap();
        let publisher = AlarmPublisher::new(session, "bedroom").unwrap();

        let result = publisher
            .sync_once(&MockAlarmSource::with_failure("provider gone"))
            .await;

        assert!(matches!(result, Err(PublisherError::Source(_))));
        assert!(connector.last_link().unwrap().published().is_empty());
    }
}
