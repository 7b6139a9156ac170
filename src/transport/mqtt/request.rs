//! Request and acknowledgment value objects for MQTT session operations
//!
//! Every optional field left unset is omitted from the wire message so that the
//! broker (or rumqttc) default applies. Builders collect fields by value and
//! `build(&self)` never consumes or mutates what was collected, so one builder
//! can stamp out any number of requests.

use super::connection::{Credentials, MqttError};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{LastWill, LastWillProperties, PublishProperties};
use rumqttc::v5::mqttbytes::QoS as WireQoS;
use serde::{Deserialize, Serialize};

/// Fixed header plus packet identifier, the worst case for any publish
const PUBLISH_OVERHEAD_BYTES: usize = 5 + 2;

/// Quality of service level for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub(crate) fn to_wire(self) -> WireQoS {
        match self {
            QoS::AtMostOnce => WireQoS::AtMostOnce,
            QoS::AtLeastOnce => WireQoS::AtLeastOnce,
            QoS::ExactlyOnce => WireQoS::ExactlyOnce,
        }
    }

    /// Whether the broker acknowledges publishes at this level
    pub fn expects_acknowledgment(self) -> bool {
        !matches!(self, QoS::AtMostOnce)
    }
}

/// MQTT v5 payload format indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFormat {
    /// Unspecified bytes (indicator 0)
    Unspecified,
    /// UTF-8 encoded character data (indicator 1)
    Utf8,
}

impl PayloadFormat {
    fn indicator(self) -> u8 {
        match self {
            PayloadFormat::Unspecified => 0,
            PayloadFormat::Utf8 => 1,
        }
    }
}

/// A single validated publish operation
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    topic: String,
    payload: Bytes,
    qos: Option<QoS>,
    retain: Option<bool>,
    message_expiry_interval: Option<u32>,
    payload_format: Option<PayloadFormat>,
    content_type: Option<String>,
    response_topic: Option<String>,
    correlation_data: Option<Bytes>,
    user_properties: Vec<(String, String)>,
}

impl PublishRequest {
    pub fn builder() -> PublishRequestBuilder {
        PublishRequestBuilder::default()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Effective QoS; the protocol default is at-most-once
    pub fn qos(&self) -> QoS {
        self.qos.unwrap_or(QoS::AtMostOnce)
    }

    pub fn retain(&self) -> bool {
        self.retain.unwrap_or(false)
    }

    pub fn message_expiry_interval(&self) -> Option<u32> {
        self.message_expiry_interval
    }

    pub fn payload_format(&self) -> Option<PayloadFormat> {
        self.payload_format
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn response_topic(&self) -> Option<&str> {
        self.response_topic.as_deref()
    }

    pub fn correlation_data(&self) -> Option<&Bytes> {
        self.correlation_data.as_ref()
    }

    pub fn user_properties(&self) -> &[(String, String)] {
        &self.user_properties
    }

    /// Upper bound on the encoded PUBLISH packet size
    pub fn estimated_packet_size(&self) -> usize {
        let properties: usize = self.content_type.as_ref().map_or(0, |c| 3 + c.len())
            + self.response_topic.as_ref().map_or(0, |t| 3 + t.len())
            + self.correlation_data.as_ref().map_or(0, |d| 3 + d.len())
            + self.message_expiry_interval.map_or(0, |_| 5)
            + self.payload_format.map_or(0, |_| 2)
            + self
                .user_properties
                .iter()
                .map(|(k, v)| 5 + k.len() + v.len())
                .sum::<usize>();

        PUBLISH_OVERHEAD_BYTES + 2 + self.topic.len() + 4 + properties + self.payload.len()
    }

    /// Wire properties, empty when nothing optional was set
    pub(crate) fn properties(&self) -> PublishProperties {
        PublishProperties {
            payload_format_indicator: self.payload_format.map(PayloadFormat::indicator),
            message_expiry_interval: self.message_expiry_interval,
            response_topic: self.response_topic.clone(),
            correlation_data: self.correlation_data.clone(),
            user_properties: self.user_properties.clone(),
            content_type: self.content_type.clone(),
            ..Default::default()
        }
    }
}

/// Collects publish fields; `build` validates and copies them out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishRequestBuilder {
    topic: Option<String>,
    payload: Option<Bytes>,
    qos: Option<QoS>,
    retain: Option<bool>,
    message_expiry_interval: Option<u32>,
    payload_format: Option<PayloadFormat>,
    content_type: Option<String>,
    response_topic: Option<String>,
    correlation_data: Option<Bytes>,
    user_properties: Vec<(String, String)>,
    will_delay_interval: Option<u32>,
}

impl PublishRequestBuilder {
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = Some(qos);
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = Some(retain);
        self
    }

    pub fn message_expiry_interval(mut self, seconds: u32) -> Self {
        self.message_expiry_interval = Some(seconds);
        self
    }

    pub fn payload_format(mut self, format: PayloadFormat) -> Self {
        self.payload_format = Some(format);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn response_topic(mut self, topic: impl Into<String>) -> Self {
        self.response_topic = Some(topic.into());
        self
    }

    pub fn correlation_data(mut self, data: impl Into<Bytes>) -> Self {
        self.correlation_data = Some(data.into());
        self
    }

    /// Append a user property; duplicates are kept and sent in order
    pub fn user_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push((name.into(), value.into()));
        self
    }

    /// Only used by [`PublishRequestBuilder::build_will`]
    pub fn will_delay_interval(mut self, seconds: u32) -> Self {
        self.will_delay_interval = Some(seconds);
        self
    }

    pub fn build(&self) -> Result<PublishRequest, MqttError> {
        let topic = self
            .topic
            .clone()
            .ok_or_else(|| MqttError::InvalidRequest("publish topic must be set".to_string()))?;
        validate_publish_topic(&topic)?;

        let payload = self.payload.clone().unwrap_or_default();
        if self.payload_format == Some(PayloadFormat::Utf8) && std::str::from_utf8(&payload).is_err()
        {
            return Err(MqttError::InvalidRequest(
                "payload is marked UTF-8 but is not valid UTF-8".to_string(),
            ));
        }

        Ok(PublishRequest {
            topic,
            payload,
            qos: self.qos,
            retain: self.retain,
            message_expiry_interval: self.message_expiry_interval,
            payload_format: self.payload_format,
            content_type: self.content_type.clone(),
            response_topic: self.response_topic.clone(),
            correlation_data: self.correlation_data.clone(),
            user_properties: self.user_properties.clone(),
        })
    }

    /// Build a last-will message from the same fields
    pub fn build_will(&self) -> Result<WillPublish, MqttError> {
        Ok(WillPublish {
            message: self.build()?,
            delay_interval: self.will_delay_interval,
        })
    }
}

/// Publish topics must be non-empty and free of wildcards
pub fn validate_publish_topic(topic: &str) -> Result<(), MqttError> {
    if topic.is_empty() {
        return Err(MqttError::InvalidRequest(
            "publish topic must not be empty".to_string(),
        ));
    }
    if topic.contains(['+', '#', '\0']) {
        return Err(MqttError::InvalidRequest(format!(
            "publish topic contains a wildcard or NUL character: {topic}"
        )));
    }
    Ok(())
}

/// Last-will message registered with the broker at connect time
#[derive(Debug, Clone, PartialEq)]
pub struct WillPublish {
    message: PublishRequest,
    delay_interval: Option<u32>,
}

impl WillPublish {
    pub fn message(&self) -> &PublishRequest {
        &self.message
    }

    pub fn delay_interval(&self) -> Option<u32> {
        self.delay_interval
    }

    pub(crate) fn to_last_will(&self) -> LastWill {
        let message = &self.message;
        let has_properties = self.delay_interval.is_some()
            || message.payload_format.is_some()
            || message.message_expiry_interval.is_some()
            || message.content_type.is_some()
            || message.response_topic.is_some()
            || message.correlation_data.is_some()
            || !message.user_properties.is_empty();

        let properties = has_properties.then(|| LastWillProperties {
            delay_interval: self.delay_interval,
            payload_format_indicator: message.payload_format.map(PayloadFormat::indicator),
            message_expiry_interval: message.message_expiry_interval,
            content_type: message.content_type.clone(),
            response_topic: message.response_topic.clone(),
            correlation_data: message.correlation_data.clone(),
            user_properties: message.user_properties.clone(),
        });

        LastWill::new(
            message.topic.clone(),
            message.payload.clone(),
            message.qos().to_wire(),
            message.retain(),
            properties,
        )
    }
}

/// Client-side and broker-side limits requested at connect time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRestrictions {
    pub receive_maximum: Option<u16>,
    pub send_maximum: Option<u16>,
    pub maximum_packet_size: Option<u32>,
    pub send_maximum_packet_size: Option<u32>,
    pub topic_alias_maximum: Option<u16>,
    /// The client never assigns topic aliases, so only zero is meaningful here
    pub send_topic_alias_maximum: Option<u16>,
    pub request_problem_information: Option<bool>,
    pub request_response_information: Option<bool>,
}

/// Fields of a CONNECT packet; all unset by default
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectRequest {
    clean_start: Option<bool>,
    session_expiry_interval: Option<u32>,
    keep_alive: Option<u16>,
    simple_auth: Option<Credentials>,
    will: Option<WillPublish>,
    restrictions: Option<ConnectRestrictions>,
    user_properties: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn builder() -> ConnectRequestBuilder {
        ConnectRequestBuilder::default()
    }

    pub fn clean_start(&self) -> Option<bool> {
        self.clean_start
    }

    pub fn session_expiry_interval(&self) -> Option<u32> {
        self.session_expiry_interval
    }

    pub fn keep_alive(&self) -> Option<u16> {
        self.keep_alive
    }

    pub fn simple_auth(&self) -> Option<&Credentials> {
        self.simple_auth.as_ref()
    }

    pub fn will(&self) -> Option<&WillPublish> {
        self.will.as_ref()
    }

    pub fn restrictions(&self) -> Option<&ConnectRestrictions> {
        self.restrictions.as_ref()
    }

    pub fn user_properties(&self) -> &[(String, String)] {
        &self.user_properties
    }

    /// Local cap on outgoing packet size, if one was requested
    pub fn send_maximum_packet_size(&self) -> Option<u32> {
        self.restrictions
            .as_ref()
            .and_then(|r| r.send_maximum_packet_size)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectRequestBuilder {
    request: ConnectRequest,
}

impl ConnectRequestBuilder {
    pub fn clean_start(mut self, clean_start: bool) -> Self {
        self.request.clean_start = Some(clean_start);
        self
    }

    pub fn session_expiry_interval(mut self, seconds: u32) -> Self {
        self.request.session_expiry_interval = Some(seconds);
        self
    }

    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.request.keep_alive = Some(seconds);
        self
    }

    pub fn simple_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.request.simple_auth = Some(Credentials::new(username, password));
        self
    }

    pub fn will(mut self, will: WillPublish) -> Self {
        self.request.will = Some(will);
        self
    }

    pub fn restrictions(mut self, restrictions: ConnectRestrictions) -> Self {
        self.request.restrictions = Some(restrictions);
        self
    }

    pub fn user_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.user_properties.push((name.into(), value.into()));
        self
    }

    pub fn build(&self) -> Result<ConnectRequest, MqttError> {
        if let Some(auth) = &self.request.simple_auth {
            if auth.username().is_empty() {
                return Err(MqttError::InvalidRequest(
                    "simple auth username must not be empty".to_string(),
                ));
            }
        }
        if let Some(restrictions) = &self.request.restrictions {
            if restrictions.receive_maximum == Some(0) || restrictions.send_maximum == Some(0) {
                return Err(MqttError::InvalidRequest(
                    "receive/send maximum must be greater than 0".to_string(),
                ));
            }
            if restrictions.maximum_packet_size == Some(0)
                || restrictions.send_maximum_packet_size == Some(0)
            {
                return Err(MqttError::InvalidRequest(
                    "packet size caps must be greater than 0".to_string(),
                ));
            }
        }
        Ok(self.request.clone())
    }
}

/// Reason sent (or implied) when the client disconnects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// DISCONNECT with reason 0x00; the broker discards the will
    #[default]
    Normal,
    /// The broker publishes the will message
    WithWillMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectRequest {
    reason: Option<DisconnectReason>,
}

impl DisconnectRequest {
    pub fn with_reason(reason: DisconnectReason) -> Self {
        Self {
            reason: Some(reason),
        }
    }

    pub fn reason(&self) -> DisconnectReason {
        self.reason.unwrap_or_default()
    }
}

/// Successful CONNACK as seen by the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason: String,
    pub assigned_client_identifier: Option<String>,
    pub server_keep_alive: Option<u16>,
    pub reason_string: Option<String>,
}

/// Broker acknowledgment for QoS 1 and QoS 2 publishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Acknowledgment {
    PubAck { reason: String },
    PubComp { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    pub topic: String,
    pub qos: QoS,
    /// Zero-valued for QoS 0, which carries no packet identifier
    pub packet_id: Option<u16>,
    pub acknowledgment: Option<Acknowledgment>,
}
