//! Pure routing of rumqttc events for a single connection
//!
//! The link's event pump only needs to know which events settle a CONNACK
//! wait, which correlate publish acknowledgments, and which end the
//! connection. Everything else is logged and ignored.

use super::request::{Acknowledgment, ConnAck};
use rumqttc::v5::mqttbytes::v5::{
    ConnAck as WireConnAck, ConnectReturnCode, Packet, PubAckReason, PubCompReason, PubRecReason,
};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ///
    /// A failure CONNACK never arrives as an event; rumqttc returns it as
    /// `ConnectionError::ConnectionRefused` from `poll`.
    ConnectionAcknowledged(ConnAck),
    /// A publish left the client with this packet id (0 for QoS 0)
    PublishSent { pkid: u16 },
    /// PUBACK for QoS 1; `Err` carries a failure reason code
    PublishAcknowledged {
        pkid: u16,
        outcome: Result<Acknowledgment, String>,
    },
    /// PUBREC for QoS 2; only failures settle the publish here
    PublishReceived { pkid: u16, rejection: Option<String> },
    /// PUBCOMP for QoS 2
    PublishCompleted {
        pkid: u16,
        outcome: Result<Acknowledgment, String>,
    },
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// Our own DISCONNECT was written
    ClosingSent,
    /// Pings, PUBRELs and other bookkeeping
    Infrastructure(String),
}

/// Pure message routing decisions based on MQTT events
pub struct EventRouter;

impl EventRouter {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {
                    Self::route_conn_ack(ack)
                }
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged {
                    pkid: ack.pkid,
                    outcome: match ack.reason {
                        PubAckReason::Success | PubAckReason::NoMatchingSubscribers => {
                            Ok(Acknowledgment::PubAck {
                                reason: format!("{:?}", ack.reason),
                            })
                        }
                        other => Err(format!("PUBACK {other:?}")),
                    },
                },
                Packet::PubRec(rec) => EventRoute::PublishReceived {
                    pkid: rec.pkid,
                    rejection: match rec.reason {
                        PubRecReason::Success | PubRecReason::NoMatchingSubscribers => None,
                        other => Some(format!("PUBREC {other:?}")),
                    },
                },
                Packet::PubComp(comp) => EventRoute::PublishCompleted {
                    pkid: comp.pkid,
                    outcome: match comp.reason {
                        PubCompReason::Success => Ok(Acknowledgment::PubComp {
                            reason: format!("{:?}", comp.reason),
                        }),
                        other => Err(format!("PUBCOMP {other:?}")),
                    },
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected(format!(
                    "broker sent DISCONNECT: {:?}",
                    disconnect.reason_code
                )),
                other => EventRoute::Infrastructure(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent { pkid: *pkid },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::ClosingSent,
            Event::Outgoing(other) => EventRoute::Infrastructure(format!("{other:?}")),
        }
    }

    fn route_conn_ack(ack: &WireConnAck) -> EventRoute {
        let properties = ack.properties.as_ref();
        EventRoute::ConnectionAcknowledged(ConnAck {
            session_present: ack.session_present,
            reason: format!("{:?}", ack.code),
            assigned_client_identifier: properties
                .and_then(|p| p.assigned_client_identifier.clone()),
            server_keep_alive: properties.and_then(|p| p.server_keep_alive),
            reason_string: properties.and_then(|p| p.reason_string.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAckProperties, Disconnect, DisconnectReasonCode, PubAck, PubComp, PubRec,
    };

    fn conn_ack(code: ConnectReturnCode, properties: Option<ConnAckProperties>) -> Event {
        Event::Incoming(Packet::ConnAck(WireConnAck {
            session_present: true,
            code,
            properties,
        }))
    }

    #[test]
    fn test_route_successful_conn_ack() {
        let route = EventRouter::route_mqtt_event(&conn_ack(ConnectReturnCode::Success, None));

        match route {
            EventRoute::ConnectionAcknowledged(ack) => {
                assert!(ack.session_present);
                assert_eq!(ack.reason, "Success");
                assert_eq!(ack.assigned_client_identifier, None);
                assert_eq!(ack.server_keep_alive, None);
            }
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_failure_conn_ack_is_not_an_acknowledgment() {
        let route = EventRouter::route_mqtt_event(&conn_ack(
            ConnectReturnCode::BadUserNamePassword,
            None,
        ));
        assert!(matches!(route, EventRoute::Infrastructure(_)));
    }

    #[test]
    fn test_route_outgoing_publish() {
        let route = EventRouter::route_mqtt_event(&Event::Outgoing(Outgoing::Publish(7)));
        assert_eq!(route, EventRoute::PublishSent { pkid: 7 });
    }

    #[test]
    fn test_route_puback_success_and_failure() {
        let mut ack = PubAck {
            pkid: 3,
            reason: PubAckReason::Success,
            properties: None,
        };
        let route = EventRouter::route_mqtt_event(&Event::Incoming(Packet::PubAck(ack.clone())));
        assert!(matches!(
            route,
            EventRoute::PublishAcknowledged { pkid: 3, outcome: Ok(_) }
        ));

        ack.reason = PubAckReason::QuotaExceeded;
        let route = EventRouter::route_mqtt_event(&Event::Incoming(Packet::PubAck(ack)));
        match route {
            EventRoute::PublishAcknowledged {
                pkid: 3,
                outcome: Err(reason),
            } => assert!(reason.contains("QuotaExceeded")),
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_route_qos2_flow() {
        let rec = PubRec {
            pkid: 9,
            reason: PubRecReason::Success,
            properties: None,
        };
        assert_eq!(
            EventRouter::route_mqtt_event(&Event::Incoming(Packet::PubRec(rec))),
            EventRoute::PublishReceived {
                pkid: 9,
                rejection: None
            }
        );

        let comp = PubComp {
            pkid: 9,
            reason: PubCompReason::Success,
            properties: None,
        };
        assert!(matches!(
            EventRouter::route_mqtt_event(&Event::Incoming(Packet::PubComp(comp))),
            EventRoute::PublishCompleted { pkid: 9, outcome: Ok(Acknowledgment::PubComp { .. }) }
        ));
    }

    #[test]
    fn test_route_broker_disconnect() {
        let disconnect = Disconnect {
            reason_code: DisconnectReasonCode::ServerShuttingDown,
            properties: None,
        };
        let route = EventRouter::route_mqtt_event(&Event::Incoming(Packet::Disconnect(disconnect)));
        match route {
            EventRoute::Disconnected(reason) => assert!(reason.contains("ServerShuttingDown")),
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_route_own_disconnect_and_pings() {
        assert_eq!(
            EventRouter::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::ClosingSent
        );
        assert!(matches!(
            EventRouter::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::Infrastructure(_)
        ));
    }
}
