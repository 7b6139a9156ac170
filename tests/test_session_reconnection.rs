//! Automatic reconnection tests
//!
//! Runs on tokio's paused clock so the 2s → 4s → 8s → 10s backoff can be
//! checked exactly without waiting for it.


use sleepasha::testing::{ConnectOutcome, MockConnector};
use sleepasha::transport::mqtt::{
    ConnectionConfig, Credentials, MqttError, MqttSession, PublishRequest, RetrySchedule,
    SessionState,
};
use std::time::Duration;
use test_helpers::{
    connected_session, edges, next_transitions, test_connection_config_with_backoff,
    test_session, wait_for_state,
};
use tokio::sync::watch;
use tokio::time::Instant;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Gaps between consecutive instants
fn gaps(start: Instant, times: &[Instant]) -> Vec<Duration> {
    let mut previous = start;
    times
        .iter()
        .map(|&t| {
            let gap = t - previous;
            previous = t;
            gap
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_reconnects_after_initial_delay() {
    // Arrange
    let (session, connector) = connected_session().await;
    let lost_at = Instant::now();

    // Act
    connector.last_link().unwrap().drop_connection("connection reset by peer");
    wait_for_state(&session, SessionState::DisconnectedPendingReconnect).await;
    wait_for_state(&session, SessionState::Connected).await;

    // Assert
    assert_eq!(connector.attempts(), 2);
    assert_eq!(connector.links().len(), 2);
    let times = connector.attempt_times();
    assert_eq!(times[1] - lost_at, secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_up_to_the_maximum() {
    // Arrange
    let (session, connector) = connected_session().await;
    connector.reject_times(5, "connection refused");
    let lost_at = Instant::now();

    // Act
    connector.last_link().unwrap().drop_connection("broker restarted");
    tokio::time::sleep(secs(1)).await;
    wait_for_state(&session, SessionState::Connected).await;

    // Assert
    let times = connector.attempt_times();
    assert_eq!(times.len(), 7);
    assert_eq!(
        gaps(lost_at, &times[1..]),
        vec![secs(2), secs(4), secs(8), secs(10), secs(10), secs(10)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_backoff_resets_after_successful_reconnect() {
    // Arrange
    let (session, connector) = connected_session().await;
    connector.reject_times(2, "connection refused");
    connector.last_link().unwrap().drop_connection("first outage");
    tokio::time::sleep(secs(1)).await;
    wait_for_state(&session, SessionState::Connected).await;

    // Act
    let second_loss = Instant::now();
    connector.last_link().unwrap().drop_connection("second outage");
    tokio::time::sleep(secs(1)).await;
    wait_for_state(&session, SessionState::Connected).await;

    // Assert
    let times = connector.attempt_times();
    assert_eq!(times.len(), 5);
    assert_eq!(times[4] - second_loss, secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_custom_backoff_policy_is_used() {
    // Arrange
    let config = test_connection_config_with_backoff(Duration::from_millis(500), secs(1));
    let connector = MockConnector::new();
    let session = MqttSession::new(config, connector.clone());
    session.connect(None).await.unwrap();
    connector.reject_times(3, "connection refused");
    let lost_at = Instant::now();

    // Act
    connector.last_link().unwrap().drop_connection("wifi lost");
    tokio::time::sleep(Duration::from_millis(100)).await;
    wait_for_state(&session, SessionState::Connected).await;

    // Assert
    let times = connector.attempt_times();
    assert_eq!(
        gaps(lost_at, &times[1..]),
        vec![Duration::from_millis(500), secs(1), secs(1), secs(1)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_observers_see_reconnect_cycle_with_schedules() {
    // Arrange
    let (session, connector) = connected_session().await;
    connector.reject_next("connection refused");
    let (_handle, mut rx) = session.subscribe_transitions();

    // Act
    connector.last_link().unwrap().drop_connection("keep alive timeout");
    let transitions = next_transitions(&mut rx, 5).await;

    // Assert
    use SessionState::*;
    assert_eq!(
        edges(&transitions),
        vec![
            (Connected, DisconnectedPendingReconnect),
            (DisconnectedPendingReconnect, ConnectingReconnect),
            (ConnectingReconnect, DisconnectedPendingReconnect),
            (DisconnectedPendingReconnect, ConnectingReconnect),
            (ConnectingReconnect, Connected),
        ]
    );
    assert_eq!(
        transitions[0].retry,
        Some(RetrySchedule {
            attempt: 1,
            delay: secs(2)
        })
    );
    assert_eq!(
        transitions[2].retry,
        Some(RetrySchedule {
            attempt: 2,
            delay: secs(4)
        })
    );
    assert_eq!(
        transitions[0].reason.as_deref(),
        Some("keep alive timeout")
    );
    assert!(transitions[2]
        .reason
        .as_deref()
        .unwrap_or_default()
        .contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn test_publish_during_reconnect_fails_fast() {
    // Arrange
    let (session, connector) = connected_session().await;
    connector.last_link().unwrap().drop_connection("socket closed");
    wait_for_state(&session, SessionState::DisconnectedPendingReconnect).await;
    let request = PublishRequest::builder().topic("t").build().unwrap();

    // Act
    let result = session.publish(&request).await;

    // Assert
    assert_eq!(
        result,
        Err(MqttError::NotConnected {
            state: SessionState::DisconnectedPendingReconnect
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_during_reconnect_joins_the_next_attempt() {
    // Arrange
    let (session, connector) = connected_session().await;
    connector.last_link().unwrap().drop_connection("socket closed");
    wait_for_state(&session, SessionState::DisconnectedPendingReconnect).await;

    // Act
    let ack = session.connect(None).await;

    // Assert
    assert!(ack.is_ok());
    assert_eq!(session.current_state(), SessionState::Connected);
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    // Arrange
    let (session, connector) = connected_session().await;
    connector.last_link().unwrap().drop_connection("socket closed");
    wait_for_state(&session, SessionState::DisconnectedPendingReconnect).await;

    // Act
    session.disconnect(None).await.unwrap();
    tokio::time::sleep(secs(60)).await;

    // Assert
    assert_eq!(session.current_state(), SessionState::Disconnected);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_reconnect_attempt_in_flight() {
    // Arrange
    let (session, connector) = connected_session().await;
    connector.push_outcome(ConnectOutcome::Hang);
    connector.last_link().unwrap().drop_connection("socket closed");
    wait_for_state(&session, SessionState::ConnectingReconnect).await;
    let waiter = tokio::spawn({
        let session = session.clone();
        async move { session.connect(None).await }
    });
    tokio::task::yield_now().await;

    // Act
    session.disconnect(None).await.unwrap();
    tokio::time::sleep(secs(60)).await;

    // Assert
    assert!(matches!(
        waiter.await.unwrap(),
        Err(MqttError::ConnectionFailed { .. })
    ));
    assert_eq!(session.current_state(), SessionState::Disconnected);
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_reconnect_is_terminal() {
    // Arrange
    let (session, connector) = connected_session().await;
    connector.reject_times(10, "connection refused");
    connector.last_link().unwrap().drop_connection("socket closed");
    wait_for_state(&session, SessionState::DisconnectedPendingReconnect).await;

    // Act
    session.stop().await.unwrap();
    tokio::time::sleep(secs(120)).await;

    // Assert
    assert_eq!(session.current_state(), SessionState::Stopped);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_link_loss_is_ignored() {
    // Arrange
    let (session, connector) = connected_session().await;
    let first = connector.last_link().unwrap();
    first.drop_connection("first outage");
    wait_for_state(&session, SessionState::DisconnectedPendingReconnect).await;
    wait_for_state(&session, SessionState::Connected).await;

    // Act: the superseded link reports nothing new
    assert!(!first.drop_connection("late duplicate"));
    tokio::time::sleep(secs(30)).await;

    // Assert
    assert_eq!(session.current_state(), SessionState::Connected);
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_last_connect_request() {
    // Arrange
    let (session, connector) = test_helpers::test_session();
    let request = sleepasha::transport::mqtt::ConnectRequest::builder()
        .keep_alive(20)
        .clean_start(false)
        .build()
        .unwrap();
    session.connect(Some(request.clone())).await.unwrap();

    // Act
    connector.last_link().unwrap().drop_connection("socket closed");
    tokio::time::sleep(secs(1)).await;
    wait_for_state(&session, SessionState::Connected).await;

    // Assert
    assert_eq!(connector.connect_requests(), vec![request.clone(), request]);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_every_handle_ends_the_reconnect_cycle() {
    // Arrange
    let (session, connector) = connected_session().await;
    connector.reject_times(10, "connection refused");
    connector.last_link().unwrap().drop_connection("socket closed");
    wait_for_state(&session, SessionState::DisconnectedPendingReconnect).await;

    // Act
    drop(session);
    tokio::time::sleep(secs(120)).await;

    // Assert
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_with_retry_backs_off_until_broker_accepts() {
    // Arrange
    let (session, connector) = test_session();
    connector.reject_times(2, "connection refused");
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let start = Instant::now();

    // Act
    let connected = session.connect_with_retry(None, shutdown_rx).await;

    // Assert
    assert!(matches!(connected, Ok(true)));
    assert_eq!(connector.attempts(), 3);
    assert_eq!(
        gaps(start, &connector.attempt_times()),
        vec![secs(0), secs(2), secs(4)]
    );
    assert_eq!(session.current_state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_with_retry_gives_up_on_refused_credentials() {
    // Arrange
    let connector = MockConnector::new();
    connector.require_credentials("sleeper", "hunter2");
    let config = ConnectionConfig::builder("localhost", 1883)
        .credentials(Credentials::new("sleeper", "wrong-password"))
        .build()
        .unwrap();
    let session = MqttSession::new(config, connector.clone());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    // Act
    let result = session.connect_with_retry(None, shutdown_rx).await;

    // Assert
    assert!(matches!(
        result,
        Err(MqttError::ConnectionFailed { refused: true, .. })
    ));
    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.current_state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_with_retry_stops_on_shutdown_during_delay() {
    // Arrange
    let (session, connector) = test_session();
    connector.reject_times(10, "connection refused");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retrying = {
        let session = session.clone();
        tokio::spawn(async move { session.connect_with_retry(None, shutdown_rx).await })
    };

    // Act: second attempt at 2s, shutdown while waiting for the third at 6s
    tokio::time::sleep(secs(3)).await;
    shutdown_tx.send(true).unwrap();
    let result = retrying.await.unwrap();

    // Assert
    assert!(matches!(result, Ok(false)));
    assert_eq!(connector.attempts(), 2);
    assert_eq!(session.current_state(), SessionState::Disconnected);
}
