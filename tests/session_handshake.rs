//! Handshake and lifecycle tests for `Session`.
//!
//! Covers:
//! - the handshake reply shape and the once-per-connection rule
//! - init-result handling (success, explicit failure, malformed)
//! - re-arming on reconnect
//! - the handshake timeout and the terminal `Failed` state

mod common;

use assert_json_diff::assert_json_eq;
use common::{complete_handshake, handshake_request, init_result, Harness};
use pretty_assertions::assert_eq;
use remote_serialport_client::protocol::{HANDSHAKE_CHANNEL, INIT_RESULT_CHANNEL, SEND_PACKET_CHANNEL};
use remote_serialport_client::{ClientError, DataBits, OpenOptions, Parity, Payload, SessionState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Handshake reply
// ============================================================================

mod handshake_reply_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reply_carries_connect_options() {
        // Arrange
        let harness = Harness::new();
        let mut options = OpenOptions::new("ignored", 115200);
        options.data_bits = Some(DataBits::Eight);
        options.parity = Some(Parity::Even);
        let (_session, server) = harness.open(options);

        // Act
        server.connect();
        server.emit(HANDSHAKE_CHANNEL, handshake_request());

        // Assert
        let replies = server.received_on(HANDSHAKE_CHANNEL);
        assert_eq!(replies.len(), 1);
        let Payload::Json(reply) = &replies[0] else {
            panic!("handshake reply must be JSON");
        };
        assert_json_eq!(
            reply.clone(),
            json!({
                "code": "serialport_handshake",
                "data": {
                    "path": "/dev/ttyUSB0",
                    "baudRate": 115200,
                    "dataBits": 8,
                    "parity": "even"
                }
            })
        );
    }

    #[test]
    fn test_only_first_request_is_answered() {
        let harness = Harness::new();
        let (_session, server) = harness.open(OpenOptions::default());
        server.connect();

        for _ in 0..3 {
            server.emit(HANDSHAKE_CHANNEL, handshake_request());
        }

        assert_eq!(server.received_on(HANDSHAKE_CHANNEL).len(), 1);
    }

    #[test]
    fn test_no_reply_before_connect() {
        let harness = Harness::new();
        let (session, server) = harness.open(OpenOptions::default());

        // Server traffic is lost while the connection is down.
        assert_eq!(server.emit(HANDSHAKE_CHANNEL, handshake_request()), 0);
        assert!(server.received().is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_init_result_listener_armed_before_reply() {
        // The server answers the init result from inside its handshake
        // handler, before the client's emit returns.
        let harness = Harness::new();
        let (session, server) = harness.open(OpenOptions::default());
        {
            let responder = server.clone();
            server.on(
                HANDSHAKE_CHANNEL,
                Arc::new(move |_| {
                    responder.emit(INIT_RESULT_CHANNEL, init_result(true));
                }),
            );
        }

        server.connect();
        server.emit(HANDSHAKE_CHANNEL, handshake_request());

        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.remote_init_status());
    }
}

// ============================================================================
// Init result
// ============================================================================

mod init_result_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_success_marks_ready() {
        let harness = Harness::new();
        let (session, server) = harness.open(OpenOptions::default());
        server.connect();
        assert_eq!(session.state(), SessionState::Initializing);

        complete_handshake(&server);

        assert!(session.remote_init_status());
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_false_fails_session() {
        let harness = Harness::new();
        let (session, server) = harness.open(OpenOptions::default());
        server.connect();
        server.emit(HANDSHAKE_CHANNEL, handshake_request());

        server.emit(INIT_RESULT_CHANNEL, init_result(false));

        assert!(!session.remote_init_status());
        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(session.failure(), Some(ClientError::RemoteInitFailed)));
    }

    #[test]
    fn test_wrong_code_fails_session() {
        let harness = Harness::new();
        let (session, server) = harness.open(OpenOptions::default());
        server.connect();

        server.emit(
            INIT_RESULT_CHANNEL,
            Payload::Json(json!({"code": "wrong_code", "data": true})),
        );

        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(session.failure(), Some(ClientError::InvalidInitResult(_))));
        assert!(session.failure().unwrap().is_fatal());
    }

    #[test]
    fn test_direct_handler_returns_errors() {
        let harness = Harness::new();
        let (session, _server) = harness.open(OpenOptions::default());

        let err = session.handle_init_result(&init_result(false)).unwrap_err();
        assert!(matches!(err, ClientError::RemoteInitFailed));
        assert!(!session.remote_init_status());
    }
}

// ============================================================================
// Reconnect and failure
// ============================================================================

mod lifecycle_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reconnect_runs_handshake_again() {
        let harness = Harness::new();
        let (session, server) = harness.ready(OpenOptions::new("x", 57600));

        server.drop_connection();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.remote_init_status());

        server.connect();
        complete_handshake(&server);

        assert_eq!(session.state(), SessionState::Ready);
        let replies = server.received_on(HANDSHAKE_CHANNEL);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], replies[1]);
    }

    #[test]
    fn test_failed_session_stays_failed_across_reconnect() {
        let harness = Harness::new();
        let (session, server) = harness.open(OpenOptions::default());
        server.connect();
        server.emit(INIT_RESULT_CHANNEL, init_result(false));

        server.drop_connection();
        server.connect();
        complete_handshake(&server);

        assert_eq!(session.state(), SessionState::Failed);
        assert!(server.received_on(HANDSHAKE_CHANNEL).is_empty());
    }

    #[test]
    fn test_failed_session_rejects_writes() {
        let harness = Harness::new();
        let (session, server) = harness.ready(OpenOptions::default());
        let stream = session
            .create_port("/dev/ttyUSB1", None)
            .unwrap()
            .get_port(Some(OpenOptions::default()))
            .unwrap();

        // A failed init on a later connection ends the session.
        server.drop_connection();
        server.connect();
        server.emit(INIT_RESULT_CHANNEL, init_result(false));

        let err = stream.write(&[0x01]).unwrap_err();
        assert!(matches!(err, ClientError::SessionFailed(inner) if matches!(*inner, ClientError::RemoteInitFailed)));
        assert!(server.received_on(SEND_PACKET_CHANNEL).is_empty());
    }

    #[test]
    fn test_writes_after_disconnect_fail() {
        let harness = Harness::new();
        let (session, _server) = harness.ready(OpenOptions::default());
        let stream = session
            .create_port("/dev/ttyUSB1", None)
            .unwrap()
            .get_port(Some(OpenOptions::default()))
            .unwrap();

        session.disconnect();

        assert!(matches!(stream.write(&[0x01]), Err(ClientError::Transport(_))));
        assert_eq!(session.ports(), vec!["/dev/ttyUSB1"]);
    }

    #[tokio::test]
    async fn test_wait_ready_after_handshake() {
        let harness = Harness::new();
        let (session, server) = harness.open(OpenOptions::default());

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_ready(Some(Duration::from_secs(2))).await })
        };
        tokio::task::yield_now().await;
        server.connect();
        complete_handshake(&server);

        waiter.await.unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_unanswered_handshake_times_out() {
        let harness = Harness::new();
        let (session, server) = harness.open(OpenOptions::default());
        server.connect();

        let err = session
            .wait_ready(Some(Duration::from_millis(25)))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::HandshakeTimeout(d) if d == Duration::from_millis(25)));
        assert_eq!(session.state(), SessionState::Failed);
        let again = session.wait_ready(None).await.unwrap_err();
        assert!(matches!(again, ClientError::HandshakeTimeout(_)));
    }
}
