mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use duocall::{
    CallAccept, CallInvite, CallState, ClientMessage, Error, LocalRelay, SessionEvent,
    SessionConfig, SignalPayload, SignalingChannel,
};

use support::{client, client_with_config, denied_client, saw_event, wait_for_state, MockNet};

#[tokio::test]
async fn full_call_runs_ring_answer_hang_up() {
    let relay = LocalRelay::new();
    let net = MockNet::new();
    let mut alice = client(&relay, &net, "Alice").await;
    let mut bob = client(&relay, &net, "Bob").await;

    bob.session.place_call(&alice.id).await.unwrap();
    assert_eq!(bob.session.call_state().await, CallState::Dialing);

    wait_for_state(&alice.session, CallState::Ringing).await;
    assert_eq!(
        alice.session.caller_display_name().await.as_deref(),
        Some("Bob")
    );
    assert!(
        saw_event(&mut alice.events, |e| matches!(
            e,
            SessionEvent::IncomingCall { display_name, .. } if display_name == "Bob"
        ))
        .await
    );

    alice.session.answer_call().await.unwrap();
    wait_for_state(&alice.session, CallState::Connected).await;
    wait_for_state(&bob.session, CallState::Connected).await;

    assert!(
        saw_event(&mut alice.events, |e| matches!(
            e,
            SessionEvent::RemoteStreamAvailable
        ))
        .await
    );
    assert!(
        saw_event(&mut bob.events, |e| matches!(
            e,
            SessionEvent::RemoteStreamAvailable
        ))
        .await
    );

    bob.session.hang_up().await.unwrap();
    wait_for_state(&bob.session, CallState::Idle).await;
    wait_for_state(&alice.session, CallState::Idle).await;
    assert_eq!(net.live_endpoints(), 0);
}

#[tokio::test]
async fn newer_invite_replaces_the_pending_caller() {
    let relay = LocalRelay::new();
    let net = MockNet::new();
    let alice = client(&relay, &net, "Alice").await;
    let bob = client(&relay, &net, "Bob").await;
    let carol = client(&relay, &net, "Carol").await;

    bob.session.place_call(&alice.id).await.unwrap();
    wait_for_state(&alice.session, CallState::Ringing).await;
    assert_eq!(
        alice.session.caller_display_name().await.as_deref(),
        Some("Bob")
    );

    carol.session.place_call(&alice.id).await.unwrap();
    let mut replaced = false;
    for _ in 0..100 {
        if alice.session.caller_display_name().await.as_deref() == Some("Carol") {
            replaced = true;
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert!(replaced, "pending caller was not replaced");
    assert_eq!(alice.session.call_state().await, CallState::Ringing);

    // Answering now connects to the latest caller.
    alice.session.answer_call().await.unwrap();
    wait_for_state(&alice.session, CallState::Connected).await;
    wait_for_state(&carol.session, CallState::Connected).await;
    assert_eq!(
        alice.session.caller_display_name().await.as_deref(),
        Some("Carol")
    );
    assert_eq!(bob.session.call_state().await, CallState::Dialing);
}

#[tokio::test]
async fn invites_while_busy_are_dropped() {
    let relay = LocalRelay::new();
    let net = MockNet::new();
    let alice = client(&relay, &net, "Alice").await;
    let bob = client(&relay, &net, "Bob").await;
    let carol = client(&relay, &net, "Carol").await;

    bob.session.place_call(&alice.id).await.unwrap();
    wait_for_state(&alice.session, CallState::Ringing).await;
    alice.session.answer_call().await.unwrap();
    wait_for_state(&bob.session, CallState::Connected).await;

    carol.session.place_call(&alice.id).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(alice.session.call_state().await, CallState::Connected);
    assert_eq!(
        alice.session.caller_display_name().await.as_deref(),
        Some("Bob")
    );
    assert_eq!(carol.session.call_state().await, CallState::Dialing);
}

#[tokio::test]
async fn answering_after_the_caller_hung_up_fails_cleanly() {
    let relay = LocalRelay::new();
    let net = MockNet::new();
    let alice = client(&relay, &net, "Alice").await;
    let bob = client(&relay, &net, "Bob").await;

    bob.session.place_call(&alice.id).await.unwrap();
    wait_for_state(&alice.session, CallState::Ringing).await;

    // The caller gives up before the invite is answered.
    bob.session.hang_up().await.unwrap();
    assert_eq!(bob.session.call_state().await, CallState::Idle);

    let err = alice.session.answer_call().await.unwrap_err();
    assert!(matches!(err, Error::PeerNegotiation(_)), "got {err:?}");
    assert_eq!(alice.session.call_state().await, CallState::Idle);
    assert_eq!(bob.session.call_state().await, CallState::Idle);
    assert_eq!(net.live_endpoints(), 0);
}

#[tokio::test]
async fn stale_accept_is_ignored() {
    let relay = LocalRelay::new();
    let net = MockNet::new();
    let bob = client(&relay, &net, "Bob").await;

    bob.session.place_call(&"nobody".to_string()).await.unwrap();
    assert_eq!(bob.session.call_state().await, CallState::Dialing);

    // An accept carrying an attempt tag that is not the live one.
    let forged = relay.channel();
    forged.connect().await.unwrap();
    forged
        .send(ClientMessage::CallAccept(CallAccept {
            signal_payload: SignalPayload::new("deadbeef".into(), "stale-blob".into()),
            to_id: bob.id.clone(),
        }))
        .await
        .unwrap();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(bob.session.call_state().await, CallState::Dialing);
    bob.session.hang_up().await.unwrap();
}

#[tokio::test]
async fn failed_negotiation_on_answer_returns_to_idle() {
    let relay = LocalRelay::new();
    let net = MockNet::new();
    let alice = client(&relay, &net, "Alice").await;

    let forger = relay.channel();
    let forger_id = forger.connect().await.unwrap();
    forger
        .send(ClientMessage::CallInvite(CallInvite {
            target_id: alice.id.clone(),
            signal_payload: SignalPayload::new("deadbeef".into(), "no-such-blob".into()),
            from_id: forger_id,
            display_name: "Mallory".into(),
        }))
        .await
        .unwrap();

    wait_for_state(&alice.session, CallState::Ringing).await;
    let err = alice.session.answer_call().await.unwrap_err();
    assert!(matches!(err, Error::PeerNegotiation(_)), "got {err:?}");
    assert_eq!(alice.session.call_state().await, CallState::Idle);
    assert_eq!(net.live_endpoints(), 0);
}

#[tokio::test]
async fn call_operations_reject_the_wrong_state() {
    let relay = LocalRelay::new();
    let net = MockNet::new();
    let alice = client(&relay, &net, "Alice").await;
    let bob = client(&relay, &net, "Bob").await;

    // Answering with nothing ringing.
    let err = alice.session.answer_call().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }), "got {err:?}");

    // Dialing twice.
    bob.session.place_call(&alice.id).await.unwrap();
    let err = bob.session.place_call(&alice.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }), "got {err:?}");

    // Hanging up is valid from any state.
    bob.session.hang_up().await.unwrap();
    bob.session.hang_up().await.unwrap();
    assert_eq!(bob.session.call_state().await, CallState::Idle);
    bob.session.place_call(&alice.id).await.unwrap();
}

#[tokio::test]
async fn media_denial_disables_calls_but_not_ringing() {
    let relay = LocalRelay::new();
    let net = MockNet::new();
    let mut denied = denied_client(&relay, &net).await;
    let bob = client(&relay, &net, "Bob").await;

    assert!(!denied.session.local_stream_ready().await);
    assert!(
        saw_event(&mut denied.events, |e| matches!(
            e,
            SessionEvent::MediaFailed(_)
        ))
        .await
    );

    let err = denied.session.place_call(&bob.id).await.unwrap_err();
    assert!(matches!(err, Error::MediaAcquisition(_)), "got {err:?}");
    let err = denied.session.toggle_mic().await.unwrap_err();
    assert!(matches!(err, Error::MediaAcquisition(_)), "got {err:?}");
    let err = denied.session.start_recording().await.unwrap_err();
    assert!(
        matches!(err, Error::RecordingPrecondition(_)),
        "got {err:?}"
    );

    // Incoming invites still ring; only answering needs local media.
    bob.session.place_call(&denied.id).await.unwrap();
    wait_for_state(&denied.session, CallState::Ringing).await;
    let err = denied.session.answer_call().await.unwrap_err();
    assert!(matches!(err, Error::MediaAcquisition(_)), "got {err:?}");
    assert_eq!(denied.session.call_state().await, CallState::Ringing);
}

#[tokio::test]
async fn unanswered_dial_times_out_to_idle() {
    let relay = LocalRelay::new();
    let net = MockNet::new();
    let config = SessionConfig {
        display_name: "Bob".into(),
        dial_timeout: Some(Duration::from_millis(50)),
        ..SessionConfig::default()
    };
    let mut bob = client_with_config(&relay, &net, config).await;

    bob.session.place_call(&"nobody".to_string()).await.unwrap();
    assert_eq!(bob.session.call_state().await, CallState::Dialing);

    wait_for_state(&bob.session, CallState::Idle).await;
    assert!(
        saw_event(&mut bob.events, |e| matches!(
            e,
            SessionEvent::CallFailed(reason) if reason == "call not answered"
        ))
        .await
    );
    assert_eq!(net.live_endpoints(), 0);
}

#[tokio::test]
async fn session_ids_are_distinct_and_announced() {
    let relay = LocalRelay::new();
    let net = MockNet::new();
    let mut alice = client(&relay, &net, "Alice").await;
    let bob = client(&relay, &net, "Bob").await;

    assert_ne!(alice.id, bob.id);
    let announced = Arc::new(std::sync::Mutex::new(None));
    let seen = Arc::clone(&announced);
    assert!(
        saw_event(&mut alice.events, move |e| {
            if let SessionEvent::IdAssigned(id) = e {
                *seen.lock().unwrap() = Some(id.clone());
                true
            } else {
                false
            }
        })
        .await
    );
    assert_eq!(announced.lock().unwrap().as_ref(), Some(&alice.id));
}
