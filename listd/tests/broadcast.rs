use std::{net::SocketAddr, time::Duration};

use listd::{
    codec::Message,
    connector,
    dispatcher::{Dispatcher, Registration},
    registry::{features_message, welcome_message},
};
use tokio::{sync::mpsc, time::timeout};

const SESSIONS: usize = 25;

fn peer(n: usize) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 10_000 + n as u16))
}

#[tokio::test]
async fn every_session_gets_exactly_one_copy() {
    let (downstream, upstream) = connector::channel(4);
    let (dispatcher, handle) = Dispatcher::new(downstream, 4);
    dispatcher.spawn();

    let mut receivers = Vec::with_capacity(SESSIONS);
    for n in 0..SESSIONS {
        let (outbound, rx) = mpsc::unbounded_channel();
        handle
            .register(Registration {
                id: handle.next_session_id(),
                peer: peer(n),
                outbound,
            })
            .expect("dispatcher running");
        receivers.push(rx);
    }

    let message = Message::new("RES").arg("M");
    upstream
        .responses
        .send(message.clone())
        .expect("dispatcher running");
    // Sentinel marks the end of the broadcast stream for each session.
    upstream
        .responses
        .send(Message::new("RES").arg("end"))
        .expect("dispatcher running");

    for rx in &mut receivers {
        let mut seen = Vec::new();
        loop {
            let next = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("message within timeout")
                .expect("outbound still open");
            if next == Message::new("RES").arg("end") {
                break;
            }
            seen.push(next);
        }
        assert_eq!(seen, vec![welcome_message(), features_message(), message.clone()]);
    }
}

#[tokio::test]
async fn deregistered_session_receives_nothing_further() {
    let (downstream, upstream) = connector::channel(4);
    let (dispatcher, handle) = Dispatcher::new(downstream, 4);
    dispatcher.spawn();

    let gone = handle.next_session_id();
    let (gone_tx, mut gone_rx) = mpsc::unbounded_channel();
    handle
        .register(Registration { id: gone, peer: peer(0), outbound: gone_tx })
        .expect("dispatcher running");
    let (kept_tx, mut kept_rx) = mpsc::unbounded_channel();
    handle
        .register(Registration {
            id: handle.next_session_id(),
            peer: peer(1),
            outbound: kept_tx,
        })
        .expect("dispatcher running");

    handle.deregister(gone);
    upstream
        .responses
        .send(Message::new("RES").arg("late"))
        .expect("dispatcher running");

    let mut gone_messages = Vec::new();
    while let Some(message) = timeout(Duration::from_secs(1), gone_rx.recv())
        .await
        .expect("channel closes within timeout")
    {
        gone_messages.push(message);
    }
    assert_eq!(gone_messages, vec![welcome_message(), features_message()]);

    for expected in [welcome_message(), features_message(), Message::new("RES").arg("late")] {
        let received = timeout(Duration::from_secs(1), kept_rx.recv())
            .await
            .expect("message within timeout");
        assert_eq!(received, Some(expected));
    }
}
