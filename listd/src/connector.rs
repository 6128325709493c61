//! Channels to the downstream request processor.
//!
//! The server only forwards requests into [`Downstream::requests`] and relays
//! whatever comes back on [`Downstream::responses`]. The processor on the other
//! end holds the matching [`Upstream`].

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::codec::Message;

/// Server side of the connector link.
pub struct Downstream {
    pub requests: mpsc::Sender<Message>,
    pub responses: mpsc::UnboundedReceiver<Message>,
}

/// Processor side of the connector link.
pub struct Upstream {
    pub requests: mpsc::Receiver<Message>,
    pub responses: mpsc::UnboundedSender<Message>,
}

/// Creates a linked pair. Requests are bounded by `capacity`; responses are
/// unbounded so a processor never blocks while the server waits on it.
pub fn channel(capacity: usize) -> (Downstream, Upstream) {
    let (request_tx, request_rx) = mpsc::channel(capacity);
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    (
        Downstream {
            requests: request_tx,
            responses: response_rx,
        },
        Upstream {
            requests: request_rx,
            responses: response_tx,
        },
    )
}

/// Spawns a loopback processor answering every `REQ …` with `RES …`.
///
/// Other commands are echoed unchanged. Stops when the request side closes or
/// nobody listens for responses any more.
pub fn spawn_echo(upstream: Upstream) -> JoinHandle<()> {
    let Upstream {
        mut requests,
        responses,
    } = upstream;

    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let response = echo_response(request);
            debug!(%response, "echo connector replying");
            if responses.send(response).is_err() {
                break;
            }
        }
    })
}

fn echo_response(request: Message) -> Message {
    if request.word() != "REQ" {
        return request;
    }
    request
        .args()
        .iter()
        .fold(Message::new("RES"), |response, arg| response.arg(arg.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_turns_requests_into_responses() {
        let (mut downstream, upstream) = channel(4);
        let echo = spawn_echo(upstream);

        downstream
            .requests
            .send(Message::new("REQ").arg("X"))
            .await
            .expect("send request");
        downstream
            .requests
            .send(Message::new("PING"))
            .await
            .expect("send request");

        assert_eq!(
            downstream.responses.recv().await,
            Some(Message::new("RES").arg("X"))
        );
        assert_eq!(downstream.responses.recv().await, Some(Message::new("PING")));

        drop(downstream);
        echo.await.expect("echo task should finish");
    }
}
