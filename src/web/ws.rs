use std::{fmt, net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, error, warn};

use crate::{
    app_state::AppState,
    core::errors::ProtocolError,
    session::{Session, outbound::outbound_channel},
};

pub async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state, peer))
}

async fn serve_socket(socket: WebSocket, state: Arc<AppState>, peer: SocketAddr) {
    let (sink, stream) = socket.split();
    run_connection(stream, sink, state, Some(peer)).await;
}

/// Drives one connection: a writer task drains the session's outbound lanes
/// into `sink` while this task feeds inbound frames to the session in
/// arrival order. Returns once the session is closed.
async fn run_connection<R, W, E>(
    mut stream: R,
    mut sink: W,
    state: Arc<AppState>,
    peer: Option<SocketAddr>,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    W: Sink<Message> + Unpin + Send + 'static,
    E: fmt::Display,
{
    let (outbound, mut lanes) = outbound_channel();
    let mut session = Session::open(state, outbound, peer).await;
    let session_id = session.id();

    let mut writer = tokio::spawn(async move {
        while let Some(message) = lanes.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    error!("failed to encode outbound message: {err}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut writer_done = false;
    loop {
        let inbound = tokio::select! {
            inbound = stream.next() => inbound,
            _ = &mut writer => {
                writer_done = true;
                debug!(session_id = %session_id, "socket writer stopped");
                break;
            }
        };

        let message = match inbound {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                warn!(session_id = %session_id, "websocket read failed: {err}");
                break;
            }
            None => break,
        };

        let delivered = match message {
            Message::Text(text) => session.on_text(text.as_str()).await,
            Message::Binary(_) => session.on_protocol_error(ProtocolError::Binary),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => Ok(()),
        };
        if delivered.is_err() {
            break;
        }
    }

    session.close().await;
    if !writer_done {
        if let Err(err) = writer.await {
            warn!(session_id = %session_id, "socket writer ended abnormally: {err}");
        }
    }
}
