use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    app::AppState,
    auth::Credentials,
    error::TransportError,
    protocol::{Inbound, Outbound},
    session::Session,
};

/// Headers carrying credentials on the upgrade request.
pub const DEVICE_ID_HEADER: &str = "device-id";
pub const API_KEY_HEADER: &str = "api-key";

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    device_id: Option<String>,
    api_key: Option<String>,
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Credentials presented with the upgrade request. Headers win over query
/// parameters; without a device id the first frame must carry them.
fn connect_credentials(headers: &HeaderMap, params: ConnectParams) -> Option<Credentials> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).and_then(non_blank);
    let device_id = header(DEVICE_ID_HEADER).or_else(|| params.device_id.as_deref().and_then(non_blank))?;
    let api_key = header(API_KEY_HEADER).or_else(|| params.api_key.as_deref().and_then(non_blank));
    Some(Credentials { device_id, api_key })
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    let credentials = connect_credentials(&headers, params);
    ws.on_upgrade(move |socket| handle_socket(socket, state, credentials))
}

async fn handle_socket(socket: WebSocket, state: AppState, credentials: Option<Credentials>) {
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.pipeline.config.outbound_queue);

    let session = Session::new(Arc::clone(&state.pipeline));
    let flow = session.flow();
    let metrics = state.pipeline.metrics.clone();

    // single writer: audio, notices and the close frame all go through here
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let (message, last) = match frame {
                Outbound::Audio(unit) => {
                    // queued before an abort
                    if !flow.is_current(&unit) {
                        debug!(bytes = unit.bytes.len(), "dropping stale audio unit");
                        metrics.stale_unit_dropped();
                        continue;
                    }
                    (Message::Binary(unit.bytes.into()), false)
                }
                Outbound::Event(event) => (Message::Text(event.to_json().into()), false),
                Outbound::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };
            if let Err(e) = sink.send(message).await {
                debug!("websocket send failed: {e}");
                return;
            }
            if last {
                return;
            }
        }
        let _ = sink.close().await;
    });

    let inbound = stream.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(Inbound::Text(text.as_str().to_owned())),
            Ok(Message::Binary(bytes)) => Some(Inbound::Binary(bytes.to_vec())),
            Ok(Message::Close(_)) => Some(Inbound::Closed(TransportError::Closed)),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(e) => Some(Inbound::Closed(TransportError::Io(e.to_string()))),
        }
    });

    session.run(credentials, Box::pin(inbound), tx).await;

    if let Err(e) = writer.await {
        warn!("websocket writer task failed: {e}");
    }
}
