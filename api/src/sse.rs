use crate::common::ResponseEvent;
use crate::common::ResponseStream;
use crate::error::ApiError;
use crate::event_decoder::decode_event;
use crate::event_decoder::is_terminal;
use codex_client::StreamResponse;
use eventsource_stream::Eventsource;
use futures::Stream;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;
use tracing::trace;

pub(crate) fn spawn_response_stream(
    stream_response: StreamResponse,
    idle_timeout: Duration,
) -> ResponseStream {
    let (tx_event, rx_event) = mpsc::channel::<Result<ResponseEvent, ApiError>>(1600);
    tokio::spawn(async move {
        process_responses_sse(stream_response.bytes, tx_event, idle_timeout).await;
    });
    ResponseStream { rx_event }
}

pub(crate) async fn process_responses_sse<S>(
    stream: S,
    tx_event: mpsc::Sender<Result<ResponseEvent, ApiError>>,
    idle_timeout: Duration,
) where
    S: Stream<Item = Result<bytes::Bytes, codex_client::TransportError>> + Unpin,
{
    let mut stream = stream.eventsource();
    let mut terminated = false;

    loop {
        let response = timeout(idle_timeout, stream.next()).await;
        let sse = match response {
            Ok(Some(Ok(sse))) => sse,
            Ok(Some(Err(err))) => {
                let _ = tx_event.send(Err(ApiError::Stream(err.to_string()))).await;
                return;
            }
            Ok(None) => {
                if !terminated {
                    let _ = tx_event
                        .send(Err(ApiError::Stream(
                            "stream ended without terminal completion event".to_string(),
                        )))
                        .await;
                }
                return;
            }
            Err(_) => {
                let _ = tx_event
                    .send(Err(ApiError::Stream("idle timeout waiting for sse".into())))
                    .await;
                return;
            }
        };

        if sse.data.trim().is_empty() {
            continue;
        }

        trace!("sse event: {}", sse.data);

        match decode_event(&sse.data) {
            Some(Ok(event)) => {
                terminated = is_terminal(&event);
                let is_error = matches!(event, ResponseEvent::Error { .. });
                let _ = tx_event.send(Ok(event)).await;
                if terminated || is_error {
                    return;
                }
            }
            Some(Err(err)) => {
                let _ = tx_event.send(Err(err)).await;
                return;
            }
            None => {
                debug!("dropping unrecognized sse event: {}", sse.data);
            }
        }
    }
}
