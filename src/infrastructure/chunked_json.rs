// Chunked newline-delimited JSON streaming of store updates
use crate::application::parameter_state::ParameterState;
use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use axum::response::IntoResponse;
use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::Stream;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Create a chunked response with one JSON document per line
pub fn chunked_json_stream<S>(stream: S) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = Arc<ParameterState>> + Send + 'static,
{
    let byte_stream = stream.map(|state| serialize_chunk(&state));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(byte_stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn serialize_chunk(state: &ParameterState) -> Result<Bytes, std::io::Error> {
    let json = serde_json::to_vec(state)?;
    let mut chunk = BytesMut::with_capacity(json.len() + 1);
    chunk.put_slice(&json);
    chunk.put_u8(b'\n');
    Ok(chunk.freeze())
}

/// Stream the current snapshots first, then every committed update
pub fn stream_from_receiver(
    initial: Vec<Arc<ParameterState>>,
    mut rx: broadcast::Receiver<Arc<ParameterState>>,
) -> impl IntoResponse {
    let stream = async_stream::stream! {
        for state in initial {
            yield state;
        }
        loop {
            match rx.recv().await {
                Ok(state) => yield state,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Update stream subscriber lagged, skipped {} states", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    match chunked_json_stream(stream) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}
