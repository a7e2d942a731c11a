//! Server-Sent Events (SSE) streaming of inference fragments.
//!
//! - Each fragment is sent as `data: {json}\n\n`, in generation order
//! - A failure is sent as an `error` event and ends the stream
//! - Generation stops when the client disconnects: axum drops the stream,
//!   which drops the fragment stream and cancels the call

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use hub_engine::Result;
use hub_session::InferFragment;

use crate::error::ServerError;

pub fn stream_fragments<S>(fragments: S) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>
where
    S: Stream<Item = Result<InferFragment>> + Send + 'static,
{
    let events = fragments.map(|item| {
        let event = match item {
            Ok(fragment) => Event::default()
                .json_data(&fragment)
                .unwrap_or_else(|err| error_event(&ServerError::InvalidRequest(err.to_string()))),
            Err(err) => error_event(&ServerError::from(err)),
        };
        Ok(event)
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn error_event(err: &ServerError) -> Event {
    Event::default().event("error").data(err.body().to_string())
}
