//! Sequential failover across resolved candidates.
//!
//! Buffered requests may try every candidate. Streaming requests may fail
//! over only until the first 2xx upstream response: at that point the
//! stream is committed, the response head goes to the caller, and the
//! remaining candidates are abandoned whatever happens next.

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use std::io;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::accounting::RequestAudit;
use super::convert::{downstream_response, upstream_request_body};
use super::resolver::Candidate;
use super::stream::{ChannelSink, FrameSink, StreamMode, StreamState, StreamTranslator};
use super::upstream::UpstreamClient;
use crate::errors::{AppError, AttemptFailure, FailureStage};
use crate::models::{InboundRequest, TokenUsage};

/// Frames buffered between the pump and the response body.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Serve `request` from the first candidate that succeeds.
pub async fn serve(
    client: &UpstreamClient,
    request: &InboundRequest,
    candidates: &[Candidate],
    audit: RequestAudit,
) -> Result<Response, AppError> {
    if request.is_stream() {
        serve_stream(client, request, candidates, audit).await
    } else {
        serve_buffered(client, request, candidates, audit).await
    }
}

async fn serve_buffered(
    client: &UpstreamClient,
    request: &InboundRequest,
    candidates: &[Candidate],
    mut audit: RequestAudit,
) -> Result<Response, AppError> {
    let mut last_failure = None;

    for (attempt, candidate) in candidates.iter().enumerate() {
        audit.attempting(candidate);
        tracing::debug!(
            request_id = %audit.request_id(),
            attempt = attempt + 1,
            channel_id = candidate.channel_id(),
            upstream_model = %candidate.upstream_model,
            "trying candidate"
        );

        match attempt_buffered(client, request, candidate).await {
            Ok((body, usage)) => {
                audit.attempt_finished(None);
                audit.succeed(usage);
                return Ok(Json(body).into_response());
            }
            Err(failure) => {
                audit.attempt_finished(Some(&failure));
                tracing::warn!(
                    request_id = %audit.request_id(),
                    channel_id = candidate.channel_id(),
                    code = %failure.code(),
                    "candidate failed: {}",
                    failure.message
                );
                last_failure = Some(failure);
            }
        }
    }

    Err(exhausted(audit, last_failure))
}

async fn attempt_buffered(
    client: &UpstreamClient,
    request: &InboundRequest,
    candidate: &Candidate,
) -> Result<(serde_json::Value, TokenUsage), AttemptFailure> {
    let body = outbound_body(request, candidate)?;
    let resp = client.send(&candidate.target, body, false).await?;

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| AttemptFailure::transport(FailureStage::ReadResponse, None, &e))?;

    downstream_response(request.protocol(), candidate.target.protocol, &bytes, request.model())
        .map_err(|e| AttemptFailure::new(FailureStage::ParseResponse, None, e.to_string()))
}

async fn serve_stream(
    client: &UpstreamClient,
    request: &InboundRequest,
    candidates: &[Candidate],
    mut audit: RequestAudit,
) -> Result<Response, AppError> {
    let mut last_failure = None;

    for (attempt, candidate) in candidates.iter().enumerate() {
        audit.attempting(candidate);
        tracing::debug!(
            request_id = %audit.request_id(),
            attempt = attempt + 1,
            channel_id = candidate.channel_id(),
            upstream_model = %candidate.upstream_model,
            "trying streaming candidate"
        );

        let opened = match outbound_body(request, candidate) {
            Ok(body) => client.send(&candidate.target, body, true).await,
            Err(failure) => Err(failure),
        };

        match opened {
            Ok(upstream) => {
                audit.attempt_finished(None);
                return Ok(commit(upstream, request, candidate, audit));
            }
            Err(failure) => {
                audit.attempt_finished(Some(&failure));
                tracing::warn!(
                    request_id = %audit.request_id(),
                    channel_id = candidate.channel_id(),
                    code = %failure.code(),
                    "streaming candidate failed before commit: {}",
                    failure.message
                );
                last_failure = Some(failure);
            }
        }
    }

    Err(exhausted(audit, last_failure))
}

/// Point of no return: send the SSE head and hand the body to the pump.
fn commit(upstream: reqwest::Response, request: &InboundRequest, candidate: &Candidate, audit: RequestAudit) -> Response {
    let mut state = StreamState::new(audit.request_id());
    state.commit();

    let mode = StreamMode::select(request.protocol(), candidate.target.protocol);
    let translator = StreamTranslator::new(mode, request.model(), state);
    tracing::debug!(request_id = %audit.request_id(), ?mode, "stream committed");

    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(pump(upstream, translator, ChannelSink::new(tx), audit));

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("connection", HeaderValue::from_static("keep-alive"));
    response
}

/// Copy a committed upstream stream to the caller, translating on the way.
///
/// Every frame is flushed as soon as it is produced. Any failure from here
/// on ends the body cleanly and is recorded against the request; no other
/// candidate is tried.
pub(crate) async fn pump<S: FrameSink>(
    mut upstream: reqwest::Response,
    mut translator: StreamTranslator,
    mut sink: S,
    audit: RequestAudit,
) {
    let outcome = loop {
        let next = tokio::select! {
            _ = sink.closed() => None,
            chunk = upstream.chunk() => Some(chunk),
        };

        let (frames, done) = match next {
            None => {
                break Err(AttemptFailure::new(
                    FailureStage::ClientClosed,
                    None,
                    "client disconnected mid-stream",
                ))
            }
            Some(Ok(Some(chunk))) => match translator.feed(&chunk) {
                Ok(frames) => (frames, false),
                Err(e) => break Err(AttemptFailure::new(FailureStage::StreamInterrupted, None, e.to_string())),
            },
            Some(Ok(None)) => (translator.finish(), true),
            Some(Err(e)) => {
                break Err(AttemptFailure::new(
                    FailureStage::StreamInterrupted,
                    None,
                    e.to_string(),
                ))
            }
        };

        if let Err(e) = deliver(&mut sink, frames).await {
            break Err(AttemptFailure::new(FailureStage::ClientClosed, None, e.to_string()));
        }
        if done {
            break Ok(());
        }
    };

    let usage = translator.state().usage();
    match outcome {
        Ok(()) => audit.succeed(usage),
        Err(failure) => {
            tracing::warn!(
                request_id = %audit.request_id(),
                code = %failure.code(),
                "stream ended early: {}",
                failure.message
            );
            audit.fail(failure, usage);
        }
    }
}

async fn deliver<S: FrameSink>(sink: &mut S, frames: Vec<Bytes>) -> io::Result<()> {
    for frame in frames {
        sink.write(frame).await?;
        sink.flush().await?;
    }
    Ok(())
}

fn outbound_body(request: &InboundRequest, candidate: &Candidate) -> Result<Vec<u8>, AttemptFailure> {
    upstream_request_body(request, candidate.target.protocol, &candidate.upstream_model)
        .map_err(|e| AttemptFailure::new(FailureStage::MarshalRequest, None, e.to_string()))
}

fn exhausted(audit: RequestAudit, last_failure: Option<AttemptFailure>) -> AppError {
    let last = last_failure
        .unwrap_or_else(|| AttemptFailure::new(FailureStage::HttpRequest, None, "no upstream candidates"));
    let model = audit.display_model().to_string();
    tracing::error!(
        request_id = %audit.request_id(),
        model = %model,
        code = %last.code(),
        "all candidates failed"
    );
    audit.fail(last.clone(), TokenUsage::default());
    AppError::AllChannelsExhausted { model, last }
}
