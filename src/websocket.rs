//! # WebSocket Streaming Session
//!
//! Real-time AMD over a bidirectional stream. A dialer connects right as a
//! call is answered, pushes binary PCM frames, and receives JSON verdicts
//! until the session reaches a decision.
//!
//! ## Session State Machine:
//! `AwaitingAudio` → `Buffering` → `Classifying` → `Done`
//!
//! - A binary chunk moves the session into `Buffering`; once the buffered
//!   duration reaches the configured threshold, classification starts.
//! - Silence on the wire for the idle-timeout interval forces a
//!   classification of whatever is buffered, tagged `reason = "timeout"`,
//!   and the session closes after that verdict regardless of confidence.
//! - A confident verdict (above the threshold) closes the session; an
//!   unconfident one clears the buffer and returns to `Buffering`.
//! - A disconnect in any state just drops the buffer; an in-flight
//!   classification is abandoned rather than cancelled.
//!
//! ## Message Format:
//! - **Client → Server**: Binary PCM frames (16-bit, mono, configured rate)
//! - **Server → Client**: JSON verdicts
//!   `{"label": "human"|"voicemail"|"unknown", "confidence": 0.93, "duration_ms": 3000, "reason": "timeout"?}`

use crate::audio::AudioBuffer;
use crate::detection::Verdict;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the actor checks for wire silence.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Lifecycle of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no audio received yet
    AwaitingAudio,
    /// Accumulating chunks below the classification threshold
    Buffering,
    /// A classification is running on the buffered audio
    Classifying,
    /// Terminal: a final verdict was emitted or the client vanished
    Done,
}

/// What to do with the session after a verdict goes out.
#[derive(Debug, PartialEq, Eq)]
enum VerdictOutcome {
    CloseSession,
    ContinueBuffering,
}

/// Enough buffered audio to justify running the classifier.
fn should_classify(duration_ms: u64, threshold_ms: u32) -> bool {
    duration_ms >= threshold_ms as u64
}

/// Terminal-verdict rule: timeout-forced classifications always end the
/// session; otherwise only a confidence strictly above the threshold does.
fn decide_after_verdict(confidence: f32, threshold: f32, timeout_forced: bool) -> VerdictOutcome {
    if timeout_forced || confidence > threshold {
        VerdictOutcome::CloseSession
    } else {
        VerdictOutcome::ContinueBuffering
    }
}

/// Verdict payload sent to the streaming client.
#[derive(Debug, Serialize)]
struct StreamVerdict {
    label: &'static str,
    confidence: f32,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

/// Internal actor message carrying a finished classification back from the
/// spawned task.
#[derive(Message)]
#[rtype(result = "()")]
struct ClassificationComplete {
    verdict: Verdict,
    duration_ms: u64,
    timeout_forced: bool,
}

/// WebSocket actor for one streaming AMD session.
///
/// Each connection owns a fresh audio buffer; the detector and the metrics
/// live in the shared application state.
pub struct AmdWebSocket {
    session_id: String,
    call_sid: String,
    state: SessionState,
    buffer: Arc<AudioBuffer>,
    app_state: AppState,
    buffer_threshold_ms: u32,
    idle_timeout: Duration,
    confidence_threshold: f32,
    last_chunk: Instant,
}

impl AmdWebSocket {
    pub fn new(app_state: AppState, call_sid: String) -> Self {
        let config = app_state.get_config();
        let buffer = Arc::new(AudioBuffer::new(
            config.audio.sample_rate,
            config.audio.channels,
        ));

        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            call_sid,
            state: SessionState::AwaitingAudio,
            buffer,
            app_state,
            buffer_threshold_ms: config.audio.buffer_threshold_ms,
            idle_timeout: Duration::from_secs(config.audio.idle_timeout_secs),
            confidence_threshold: config.detection.confidence_threshold,
            last_chunk: Instant::now(),
        }
    }

    /// Handle one binary audio frame from the client.
    fn handle_audio_chunk(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        if self.state == SessionState::Done {
            return;
        }

        if let Err(err) = self.buffer.append(data) {
            self.send_error(ctx, &err);
            return;
        }

        self.last_chunk = Instant::now();

        if self.state == SessionState::AwaitingAudio {
            self.state = SessionState::Buffering;
            debug!(session_id = %self.session_id, "First audio chunk received");
        }

        let duration_ms = self.buffer.duration_ms();
        debug!(
            session_id = %self.session_id,
            chunk_bytes = data.len(),
            duration_ms,
            "Audio chunk buffered"
        );

        if self.state == SessionState::Buffering
            && should_classify(duration_ms, self.buffer_threshold_ms)
        {
            info!(
                session_id = %self.session_id,
                duration_ms, "Buffer threshold reached"
            );
            self.start_classification(ctx, false);
        }
    }

    /// Kick off a classification of the buffered audio.
    ///
    /// The inference runs in a spawned task so other sessions keep flowing;
    /// the result comes back through the actor mailbox.
    fn start_classification(&mut self, ctx: &mut ws::WebsocketContext<Self>, timeout_forced: bool) {
        let samples = self.buffer.to_sample_array();
        if samples.is_empty() {
            return;
        }

        self.state = SessionState::Classifying;

        let duration_ms = self.buffer.duration_ms();
        let sample_rate = self.buffer.sample_rate();
        let detector = self.app_state.detector.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            let verdict = detector.classify_buffered(&samples, sample_rate).await;
            addr.do_send(ClassificationComplete {
                verdict,
                duration_ms,
                timeout_forced,
            });
        });
    }

    /// Wire-silence check, driven by the interval timer.
    fn check_idle(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let idle = self.last_chunk.elapsed() >= self.idle_timeout;
        if !idle {
            return;
        }

        match self.state {
            SessionState::Buffering if !self.buffer.is_empty() => {
                info!(
                    session_id = %self.session_id,
                    duration_ms = self.buffer.duration_ms(),
                    "Idle timeout, classifying buffered audio"
                );
                self.start_classification(ctx, true);
            }
            SessionState::AwaitingAudio | SessionState::Buffering => {
                // Nothing buffered and nothing arriving; close instead of
                // waiting forever.
                info!(
                    session_id = %self.session_id,
                    "Idle timeout with no buffered audio, closing"
                );
                self.state = SessionState::Done;
                ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Normal)));
                ctx.stop();
            }
            _ => {}
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        let payload = serde_json::json!({
            "error": message,
            "label": "unknown",
            "confidence": 0.0
        });
        ctx.text(payload.to_string());
        warn!(session_id = %self.session_id, error = %message, "WebSocket session error");
    }
}

impl Actor for AmdWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            session_id = %self.session_id,
            call_sid = %self.call_sid,
            sample_rate = self.buffer.sample_rate(),
            channels = self.buffer.channels(),
            "WebSocket AMD stream started"
        );
        self.app_state.increment_active_sessions();

        ctx.run_interval(IDLE_CHECK_INTERVAL, |act, ctx| {
            if act.state != SessionState::Done {
                act.check_idle(ctx);
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Best-effort cleanup: the buffer dies with the actor and any
        // in-flight classification result is simply never delivered.
        info!(
            session_id = %self.session_id,
            call_sid = %self.call_sid,
            "WebSocket AMD stream closed"
        );
        self.app_state.decrement_active_sessions();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AmdWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.handle_audio_chunk(&data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(_)) => {
                // Inbound protocol is binary-only.
                warn!(session_id = %self.session_id, "Ignoring unexpected text frame");
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, ?reason, "Client closed stream");
                self.state = SessionState::Done;
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "WebSocket protocol error");
                self.state = SessionState::Done;
                ctx.stop();
            }
        }
    }
}

impl Handler<ClassificationComplete> for AmdWebSocket {
    type Result = ();

    fn handle(&mut self, msg: ClassificationComplete, ctx: &mut Self::Context) {
        if self.state == SessionState::Done {
            return;
        }

        let payload = StreamVerdict {
            label: msg.verdict.label.as_str(),
            confidence: msg.verdict.confidence,
            duration_ms: msg.duration_ms,
            reason: msg.timeout_forced.then_some("timeout"),
        };

        if let Ok(json) = serde_json::to_string(&payload) {
            ctx.text(json);
        }

        info!(
            session_id = %self.session_id,
            label = %msg.verdict.label,
            confidence = msg.verdict.confidence,
            timeout_forced = msg.timeout_forced,
            "Verdict sent"
        );

        match decide_after_verdict(
            msg.verdict.confidence,
            self.confidence_threshold,
            msg.timeout_forced,
        ) {
            VerdictOutcome::CloseSession => {
                self.state = SessionState::Done;
                ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Normal)));
                ctx.stop();
            }
            VerdictOutcome::ContinueBuffering => {
                self.buffer.clear();
                self.state = SessionState::Buffering;
                self.last_chunk = Instant::now();
            }
        }
    }
}

/// ## Endpoint: `WS /api/v1/amd/stream`
///
/// Upgrades the HTTP request and hands the connection to a fresh session
/// actor. The call identifier rides in on the `X-Call-SID` header.
pub async fn amd_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let call_sid = req
        .headers()
        .get("X-Call-SID")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("websocket_unknown")
        .to_string();

    let session = AmdWebSocket::new(app_state.get_ref().clone(), call_sid);
    ws::start(session, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_gate() {
        // 562ms of buffered audio against a 3000ms threshold stays buffering.
        assert!(!should_classify(562, 3000));
        assert!(should_classify(3000, 3000));
        assert!(should_classify(4500, 3000));
    }

    #[test]
    fn test_confident_verdict_closes_session() {
        assert_eq!(
            decide_after_verdict(0.95, 0.7, false),
            VerdictOutcome::CloseSession
        );
    }

    #[test]
    fn test_unconfident_verdict_continues() {
        assert_eq!(
            decide_after_verdict(0.6, 0.7, false),
            VerdictOutcome::ContinueBuffering
        );
        // Exactly at the threshold is not "exceeds".
        assert_eq!(
            decide_after_verdict(0.7, 0.7, false),
            VerdictOutcome::ContinueBuffering
        );
    }

    #[test]
    fn test_timeout_always_closes() {
        assert_eq!(
            decide_after_verdict(0.1, 0.7, true),
            VerdictOutcome::CloseSession
        );
    }

    #[test]
    fn test_stream_verdict_serialization() {
        let verdict = StreamVerdict {
            label: "voicemail",
            confidence: 0.93,
            duration_ms: 3000,
            reason: None,
        };
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("\"label\":\"voicemail\""));
        assert!(json.contains("\"duration_ms\":3000"));
        assert!(!json.contains("reason"));

        let timed_out = StreamVerdict {
            label: "unknown",
            confidence: 0.4,
            duration_ms: 500,
            reason: Some("timeout"),
        };
        let json = serde_json::to_string(&timed_out).unwrap();
        assert!(json.contains("\"reason\":\"timeout\""));
    }
}
