//! The per-session turn pipeline.
//!
//! Each inbound audio chunk is one turn:
//!
//! ```text
//! materialize -> transcribe -> echo(transcript) -> generate
//!   -> echo(transcript + reply) -> [synthesize -> archive -> send audio] -> release
//! ```
//!
//! Turns within a session run strictly one after another: the next chunk is
//! not read until the current turn has finished or aborted. Transcription and
//! synthesis failures abort only the turn; a failed send ends the session.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use voxrelay_core::error::TransportError;
use voxrelay_core::protocol::{ControlMessage, TurnMessage};
use voxrelay_media::{Archive, EphemeralChunk};

use crate::state::{Engines, GatewayState};

/// A frame headed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Structured JSON message, sent as a text frame.
    Json(String),
    /// Synthesized WAV audio, sent as a binary frame.
    Audio(Vec<u8>),
}

/// A frame received from the client, already stripped of transport details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Audio(Vec<u8>),
    Text(String),
    Close,
}

/// Where a session's outbound frames go.
#[async_trait]
pub trait TurnSink: Send {
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError>;

    /// Send a close frame and flush. Called at most once per session.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Identity of the turn being processed.
#[derive(Debug, Clone)]
pub struct TurnContext<'a> {
    pub session_id: &'a str,
    pub turn: u64,
    pub voice: &'a str,
}

/// How a turn ended, when the session survives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed {
        audio_sent: bool,
        fallback_reply: bool,
    },
    /// The chunk could not be written to scratch storage.
    MaterializeFailed,
    TranscriptionFailed,
    /// Transcript and reply were delivered; no audio followed.
    SynthesisFailed,
}

impl TurnOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::MaterializeFailed => "materialize_failed",
            Self::TranscriptionFailed => "transcription_failed",
            Self::SynthesisFailed => "synthesis_failed",
        }
    }
}

/// Why a session's turn loop stopped.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client sent a close frame.
    ClientClosed,
    /// The inbound stream ended without a close frame.
    StreamEnded,
    Transport(TransportError),
}

/// Per-session mutable settings.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub voice: String,
    pub turns: u64,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            voice: voice.into(),
            turns: 0,
        }
    }
}

pub struct Pipeline {
    engines: Engines,
    archive: Archive,
    scratch_dir: PathBuf,
    turns: Arc<AtomicU64>,
}

impl Pipeline {
    pub fn new(engines: Engines, archive: Archive, scratch_dir: PathBuf) -> Self {
        Self {
            engines,
            archive,
            scratch_dir,
            turns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build a pipeline whose turns count towards the gateway-wide total.
    pub fn from_state(state: &GatewayState) -> Self {
        Self {
            turns: state.turns_total.clone(),
            ..Self::new(
                state.engines.clone(),
                state.archive.clone(),
                state.scratch_dir.clone(),
            )
        }
    }

    /// Turns started through this pipeline's counter.
    pub fn turns_started(&self) -> u64 {
        self.turns.load(Ordering::SeqCst)
    }

    /// Run one turn. `Err` means the connection is unusable.
    pub async fn run_turn<S: TurnSink + ?Sized>(
        &self,
        sink: &mut S,
        ctx: &TurnContext<'_>,
        audio: Vec<u8>,
    ) -> Result<TurnOutcome, TransportError> {
        let started = Instant::now();
        let bytes = audio.len();
        self.turns.fetch_add(1, Ordering::SeqCst);

        let result = match EphemeralChunk::materialize(&self.scratch_dir, audio).await {
            Ok(chunk) => {
                let result = self.process(sink, ctx, &chunk).await;
                // Release runs on every path that returns; an unwinding or
                // cancelled turn drops the chunk, which deletes the file as well.
                let _ = chunk.release().await;
                result
            }
            Err(e) => {
                error!(session_id = ctx.session_id, turn = ctx.turn, %e, "Failed to materialize chunk");
                Ok(TurnOutcome::MaterializeFailed)
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => {
                info!(
                    session_id = ctx.session_id,
                    turn = ctx.turn,
                    bytes,
                    elapsed_ms,
                    outcome = outcome.label(),
                    "Turn finished"
                );
                #[cfg(feature = "metrics")]
                crate::metrics::record_turn(outcome.label(), started.elapsed().as_secs_f64());
            }
            Err(e) => {
                warn!(session_id = ctx.session_id, turn = ctx.turn, elapsed_ms, %e, "Turn aborted by transport");
            }
        }
        result
    }

    async fn process<S: TurnSink + ?Sized>(
        &self,
        sink: &mut S,
        ctx: &TurnContext<'_>,
        chunk: &EphemeralChunk,
    ) -> Result<TurnOutcome, TransportError> {
        let transcript = match self.engines.transcriber.transcribe(chunk.path()).await {
            Ok(text) => text,
            Err(e) => {
                error!(session_id = ctx.session_id, turn = ctx.turn, %e, "Transcription failed");
                return Ok(TurnOutcome::TranscriptionFailed);
            }
        };
        info!(session_id = ctx.session_id, turn = ctx.turn, %transcript, "Transcribed");

        sink.send(Outbound::Json(TurnMessage::transcript(&transcript).to_json()))
            .await?;

        let reply = self.engines.generator.generate(&transcript).await;
        info!(
            session_id = ctx.session_id,
            turn = ctx.turn,
            reply = %reply.text,
            fallback = reply.fallback,
            "Reply generated"
        );

        sink.send(Outbound::Json(
            TurnMessage::with_reply(&transcript, &reply.text).to_json(),
        ))
        .await?;

        let Some(synthesizer) = &self.engines.synthesizer else {
            return Ok(TurnOutcome::Completed {
                audio_sent: false,
                fallback_reply: reply.fallback,
            });
        };

        let audio = match synthesizer.synthesize(&reply.text, ctx.voice).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(session_id = ctx.session_id, turn = ctx.turn, voice = ctx.voice, %e, "Synthesis failed");
                return Ok(TurnOutcome::SynthesisFailed);
            }
        };

        match self.archive.store(ctx.session_id, ctx.turn, &audio).await {
            Ok(path) => debug!(session_id = ctx.session_id, path = %path.display(), "Reply audio archived"),
            Err(e) => warn!(session_id = ctx.session_id, turn = ctx.turn, %e, "Failed to archive reply audio"),
        }

        sink.send(Outbound::Audio(audio)).await?;

        Ok(TurnOutcome::Completed {
            audio_sent: true,
            fallback_reply: reply.fallback,
        })
    }

    /// Drive turns until the client leaves or the transport breaks.
    pub async fn run_session<St, S>(
        &self,
        session: &mut SessionContext,
        inbound: &mut St,
        sink: &mut S,
    ) -> SessionEnd
    where
        St: Stream<Item = Result<Inbound, TransportError>> + Unpin + Send,
        S: TurnSink + ?Sized,
    {
        loop {
            let Some(next) = inbound.next().await else {
                return SessionEnd::StreamEnded;
            };

            match next {
                Ok(Inbound::Audio(audio)) => {
                    session.turns += 1;
                    let ctx = TurnContext {
                        session_id: &session.session_id,
                        turn: session.turns,
                        voice: &session.voice,
                    };
                    if let Err(e) = self.run_turn(sink, &ctx, audio).await {
                        return SessionEnd::Transport(e);
                    }
                }
                Ok(Inbound::Text(text)) => self.apply_control(session, &text),
                Ok(Inbound::Close) => return SessionEnd::ClientClosed,
                Err(e) => return SessionEnd::Transport(e),
            }
        }
    }

    fn apply_control(&self, session: &mut SessionContext, text: &str) {
        match serde_json::from_str::<ControlMessage>(text) {
            Ok(ControlMessage { voice: Some(voice) }) => {
                info!(session_id = %session.session_id, %voice, "Voice selected");
                session.voice = voice;
            }
            Ok(_) => debug!(session_id = %session.session_id, "Empty control message"),
            Err(e) => debug!(session_id = %session.session_id, %e, "Ignoring non-control text frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use voxrelay_core::error::{SynthesisError, TranscriptionError};
    use voxrelay_media::{Synthesizer, Transcriber};
    use voxrelay_providers::{Generator, Reply, FALLBACK_REPLY};

    use super::*;

    /// JSON frames are recorded parsed, so key order never matters.
    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Read(usize),
        Json(serde_json::Value),
        Audio(Vec<u8>),
        Closed,
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    struct FakeTranscriber {
        script: Mutex<Vec<Result<String, String>>>,
        seen: Mutex<Vec<(PathBuf, bool)>>,
    }

    impl FakeTranscriber {
        fn new(script: Vec<Result<&str, &str>>) -> Arc<Self> {
            let mut script: Vec<Result<String, String>> = script
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(str::to_string))
                .collect();
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
            self.seen
                .lock()
                .unwrap()
                .push((audio_path.to_path_buf(), audio_path.exists()));
            match self.script.lock().unwrap().pop() {
                Some(Ok(text)) => Ok(text),
                Some(Err(msg)) => Err(TranscriptionError::Process(msg)),
                None => Ok(String::new()),
            }
        }

        fn describe(&self) -> String {
            "fake".into()
        }
    }

    struct FakeGenerator {
        reply: String,
        fallback: bool,
        calls: AtomicUsize,
    }

    impl FakeGenerator {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                fallback: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                reply: FALLBACK_REPLY.into(),
                fallback: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn generate(&self, transcript: &str) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Reply {
                text: self.reply.clone(),
                prompt: transcript.to_string(),
                fallback: self.fallback,
            }
        }

        fn model(&self) -> &str {
            "fake"
        }
    }

    struct FakeSynthesizer {
        fail: bool,
        voices: Mutex<Vec<String>>,
    }

    impl FakeSynthesizer {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                voices: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Synthesizer for FakeSynthesizer {
        async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError> {
            self.voices.lock().unwrap().push(voice.to_string());
            if self.fail {
                return Err(SynthesisError::UnknownVoice(voice.into()));
            }
            Ok(format!("WAV:{text}").into_bytes())
        }

        fn describe(&self) -> String {
            "fake".into()
        }
    }

    struct RecordingSink {
        log: Log,
        fail_sends: bool,
    }

    #[async_trait]
    impl TurnSink for RecordingSink {
        async fn send(&mut self, frame: Outbound) -> Result<(), TransportError> {
            if self.fail_sends {
                return Err(TransportError::Closed);
            }
            let event = match frame {
                Outbound::Json(text) => Event::Json(serde_json::from_str(&text).unwrap()),
                Outbound::Audio(bytes) => Event::Audio(bytes),
            };
            self.log.lock().unwrap().push(event);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.log.lock().unwrap().push(Event::Closed);
            Ok(())
        }
    }

    struct Harness {
        pipeline: Pipeline,
        scratch: tempfile::TempDir,
        archive: tempfile::TempDir,
        log: Log,
    }

    impl Harness {
        fn new(
            transcriber: Arc<FakeTranscriber>,
            generator: Arc<FakeGenerator>,
            synthesizer: Option<Arc<FakeSynthesizer>>,
        ) -> Self {
            let scratch = tempfile::tempdir().unwrap();
            let archive = tempfile::tempdir().unwrap();
            let engines = Engines {
                transcriber: transcriber as Arc<dyn Transcriber>,
                generator: generator as Arc<dyn Generator>,
                synthesizer: synthesizer.map(|s| s as Arc<dyn Synthesizer>),
            };
            let pipeline = Pipeline::new(
                engines,
                Archive::new(archive.path()),
                scratch.path().to_path_buf(),
            );
            Self {
                pipeline,
                scratch,
                archive,
                log: Arc::default(),
            }
        }

        fn sink(&self) -> RecordingSink {
            RecordingSink {
                log: self.log.clone(),
                fail_sends: false,
            }
        }

        fn events(&self) -> Vec<Event> {
            self.log.lock().unwrap().clone()
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
        }

        fn archived(&self) -> usize {
            std::fs::read_dir(self.archive.path()).unwrap().count()
        }
    }

    fn json(value: serde_json::Value) -> Event {
        Event::Json(value)
    }

    fn ctx(turn: u64) -> TurnContext<'static> {
        TurnContext {
            session_id: "s1",
            turn,
            voice: "woman",
        }
    }

    fn scripted(log: Log, frames: Vec<Inbound>) -> impl Stream<Item = Result<Inbound, TransportError>> + Unpin + Send {
        futures::stream::iter(frames.into_iter().enumerate()).map(move |(i, frame)| {
            log.lock().unwrap().push(Event::Read(i));
            Ok(frame)
        })
    }

    #[tokio::test]
    async fn test_happy_path_with_synthesis() {
        let stt = FakeTranscriber::new(vec![Ok("hello")]);
        let h = Harness::new(stt.clone(), FakeGenerator::replying("hi there"), Some(FakeSynthesizer::new(false)));
        let mut sink = h.sink();

        let outcome = h.pipeline.run_turn(&mut sink, &ctx(1), b"RIFF".to_vec()).await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                audio_sent: true,
                fallback_reply: false
            }
        );
        assert_eq!(
            h.events(),
            vec![
                json(serde_json::json!({"transcription": "hello"})),
                json(serde_json::json!({"transcription": "hello", "llama": "hi there"})),
                Event::Audio(b"WAV:hi there".to_vec()),
            ]
        );
        // The engine saw a real file, which is gone afterwards.
        let seen = stt.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1);
        assert!(!seen[0].0.exists());
        assert!(h.scratch_is_empty());
        assert_eq!(h.archived(), 1);
    }

    #[tokio::test]
    async fn test_without_synthesizer_no_audio_is_sent() {
        let h = Harness::new(FakeTranscriber::new(vec![Ok("hello")]), FakeGenerator::replying("hi there"), None);
        let mut sink = h.sink();

        let outcome = h.pipeline.run_turn(&mut sink, &ctx(1), vec![1, 2]).await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                audio_sent: false,
                fallback_reply: false
            }
        );
        let events = h.events();
        assert_eq!(events.len(), 2);
        assert!(!events.iter().any(|e| matches!(e, Event::Audio(_))));
        assert!(h.scratch_is_empty());
        assert_eq!(h.archived(), 0);
    }

    #[tokio::test]
    async fn test_transcription_failure_skips_generation() {
        let llm = FakeGenerator::replying("unused");
        let h = Harness::new(FakeTranscriber::new(vec![Err("decoder exploded")]), llm.clone(), Some(FakeSynthesizer::new(false)));
        let mut sink = h.sink();

        let outcome = h.pipeline.run_turn(&mut sink, &ctx(1), vec![0; 8]).await.unwrap();

        assert_eq!(outcome, TurnOutcome::TranscriptionFailed);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
        assert!(h.events().is_empty());
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_empty_transcript_is_a_normal_turn() {
        let llm = FakeGenerator::replying("did you say something?");
        let h = Harness::new(FakeTranscriber::new(vec![Ok("")]), llm.clone(), None);
        let mut sink = h.sink();

        h.pipeline.run_turn(&mut sink, &ctx(1), vec![0; 8]).await.unwrap();

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.events()[0], json(serde_json::json!({"transcription": ""})));
    }

    #[tokio::test]
    async fn test_generation_fallback_still_produces_reply_message() {
        let h = Harness::new(FakeTranscriber::new(vec![Ok("hello")]), FakeGenerator::broken(), None);
        let mut sink = h.sink();

        let outcome = h.pipeline.run_turn(&mut sink, &ctx(1), vec![0; 8]).await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                audio_sent: false,
                fallback_reply: true
            }
        );
        assert_eq!(
            h.events()[1],
            json(serde_json::json!({"transcription": "hello", "llama": FALLBACK_REPLY}))
        );
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_turn_scoped() {
        let h = Harness::new(FakeTranscriber::new(vec![Ok("hello")]), FakeGenerator::replying("hi"), Some(FakeSynthesizer::new(true)));
        let mut sink = h.sink();

        let outcome = h.pipeline.run_turn(&mut sink, &ctx(1), vec![0; 8]).await.unwrap();

        assert_eq!(outcome, TurnOutcome::SynthesisFailed);
        assert_eq!(h.events().len(), 2);
        assert!(h.scratch_is_empty());
        assert_eq!(h.archived(), 0);
    }

    #[tokio::test]
    async fn test_archive_failure_does_not_block_delivery() {
        let scratch = tempfile::tempdir().unwrap();
        let blocker = scratch.path().join("archive-is-a-file");
        std::fs::write(&blocker, b"x").unwrap();
        let engines = Engines {
            transcriber: FakeTranscriber::new(vec![Ok("hello")]),
            generator: FakeGenerator::replying("hi"),
            synthesizer: Some(FakeSynthesizer::new(false)),
        };
        let pipeline = Pipeline::new(engines, Archive::new(blocker.join("sub")), scratch.path().join("chunks"));
        let log: Log = Arc::default();
        let mut sink = RecordingSink { log: log.clone(), fail_sends: false };

        let outcome = pipeline.run_turn(&mut sink, &ctx(1), vec![0; 8]).await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                audio_sent: true,
                fallback_reply: false
            }
        );
        assert!(matches!(log.lock().unwrap().last(), Some(Event::Audio(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_still_releases_chunk() {
        let h = Harness::new(FakeTranscriber::new(vec![Ok("hello")]), FakeGenerator::replying("hi"), None);
        let mut sink = RecordingSink { log: h.log.clone(), fail_sends: true };

        let result = h.pipeline.run_turn(&mut sink, &ctx(1), vec![0; 8]).await;

        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_turn_releases_chunk() {
        struct Hanging;

        #[async_trait]
        impl Transcriber for Hanging {
            async fn transcribe(&self, _audio_path: &Path) -> Result<String, TranscriptionError> {
                futures::future::pending().await
            }

            fn describe(&self) -> String {
                "hanging".into()
            }
        }

        let scratch = tempfile::tempdir().unwrap();
        let archive = tempfile::tempdir().unwrap();
        let engines = Engines {
            transcriber: Arc::new(Hanging),
            generator: FakeGenerator::replying("hi"),
            synthesizer: None,
        };
        let pipeline = Pipeline::new(engines, Archive::new(archive.path()), scratch.path().to_path_buf());
        let log: Log = Arc::default();
        let mut sink = RecordingSink { log, fail_sends: false };

        let c = ctx(1);
        let turn = pipeline.run_turn(&mut sink, &c, vec![0; 8]);
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(200), turn).await;

        assert!(timed_out.is_err());
        assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_materialize_failure_is_turn_scoped() {
        let root = tempfile::tempdir().unwrap();
        let archive = tempfile::tempdir().unwrap();
        let blocker = root.path().join("scratch-is-a-file");
        std::fs::write(&blocker, b"x").unwrap();
        let stt = FakeTranscriber::new(vec![Ok("second")]);
        let engines = Engines {
            transcriber: stt.clone(),
            generator: FakeGenerator::replying("ok"),
            synthesizer: None,
        };
        let pipeline = Pipeline::new(engines, Archive::new(archive.path()), blocker.join("chunks"));
        let log: Log = Arc::default();
        let mut sink = RecordingSink { log: log.clone(), fail_sends: false };

        let outcome = pipeline.run_turn(&mut sink, &ctx(1), vec![0; 8]).await.unwrap();
        assert_eq!(outcome, TurnOutcome::MaterializeFailed);
        assert!(log.lock().unwrap().is_empty());
        assert!(stt.seen.lock().unwrap().is_empty());

        // Reading the second frame clears the obstruction; that turn must go through.
        let reads = log.clone();
        let mut inbound = futures::stream::iter(
            vec![Inbound::Audio(vec![1]), Inbound::Audio(vec![2])]
                .into_iter()
                .enumerate(),
        )
        .map(move |(i, frame)| {
            if i == 1 {
                std::fs::remove_file(&blocker).unwrap();
            }
            reads.lock().unwrap().push(Event::Read(i));
            Ok(frame)
        });
        let mut session = SessionContext::new("s1", "woman");

        let end = pipeline.run_session(&mut session, &mut inbound, &mut sink).await;

        assert!(matches!(end, SessionEnd::StreamEnded));
        assert_eq!(session.turns, 2);
        assert_eq!(stt.seen.lock().unwrap().len(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Event::Read(0),
                Event::Read(1),
                json(serde_json::json!({"transcription": "second"})),
                json(serde_json::json!({"transcription": "second", "llama": "ok"})),
            ]
        );
        assert_eq!(pipeline.turns_started(), 3);
    }

    #[tokio::test]
    async fn test_turns_count_towards_gateway_total_while_live() {
        use voxrelay_core::config::{Config, StorageConfig};

        let scratch = tempfile::tempdir().unwrap();
        let archive = tempfile::tempdir().unwrap();
        let config = Config {
            storage: Some(StorageConfig {
                voices_dir: None,
                archive_dir: Some(archive.path().display().to_string()),
                scratch_dir: Some(scratch.path().display().to_string()),
            }),
            ..Config::default()
        };
        let engines = Engines {
            transcriber: FakeTranscriber::new(vec![Ok("a"), Err("bad chunk")]),
            generator: FakeGenerator::replying("ok"),
            synthesizer: None,
        };
        let state = GatewayState::new(Arc::new(config), engines);
        let pipeline = Pipeline::from_state(&state);
        let mut sink = RecordingSink { log: Arc::default(), fail_sends: false };

        pipeline.run_turn(&mut sink, &ctx(1), vec![0; 8]).await.unwrap();
        assert_eq!(state.turns_total(), 1);

        // Failed turns count too, and a second pipeline shares the total.
        Pipeline::from_state(&state)
            .run_turn(&mut sink, &ctx(2), vec![0; 8])
            .await
            .unwrap();
        assert_eq!(state.turns_total(), 2);
        assert_eq!(pipeline.turns_started(), 2);
    }

    #[tokio::test]
    async fn test_session_processes_turns_sequentially() {
        let h = Harness::new(
            FakeTranscriber::new(vec![Ok("one"), Ok("two")]),
            FakeGenerator::replying("ok"),
            None,
        );
        let mut sink = h.sink();
        let mut inbound = scripted(
            h.log.clone(),
            vec![Inbound::Audio(vec![1]), Inbound::Audio(vec![2]), Inbound::Close],
        );
        let mut session = SessionContext::new("s1", "woman");

        let end = h.pipeline.run_session(&mut session, &mut inbound, &mut sink).await;

        assert!(matches!(end, SessionEnd::ClientClosed));
        assert_eq!(session.turns, 2);
        assert_eq!(
            h.events(),
            vec![
                Event::Read(0),
                json(serde_json::json!({"transcription": "one"})),
                json(serde_json::json!({"transcription": "one", "llama": "ok"})),
                Event::Read(1),
                json(serde_json::json!({"transcription": "two"})),
                json(serde_json::json!({"transcription": "two", "llama": "ok"})),
                Event::Read(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_session_survives_failed_turn() {
        let llm = FakeGenerator::replying("ok");
        let h = Harness::new(
            FakeTranscriber::new(vec![Err("bad chunk"), Ok("second")]),
            llm.clone(),
            None,
        );
        let mut sink = h.sink();
        let mut inbound = scripted(
            h.log.clone(),
            vec![Inbound::Audio(vec![1]), Inbound::Audio(vec![2])],
        );
        let mut session = SessionContext::new("s1", "woman");

        let end = h.pipeline.run_session(&mut session, &mut inbound, &mut sink).await;

        assert!(matches!(end, SessionEnd::StreamEnded));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert!(h
            .events()
            .contains(&json(serde_json::json!({"transcription": "second", "llama": "ok"}))));
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_voice_control_message() {
        let tts = FakeSynthesizer::new(false);
        let h = Harness::new(
            FakeTranscriber::new(vec![Ok("a"), Ok("b")]),
            FakeGenerator::replying("ok"),
            Some(tts.clone()),
        );
        let mut sink = h.sink();
        let mut inbound = scripted(
            h.log.clone(),
            vec![
                Inbound::Audio(vec![1]),
                Inbound::Text(r#"{"voice": "man"}"#.into()),
                Inbound::Text("not json".into()),
                Inbound::Audio(vec![2]),
            ],
        );
        let mut session = SessionContext::new("s1", "woman");

        h.pipeline.run_session(&mut session, &mut inbound, &mut sink).await;

        assert_eq!(session.voice, "man");
        assert_eq!(*tts.voices.lock().unwrap(), vec!["woman", "man"]);
    }

    #[tokio::test]
    async fn test_session_ends_on_transport_error() {
        let h = Harness::new(FakeTranscriber::new(vec![Ok("a")]), FakeGenerator::replying("ok"), None);
        let mut sink = h.sink();
        let mut inbound = futures::stream::iter(vec![
            Err(TransportError::Send("reset by peer".into())),
            Ok(Inbound::Audio(vec![1])),
        ]);
        let mut session = SessionContext::new("s1", "woman");

        let end = h.pipeline.run_session(&mut session, &mut inbound, &mut sink).await;

        assert!(matches!(end, SessionEnd::Transport(TransportError::Send(_))));
        assert_eq!(session.turns, 0);
    }
}
