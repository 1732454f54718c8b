//! Media pipeline pieces: STT and TTS adapters, WAV helpers, and the two
//! kinds of on-disk audio storage (per-turn scratch chunks, reply archive).

pub mod archive;
pub mod ephemeral;
pub mod stt;
pub mod tts;
pub mod wav;

pub use archive::Archive;
pub use ephemeral::EphemeralChunk;
pub use stt::{build_transcriber, RemoteWhisper, Transcriber, WhisperCommand};
pub use tts::{Synthesizer, VoiceLibrary, XttsSynthesizer, SAMPLE_RATE};
