//! Query types
//!
//! A [`RawRequest`] is what a caller submits. The input normalizer turns it
//! into a [`Query`], which is the canonical record carried through every
//! pipeline stage.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Default number of primary matches
pub const DEFAULT_MAX_RESULTS: usize = 5;
/// Upper bound on primary matches a caller may request
pub const MAX_RESULTS_LIMIT: usize = 50;
pub const DEFAULT_LANGUAGE: &str = "en";

/// Kind of input the caller submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Text,
    Audio,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::Text => write!(f, "text"),
            InputKind::Audio => write!(f, "audio"),
        }
    }
}

/// Where caller audio lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioRef {
    /// Audio file on local disk
    File(PathBuf),
    /// Audio bytes uploaded with the request
    Inline(Vec<u8>),
}

/// Request as submitted by a caller
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest {
    pub text: Option<String>,
    pub audio: Option<AudioRef>,
    /// Language hint for transcription
    pub language: Option<String>,
    /// Run similarity expansion after primary retrieval
    pub include_similar: bool,
    /// Treat a skipped or failed similarity expansion as a degradation
    pub require_similar: bool,
    /// Requested number of primary matches
    pub max_results: Option<usize>,
}

impl Default for RawRequest {
    fn default() -> Self {
        Self {
            text: None,
            audio: None,
            language: None,
            include_similar: true,
            require_similar: false,
            max_results: None,
        }
    }
}

impl RawRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn audio(audio: AudioRef) -> Self {
        Self {
            audio: Some(audio),
            ..Default::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn without_similar(mut self) -> Self {
        self.include_similar = false;
        self
    }

    pub fn requiring_similar(mut self) -> Self {
        self.include_similar = true;
        self.require_similar = true;
        self
    }
}

/// Audio bytes loaded into memory, keyed by a content signature
///
/// Cloning shares the underlying buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioClip {
    data: Arc<[u8]>,
    signature: String,
}

impl AudioClip {
    pub fn new(data: Vec<u8>) -> Self {
        let signature = blake3::hash(&data).to_hex().to_string();
        Self {
            data: data.into(),
            signature,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Content hash of the audio bytes
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioClip")
            .field("bytes", &self.data.len())
            .field("signature", &self.signature)
            .finish()
    }
}

// Bytes are never echoed back, only their size and signature.
impl Serialize for AudioClip {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AudioClip", 2)?;
        state.serialize_field("bytes", &self.data.len())?;
        state.serialize_field("signature", &self.signature)?;
        state.end()
    }
}

/// Per-request retrieval options, resolved from the raw request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueryOptions {
    pub top_k: usize,
    pub include_similar: bool,
    pub require_similar: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_MAX_RESULTS,
            include_similar: true,
            require_similar: false,
        }
    }
}

/// Canonical query record
///
/// Exactly one of `text` or `audio` is set at creation. After transcription
/// `text` holds the transcript and `audio` is kept for reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub id: Uuid,
    pub raw_kind: InputKind,
    pub text: Option<String>,
    pub audio: Option<AudioClip>,
    pub language: String,
    pub received_at: DateTime<Utc>,
    pub options: QueryOptions,
}

impl Query {
    pub fn from_text(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_kind: InputKind::Text,
            text: Some(text.into()),
            audio: None,
            language: language.into(),
            received_at: Utc::now(),
            options: QueryOptions::default(),
        }
    }

    pub fn from_audio(audio: AudioClip, language: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_kind: InputKind::Audio,
            text: None,
            audio: Some(audio),
            language: language.into(),
            received_at: Utc::now(),
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Text to retrieve against, if resolved
    pub fn resolved_text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn needs_transcription(&self) -> bool {
        self.raw_kind == InputKind::Audio && self.text.is_none()
    }

    /// Attach the transcript of an audio query
    pub fn resolve_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }
}
