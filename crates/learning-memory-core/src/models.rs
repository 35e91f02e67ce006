//! Core data models used throughout Learning Memory.
//!
//! These types represent the learnings that flow through the write
//! pipeline and the records that come back out of a store at read time.
//!
//! # Enumerations
//!
//! | Type | Values | Wire form |
//! |------|--------|-----------|
//! | [`LearningType`] | seven outcome kinds | `SCREAMING_SNAKE_CASE` |
//! | [`Confidence`] | high, medium, low | lowercase |
//! | [`Scope`] | project, global | `PROJECT` / `GLOBAL` |
//! | [`EmbeddingStatus`] | pending | lowercase |

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Returned when a string does not name a member of one of the closed
/// enumerations in this module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// What kind of outcome a learning records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningType {
    FailedApproach,
    WorkingSolution,
    UserPreference,
    CodebasePattern,
    ArchitecturalDecision,
    ErrorFix,
    OpenThread,
}

impl LearningType {
    pub const ALL: [LearningType; 7] = [
        LearningType::FailedApproach,
        LearningType::WorkingSolution,
        LearningType::UserPreference,
        LearningType::CodebasePattern,
        LearningType::ArchitecturalDecision,
        LearningType::ErrorFix,
        LearningType::OpenThread,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LearningType::FailedApproach => "FAILED_APPROACH",
            LearningType::WorkingSolution => "WORKING_SOLUTION",
            LearningType::UserPreference => "USER_PREFERENCE",
            LearningType::CodebasePattern => "CODEBASE_PATTERN",
            LearningType::ArchitecturalDecision => "ARCHITECTURAL_DECISION",
            LearningType::ErrorFix => "ERROR_FIX",
            LearningType::OpenThread => "OPEN_THREAD",
        }
    }
}

impl fmt::Display for LearningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        LearningType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseEnumError::new("learning type", s))
    }
}

/// How strongly the author of a learning stands behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            _ => Err(ParseEnumError::new("confidence", s)),
        }
    }
}

/// Whether a learning applies to one project or across projects.
///
/// Assigned once at write time and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scope {
    Project,
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Project => "PROJECT",
            Scope::Global => "GLOBAL",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROJECT" => Ok(Scope::Project),
            "GLOBAL" => Ok(Scope::Global),
            _ => Err(ParseEnumError::new("scope", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
}

fn default_record_type() -> String {
    "session_learning".to_string()
}

/// Keys with a dedicated field on [`LearningMetadata`]. Anything else found
/// in a stored metadata object is moved under `extensions` on read.
const KNOWN_METADATA_KEYS: &[&str] = &[
    "type",
    "session_id",
    "timestamp",
    "learning_type",
    "context",
    "tags",
    "confidence",
    "embedding_status",
    "embedding_error",
    "primary_error",
    "extensions",
];

/// Metadata attached to every memory record.
///
/// Serialized as a flat JSON object. Unknown top-level keys are rejected
/// by `Deserialize`; use [`LearningMetadata::from_stored`] to read rows
/// written by other tools, which routes unknown keys into `extensions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LearningMetadata {
    #[serde(rename = "type", default = "default_record_type")]
    pub kind: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_type: Option<LearningType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_status: Option<EmbeddingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_error: Option<String>,
    /// Error captured from the primary backend when this record was
    /// written to the secondary instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

impl LearningMetadata {
    pub fn new(session_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: default_record_type(),
            session_id: session_id.into(),
            timestamp,
            learning_type: None,
            context: None,
            tags: Vec::new(),
            confidence: None,
            embedding_status: None,
            embedding_error: None,
            primary_error: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn mark_pending(&mut self, reason: impl Into<String>) {
        self.embedding_status = Some(EmbeddingStatus::Pending);
        self.embedding_error = Some(reason.into());
    }

    pub fn clear_pending(&mut self) {
        self.embedding_status = None;
        self.embedding_error = None;
    }

    pub fn is_pending(&self) -> bool {
        self.embedding_status == Some(EmbeddingStatus::Pending)
    }

    /// Decode metadata read back from a store.
    ///
    /// Known keys keep their strict typing. Any other top-level key is
    /// moved into `extensions` instead of failing the whole row.
    pub fn from_stored(value: Value) -> Result<Self, serde_json::Error> {
        let Value::Object(mut map) = value else {
            return serde_json::from_value(value);
        };

        let unknown: Vec<String> = map
            .keys()
            .filter(|k| !KNOWN_METADATA_KEYS.contains(&k.as_str()))
            .cloned()
            .collect();

        if !unknown.is_empty() {
            let mut extensions = match map.remove("extensions") {
                Some(Value::Object(existing)) => existing,
                _ => serde_json::Map::new(),
            };
            for key in unknown {
                if let Some(v) = map.remove(&key) {
                    extensions.insert(key, v);
                }
            }
            map.insert("extensions".to_string(), Value::Object(extensions));
        }

        serde_json::from_value(Value::Object(map))
    }
}

/// Caller-supplied options for a store call, everything except the
/// session and the content itself.
///
/// This is also what the retry queue persists as an entry's metadata, so
/// a replay runs with the same classification inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_type: Option<LearningType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<PathBuf>,
    /// Explicit scope; bypasses the classifier when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

/// A single request to record a learning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub session_id: String,
    pub content: String,
    #[serde(flatten)]
    pub options: LearningOptions,
}

impl StoreRequest {
    pub fn new(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            content: content.into(),
            options: LearningOptions::default(),
        }
    }

    pub fn with_learning_type(mut self, learning_type: LearningType) -> Self {
        self.options.learning_type = Some(learning_type);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.options.context = Some(context.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.options.confidence = Some(confidence);
        self
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.project_dir = Some(dir.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.options.scope = Some(scope);
        self
    }
}

/// A fully-prepared record handed to a store for insertion.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub content: String,
    pub metadata: LearningMetadata,
    /// Already normalized to the configured dimension, or `None` when
    /// the record is written without a vector.
    pub embedding: Option<Vec<f32>>,
    pub scope: Scope,
    /// Set only for `PROJECT`-scoped records.
    pub project_id: Option<String>,
}

/// A record returned from a nearest-neighbor or text query.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryHit {
    pub id: String,
    pub content: String,
    pub metadata: LearningMetadata,
    pub scope: Scope,
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Cosine similarity for vector queries; term-overlap ratio in
    /// `[0.0, 1.0]` for text queries.
    pub similarity: f32,
}

impl MemoryHit {
    pub fn learning_type(&self) -> Option<LearningType> {
        self.metadata.learning_type
    }
}

/// Derive the stable project identifier for an absolute project path.
///
/// The first 24 hex characters of the SHA-256 of the path string.
pub fn project_id(absolute_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(absolute_path.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..24].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learning_type_parse_is_case_insensitive() {
        assert_eq!(
            "working_solution".parse::<LearningType>().unwrap(),
            LearningType::WorkingSolution
        );
        assert_eq!(
            "FAILED_APPROACH".parse::<LearningType>().unwrap(),
            LearningType::FailedApproach
        );
        let err = "MAYBE".parse::<LearningType>().unwrap_err();
        assert_eq!(err.kind, "learning type");
    }

    #[test]
    fn test_scope_wire_form() {
        assert_eq!(serde_json::to_string(&Scope::Global).unwrap(), "\"GLOBAL\"");
        assert_eq!("project".parse::<Scope>().unwrap(), Scope::Project);
    }

    #[test]
    fn test_metadata_rejects_unknown_keys() {
        let raw = serde_json::json!({
            "type": "session_learning",
            "session_id": "s1",
            "timestamp": "2025-01-01T00:00:00Z",
            "mystery": 1
        });
        assert!(serde_json::from_value::<LearningMetadata>(raw).is_err());
    }

    #[test]
    fn test_from_stored_routes_unknown_keys_to_extensions() {
        let raw = serde_json::json!({
            "type": "session_learning",
            "session_id": "s1",
            "timestamp": "2025-01-01T00:00:00Z",
            "learning_type": "ERROR_FIX",
            "postgres_error": "connection refused"
        });
        let meta = LearningMetadata::from_stored(raw).unwrap();
        assert_eq!(meta.learning_type, Some(LearningType::ErrorFix));
        assert_eq!(
            meta.extensions.get("postgres_error"),
            Some(&Value::String("connection refused".to_string()))
        );
    }

    #[test]
    fn test_metadata_omits_empty_optionals() {
        let ts = "2025-01-01T00:00:00Z".parse().unwrap();
        let meta = LearningMetadata::new("s1", ts);
        let value = serde_json::to_value(&meta).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["type"], "session_learning");
    }

    #[test]
    fn test_pending_round_trip() {
        let mut meta = LearningMetadata::new("s1", Utc::now());
        meta.mark_pending("provider down");
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["embedding_status"], "pending");
        assert_eq!(value["embedding_error"], "provider down");
        meta.clear_pending();
        assert!(!meta.is_pending());
    }

    #[test]
    fn test_project_id_is_stable_24_hex() {
        let a = project_id("/home/dev/project");
        let b = project_id("/home/dev/project");
        let c = project_id("/home/dev/other");
        assert_eq!(a.len(), 24);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_request_options_flatten() {
        let req = StoreRequest::new("s1", "Use JWT")
            .with_learning_type(LearningType::WorkingSolution)
            .with_tags(["auth"]);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["learning_type"], "WORKING_SOLUTION");
        assert_eq!(value["tags"][0], "auth");
    }
}
