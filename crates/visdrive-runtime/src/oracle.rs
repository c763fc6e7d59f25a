//! Decision oracle interface and its OpenAI-compatible vision client.
//!
//! The control loop only knows the [`DecisionOracle`] trait: hand over a
//! frame and a fixed [`OraclePrompt`], get back a [`RawOracleResponse`] (or
//! an [`OracleError`]).  How the answer is obtained is the client's business.
//! [`VisionOracle`] supports two strategies against
//! `{base_url}/v1/chat/completions`:
//!
//! | Strategy | Calls | Candidate comes from |
//! |---|---|---|
//! | [`OracleStrategy::Structured`] | one, `response_format = json_object`, 300 tokens | `navigation_command` key of the JSON report |
//! | [`OracleStrategy::TwoCall`] | navigation (10 tokens) + description (100 tokens) | the navigation reply text |
//!
//! # Example
//!
//! ```rust,no_run
//! use visdrive_runtime::oracle::{DecisionOracle, OraclePrompt, OracleStrategy, VisionOracle};
//! use visdrive_hal::Frame;
//!
//! # async fn demo() -> Result<(), visdrive_runtime::oracle::OracleError> {
//! let oracle = VisionOracle::new("https://api.openai.com", "gpt-4o")
//!     .with_api_key("sk-...")
//!     .with_strategy(OracleStrategy::Structured);
//! let prompt = OraclePrompt::structured(Default::default());
//! let answer = oracle.classify(&Frame::blank_rgb(64, 48), &prompt).await?;
//! println!("{:?}", answer.candidate);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use visdrive_hal::Frame;
use visdrive_types::{OracleReport, RawOracleResponse, Vocabulary};

use crate::encode::jpeg_data_url;

/// Version stamped on every instruction template in this module.  Bump it
/// whenever template text changes.
pub const PROMPT_VERSION: u32 = 1;

const STRUCTURED_MAX_TOKENS: u32 = 300;
const NAVIGATION_MAX_TOKENS: u32 = 10;
const DESCRIPTION_MAX_TOKENS: u32 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise while asking the oracle for a decision.
#[derive(Error, Debug)]
pub enum OracleError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response could not be interpreted.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// The frame could not be encoded for upload.
    #[error("Frame encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    /// The frame buffer does not match its declared shape.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Instruction templates
// ─────────────────────────────────────────────────────────────────────────────

/// What kind of answer a template asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// A JSON report following [`OracleReport`].
    StructuredReport,
    /// A single direction word.
    CommandWord,
    /// Free text describing the scene.
    SceneDescription,
}

/// A fixed, versioned instruction template.
///
/// The core never builds prompt text dynamically; it picks one of the
/// constructors below once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OraclePrompt {
    version: u32,
    kind: PromptKind,
    vocabulary: Vocabulary,
    text: String,
}

impl OraclePrompt {
    /// Ask for a JSON report with `navigation_command`, `obstacles`,
    /// `path_description`, `confidence_level` and `reasoning`.  The JSON
    /// Schema of [`OracleReport`] is embedded verbatim.
    pub fn structured(vocabulary: Vocabulary) -> Self {
        let schema = serde_json::to_value(schema_for!(OracleReport))
            .unwrap_or(serde_json::Value::Null);
        let words = vocabulary.words().join("/");
        let text = format!(
            "Analyze this image comprehensively. Provide a JSON response with the following keys:\n\
             - navigation_command: A single word ({words})\n\
             - obstacles: List of potential obstacles\n\
             - path_description: Brief description of the navigation environment\n\
             - confidence_level: Your confidence in the navigation command (0-100)\n\
             - reasoning: Brief explanation of why you chose this command\n\n\
             The response must validate against this JSON Schema:\n{schema}"
        );
        Self {
            version: PROMPT_VERSION,
            kind: PromptKind::StructuredReport,
            vocabulary,
            text,
        }
    }

    /// Ask for exactly one word from the motion vocabulary.
    pub fn motion_command() -> Self {
        let vocabulary = Vocabulary::Motion;
        let words = vocabulary.words().join(", ");
        let text = format!(
            "Analyze this image and provide a single-word navigation command: {words}. \
             Consider obstacles, path clarity, and navigation goals. \
             Respond with ONLY the direction word."
        );
        Self {
            version: PROMPT_VERSION,
            kind: PromptKind::CommandWord,
            vocabulary,
            text,
        }
    }

    /// Ask for a short free-text scene description.
    pub fn scene_description() -> Self {
        Self {
            version: PROMPT_VERSION,
            kind: PromptKind::SceneDescription,
            vocabulary: Vocabulary::Full,
            text: "Provide a detailed, concise description of what you see in this image. \
                   Focus on key objects, environment, potential obstacles, and navigation \
                   challenges."
                .to_string(),
        }
    }

    /// The decision template matching `strategy`.
    pub fn for_strategy(strategy: OracleStrategy, vocabulary: Vocabulary) -> Self {
        match strategy {
            OracleStrategy::Structured => Self::structured(vocabulary),
            OracleStrategy::TwoCall => Self::motion_command(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn kind(&self) -> PromptKind {
        self.kind
    }

    /// Words the oracle is told it may answer with.
    pub fn vocabulary(&self) -> Vocabulary {
        self.vocabulary
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Anything that can classify a frame into a (possibly malformed) answer.
///
/// Implementations must not retry forever: the caller bounds every call with
/// a timeout and treats expiry as a failure.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Any transport, encoding or parsing failure.  The safety policy turns
    /// every error into a stop.
    async fn classify(
        &self,
        frame: &Frame,
        prompt: &OraclePrompt,
    ) -> Result<RawOracleResponse, OracleError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

/// `response_format` field requesting a bare JSON object.
#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

impl ChatResponse {
    fn into_content(self) -> Result<String, OracleError> {
        self.choices
            .into_iter()
            .next()
            .ok_or_else(|| OracleError::BadResponse("empty choices array".into()))?
            .message
            .content
            .ok_or_else(|| OracleError::BadResponse("reply has no content".into()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VisionOracle
// ─────────────────────────────────────────────────────────────────────────────

/// How [`VisionOracle`] turns a frame into an answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleStrategy {
    /// One call returning a JSON report.
    #[default]
    Structured,
    /// A command-word call plus a scene-description call; both must succeed.
    TwoCall,
}

/// An async client for an OpenAI-compatible vision chat endpoint.
///
/// Construct once per session and reuse for every cycle.
pub struct VisionOracle {
    base_url: String,
    model: String,
    api_key: Option<String>,
    strategy: OracleStrategy,
    description: OraclePrompt,
    client: reqwest::Client,
}

impl VisionOracle {
    /// Create a client for `base_url` (e.g. `"https://api.openai.com"`)
    /// using `model` (e.g. `"gpt-4o"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            strategy: OracleStrategy::default(),
            description: OraclePrompt::scene_description(),
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, transport
    /// timeouts).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_strategy(mut self, strategy: OracleStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> OracleStrategy {
        self.strategy
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        instruction: &str,
        image_url: &str,
        max_tokens: u32,
        json_object: bool,
    ) -> Result<String, OracleError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![RequestMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: instruction },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url },
                    },
                ],
            }],
            max_tokens,
            response_format: json_object.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: ChatResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response.into_content()
    }
}

#[async_trait]
impl DecisionOracle for VisionOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(
        &self,
        frame: &Frame,
        prompt: &OraclePrompt,
    ) -> Result<RawOracleResponse, OracleError> {
        let image_url = jpeg_data_url(frame)?;
        debug!(
            model = %self.model,
            strategy = ?self.strategy,
            prompt_version = prompt.version(),
            image_bytes = image_url.len(),
            "querying oracle"
        );

        match self.strategy {
            OracleStrategy::Structured => {
                let content = self
                    .chat(prompt.text(), &image_url, STRUCTURED_MAX_TOKENS, true)
                    .await?;
                RawOracleResponse::from_json(&content)
                    .map_err(|e| OracleError::BadResponse(e.to_string()))
            }
            OracleStrategy::TwoCall => {
                let (command, description) = tokio::join!(
                    self.chat(prompt.text(), &image_url, NAVIGATION_MAX_TOKENS, false),
                    self.chat(
                        self.description.text(),
                        &image_url,
                        DESCRIPTION_MAX_TOKENS,
                        false
                    ),
                );
                // Either call failing fails the whole exchange.
                let command = command?;
                let description = description.inspect_err(|e| {
                    warn!(error = %e, "scene description call failed");
                })?;
                let mut response = RawOracleResponse::from_candidate(command.trim());
                let text = description.trim();
                if !text.is_empty() {
                    response.metadata.path_description = Some(text.to_string());
                }
                Ok(response)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn reply(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    /// Minimal HTTP/1.1 stub: answers `connections` requests, choosing the
    /// body with `respond(request_body)`.  Returns the base URL.
    async fn stub_server(
        connections: usize,
        respond: fn(&str) -> (u16, String),
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..connections {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let body = loop {
                        let n = socket.read(&mut chunk).await.unwrap();
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        let text = String::from_utf8_lossy(&buf).to_string();
                        if let Some(split) = text.find("\r\n\r\n") {
                            let head = text[..split].to_ascii_lowercase();
                            let length = head
                                .lines()
                                .find_map(|l| l.strip_prefix("content-length:"))
                                .and_then(|v| v.trim().parse::<usize>().ok())
                                .unwrap_or(0);
                            if buf.len() >= split + 4 + length {
                                break text[split + 4..].to_string();
                            }
                        }
                    };
                    let (status, payload) = respond(&body);
                    let response = format!(
                        "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                        payload.len()
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                    socket.shutdown().await.ok();
                });
            }
        });
        format!("http://{addr}")
    }

    fn oracle(base: String) -> VisionOracle {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        VisionOracle::new(base, "gpt-4o").with_client(client)
    }

    #[test]
    fn structured_prompt_embeds_vocabulary_and_schema() {
        let prompt = OraclePrompt::structured(Vocabulary::Full);
        assert_eq!(prompt.version(), PROMPT_VERSION);
        assert_eq!(prompt.kind(), PromptKind::StructuredReport);
        assert!(prompt.text().contains("forward/backward/left/right/stop"));
        assert!(prompt.text().contains("confidence_level"));
        // The schema title is the report type name.
        assert!(prompt.text().contains("OracleReport"));
    }

    #[test]
    fn motion_prompt_excludes_stop() {
        let prompt = OraclePrompt::motion_command();
        assert_eq!(prompt.vocabulary(), Vocabulary::Motion);
        assert!(prompt.text().contains("forward, backward, left, right"));
        assert!(!prompt.text().contains("stop"));
    }

    #[test]
    fn for_strategy_picks_matching_template() {
        assert_eq!(
            OraclePrompt::for_strategy(OracleStrategy::TwoCall, Vocabulary::Full).kind(),
            PromptKind::CommandWord
        );
        assert_eq!(
            OraclePrompt::for_strategy(OracleStrategy::Structured, Vocabulary::Motion).vocabulary(),
            Vocabulary::Motion
        );
    }

    #[test]
    fn request_body_matches_chat_completions_shape() {
        let body = ChatRequest {
            model: "gpt-4o",
            messages: vec![RequestMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: "look" },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/jpeg;base64,AA==",
                        },
                    },
                ],
            }],
            max_tokens: 300,
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,AA=="
        );
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["max_tokens"], 300);
    }

    #[test]
    fn response_format_is_omitted_for_plain_calls() {
        let body = ChatRequest {
            model: "m",
            messages: Vec::new(),
            max_tokens: 10,
            response_format: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn empty_choices_is_bad_response() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            response.into_content(),
            Err(OracleError::BadResponse(_))
        ));
    }

    #[tokio::test]
    async fn structured_strategy_parses_json_report() {
        let base = stub_server(1, |body| {
            assert!(body.contains("json_object"));
            (
                200,
                reply(r#"{"navigation_command":"forward","confidence_level":90,"obstacles":["box"]}"#),
            )
        })
        .await;
        let oracle = oracle(base).with_api_key("k");
        let prompt = OraclePrompt::structured(Vocabulary::Full);
        let answer = oracle.classify(&Frame::blank_rgb(8, 8), &prompt).await.unwrap();
        assert_eq!(answer.candidate.as_deref(), Some("forward"));
        assert_eq!(answer.metadata.confidence, Some(90));
        assert_eq!(answer.metadata.obstacles, vec!["box".to_string()]);
    }

    #[tokio::test]
    async fn structured_strategy_rejects_non_object_content() {
        let base = stub_server(1, |_| (200, reply("forward"))).await;
        let oracle = oracle(base);
        let prompt = OraclePrompt::structured(Vocabulary::Full);
        let result = oracle.classify(&Frame::blank_rgb(8, 8), &prompt).await;
        assert!(matches!(result, Err(OracleError::BadResponse(_))));
    }

    #[tokio::test]
    async fn two_call_strategy_merges_command_and_description() {
        let base = stub_server(2, |body| {
            if body.contains("\"max_tokens\":10}") {
                (200, reply(" Left \n"))
            } else {
                (200, reply("A hallway with a chair on the right."))
            }
        })
        .await;
        let oracle = oracle(base).with_strategy(OracleStrategy::TwoCall);
        let prompt = OraclePrompt::motion_command();
        let answer = oracle.classify(&Frame::blank_rgb(8, 8), &prompt).await.unwrap();
        assert_eq!(answer.candidate.as_deref(), Some("Left"));
        assert_eq!(
            answer.metadata.path_description.as_deref(),
            Some("A hallway with a chair on the right.")
        );
    }

    #[tokio::test]
    async fn two_call_strategy_fails_when_description_call_fails() {
        let base = stub_server(2, |body| {
            if body.contains("\"max_tokens\":10}") {
                (200, reply("forward"))
            } else {
                (500, "{}".to_string())
            }
        })
        .await;
        let oracle = oracle(base).with_strategy(OracleStrategy::TwoCall);
        let prompt = OraclePrompt::motion_command();
        let result = oracle.classify(&Frame::blank_rgb(8, 8), &prompt).await;
        assert!(matches!(result, Err(OracleError::Http(_))));
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let base = stub_server(1, |_| (500, "{}".to_string())).await;
        let oracle = oracle(base);
        let prompt = OraclePrompt::structured(Vocabulary::Full);
        let result = oracle.classify(&Frame::blank_rgb(8, 8), &prompt).await;
        assert!(matches!(result, Err(OracleError::Http(_))));
    }

    #[tokio::test]
    async fn malformed_frame_never_reaches_the_network() {
        let oracle = oracle("http://127.0.0.1:9".to_string());
        let mut frame = Frame::blank_rgb(4, 4);
        frame.data.clear();
        let prompt = OraclePrompt::structured(Vocabulary::Full);
        let result = oracle.classify(&frame, &prompt).await;
        assert!(matches!(result, Err(OracleError::MalformedFrame(_))));
    }
}
