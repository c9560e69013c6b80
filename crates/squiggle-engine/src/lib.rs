use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use squiggle_contracts::events::EventWriter;
use squiggle_contracts::models::{
    is_pro_tier, parse_catalog, CatalogModel, ModelSelector, GEMINI_FLASH, GEMINI_PRO,
};
use squiggle_contracts::presets::Preset;
use squiggle_contracts::prompt::{
    compose, strip_code_fence, ContentPart, GenerationMode, InlineImage,
};
use squiggle_contracts::runs::feedback::FeedbackLog;
use squiggle_contracts::runs::loop_state::{LoopState, Phase};
use squiggle_contracts::runs::manifest::SessionManifest;
use squiggle_contracts::runs::summary::{write_loop_summary, LoopSummary};
use squiggle_contracts::session::{SessionState, ViewMode};

/// Sampling temperatures, lowered for surgical iteration so the model
/// stays close to the existing artifact.
const GEMINI_TEMPERATURE_FRESH: f64 = 0.8;
const GEMINI_TEMPERATURE_ITERATION: f64 = 0.4;
const OPENROUTER_TEMPERATURE_FRESH: f64 = 0.8;
const OPENROUTER_TEMPERATURE_ITERATION: f64 = 0.3;

/// Extended-reasoning budget applied on the pro tier.
const PRO_THINKING_BUDGET: u64 = 8000;

const REQUEST_TIMEOUT_S: f64 = 90.0;

/// Characters of a critique kept in the per-round feedback entry.
const FEEDBACK_PREVIEW_CHARS: usize = 80;

const PRESET_ARCHITECT_INSTRUCTION: &str = "You are an expert system architect. Create a detailed CSS animation System Prompt similar to the ones provided. Focus on a specific aesthetic (e.g. 'Watercolor', 'Voxel', 'Blueprint').";

// ============================================================================
// Generation backend adapter
// ============================================================================

/// One generation request. `original_code` presence is the sole
/// discriminator between fresh-design and surgical-iteration semantics;
/// `credential` is only consulted by providers that need a bearer token.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub base_instruction: String,
    pub user_prompt: String,
    pub visual_context: Option<InlineImage>,
    pub original_code: Option<String>,
    pub credential: Option<String>,
}

pub trait AnimationProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Returns the generated markup after fence extraction. Never
    /// returns an empty document; failure to extract is an error.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Default)]
pub struct AnimationProviderRegistry {
    providers: BTreeMap<String, Box<dyn AnimationProvider>>,
}

impl AnimationProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: AnimationProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn AnimationProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

fn default_provider_registry() -> AnimationProviderRegistry {
    let mut providers = AnimationProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new());
    providers.register(OpenRouterProvider::new());
    providers
}

/// Offline provider for tests and dry runs: fresh requests get a small
/// deterministic document derived from the prompt, iteration requests
/// echo the original artifact untouched.
pub struct DryrunProvider;

impl AnimationProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        if let Some(code) = &request.original_code {
            return Ok(code.clone());
        }
        Ok(dryrun_document(&request.user_prompt))
    }
}

fn dryrun_document(prompt: &str) -> String {
    let (r, g, b) = color_from_seed(prompt, 0);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<style>\n  body {{ margin: 0; display: grid; place-items: center; height: 100vh; background: #0f172a; }}\n  .subject {{ width: 40vmin; height: 40vmin; border-radius: 50%; background: rgb({r}, {g}, {b}); animation: pulse 2s cubic-bezier(0.645, 0.045, 0.355, 1) infinite; }}\n  @keyframes pulse {{ 0%, 100% {{ transform: scale(1); }} 50% {{ transform: scale(1.15); }} }}\n</style>\n</head>\n<body>\n<div class=\"subject\" title=\"{}\"></div>\n</body>\n</html>",
        prompt.replace('"', "'")
    )
}

pub struct GeminiProvider {
    api_base: String,
    http: HttpClient,
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            api_base: env_api_base(
                "GEMINI_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }
}

impl AnimationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let composed = compose(
            &request.base_instruction,
            &request.user_prompt,
            request.original_code.as_deref(),
            request.visual_context.as_ref(),
        );
        let temperature = match composed.mode {
            GenerationMode::Fresh => GEMINI_TEMPERATURE_FRESH,
            GenerationMode::Iteration => GEMINI_TEMPERATURE_ITERATION,
        };

        let mut generation_config = Map::new();
        generation_config.insert("temperature".to_string(), json!(temperature));
        if is_pro_tier(&request.model) {
            generation_config.insert(
                "thinkingConfig".to_string(),
                json!({ "thinkingBudget": PRO_THINKING_BUDGET }),
            );
        }

        let payload = json!({
            "systemInstruction": { "parts": [{ "text": composed.system_instruction }] },
            "contents": [{ "role": "user", "parts": gemini_parts(&composed.parts) }],
            "generationConfig": generation_config,
        });

        let endpoint = gemini_endpoint(&self.api_base, &request.model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .timeout(Duration::from_secs_f64(REQUEST_TIMEOUT_S))
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        let text = gemini_response_text(&response_payload)
            .ok_or_else(|| anyhow::anyhow!("Gemini response contained no text parts"))?;

        let code = strip_code_fence(&text);
        if code.is_empty() {
            bail!("Gemini returned no usable markup");
        }
        Ok(code)
    }
}

pub struct OpenRouterProvider {
    api_base: String,
    http: HttpClient,
}

impl Default for OpenRouterProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenRouterProvider {
    pub fn new() -> Self {
        Self {
            api_base: env_api_base("OPENROUTER_API_BASE", "https://openrouter.ai/api/v1"),
            http: HttpClient::new(),
        }
    }

    fn resolve_credential(explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| non_empty_env("OPENROUTER_API_KEY"))
    }

    fn user_content(parts: &[ContentPart]) -> Value {
        let has_image = parts
            .iter()
            .any(|part| matches!(part, ContentPart::Image(_)));
        if !has_image {
            let text = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text(text) => Some(text.as_str()),
                    ContentPart::Image(_) => None,
                })
                .collect::<Vec<&str>>()
                .join("\n\n");
            return Value::String(text);
        }

        Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => json!({ "type": "text", "text": text }),
                    ContentPart::Image(image) => json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", image.mime_type, image.data),
                        },
                    }),
                })
                .collect(),
        )
    }
}

impl AnimationProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        // Credential is checked before anything goes on the wire.
        let Some(credential) = Self::resolve_credential(request.credential.as_deref()) else {
            bail!("OpenRouter credential not configured");
        };
        let composed = compose(
            &request.base_instruction,
            &request.user_prompt,
            request.original_code.as_deref(),
            request.visual_context.as_ref(),
        );
        let temperature = match composed.mode {
            GenerationMode::Fresh => OPENROUTER_TEMPERATURE_FRESH,
            GenerationMode::Iteration => OPENROUTER_TEMPERATURE_ITERATION,
        };

        let payload = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": composed.system_instruction },
                { "role": "user", "content": Self::user_content(&composed.parts) },
            ],
            "temperature": temperature,
        });

        let endpoint = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Bearer {credential}"))
            .timeout(Duration::from_secs_f64(REQUEST_TIMEOUT_S))
            .json(&payload)
            .send()
            .with_context(|| format!("OpenRouter request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("OpenRouter", response)?;
        let text = response_payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("OpenRouter response missing message content"))?;

        let code = strip_code_fence(text);
        if code.is_empty() {
            bail!("OpenRouter returned no usable markup");
        }
        Ok(code)
    }
}

/// Fetch the OpenRouter model listing for the selection UI.
pub fn fetch_openrouter_models() -> Result<Vec<CatalogModel>> {
    let api_base = env_api_base("OPENROUTER_API_BASE", "https://openrouter.ai/api/v1");
    let endpoint = format!("{api_base}/models");
    let response = HttpClient::new()
        .get(&endpoint)
        .timeout(Duration::from_secs_f64(REQUEST_TIMEOUT_S))
        .send()
        .with_context(|| format!("OpenRouter catalog fetch failed ({endpoint})"))?;
    let payload = response_json_or_error("OpenRouter catalog", response)?;
    Ok(parse_catalog(&payload))
}

// ============================================================================
// Critique engine
// ============================================================================

/// Structured critique of the current artifact. `degraded` is set when
/// the analysis ran without frames and had only the code to look at.
#[derive(Debug, Clone, PartialEq)]
pub struct Critique {
    pub critique: String,
    pub improved_prompt: String,
    pub degraded: bool,
}

pub trait CritiqueBackend: Send + Sync {
    fn critique(
        &self,
        frames: &[Frame],
        original_prompt: &str,
        current_code: &str,
    ) -> Result<Critique>;
}

/// A captured preview frame as an inline JPEG/PNG payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub mime_type: String,
    pub data: String,
}

const CRITIC_SYSTEM_INSTRUCTION: &str = "You are a Technical Animation Lead. Focus on precision, preservation of character design, and surgical code improvements. Return JSON with 'critique' (summary) and 'improvedPrompt' (specific technical instructions for the next model).";

/// Vision critique against the pro tier, regardless of the tier selected
/// for generation.
pub struct GeminiCritic {
    api_base: String,
    http: HttpClient,
}

impl Default for GeminiCritic {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiCritic {
    pub fn new() -> Self {
        Self {
            api_base: env_api_base(
                "GEMINI_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            http: HttpClient::new(),
        }
    }
}

impl CritiqueBackend for GeminiCritic {
    fn critique(
        &self,
        frames: &[Frame],
        original_prompt: &str,
        current_code: &str,
    ) -> Result<Critique> {
        let Some(api_key) = GeminiProvider::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };

        let mut parts = vec![
            json!({ "text": "Analyze this CSS animation sequence. Identify specific technical flaws in motion, timing, or structure." }),
            json!({ "text": format!("Original Intent: {original_prompt}") }),
            json!({ "text": "Your Task: Identify exactly what is WRONG with the current implementation. Do not suggest a redesign. Suggest specific surgical fixes (e.g., 'Change the transform-origin of the tail to right-center', 'Add a 25% keyframe to the head animation for a blink')." }),
        ];
        for frame in frames {
            parts.push(json!({
                "inlineData": { "mimeType": frame.mime_type, "data": frame.data },
            }));
        }
        parts.push(json!({ "text": format!("Source Code Reference:\n{current_code}") }));

        let payload = json!({
            "systemInstruction": { "parts": [{ "text": CRITIC_SYSTEM_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "critique": { "type": "STRING" },
                        "improvedPrompt": { "type": "STRING" },
                    },
                    "required": ["critique", "improvedPrompt"],
                },
            },
        });

        let endpoint = gemini_endpoint(&self.api_base, GEMINI_PRO);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .timeout(Duration::from_secs_f64(REQUEST_TIMEOUT_S))
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini critique request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini critique", response)?;
        let text = gemini_response_text(&response_payload)
            .ok_or_else(|| anyhow::anyhow!("Gemini critique response contained no text parts"))?;

        let parsed: Value = serde_json::from_str(text.trim())
            .context("Gemini critique response was not valid JSON")?;
        let critique = parsed
            .get("critique")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let improved_prompt = parsed
            .get("improvedPrompt")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let (Some(critique), Some(improved_prompt)) = (critique, improved_prompt) else {
            bail!("Gemini critique response missing required fields");
        };

        Ok(Critique {
            critique: critique.to_string(),
            improved_prompt: improved_prompt.to_string(),
            degraded: frames.is_empty(),
        })
    }
}

// ============================================================================
// Frame capture
// ============================================================================

/// Produces an ordered, bounded sequence of preview frames. How frames
/// are obtained is implementation-defined; an empty sequence is valid
/// and degrades the critique rather than failing it.
pub trait FrameCapture {
    fn capture(&self, code: &str) -> Result<Vec<Frame>>;
}

/// Matches the studio's current rendering surface: no frames available.
pub struct NullFrameCapture;

impl FrameCapture for NullFrameCapture {
    fn capture(&self, _code: &str) -> Result<Vec<Frame>> {
        Ok(Vec::new())
    }
}

/// Deterministic stand-in capture: renders solid-color JPEG frames
/// derived from a hash of the artifact, earliest first.
pub struct SyntheticFrameCapture {
    pub frame_count: usize,
}

impl Default for SyntheticFrameCapture {
    fn default() -> Self {
        Self { frame_count: 5 }
    }
}

impl FrameCapture for SyntheticFrameCapture {
    fn capture(&self, code: &str) -> Result<Vec<Frame>> {
        let mut frames = Vec::with_capacity(self.frame_count);
        for idx in 0..self.frame_count {
            let (r, g, b) = color_from_seed(code, idx as u64);
            let mut image = RgbImage::new(96, 96);
            for pixel in image.pixels_mut() {
                *pixel = Rgb([r, g, b]);
            }
            let mut bytes: Vec<u8> = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 80);
            encoder
                .encode(image.as_raw(), 96, 96, ExtendedColorType::Rgb8)
                .context("synthetic frame encode failed")?;
            frames.push(Frame {
                mime_type: "image/jpeg".to_string(),
                data: BASE64.encode(&bytes),
            });
        }
        Ok(frames)
    }
}

// ============================================================================
// Studio engine
// ============================================================================

/// Session owner: holds the current artifact, the loop state machine,
/// the feedback log, and the provider registry, and serializes every
/// backend invocation. At most one loop run per session at a time; manual
/// actions are rejected while a run is active.
pub struct StudioEngine {
    run_dir: PathBuf,
    session_id: String,
    events: EventWriter,
    manifest: SessionManifest,
    state: SessionState,
    loop_state: LoopState,
    feedback: FeedbackLog,
    providers: AnimationProviderRegistry,
    critic: Box<dyn CritiqueBackend>,
    model_selector: ModelSelector,
    provider_name: String,
    model: String,
    credential: Option<String>,
}

impl StudioEngine {
    pub fn new(
        run_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        model: Option<String>,
    ) -> Result<Self> {
        let run_dir = run_dir.into();
        fs::create_dir_all(&run_dir)?;
        let session_id = run_dir
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("session-rs")
            .to_string();
        let events = EventWriter::new(events_path.into(), session_id.clone());
        let manifest_path = run_dir.join("session.json");
        let manifest = if manifest_path.exists() {
            SessionManifest::load(&manifest_path)
        } else {
            SessionManifest::new(&manifest_path)
        };
        let feedback = FeedbackLog::with_mirror(run_dir.join("feedback.jsonl"));

        events.emit(
            "session_started",
            map_object(json!({
                "out_dir": run_dir.to_string_lossy().to_string(),
            })),
        )?;

        Ok(Self {
            run_dir,
            session_id,
            events,
            manifest,
            state: SessionState::new(),
            loop_state: LoopState::new(),
            feedback,
            providers: default_provider_registry(),
            critic: Box::new(GeminiCritic::new()),
            model_selector: ModelSelector::new(None),
            provider_name: "gemini".to_string(),
            model: model.unwrap_or_else(|| GEMINI_FLASH.to_string()),
            credential: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn loop_state(&self) -> &LoopState {
        &self.loop_state
    }

    pub fn feedback(&self) -> &FeedbackLog {
        &self.feedback
    }

    pub fn provider(&self) -> &str {
        &self.provider_name
    }

    pub fn set_provider(&mut self, name: &str) -> Result<()> {
        if self.providers.get(name).is_none() {
            let available = self.providers.names().join(", ");
            bail!("unknown provider '{name}' (available: [{available}])");
        }
        self.provider_name = name.to_string();
        Ok(())
    }

    pub fn register_provider<P: AnimationProvider + 'static>(&mut self, provider: P) {
        self.providers.register(provider);
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn set_credential(&mut self, credential: Option<String>) {
        self.credential = credential.filter(|value| !value.trim().is_empty());
    }

    pub fn set_critic(&mut self, critic: Box<dyn CritiqueBackend>) {
        self.critic = critic;
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        self.state.view_mode = mode;
    }

    /// Manual, single-shot generation. Fails fast while a loop run is
    /// active; on failure the prior artifact is left untouched.
    pub fn generate(
        &mut self,
        base_instruction: &str,
        user_prompt: &str,
        visual_context: Option<InlineImage>,
        original_code: Option<String>,
    ) -> Result<String> {
        self.ensure_idle()?;
        if user_prompt.trim().is_empty() {
            bail!("animation subject must not be empty");
        }
        if original_code
            .as_deref()
            .is_some_and(|code| code.trim().is_empty())
        {
            bail!("iteration requires existing animation code");
        }

        self.state.generating = true;
        let result =
            self.generate_version(base_instruction, user_prompt, visual_context, original_code);
        self.state.generating = false;

        match result {
            Ok(code) => {
                self.state.set_artifact(code.clone());
                Ok(code)
            }
            Err(err) => {
                let message = error_chain_text(&err, 512);
                self.state.record_error(&message);
                self.events.emit(
                    "generation_failed",
                    map_object(json!({
                        "provider": self.provider_name,
                        "model": self.model,
                        "error": message,
                    })),
                )?;
                Err(err)
            }
        }
    }

    /// Generate a new style preset from a name, the way the studio's
    /// "create new style" flow does. The result is returned to the
    /// caller; preset persistence belongs to the surrounding shell.
    pub fn create_preset(&mut self, name: &str) -> Result<Preset> {
        self.ensure_idle()?;
        let name = name.trim();
        if name.is_empty() {
            bail!("preset name must not be empty");
        }

        let request = GenerationRequest {
            model: self.resolve_model()?,
            base_instruction: PRESET_ARCHITECT_INSTRUCTION.to_string(),
            user_prompt: format!("Create a new system prompt for a style called '{name}'."),
            visual_context: None,
            original_code: None,
            credential: self.credential.clone(),
        };

        self.state.generating = true;
        let generated = self.invoke_provider(&request);
        self.state.generating = false;

        let prompt = match generated {
            Ok(prompt) => prompt,
            Err(err) => {
                let message = error_chain_text(&err, 512);
                self.state.record_error(&message);
                self.events.emit(
                    "preset_failed",
                    map_object(json!({ "name": name, "error": message })),
                )?;
                return Err(err);
            }
        };

        let preset = Preset {
            id: format!("custom-{}", timestamp_millis()),
            name: name.to_string(),
            description: "AI-generated custom style.".to_string(),
            icon: "sparkles".to_string(),
            prompt,
            is_custom: true,
        };
        self.events.emit(
            "preset_created",
            map_object(json!({ "preset_id": preset.id, "name": preset.name })),
        )?;
        Ok(preset)
    }

    /// Run the capture -> analyze -> improve optimization loop over the
    /// current artifact. The critique is always anchored to
    /// `subject_prompt`, the original subject, not any intermediate
    /// improved prompt. Cancellation is honored at phase boundaries.
    pub fn run_optimize_loop(
        &mut self,
        base_instruction: &str,
        subject_prompt: &str,
        total_rounds: u32,
        capture: &dyn FrameCapture,
        cancel: &AtomicBool,
    ) -> Result<LoopSummary> {
        if self.loop_state.active {
            bail!("optimization loop already active");
        }
        if self.state.generating {
            bail!("a generation request is already in flight");
        }
        if !self.state.has_artifact() {
            bail!("optimization loop requires an existing animation");
        }

        self.loop_state.start(total_rounds)?;
        self.feedback.clear();
        let started_at = now_utc_iso();
        self.events.emit(
            "loop_started",
            map_object(json!({ "total_rounds": total_rounds })),
        )?;

        let mut current_code = self.state.current_code.clone();
        let mut improved_rounds = 0u32;
        let mut failed_rounds = 0u32;
        let mut cancelled = false;

        for round in 1..=total_rounds {
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            self.loop_state.begin_round(round)?;
            self.events.emit_phase(round, Phase::Capturing)?;
            let frames = match capture.capture(&current_code) {
                Ok(frames) => frames,
                Err(err) => {
                    self.events.emit(
                        "capture_failed",
                        map_object(json!({
                            "round": round,
                            "error": error_chain_text(&err, 512),
                        })),
                    )?;
                    Vec::new()
                }
            };
            if frames.is_empty() {
                self.events
                    .emit("capture_empty", map_object(json!({ "round": round })))?;
            }

            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            self.loop_state.advance(Phase::Analyzing)?;
            self.events.emit_phase(round, Phase::Analyzing)?;

            let (entry_text, entry_failed) = match self
                .critic
                .critique(&frames, subject_prompt, &current_code)
            {
                Ok(critique) => {
                    let prefix = truncate_text(&critique.critique, FEEDBACK_PREVIEW_CHARS);
                    if cancel.load(Ordering::SeqCst) {
                        cancelled = true;
                        break;
                    }
                    self.loop_state.advance(Phase::Improving)?;
                    self.events.emit_phase(round, Phase::Improving)?;
                    match self.generate_version(
                        base_instruction,
                        &critique.improved_prompt,
                        None,
                        Some(current_code.clone()),
                    ) {
                        Ok(code) => {
                            current_code = code;
                            self.state.set_artifact(current_code.clone());
                            improved_rounds += 1;
                            (format!("round {round}: {prefix}"), false)
                        }
                        Err(err) => {
                            // keep the prior artifact and carry on; the
                            // failure has to stay visible in the log
                            failed_rounds += 1;
                            (
                                format!(
                                    "round {round}: {prefix} (improve failed: {})",
                                    error_chain_text(&err, 240)
                                ),
                                true,
                            )
                        }
                    }
                }
                Err(err) => {
                    // the phase cycle stays intact even without a
                    // critique; the improve step becomes a recorded no-op
                    failed_rounds += 1;
                    self.loop_state.advance(Phase::Improving)?;
                    self.events.emit_phase(round, Phase::Improving)?;
                    (
                        format!(
                            "round {round}: analysis failed: {}",
                            error_chain_text(&err, 240)
                        ),
                        true,
                    )
                }
            };

            self.feedback.append(round, entry_text, entry_failed)?;
            self.events.emit(
                "loop_round_completed",
                map_object(json!({ "round": round, "failed": entry_failed })),
            )?;
        }

        if cancelled {
            self.loop_state.cancel();
            self.events.emit(
                "loop_cancelled",
                map_object(json!({ "round": self.loop_state.current_round })),
            )?;
        } else {
            self.loop_state.finish();
            self.events.emit(
                "loop_finished",
                map_object(json!({ "rounds": total_rounds })),
            )?;
        }

        let summary = LoopSummary {
            session_id: self.session_id.clone(),
            started_at,
            finished_at: now_utc_iso(),
            total_rounds,
            improved_rounds,
            failed_rounds,
            cancelled,
        };
        write_loop_summary(&self.run_dir.join("loop_summary.json"), &summary)?;
        Ok(summary)
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.loop_state.active {
            bail!("optimization loop is active; manual actions are disabled");
        }
        if self.state.generating {
            bail!("a generation request is already in flight");
        }
        Ok(())
    }

    fn resolve_model(&self) -> Result<String> {
        if self.provider_name != "gemini" {
            return Ok(self.model.clone());
        }
        match self.model_selector.select(Some(&self.model), "text") {
            Ok(selection) => {
                if let Some(reason) = &selection.fallback_reason {
                    self.events.emit(
                        "model_fallback",
                        map_object(json!({
                            "requested": selection.requested,
                            "resolved": selection.model.name,
                            "reason": reason,
                        })),
                    )?;
                }
                Ok(selection.model.name)
            }
            Err(message) => bail!("{message}"),
        }
    }

    fn invoke_provider(&self, request: &GenerationRequest) -> Result<String> {
        let Some(provider) = self.providers.get(&self.provider_name) else {
            let available = self.providers.names().join(", ");
            bail!(
                "provider '{}' not registered (available: [{available}])",
                self.provider_name
            );
        };
        provider.generate(request)
    }

    /// Shared by manual generation and the loop's improve step: invokes
    /// the active provider and records the resulting version + artifact.
    fn generate_version(
        &mut self,
        base_instruction: &str,
        user_prompt: &str,
        visual_context: Option<InlineImage>,
        original_code: Option<String>,
    ) -> Result<String> {
        let mode = match original_code {
            Some(_) => GenerationMode::Iteration,
            None => GenerationMode::Fresh,
        };
        let model = self.resolve_model()?;
        self.events.emit(
            "generation_started",
            map_object(json!({
                "provider": self.provider_name,
                "model": model,
                "mode": mode.as_str(),
            })),
        )?;

        let request = GenerationRequest {
            model,
            base_instruction: base_instruction.to_string(),
            user_prompt: user_prompt.to_string(),
            visual_context,
            original_code,
            credential: self.credential.clone(),
        };
        let code = self.invoke_provider(&request)?;

        let parent = self.manifest.latest().map(|entry| entry.version_id.clone());
        let version = self.manifest.add_version(mode.as_str(), user_prompt, parent);
        let artifact_path = self.run_dir.join(format!(
            "animation-{}-{}.html",
            timestamp_millis(),
            short_id(&code, self.manifest.versions.len() as u64)
        ));
        fs::write(&artifact_path, &code)
            .with_context(|| format!("failed to write {}", artifact_path.display()))?;
        self.manifest.set_artifact(&version.version_id, &artifact_path);
        self.manifest.save()?;
        self.events.emit(
            "artifact_created",
            map_object(json!({
                "version_id": version.version_id,
                "artifact_path": artifact_path.to_string_lossy().to_string(),
                "mode": mode.as_str(),
            })),
        )?;
        Ok(code)
    }

    #[cfg(test)]
    fn loop_state_mut(&mut self) -> &mut LoopState {
        &mut self.loop_state
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn gemini_endpoint(api_base: &str, model: &str) -> String {
    let trimmed = model.trim();
    let model_path = if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    };
    format!("{api_base}/{model_path}:generateContent")
}

fn gemini_parts(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => json!({ "text": text }),
            ContentPart::Image(image) => json!({
                "inlineData": { "mimeType": image.mime_type, "data": image.data },
            }),
        })
        .collect()
}

fn gemini_response_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            out.push_str(text);
        }
    }
    if out.trim().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn env_api_base(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn color_from_seed(text: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(text: &str, idx: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::Value;
    use squiggle_contracts::runs::loop_state::Phase;

    use super::{
        dryrun_document, AnimationProvider, Critique, CritiqueBackend, DryrunProvider, Frame,
        FrameCapture, GenerationRequest, NullFrameCapture, OpenRouterProvider, StudioEngine,
        SyntheticFrameCapture,
    };

    const STYLE: &str = "Role: test style.";
    const SUBJECT: &str = "a mechanical owl";

    /// Echoes the original code on iteration; fixed document on fresh.
    struct EchoProvider;

    impl AnimationProvider for EchoProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String> {
            if let Some(code) = &request.original_code {
                return Ok(code.clone());
            }
            Ok("<!DOCTYPE html><html><body>stub</body></html>".to_string())
        }
    }

    // Returns "rev-<n>" per call and can fail on one specific call.
    struct VersionedProvider {
        calls: Mutex<u32>,
        fail_on: Option<u32>,
    }

    impl VersionedProvider {
        fn new(fail_on: Option<u32>) -> Self {
            Self {
                calls: Mutex::new(0),
                fail_on,
            }
        }
    }

    impl AnimationProvider for VersionedProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<String> {
            let mut calls = self.calls.lock().expect("calls lock");
            *calls += 1;
            if self.fail_on == Some(*calls) {
                anyhow::bail!("simulated transport failure");
            }
            Ok(format!("rev-{}", *calls))
        }
    }

    struct AlwaysFailingProvider;

    impl AnimationProvider for AlwaysFailingProvider {
        fn name(&self) -> &str {
            "broken"
        }

        fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<String> {
            anyhow::bail!("simulated transport failure")
        }
    }

    // Scripted critic: returns "c<n>"/"p<n>" and records the code it saw.
    #[derive(Default)]
    struct CountingCritic {
        calls: Mutex<u32>,
        seen_codes: Arc<Mutex<Vec<String>>>,
        fail_on: Option<u32>,
        cancel: Option<Arc<AtomicBool>>,
    }

    impl CritiqueBackend for CountingCritic {
        fn critique(
            &self,
            frames: &[Frame],
            _original_prompt: &str,
            current_code: &str,
        ) -> anyhow::Result<Critique> {
            let mut calls = self.calls.lock().expect("calls lock");
            *calls += 1;
            self.seen_codes
                .lock()
                .expect("seen lock")
                .push(current_code.to_string());
            if let Some(cancel) = &self.cancel {
                cancel.store(true, Ordering::SeqCst);
            }
            if self.fail_on == Some(*calls) {
                anyhow::bail!("simulated critique failure");
            }
            Ok(Critique {
                critique: format!("c{}", *calls),
                improved_prompt: format!("p{}", *calls),
                degraded: frames.is_empty(),
            })
        }
    }

    fn engine_in(temp: &tempfile::TempDir) -> StudioEngine {
        let run_dir = temp.path().join("run");
        let events_path = run_dir.join("events.jsonl");
        StudioEngine::new(&run_dir, &events_path, None).expect("engine")
    }

    fn stub_engine(temp: &tempfile::TempDir) -> StudioEngine {
        let mut engine = engine_in(temp);
        engine.register_provider(EchoProvider);
        engine.set_provider("stub").expect("stub provider");
        engine.set_critic(Box::new(CountingCritic::default()));
        engine
    }

    fn event_rows(engine: &StudioEngine) -> Vec<Value> {
        let path = engine.run_dir().join("events.jsonl");
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    #[test]
    fn manual_generation_writes_artifact_and_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = engine_in(&temp);
        engine.set_provider("dryrun")?;

        let code = engine.generate(STYLE, SUBJECT, None, None)?;
        assert!(code.starts_with("<!DOCTYPE html>"));
        assert!(engine.state().has_artifact());
        assert_eq!(engine.state().current_code, code);

        let events: Vec<String> = event_rows(&engine)
            .iter()
            .filter_map(|row| row.get("event").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert!(events.contains(&"session_started".to_string()));
        assert!(events.contains(&"generation_started".to_string()));
        assert!(events.contains(&"artifact_created".to_string()));

        let manifest_raw = fs::read_to_string(engine.run_dir().join("session.json"))?;
        let manifest: Value = serde_json::from_str(&manifest_raw)?;
        let versions = manifest["versions"].as_array().expect("versions array");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0]["mode"], Value::String("fresh".to_string()));
        let artifact_path = versions[0]["artifact_path"].as_str().expect("artifact path");
        assert_eq!(fs::read_to_string(artifact_path)?, code);
        Ok(())
    }

    #[test]
    fn manual_failure_keeps_prior_artifact() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = engine_in(&temp);
        engine.set_provider("dryrun")?;
        let original = engine.generate(STYLE, SUBJECT, None, None)?;

        engine.register_provider(AlwaysFailingProvider);
        engine.set_provider("broken")?;
        let err = engine.generate(STYLE, "a second subject", None, None);
        assert!(err.is_err());
        assert_eq!(engine.state().current_code, original);
        assert!(engine
            .state()
            .last_error
            .as_deref()
            .unwrap_or("")
            .contains("transport failure"));
        assert!(!engine.state().generating);

        let events: Vec<String> = event_rows(&engine)
            .iter()
            .filter_map(|row| row.get("event").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert!(events.contains(&"generation_failed".to_string()));
        Ok(())
    }

    #[test]
    fn empty_subject_is_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = engine_in(&temp);
        engine.set_provider("dryrun")?;
        assert!(engine.generate(STYLE, "   ", None, None).is_err());
        assert!(!engine.state().has_artifact());
        Ok(())
    }

    #[test]
    fn loop_requires_existing_artifact() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = stub_engine(&temp);
        let cancel = AtomicBool::new(false);

        let err = engine.run_optimize_loop(STYLE, SUBJECT, 3, &NullFrameCapture, &cancel);
        assert!(err.is_err());
        assert!(!engine.loop_state().active);
        assert_eq!(engine.loop_state().phase, Phase::Idle);
        assert_eq!(engine.loop_state().current_round, 0);
        assert!(engine.feedback().is_empty());
        Ok(())
    }

    #[test]
    fn loop_start_is_rejected_while_active() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = stub_engine(&temp);
        engine.generate(STYLE, SUBJECT, None, None)?;

        engine.loop_state_mut().start(3)?;
        engine.loop_state_mut().begin_round(1)?;
        let before = engine.loop_state().clone();

        let cancel = AtomicBool::new(false);
        let err = engine.run_optimize_loop(STYLE, SUBJECT, 3, &NullFrameCapture, &cancel);
        assert!(err.is_err());
        assert_eq!(engine.loop_state(), &before);

        let manual = engine.generate(STYLE, "another subject", None, None);
        assert!(manual.is_err());
        Ok(())
    }

    #[test]
    fn loop_runs_every_round_and_echo_preserves_artifact() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = stub_engine(&temp);
        let original = engine.generate(STYLE, SUBJECT, None, None)?;

        let cancel = AtomicBool::new(false);
        let summary = engine.run_optimize_loop(STYLE, SUBJECT, 3, &NullFrameCapture, &cancel)?;

        assert_eq!(summary.total_rounds, 3);
        assert_eq!(summary.improved_rounds, 3);
        assert_eq!(summary.failed_rounds, 0);
        assert!(!summary.cancelled);

        let entries = engine.feedback().entries();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].text.contains("c1"));
        assert!(entries[1].text.contains("c2"));
        assert!(entries[2].text.contains("c3"));
        assert!(entries.iter().all(|entry| !entry.failed));

        assert_eq!(engine.state().current_code, original);
        assert!(!engine.loop_state().active);
        assert_eq!(engine.loop_state().phase, Phase::Idle);
        assert_eq!(engine.loop_state().current_round, 3);

        assert!(engine.run_dir().join("loop_summary.json").exists());
        Ok(())
    }

    #[test]
    fn loop_phase_events_follow_fixed_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = stub_engine(&temp);
        engine.generate(STYLE, SUBJECT, None, None)?;

        let cancel = AtomicBool::new(false);
        engine.run_optimize_loop(STYLE, SUBJECT, 2, &NullFrameCapture, &cancel)?;

        let observed: Vec<(u64, String)> = event_rows(&engine)
            .iter()
            .filter(|row| row.get("event").and_then(Value::as_str) == Some("loop_phase"))
            .map(|row| {
                (
                    row["round"].as_u64().unwrap_or(0),
                    row["phase"].as_str().unwrap_or("").to_string(),
                )
            })
            .collect();
        let expected: Vec<(u64, String)> = vec![
            (1, "capturing".into()),
            (1, "analyzing".into()),
            (1, "improving".into()),
            (2, "capturing".into()),
            (2, "analyzing".into()),
            (2, "improving".into()),
        ];
        assert_eq!(observed, expected);
        Ok(())
    }

    #[test]
    fn failed_improve_round_keeps_prior_code_and_run_continues() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = engine_in(&temp);
        // call 1 = initial generation, calls 2..4 = per-round improves;
        // failing call 3 fails round 2's improve step only
        engine.register_provider(VersionedProvider::new(Some(3)));
        engine.set_provider("stub")?;
        let seen = Arc::new(Mutex::new(Vec::new()));
        engine.set_critic(Box::new(CountingCritic {
            seen_codes: seen.clone(),
            ..CountingCritic::default()
        }));

        engine.generate(STYLE, SUBJECT, None, None)?;
        let cancel = AtomicBool::new(false);
        let summary = engine.run_optimize_loop(STYLE, SUBJECT, 3, &NullFrameCapture, &cancel)?;

        assert_eq!(summary.improved_rounds, 2);
        assert_eq!(summary.failed_rounds, 1);

        let entries = engine.feedback().entries();
        assert_eq!(entries.len(), 3);
        assert!(!entries[0].failed);
        assert!(entries[1].failed);
        assert!(entries[1].text.contains("improve failed"));
        assert!(entries[1].text.contains("c2"));
        assert!(!entries[2].failed);

        // round 3's critique must observe round 1's output, unchanged by
        // the failed round 2
        let seen = seen.lock().expect("seen lock").clone();
        assert_eq!(seen, vec!["rev-1", "rev-2", "rev-2"]);
        assert_eq!(engine.state().current_code, "rev-4");
        Ok(())
    }

    #[test]
    fn failed_critique_still_completes_the_phase_cycle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = engine_in(&temp);
        engine.register_provider(EchoProvider);
        engine.set_provider("stub")?;
        engine.set_critic(Box::new(CountingCritic {
            fail_on: Some(1),
            ..CountingCritic::default()
        }));

        engine.generate(STYLE, SUBJECT, None, None)?;
        let cancel = AtomicBool::new(false);
        let summary = engine.run_optimize_loop(STYLE, SUBJECT, 1, &NullFrameCapture, &cancel)?;

        assert_eq!(summary.failed_rounds, 1);
        assert_eq!(summary.improved_rounds, 0);
        let entries = engine.feedback().entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].failed);
        assert!(entries[0].text.contains("analysis failed"));

        let phases: Vec<String> = event_rows(&engine)
            .iter()
            .filter(|row| row.get("event").and_then(Value::as_str) == Some("loop_phase"))
            .map(|row| row["phase"].as_str().unwrap_or("").to_string())
            .collect();
        assert_eq!(phases, vec!["capturing", "analyzing", "improving"]);
        Ok(())
    }

    #[test]
    fn cancellation_is_honored_at_the_next_round_boundary() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = engine_in(&temp);
        engine.register_provider(EchoProvider);
        engine.set_provider("stub")?;

        let cancel = Arc::new(AtomicBool::new(false));
        engine.set_critic(Box::new(CountingCritic {
            cancel: Some(cancel.clone()),
            ..CountingCritic::default()
        }));

        engine.generate(STYLE, SUBJECT, None, None)?;
        let summary = engine.run_optimize_loop(STYLE, SUBJECT, 3, &NullFrameCapture, &cancel)?;

        assert!(summary.cancelled);
        assert_eq!(engine.feedback().len(), 1);
        assert!(!engine.loop_state().active);
        assert_eq!(engine.loop_state().phase, Phase::Idle);

        let events: Vec<String> = event_rows(&engine)
            .iter()
            .filter_map(|row| row.get("event").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert!(events.contains(&"loop_cancelled".to_string()));
        assert!(!events.contains(&"loop_finished".to_string()));
        Ok(())
    }

    #[test]
    fn iteration_temperature_is_lower_than_fresh() {
        assert!(super::GEMINI_TEMPERATURE_ITERATION < super::GEMINI_TEMPERATURE_FRESH);
        assert!(super::OPENROUTER_TEMPERATURE_ITERATION < super::OPENROUTER_TEMPERATURE_FRESH);
    }

    #[test]
    fn dryrun_provider_echoes_on_iteration() -> anyhow::Result<()> {
        let request = GenerationRequest {
            model: "dryrun".to_string(),
            base_instruction: STYLE.to_string(),
            user_prompt: "tighten easing".to_string(),
            visual_context: None,
            original_code: Some("<html>original</html>".to_string()),
            credential: None,
        };
        assert_eq!(DryrunProvider.generate(&request)?, "<html>original</html>");

        let fresh = dryrun_document(SUBJECT);
        assert!(fresh.starts_with("<!DOCTYPE html>"));
        assert_eq!(fresh, dryrun_document(SUBJECT));
        Ok(())
    }

    #[test]
    fn openrouter_rejects_missing_credential_before_any_network_call() {
        std::env::remove_var("OPENROUTER_API_KEY");
        let provider = OpenRouterProvider::new();
        let request = GenerationRequest {
            model: "anthropic/claude-sonnet-4.5".to_string(),
            base_instruction: STYLE.to_string(),
            user_prompt: SUBJECT.to_string(),
            visual_context: None,
            original_code: None,
            credential: None,
        };
        let err = provider.generate(&request).expect_err("must fail");
        assert!(err.to_string().contains("credential"));
    }

    #[test]
    fn synthetic_capture_yields_bounded_ordered_frames() -> anyhow::Result<()> {
        let capture = SyntheticFrameCapture { frame_count: 3 };
        let frames = capture.capture("<html></html>")?;
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.mime_type == "image/jpeg"));
        assert!(frames.iter().all(|f| !f.data.is_empty()));

        let again = capture.capture("<html></html>")?;
        assert_eq!(frames, again);
        Ok(())
    }

    #[test]
    fn create_preset_returns_custom_preset() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = engine_in(&temp);
        engine.set_provider("dryrun")?;

        let preset = engine.create_preset("Watercolor Dreams")?;
        assert!(preset.is_custom);
        assert!(preset.id.starts_with("custom-"));
        assert_eq!(preset.name, "Watercolor Dreams");
        assert!(!preset.prompt.is_empty());
        Ok(())
    }
}
