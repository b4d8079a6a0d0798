use std::env;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{GenericImageView, ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use snapclean_contracts::events::{EventPayload, EventWriter};
use snapclean_contracts::session::{
    EditHistory, EditedImage, ImageBytes, ImageRef, Instruction, ProcessingState, SessionPhase,
    PROCESSING_MESSAGE,
};

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// Notification shown for any failed edit attempt. Details go to the event
/// stream, not the user.
pub const EDIT_FAILED_NOTICE: &str = "Failed to edit image. Please try again.";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EditErrorKind {
    Configuration,
    Encoding,
    RequestFailed,
    NoResult,
}

impl EditErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditErrorKind::Configuration => "configuration",
            EditErrorKind::Encoding => "encoding",
            EditErrorKind::RequestFailed => "request_failed",
            EditErrorKind::NoResult => "no_result",
        }
    }
}

/// Typed failure riding the anyhow chain so the session boundary can log a
/// classification while surfacing one notification.
#[derive(Debug)]
pub struct EditError {
    kind: EditErrorKind,
    message: String,
}

impl EditError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            kind: EditErrorKind::Configuration,
            message: message.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self {
            kind: EditErrorKind::Encoding,
            message: message.into(),
        }
    }

    pub fn request_failed(message: impl Into<String>) -> Self {
        Self {
            kind: EditErrorKind::RequestFailed,
            message: message.into(),
        }
    }

    pub fn no_result(message: impl Into<String>) -> Self {
        Self {
            kind: EditErrorKind::NoResult,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> EditErrorKind {
        self.kind
    }
}

impl std::fmt::Display for EditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EditError {}

/// First typed kind found in the chain; anything untyped (transport, HTTP
/// status, malformed JSON) is a generic request failure.
pub fn classify_error(err: &anyhow::Error) -> EditErrorKind {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EditError>().map(EditError::kind))
        .unwrap_or(EditErrorKind::RequestFailed)
}

#[derive(Debug, Clone)]
pub struct EditRequest {
    pub image: ImageRef,
    pub instruction: String,
}

impl EditRequest {
    fn validate(&self) -> Result<()> {
        if self.image.bytes.is_empty() {
            return Err(EditError::encoding("source image is empty").into());
        }
        if self.instruction.trim().is_empty() {
            return Err(EditError::request_failed("instruction text is empty").into());
        }
        Ok(())
    }
}

/// One external round trip: image plus instruction in, edited image out.
pub trait EditTransport: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, request: &EditRequest) -> Result<ImageBytes>;
}

/// Offline editor for demos and tests. Produces a deterministic solid-color
/// PNG whose color derives from the instruction, sized to the source image
/// when it decodes.
#[derive(Debug)]
pub struct DryrunEditor;

impl EditTransport for DryrunEditor {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit(&self, request: &EditRequest) -> Result<ImageBytes> {
        request.validate()?;
        let (width, height) = source_dims(&request.image).unwrap_or((512, 512));
        let (r, g, b) = color_from_instruction(&request.instruction);
        let mut canvas = RgbImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed encoding dryrun image")?;
        Ok(ImageBytes::new(bytes, Some("image/png".to_string())))
    }
}

fn source_dims(image: &ImageBytes) -> Option<(u32, u32)> {
    image::load_from_memory(&image.bytes)
        .ok()
        .map(|decoded| decoded.dimensions())
}

fn color_from_instruction(instruction: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(instruction.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// Client for the Gemini image-edit endpoint. One attempt per call: no
/// retry, no rate limiting. A request timeout may be set without touching
/// the call boundary; none is enforced by default.
#[derive(Debug)]
pub struct GeminiEditor {
    api_base: String,
    api_key: String,
    model: String,
    request_timeout: Option<Duration>,
    http: HttpClient,
}

impl GeminiEditor {
    /// Resolves the credential at startup so a missing key fails here, not
    /// inside the first edit request.
    pub fn from_env(model: Option<&str>) -> Result<Self> {
        let Some(api_key) =
            non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
        else {
            return Err(EditError::configuration("GEMINI_API_KEY or GOOGLE_API_KEY not set").into());
        };
        Ok(Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            api_key,
            model: model
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_IMAGE_MODEL)
                .to_string(),
            request_timeout: None,
            http: untimed_http_client(),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn edit_directive(instruction: &str) -> String {
        format!(
            "You are a professional product photo editor. Please perform the following edit on this image: \"{instruction}\". Ensure the product remains high-quality and the output is photorealistic."
        )
    }

    fn build_payload(request: &EditRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": request.image.mime_or_default(),
                            "data": BASE64.encode(&request.image.bytes),
                        },
                    },
                    { "text": Self::edit_directive(&request.instruction) },
                ],
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
            },
        })
    }

    fn extract_image_part(response_payload: &Value) -> Result<ImageBytes> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(Value::as_object)
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                let inline = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Ok(ImageBytes::new(bytes, mime_type));
            }
        }

        Err(EditError::no_result("Gemini returned no edited image").into())
    }
}

impl EditTransport for GeminiEditor {
    fn name(&self) -> &str {
        "gemini"
    }

    fn edit(&self, request: &EditRequest) -> Result<ImageBytes> {
        request.validate()?;
        let endpoint = self.endpoint();
        let payload = Self::build_payload(request);

        let mut builder = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload);
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .with_context(|| format!("Gemini edit request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Self::extract_image_part(&response_payload)
    }
}

/// Startup-time editor selection. Unknown names and a keyless `gemini`
/// choice fail fast as configuration errors.
pub fn resolve_editor(
    name: &str,
    model: Option<&str>,
    request_timeout: Option<Duration>,
) -> Result<Box<dyn EditTransport>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "dryrun" => Ok(Box::new(DryrunEditor)),
        "" | "gemini" => Ok(Box::new(
            GeminiEditor::from_env(model)?.with_request_timeout(request_timeout),
        )),
        other => Err(EditError::configuration(format!(
            "unknown editor '{other}' (expected 'gemini' or 'dryrun')"
        ))
        .into()),
    }
}

#[derive(Debug, Clone)]
pub struct SourceImage {
    pub path: PathBuf,
    pub image: ImageRef,
}

/// Everything the presentation layer renders from. Owned by the session and
/// handed out by reference; mutation goes through session operations.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub source: Option<SourceImage>,
    pub active_id: Option<String>,
    pub history: EditHistory,
    pub processing: ProcessingState,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        if self.processing.is_processing {
            SessionPhase::Processing
        } else if self.source.is_some() {
            SessionPhase::Ready
        } else {
            SessionPhase::Idle
        }
    }

    pub fn active_entry(&self) -> Option<&EditedImage> {
        self.active_id
            .as_deref()
            .and_then(|id| self.history.get(id))
    }

    /// Image a download resolves to: the active result, else the source.
    pub fn download_target(&self) -> Option<ImageRef> {
        if let Some(entry) = self.active_entry() {
            return Some(entry.edited.clone());
        }
        self.source.as_ref().map(|source| source.image.clone())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RejectReason {
    NoSourceImage,
    EmptyInstruction,
    AlreadyProcessing,
}

impl RejectReason {
    pub fn user_message(&self) -> &'static str {
        match self {
            RejectReason::NoSourceImage => "Upload an image first.",
            RejectReason::EmptyInstruction => "Type an edit instruction first.",
            RejectReason::AlreadyProcessing => "An edit is already in progress.",
        }
    }
}

#[derive(Debug)]
pub enum EditOutcome {
    Completed(EditedImage),
    Rejected(RejectReason),
    Failed(String),
}

#[derive(Debug)]
pub enum SelectOutcome {
    Selected,
    Rejected(RejectReason),
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Saved(PathBuf),
    Rejected(RejectReason),
}

/// The session state machine. Serializes edit requests (at most one in
/// flight; re-entry is rejected, never queued), converts every transport
/// failure into one user-visible notification, and records lifecycle events.
pub struct EditSession {
    pub state: SessionState,
    transport: Box<dyn EditTransport>,
    events: EventWriter,
}

impl EditSession {
    pub fn new(transport: Box<dyn EditTransport>, events: EventWriter) -> Result<Self> {
        events.emit(
            "session_started",
            map_object(json!({ "editor": transport.name() })),
        )?;
        Ok(Self {
            state: SessionState::default(),
            transport,
            events,
        })
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn editor_name(&self) -> &str {
        self.transport.name()
    }

    /// Replaces the source image and clears the active result. History is
    /// kept; only `reset` discards it. Rejected while an edit is in flight.
    pub fn select_image(&mut self, path: &Path) -> Result<SelectOutcome> {
        if self.state.processing.is_processing {
            return Ok(SelectOutcome::Rejected(RejectReason::AlreadyProcessing));
        }
        let image = Arc::new(read_image(path)?);
        self.events.emit(
            "image_selected",
            map_object(json!({
                "path": path.to_string_lossy(),
                "mime_type": image.mime_or_default(),
                "byte_len": image.bytes.len(),
            })),
        )?;
        self.state.source = Some(SourceImage {
            path: path.to_path_buf(),
            image,
        });
        self.state.active_id = None;
        Ok(SelectOutcome::Selected)
    }

    /// Free-text entry point: trims and rejects blank input before any
    /// request is dispatched.
    pub fn run_edit_prompt(&mut self, text: &str) -> Result<EditOutcome> {
        match Instruction::parse(text) {
            Some(instruction) => self.run_edit(&instruction),
            None => Ok(EditOutcome::Rejected(RejectReason::EmptyInstruction)),
        }
    }

    pub fn run_edit(&mut self, instruction: &Instruction) -> Result<EditOutcome> {
        if self.state.processing.is_processing {
            return Ok(EditOutcome::Rejected(RejectReason::AlreadyProcessing));
        }
        let Some(source) = self.state.source.clone() else {
            return Ok(EditOutcome::Rejected(RejectReason::NoSourceImage));
        };

        self.events.emit(
            "edit_started",
            map_object(json!({
                "prompt": instruction.text(),
                "editor": self.transport.name(),
            })),
        )?;
        self.state.processing = ProcessingState::active(PROCESSING_MESSAGE);

        let request = EditRequest {
            image: source.image.clone(),
            instruction: instruction.text().to_string(),
        };
        let result = self.transport.edit(&request);
        self.state.processing = ProcessingState::idle();

        match result {
            Ok(edited) => {
                let entry =
                    EditedImage::new(instruction.text(), source.image.clone(), Arc::new(edited));
                self.events.emit("edit_completed", entry.summary_payload())?;
                self.state.history.prepend(entry.clone());
                self.state.active_id = Some(entry.id.clone());
                Ok(EditOutcome::Completed(entry))
            }
            Err(err) => {
                let kind = classify_error(&err);
                self.events.emit(
                    "edit_failed",
                    map_object(json!({
                        "prompt": instruction.text(),
                        "kind": kind.as_str(),
                        "error": error_chain_text(&err, 512),
                    })),
                )?;
                Ok(EditOutcome::Failed(EDIT_FAILED_NOTICE.to_string()))
            }
        }
    }

    /// Marks a history entry active. No-op (returns false) when the id is
    /// unknown or an edit is in flight.
    pub fn select_history_entry(&mut self, id: &str) -> Result<bool> {
        if self.state.processing.is_processing || !self.state.history.contains(id) {
            return Ok(false);
        }
        self.state.active_id = Some(id.to_string());
        self.events
            .emit("history_selected", map_object(json!({ "entry_id": id })))?;
        Ok(true)
    }

    /// Saves the active result (else the source) into `out_dir` under the
    /// generated download name.
    pub fn download_to_dir(&mut self, out_dir: &Path) -> Result<DownloadOutcome> {
        if self.state.processing.is_processing {
            return Ok(DownloadOutcome::Rejected(RejectReason::AlreadyProcessing));
        }
        let Some(image) = self.state.download_target() else {
            return Ok(DownloadOutcome::Rejected(RejectReason::NoSourceImage));
        };
        let path = out_dir.join(download_file_name(&image));
        self.write_download(&path, &image)
    }

    /// Saves to an explicit destination path instead of the generated name.
    pub fn download_to_path(&mut self, path: &Path) -> Result<DownloadOutcome> {
        if self.state.processing.is_processing {
            return Ok(DownloadOutcome::Rejected(RejectReason::AlreadyProcessing));
        }
        let Some(image) = self.state.download_target() else {
            return Ok(DownloadOutcome::Rejected(RejectReason::NoSourceImage));
        };
        self.write_download(path, &image)
    }

    fn write_download(&mut self, path: &Path, image: &ImageBytes) -> Result<DownloadOutcome> {
        write_image(path, image)?;
        self.events.emit(
            "image_downloaded",
            map_object(json!({
                "path": path.to_string_lossy(),
                "byte_len": image.bytes.len(),
            })),
        )?;
        Ok(DownloadOutcome::Saved(path.to_path_buf()))
    }

    /// Valid from any phase: discards source, active item, processing state,
    /// and the entire history.
    pub fn reset(&mut self) -> Result<()> {
        self.state = SessionState::default();
        self.events.emit("session_reset", EventPayload::new())?;
        Ok(())
    }
}

pub fn encode_image(image: &ImageBytes) -> String {
    BASE64.encode(&image.bytes)
}

pub fn read_image(path: &Path) -> Result<ImageBytes> {
    let bytes = fs::read(path).map_err(|err| {
        anyhow::Error::new(EditError::encoding(format!(
            "failed reading {}: {err}",
            path.display()
        )))
    })?;
    if bytes.is_empty() {
        return Err(EditError::encoding(format!("{} is empty", path.display())).into());
    }
    Ok(ImageBytes::new(
        bytes,
        mime_for_path(path).map(str::to_string),
    ))
}

pub fn write_image(path: &Path, image: &ImageBytes) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    fs::write(path, &image.bytes).with_context(|| format!("failed to write {}", path.display()))
}

pub fn download_file_name(image: &ImageBytes) -> String {
    format!(
        "snapclean-edit-{}.{}",
        timestamp_millis(),
        extension_from_mime(image.mime_type.as_deref())
    )
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn extension_from_mime(mime: Option<&str>) -> &'static str {
    if let Some(mime) = mime {
        let lowered = mime.to_ascii_lowercase();
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            return "jpg";
        }
        if lowered.contains("webp") {
            return "webp";
        }
        if lowered.contains("gif") {
            return "gif";
        }
    }
    "png"
}

fn untimed_http_client() -> HttpClient {
    HttpClient::builder()
        .timeout(None)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        return Err(EditError::request_failed(format!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        ))
        .into());
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
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

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
