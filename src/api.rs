use rocket::form::{Form, FromForm};
use rocket::fs::TempFile;
use rocket::http::{ContentType, Cookie, Status};
use rocket::request::{self, FromRequest, Request};
use rocket::response::content::RawHtml;
use rocket::response::stream::TextStream;
use rocket::serde::json::Json;
use rocket::tokio::io::AsyncReadExt;
use rocket::{catch, get, post, State};

use crate::app_state::AppState;
use crate::engine::{self, Message};
use crate::error::ApiError;
use crate::page;
use crate::types::{
    ChatRequest,
    ChatResponse,
    FailureResponse,
    GenerateRequest,
    GenerateResponse,
    UploadResponse,
};
use crate::upload::{allowed_file, decode_image, sanitize_filename};

pub const SESSION_COOKIE: &str = "relay_session";

/// 浏览器会话 id，没有 cookie 就发一个新的
pub struct SessionId(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionId {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let cookies = req.cookies();
        if let Some(cookie) = cookies.get(SESSION_COOKIE) {
            return request::Outcome::Success(SessionId(cookie.value().to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        cookies.add(Cookie::new(SESSION_COOKIE, id.clone()));
        request::Outcome::Success(SessionId(id))
    }
}

#[derive(FromForm)]
pub struct UploadForm<'r> {
    file: Option<TempFile<'r>>,
}

/// 一个 chunk 一帧；多行文本拆成多条 data 行
pub fn sse_frame(chunk: &str) -> String {
    let mut frame = String::with_capacity(chunk.len() + 8);
    for line in chunk.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

async fn read_upload(file: &TempFile<'_>) -> std::io::Result<Vec<u8>> {
    let reader = file.open().await?;
    rocket::tokio::pin!(reader);
    let mut bytes = Vec::with_capacity(file.len() as usize);
    reader.read_to_end(&mut bytes).await?;
    Ok(bytes)
}

#[get("/")]
pub async fn index(state: &State<AppState>) -> Result<RawHtml<String>, Status> {
    let history = state.session.history();
    page::render_index(&state.config.model, &history)
        .map(RawHtml)
        .map_err(|e| {
            log::error!("failed to render index: {e}");
            Status::InternalServerError
        })
}

#[get("/health")]
pub async fn health() -> &'static str {
    "Gemini relay is running"
}

#[post("/upload", data = "<form>")]
pub async fn upload(
    state: &State<AppState>,
    session: SessionId,
    form: Option<Form<UploadForm<'_>>>,
) -> Result<Json<UploadResponse>, ApiError> {
    let file = form
        .and_then(|form| form.into_inner().file)
        .ok_or_else(|| ApiError::validation("No file part"))?;

    let raw_name = file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default();
    if raw_name.is_empty() {
        return Err(ApiError::validation("No selected file"));
    }
    if !allowed_file(&raw_name) {
        return Err(ApiError::validation("File type not allowed"));
    }

    let bytes = read_upload(&file).await.map_err(|e| {
        log::error!("failed to read uploaded file: {e}");
        ApiError::validation("Could not read uploaded file")
    })?;

    let filename = sanitize_filename(&raw_name);
    let image = decode_image(filename.clone(), bytes).map_err(|e| {
        log::info!("upload {raw_name:?} is not a decodable image: {e}");
        ApiError::validation("Could not decode image")
    })?;

    log::info!(
        "staged image {} ({}, {}x{}) for session {}",
        image.filename,
        image.mime_type,
        image.width,
        image.height,
        session.0
    );
    if let Some(previous) = state.pending.stage_image(&session.0, image) {
        log::debug!("replaced unsent image {}", previous.filename);
    }

    Ok(Json(UploadResponse {
        success: true,
        message: "File uploaded successfully and added to the conversation".to_string(),
        filename,
    }))
}

#[post("/chat", data = "<req>")]
pub async fn chat(
    state: &State<AppState>,
    session: SessionId,
    req: Option<Json<ChatRequest>>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = req
        .and_then(|Json(req)| req.into_text())
        .ok_or_else(|| ApiError::validation("Missing 'message' in JSON body"))?;

    state.pending.stage_message(&session.0, message);
    Ok(Json(ChatResponse { success: true }))
}

#[get("/stream")]
pub async fn stream(
    state: &State<AppState>,
    session: SessionId,
) -> (ContentType, TextStream![String]) {
    let receiver = match state.pending.take(&session.0) {
        Some(message) => Some(state.open_stream(message)),
        None => {
            log::warn!("stream requested with nothing staged for session {}", session.0);
            None
        }
    };

    let events = TextStream! {
        if let Some(mut receiver) = receiver {
            while let Some(chunk) = receiver.recv().await {
                yield sse_frame(&chunk);
            }
        }
    };
    (ContentType::EventStream, events)
}

#[post("/generate", data = "<req>")]
pub async fn generate(
    state: &State<AppState>,
    req: Option<Json<GenerateRequest>>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let prompt = req
        .and_then(|Json(req)| req.into_prompt())
        .ok_or_else(|| ApiError::validation("Missing 'input' or 'prompt' in JSON body"))?;

    let text = engine::collect_reply(
        state.session.as_ref(),
        Message::text(prompt),
        state.config.request_timeout(),
        state.config.stream_buffer,
    )
    .await?;

    Ok(Json(GenerateResponse {
        success: true,
        text,
    }))
}

#[catch(default)]
pub fn default_catcher(status: Status, _req: &Request<'_>) -> (Status, Json<FailureResponse>) {
    let message = status.reason().unwrap_or("Request failed");
    (status, Json(FailureResponse::new(message)))
}
