use std::io;

use actix_web::http::header::{self, ContentDisposition, DispositionParam, DispositionType};
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use blob_stream::{ByteRange, CancellationToken, ReadWindow};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::Instrument;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServerErr;
use crate::services::file_service::FileService;

pub const APP_TYPE_JSON: &str = "application/json";

#[derive(Debug, Deserialize, Validate)]
pub struct UploadQuery {
    #[validate(length(min = 1, max = 255))]
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UploadResponse {
    message: String,
    file_name: String,
    id: i64,
    chunks: u64,
    size: u64,
    sha256: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(upload).service(download).service(file_info);
}

#[post("/api/files/upload")]
async fn upload(
    query: web::Query<UploadQuery>,
    payload: web::Payload,
    service: web::Data<FileService>,
) -> Result<HttpResponse, ServerErr> {
    let query = query.into_inner();
    query.validate()?;

    let body = StreamReader::new(
        payload.map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))),
    );
    let span = tracing::info_span!("upload", request_id = %Uuid::new_v4());
    let outcome = service.upload(&query.name, body).instrument(span).await?;

    let info = outcome.info;
    Ok(HttpResponse::Ok().content_type(APP_TYPE_JSON).json(UploadResponse {
        message: "File uploaded successfully".to_string(),
        file_name: info.name,
        id: info.id,
        chunks: outcome.chunks,
        size: info.size,
        sha256: info.sha256,
    }))
}

#[get("/api/files/download/{id}")]
async fn download(
    req: HttpRequest,
    id: web::Path<i64>,
    service: web::Data<FileService>,
) -> Result<HttpResponse, ServerErr> {
    let id = id.into_inner();
    let info = service.info(id)?;
    let etag = format!("\"{}\"", info.sha256);

    let if_none_match = req.headers().get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok());
    if if_none_match.map_or(false, |value| etag_matches(value, &etag)) {
        return Ok(HttpResponse::NotModified().insert_header((header::ETAG, etag)).finish());
    }

    let range = match req.headers().get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) => parse_range(value, info.size)?,
        None => None,
    };

    let mut response = match range {
        Some(range) => {
            let mut builder = HttpResponse::PartialContent();
            builder
                .insert_header((header::CONTENT_RANGE, format!("bytes {}/{}", range, info.size)))
                .no_chunking(range.byte_count());
            builder
        }
        None => {
            let mut builder = HttpResponse::Ok();
            builder.no_chunking(info.size);
            builder
        }
    };
    response
        .content_type("application/octet-stream")
        .insert_header((header::ETAG, etag))
        .insert_header((header::ACCEPT_RANGES, "bytes"))
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(info.name)],
        });

    let window = range.map_or(ReadWindow::Full, ReadWindow::Range);
    let chunk_size = service.engine().settings().download_chunk_size;
    let (writer, reader) = tokio::io::duplex(chunk_size);

    // Dropping the body (client gone) cancels the transfer at the next chunk.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let span = tracing::info_span!("download", request_id = %Uuid::new_v4(), id);
    actix_web::rt::spawn(
        async move {
            match service.download(id, window, writer, cancel).await {
                Ok(bytes) => tracing::debug!("sent {} bytes of file {}", bytes, id),
                Err(err) => tracing::warn!("download of file {} ended early: {}", id, err),
            }
        }
        .instrument(span),
    );

    let body = ReaderStream::with_capacity(reader, chunk_size).map(move |chunk| {
        let _guard = &guard;
        chunk
    });
    Ok(response.streaming(body))
}

#[get("/api/files/{id}")]
async fn file_info(id: web::Path<i64>, service: web::Data<FileService>) -> Result<HttpResponse, ServerErr> {
    let info = service.info(id.into_inner())?;
    Ok(HttpResponse::Ok().content_type(APP_TYPE_JSON).json(info))
}

fn etag_matches(header_value: &str, etag: &str) -> bool {
    header_value
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}

/// Parses a single `Range: bytes=...` header against a file of `size` bytes.
///
/// `Ok(None)` means the header is ignored and the whole file is served:
/// other units, multiple ranges and malformed values all end up there.
fn parse_range(header_value: &str, size: u64) -> Result<Option<ByteRange>, ServerErr> {
    let Some(ranges) = header_value.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if ranges.contains(',') {
        return Ok(None);
    }
    let Some((start, end)) = ranges.trim().split_once('-') else {
        return Ok(None);
    };
    let unsatisfiable = ServerErr::RangeNotSatisfiable { size };

    if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 || size == 0 {
            return Err(unsatisfiable);
        }
        let start = size.saturating_sub(suffix);
        return Ok(Some(ByteRange::new(start as i64, (size - 1) as i64)));
    }

    let Ok(start) = start.parse::<u64>() else {
        return Ok(None);
    };
    let end = if end.is_empty() {
        None
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return Ok(None),
        }
    };
    if start >= size {
        return Err(unsatisfiable);
    }
    let end = end.map_or(size - 1, |end| end.min(size - 1));
    Ok(Some(ByteRange::new(start as i64, end as i64)))
}
