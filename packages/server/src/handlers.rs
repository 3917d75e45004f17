//! HTTP handler functions for the sensor map API.

use std::io::{self, Write};

use actix_web::http::header::{self, ContentDisposition, DispositionParam, DispositionType};
use actix_web::{HttpRequest, HttpResponse, web};
use sensor_map_search::compile::OutputMode;
use sensor_map_search::{SearchError, SearchOutput, render};
use sensor_map_search_models::{QueryParams, ResultEnvelope};
use sensor_map_server_models::{ApiHealth, SearchQueryParams};
use tokio::sync::mpsc;

use crate::AppState;

const CSV_CONTENT_TYPE: &str = "text/csv";
const CSV_FILENAME: &str = "data.csv";
/// Chunks buffered between the CSV writer and the response body.
const CSV_CHANNEL_CAPACITY: usize = 16;

/// Forwards written CSV chunks to the response stream. Dropping it ends
/// the body.
struct ChunkSink {
    tx: mpsc::Sender<web::Bytes>,
}

impl Write for ChunkSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(web::Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/search`
///
/// Searches readings inside a viewport and time window. Responds with a
/// [`ResultEnvelope`] by default, or a streamed CSV attachment when the
/// `Accept` header asks for `text/csv`.
pub async fn search(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<SearchQueryParams>,
) -> HttpResponse {
    let query = match QueryParams::try_from(&params.into_inner()) {
        Ok(query) => query,
        Err(e) => {
            log::warn!("Rejected search request: {e}");
            return HttpResponse::BadRequest().json(ResultEnvelope::error(400, e.to_string()));
        }
    };

    let mode = if wants_csv(&req) {
        OutputMode::Rows
    } else {
        OutputMode::Features
    };

    match state.search.search(&query, mode).await {
        Ok(SearchOutput::Features(envelope)) => HttpResponse::Ok().json(envelope),
        Ok(SearchOutput::Rows { rows, columns, .. }) => {
            let (tx, mut rx) = mpsc::channel::<web::Bytes>(CSV_CHANNEL_CAPACITY);
            actix_web::rt::task::spawn_blocking(move || {
                if let Err(e) = render::write_csv(ChunkSink { tx }, &rows, &columns) {
                    log::warn!("CSV export aborted: {e}");
                }
            });
            let body = async_stream::stream! {
                while let Some(chunk) = rx.recv().await {
                    yield Ok::<_, std::convert::Infallible>(chunk);
                }
            };

            HttpResponse::Ok()
                .content_type(CSV_CONTENT_TYPE)
                .insert_header(ContentDisposition {
                    disposition: DispositionType::Attachment,
                    parameters: vec![DispositionParam::Filename(CSV_FILENAME.to_string())],
                })
                .streaming(body)
        }
        Err(e) => error_response(&e),
    }
}

fn wants_csv(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(CSV_CONTENT_TYPE))
}

/// Logs a failed search once and maps it to an error envelope. Store
/// details stay in the log.
fn error_response(e: &SearchError) -> HttpResponse {
    match e {
        SearchError::Validation(_) => {
            log::warn!("Rejected search request: {e}");
            HttpResponse::BadRequest().json(ResultEnvelope::error(400, e.to_string()))
        }
        SearchError::Store {
            query,
            params,
            user_args,
            source,
        } => {
            log::error!(
                "Search query failed: {source}\n  query: {query}\n  params: {params:?}\n  user_args: {user_args:?}"
            );
            HttpResponse::InternalServerError()
                .json(ResultEnvelope::error(500, "Failed to query sensor data"))
        }
        SearchError::Compile(_) | SearchError::Render(_) => {
            log::error!("{e}");
            HttpResponse::InternalServerError().json(ResultEnvelope::error(500, e.to_string()))
        }
    }
}
