//! Static file server for the built output tree.
//!
//! Every connection runs on its own task. Files are streamed from disk,
//! through a gzip or zlib encoder when the extension is compressible and the
//! client asked for it. The document root is only ever read.

use std::convert::Infallible;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_compression::tokio::bufread::{GzipEncoder, ZlibEncoder};
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{
    HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;

use crate::encoding::Encoding;
use crate::error::ServeError;
use crate::suffix::SuffixFilter;

/// ENOTDIR on Unix: a path component is a regular file
const ENOTDIR: i32 = 20;

pub type RespBody = UnsyncBoxBody<Bytes, std::io::Error>;
pub type Resp = Response<RespBody>;

/// Bind options and document root
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served at `/`
    pub root: PathBuf,
    /// File served for any path ending in `/`
    pub index: String,
    pub compression: bool,
    /// Extensions eligible for gzip/deflate
    pub compressible: SuffixFilter,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            root: PathBuf::from("dist"),
            index: "index.html".to_string(),
            compression: true,
            compressible: SuffixFilter::parse("html|css|js"),
        }
    }
}

/// A bound listener, ready to accept
pub struct StaticServer {
    listener: TcpListener,
    config: Arc<ServerConfig>,
}

impl StaticServer {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServeError> {
        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServeError::Bind { addr, source: e })?;
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServeError> {
        Ok(self.listener.local_addr()?)
    }

    /// Address clients should use, with the port actually bound
    pub fn url(&self) -> Result<String, ServeError> {
        let port = self.local_addr()?.port();
        Ok(format!("http://{}:{}", self.config.host, port))
    }

    /// Serve until the process ends
    pub async fn serve(self) -> Result<(), ServeError> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves. Connections already accepted keep
    /// running on their own tasks.
    pub async fn serve_until(self, shutdown: impl Future<Output = ()>) -> Result<(), ServeError> {
        tokio::pin!(shutdown);
        tracing::info!(
            addr = %self.local_addr()?,
            root = %self.config.root.display(),
            "serving"
        );

        loop {
            let (stream, remote) = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let config = Arc::clone(&config);
                    async move { Ok::<_, Infallible>(handle(req, &config).await) }
                });

                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    tracing::debug!(%remote, error = %e, "connection error");
                }
            });
        }
    }
}

/// Map a request path onto the document root.
///
/// The path is percent-decoded and `..` never climbs above `root`. Anything
/// ending in `/` maps to `root/index`.
pub fn resolve(root: &Path, index: &str, request_path: &str) -> PathBuf {
    if request_path.ends_with('/') {
        return root.join(index);
    }

    let decoded = urlencoding::decode(request_path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| request_path.to_string());

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if depth > 0 {
                    resolved.pop();
                    depth -= 1;
                }
            }
            name => {
                resolved.push(name);
                depth += 1;
            }
        }
    }
    resolved
}

/// MIME type from the extension, `text/plain` when unknown
pub fn content_type(path: &Path) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("text/plain")
}

fn full_body(data: impl Into<Bytes>) -> RespBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn stream_body<R>(reader: R) -> RespBody
where
    R: AsyncRead + Send + 'static,
{
    StreamBody::new(ReaderStream::new(reader).map_ok(Frame::data)).boxed_unsync()
}

fn text_response(status: StatusCode, text: String) -> Resp {
    let mut resp = Response::new(full_body(text));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    resp
}

fn not_found(request_path: &str) -> Resp {
    text_response(
        StatusCode::NOT_FOUND,
        format!("This request URL {request_path} was not found on this server."),
    )
}

fn internal_error(request_path: &str, err: &ServeError) -> Resp {
    let detail = match err {
        ServeError::Open { source, .. } => source.to_string(),
        ServeError::NotAFile { .. } => "not a regular file".to_string(),
        other => other.to_string(),
    };
    text_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Error serving {request_path}: {detail}"),
    )
}

async fn open_file(path: &Path) -> Result<(File, u64), ServeError> {
    let file = File::open(path).await.map_err(|e| ServeError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(ServeError::NotAFile {
            path: path.to_path_buf(),
        });
    }
    Ok((file, metadata.len()))
}

async fn serve_file(
    path: &Path,
    config: &ServerConfig,
    accept_encoding: Option<&str>,
) -> Result<Resp, ServeError> {
    let (file, len) = open_file(path).await?;

    let compressible = config.compression && config.compressible.matches(path);
    let encoding = if compressible {
        Encoding::negotiate(accept_encoding)
    } else {
        Encoding::Identity
    };

    let body = match encoding {
        Encoding::Gzip => stream_body(GzipEncoder::new(BufReader::new(file))),
        Encoding::Deflate => stream_body(ZlibEncoder::new(BufReader::new(file))),
        Encoding::Identity => stream_body(file),
    };

    let mut resp = Response::new(body);
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type(path)));
    if compressible {
        headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
    }
    match encoding.header_value() {
        Some(value) => {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static(value));
        }
        None => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
    }
    Ok(resp)
}

/// Whether a stat error means nothing exists at the path
fn is_missing(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::NotFound || err.raw_os_error() == Some(ENOTDIR)
}

/// Answer one request. Never fails: errors become 404 or 500 responses.
pub async fn handle<B>(req: Request<B>, config: &ServerConfig) -> Resp {
    // The body is never read
    let (parts, _) = req.into_parts();
    let request_path = parts.uri.path();
    let accept_encoding = parts
        .headers
        .get(ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok());
    let path = resolve(&config.root, &config.index, request_path);

    let resp = match tokio::fs::metadata(&path).await {
        Err(e) if is_missing(&e) => not_found(request_path),
        _ => match serve_file(&path, config, accept_encoding).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to serve");
                internal_error(request_path, &e)
            }
        },
    };

    tracing::info!(
        method = %parts.method,
        path = request_path,
        status = resp.status().as_u16(),
        "request"
    );
    resp
}
