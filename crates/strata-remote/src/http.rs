use crate::{CdnConfig, MetadataService, ProgressSink, RemoteError};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use strata_schema::{TemplateKey, TemplateMetadata, TemplateReference, LATEST_VERSION};
use tracing::{debug, info, warn};

const GET_ATTEMPTS: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the CDN metadata service.
///
/// Endpoints:
/// - `GET  /template?id=<id>` or `?name=&owner=&version=` for metadata
/// - `HEAD /template?name=&owner=&version=` for publication checks
/// - `GET  /users/username?token=<token>` for the token's owner
/// - `POST /template/upload` (multipart `token` + `file`) to publish
pub struct HttpMetadataService {
    config: CdnConfig,
    agent: ureq::Agent,
    upload_agent: ureq::Agent,
}

impl HttpMetadataService {
    pub fn new(config: CdnConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        Self {
            config,
            agent: ureq::Agent::new_with_config(agent_config),
            upload_agent: ureq::Agent::new_with_defaults(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url())
    }

    /// GET with transport-level retries. HTTP status errors are never retried.
    fn get_with_retry(&self, url: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, RemoteError> {
        let mut last_error = String::new();
        for attempt in 1..=GET_ATTEMPTS {
            let mut req = self.agent.get(url);
            for (key, value) in query {
                req = req.query(*key, *value);
            }
            match req.call() {
                Ok(resp) => {
                    let mut body = Vec::new();
                    resp.into_body()
                        .into_reader()
                        .read_to_end(&mut body)
                        .map_err(|e| RemoteError::Http(e.to_string()))?;
                    return Ok(body);
                }
                Err(ureq::Error::StatusCode(404)) => {
                    return Err(RemoteError::NotFound(url.to_owned()));
                }
                Err(ureq::Error::StatusCode(code)) => {
                    return Err(RemoteError::Service {
                        status: code,
                        url: url.to_owned(),
                    });
                }
                Err(e) => {
                    warn!("GET {url} failed (attempt {attempt}/{GET_ATTEMPTS}): {e}");
                    last_error = e.to_string();
                }
            }
        }
        Err(RemoteError::Http(format!("GET {url}: {last_error}")))
    }
}

fn reference_query(reference: &TemplateReference) -> Vec<(&str, &str)> {
    match reference {
        TemplateReference::Id(id) => vec![("id", id.as_str())],
        TemplateReference::Named {
            name,
            owner,
            version,
        } => {
            let mut query = vec![("name", name.as_str())];
            if let Some(owner) = owner {
                query.push(("owner", owner.as_str()));
            }
            query.push(("version", version.as_deref().unwrap_or(LATEST_VERSION)));
            query
        }
    }
}

impl MetadataService for HttpMetadataService {
    fn resolve(&self, reference: &TemplateReference) -> Result<TemplateMetadata, RemoteError> {
        let url = self.url("template");
        debug!("GET {url} for {reference}");
        let body = self
            .get_with_retry(&url, &reference_query(reference))
            .map_err(|e| match e {
                RemoteError::NotFound(_) => {
                    RemoteError::NotFound(format!("template {reference}"))
                }
                other => other,
            })?;
        let meta =
            TemplateMetadata::from_json(&body).map_err(|e| RemoteError::Parse(e.to_string()))?;
        debug!(
            "{reference} identified as {}@{}:{}",
            meta.name, meta.owner, meta.version
        );
        Ok(meta)
    }

    fn exists(&self, key: &TemplateKey) -> Result<bool, RemoteError> {
        let url = self.url("template");
        debug!("HEAD {url} for {key}");
        let result = self
            .agent
            .head(&url)
            .query("name", &key.name)
            .query("owner", &key.owner)
            .query("version", &key.version)
            .call();
        match result {
            Ok(resp) => Ok(resp.status().as_u16() == 200),
            Err(ureq::Error::StatusCode(404)) => Ok(false),
            Err(ureq::Error::StatusCode(code)) => Err(RemoteError::Service { status: code, url }),
            Err(e) => Err(RemoteError::Http(e.to_string())),
        }
    }

    fn owner_for_token(&self, token: &str) -> Result<String, RemoteError> {
        let url = self.url("users/username");
        debug!("GET {url}");
        let body = self.get_with_retry(&url, &[("token", token)])?;
        let owner = String::from_utf8(body)
            .map_err(|e| RemoteError::Parse(e.to_string()))?
            .trim()
            .to_owned();
        if owner.is_empty() {
            return Err(RemoteError::Parse("service returned an empty owner".to_owned()));
        }
        debug!("token belongs to {owner}");
        Ok(owner)
    }

    fn upload(
        &self,
        archive: &Path,
        token: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String, RemoteError> {
        let url = self.url("template/upload");
        let file = File::open(archive)?;
        let size = file.metadata()?.len();
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let boundary = format!(
            "strata-{:x}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default()
        );
        let head = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"token\"\r\n\r\n\
             {token}\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        );
        let tail = format!("\r\n--{boundary}--\r\n");

        info!("uploading {file_name} ({size} bytes)");
        progress.start(&file_name, Some(size));
        let mut body = Cursor::new(head.into_bytes())
            .chain(ProgressReader::new(file, progress))
            .chain(Cursor::new(tail.into_bytes()));

        let result = self
            .upload_agent
            .post(&url)
            .header(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send(ureq::SendBody::from_reader(&mut body));
        progress.finish();

        let resp = match result {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Service { status: code, url });
            }
            Err(e) => return Err(RemoteError::Http(e.to_string())),
        };
        let mut out = String::new();
        resp.into_body()
            .into_reader()
            .read_to_string(&mut out)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        debug!("upload response: {out}");
        Ok(out)
    }
}

/// Reports every chunk read from `inner` to a progress sink.
pub(crate) struct ProgressReader<'a, R> {
    inner: R,
    sink: &'a dyn ProgressSink,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub(crate) fn new(inner: R, sink: &'a dyn ProgressSink) -> Self {
        Self { inner, sink }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.sink.advance(n as u64);
        Ok(n)
    }
}
