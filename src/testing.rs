//! In-memory registry and a local HTTP responder for unit tests

use crate::{
    distribution::{Name, Reference, Registry, Repository},
    error::*,
    media_types, Digest,
};
use oci_spec::{
    distribution::ErrorResponse,
    image::{Descriptor, DescriptorBuilder, MediaType},
};
use serde_json::json;
use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Read, Write},
    net::{TcpListener, TcpStream},
    sync::{Arc, Mutex, MutexGuard},
    thread,
};
use url::Url;

#[derive(Debug, Default)]
pub struct State {
    pub blobs: HashMap<Digest, Vec<u8>>,
    pub manifests: HashMap<Digest, (String, Vec<u8>)>,
    pub tags: HashMap<String, Digest>,
    /// Digests fetched by `fetch_blob`, in order
    pub blob_fetches: Vec<Digest>,
    /// Blobs uploaded, in order
    pub pushed_blobs: Vec<Digest>,
    /// `(reference, media type)` of manifests uploaded, in order
    pub pushed_manifests: Vec<(String, String)>,
    /// Answer OCI image manifest uploads like ECR does
    pub reject_oci_manifests: bool,
    /// Fail every manifest fetch with a server error
    pub broken: bool,
}

/// Registry shared by every repository handle created from it
#[derive(Debug, Clone, Default)]
pub struct FakeRegistry {
    state: Arc<Mutex<State>>,
}

fn not_found(what: &str) -> Error {
    Error::UnexpectedResponse {
        status: 404,
        body: format!("{} unknown", what),
    }
}

fn descriptor(media_type: &str, data: &[u8]) -> Descriptor {
    DescriptorBuilder::default()
        .media_type(MediaType::from(media_type))
        .digest(Digest::from_buf_sha256(data).to_string())
        .size(data.len() as i64)
        .build()
        .unwrap()
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_blob(&self, media_type: &str, data: &[u8]) -> Descriptor {
        let desc = descriptor(media_type, data);
        self.state()
            .blobs
            .insert(Digest::from_buf_sha256(data), data.to_vec());
        desc
    }

    pub fn add_manifest(&self, media_type: &str, data: &[u8], tag: Option<&str>) -> Descriptor {
        let desc = descriptor(media_type, data);
        let digest = Digest::from_buf_sha256(data);
        let mut state = self.state();
        state
            .manifests
            .insert(digest.clone(), (media_type.to_string(), data.to_vec()));
        if let Some(tag) = tag {
            state.tags.insert(tag.to_string(), digest);
        }
        desc
    }

    /// Single-platform image with one layer, distinguished by `seed`
    pub fn add_image(&self, media_type: &str, config_media_type: &str, seed: &str) -> Descriptor {
        let config = self.add_blob(config_media_type, format!(r#"{{"seed":"{}"}}"#, seed).as_bytes());
        let layer = self.add_blob(
            "application/vnd.oci.image.layer.v1.tar+gzip",
            format!("layer of {}", seed).as_bytes(),
        );
        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": media_type,
            "config": config,
            "layers": [layer],
        });
        self.add_manifest(media_type, manifest.to_string().as_bytes(), None)
    }

    pub fn add_list(&self, media_type: &str, children: &[Descriptor], tag: Option<&str>) -> Descriptor {
        let list = json!({
            "schemaVersion": 2,
            "mediaType": media_type,
            "manifests": children,
        });
        self.add_manifest(media_type, list.to_string().as_bytes(), tag)
    }

    pub fn tag(&self, tag: &str, desc: &Descriptor) {
        let digest = Digest::from_descriptor(desc).unwrap();
        self.state().tags.insert(tag.to_string(), digest);
    }
}

#[derive(Debug)]
pub struct FakeRepository {
    registry: FakeRegistry,
}

impl FakeRepository {
    fn lookup(&self, reference: &Reference) -> Result<(Descriptor, Vec<u8>)> {
        let state = self.registry.state();
        if state.broken {
            return Err(Error::UnexpectedResponse {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        let digest = match reference {
            Reference::Digest(digest) => digest.clone(),
            Reference::Tag(tag) => state
                .tags
                .get(tag)
                .cloned()
                .ok_or_else(|| not_found("manifest"))?,
        };
        let (media_type, data) = state
            .manifests
            .get(&digest)
            .ok_or_else(|| not_found("manifest"))?;
        Ok((descriptor(media_type, data), data.clone()))
    }
}

impl Repository for FakeRepository {
    fn resolve(&mut self, reference: &Reference) -> Result<Descriptor> {
        Ok(self.lookup(reference)?.0)
    }

    fn fetch_manifest(&mut self, reference: &Reference) -> Result<(Descriptor, Vec<u8>)> {
        self.lookup(reference)
    }

    fn fetch_blob(&mut self, digest: &Digest) -> Result<Vec<u8>> {
        let mut state = self.registry.state();
        state.blob_fetches.push(digest.clone());
        state
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| not_found("blob"))
    }

    fn exists(&mut self, digest: &Digest) -> Result<bool> {
        Ok(self.registry.state().blobs.contains_key(digest))
    }

    fn upload_blob(&mut self, digest: &Digest, data: &[u8]) -> Result<()> {
        digest.verify(data)?;
        let mut state = self.registry.state();
        state.pushed_blobs.push(digest.clone());
        state.blobs.insert(digest.clone(), data.to_vec());
        Ok(())
    }

    fn upload_manifest(&mut self, reference: &Reference, media_type: &str, data: &[u8]) -> Result<()> {
        let mut state = self.registry.state();
        if state.reject_oci_manifests && media_type == media_types::OCI_MANIFEST {
            let response: ErrorResponse = serde_json::from_str(
                r#"{"errors":[{"code":"UNSUPPORTED","message":"Invalid parameter at 'ImageManifest' failed to satisfy constraint: 'Invalid JSON syntax'"}]}"#,
            )?;
            return Err(Error::RegistryError {
                status: 405,
                response,
            });
        }
        let digest = Digest::from_buf_sha256(data);
        state
            .pushed_manifests
            .push((reference.to_string(), media_type.to_string()));
        state
            .manifests
            .insert(digest.clone(), (media_type.to_string(), data.to_vec()));
        if let Reference::Tag(tag) = reference {
            state.tags.insert(tag.clone(), digest);
        }
        Ok(())
    }
}

impl Registry for FakeRegistry {
    type Repository = FakeRepository;

    fn host(&self) -> &str {
        "registry.test"
    }

    fn repository(&self, _name: &Name) -> Result<FakeRepository> {
        Ok(FakeRepository {
            registry: self.clone(),
        })
    }
}

/// Request received by [HttpResponder]
#[derive(Debug, Clone)]
pub struct Received {
    pub method: String,
    /// Path with query
    pub target: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Canned response of [HttpResponder]
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    pub fn new(status: u16) -> Self {
        Reply {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    fn write_to(&self, stream: &mut TcpStream) -> std::io::Result<()> {
        let reason = match self.status {
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            401 => "Unauthorized",
            404 => "Not Found",
            _ => "Status",
        };
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason);
        for (key, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", key, value));
        }
        if !self
            .headers
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case("Content-Length"))
        {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("Connection: close\r\n\r\n");
        stream.write_all(head.as_bytes())?;
        stream.write_all(&self.body)?;
        stream.flush()
    }
}

/// HTTP/1.1 server on localhost answering one connection per reply, in order
///
/// Every request is recorded before its reply is written.
pub struct HttpResponder {
    listener: Option<TcpListener>,
    url: Url,
    received: Arc<Mutex<Vec<Received>>>,
}

impl HttpResponder {
    pub fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = Url::parse(&format!("http://{}/", listener.local_addr()?))?;
        Ok(HttpResponder {
            listener: Some(listener),
            url,
            received: Arc::default(),
        })
    }

    /// `host:port` of the server
    pub fn host(&self) -> String {
        format!(
            "{}:{}",
            self.url.host_str().unwrap(),
            self.url.port().unwrap()
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn serve(&mut self, replies: Vec<Reply>) {
        let listener = self.listener.take().expect("already serving");
        let received = self.received.clone();
        thread::spawn(move || {
            for reply in replies {
                let mut stream = match listener.accept() {
                    Ok((stream, _)) => stream,
                    Err(_) => return,
                };
                let request = match read_request(&stream) {
                    Ok(request) => request,
                    Err(_) => return,
                };
                received.lock().unwrap().push(request);
                if reply.write_to(&mut stream).is_err() {
                    return;
                }
            }
        });
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

fn read_request(stream: &TcpStream) -> std::io::Result<Received> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((key, value)) = header.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    let length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body)?;
    Ok(Received {
        method,
        target,
        headers,
        body,
    })
}
