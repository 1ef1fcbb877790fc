//! Transport collaborator.
//!
//! Every request returns a [`FetchHandle`] wrapping a one-shot completion
//! channel. The tick loop polls handles; nothing here blocks the caller.

use std::path::PathBuf;

pub type FetchResult = Result<Vec<u8>, FetchError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request for {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("could not read {path}: {message}")]
    Io { path: String, message: String },

    #[error("request for {url} was aborted")]
    Aborted { url: String },
}

type AbortFn = Box<dyn FnOnce() + Send>;

/// One in-flight request.
pub struct FetchHandle {
    url: String,
    receiver: flume::Receiver<FetchResult>,
    abort: Option<AbortFn>,
}

impl FetchHandle {
    pub fn new(url: impl Into<String>, receiver: flume::Receiver<FetchResult>) -> Self {
        Self {
            url: url.into(),
            receiver,
            abort: None,
        }
    }

    /// A handle whose result is already known.
    pub fn ready(url: impl Into<String>, result: FetchResult) -> Self {
        let (tx, rx) = flume::bounded(1);
        // Capacity 1 and we hold the receiver, so this cannot fail
        let _ = tx.send(result);
        Self::new(url, rx)
    }

    pub fn with_abort(mut self, abort: impl FnOnce() + Send + 'static) -> Self {
        self.abort = Some(Box::new(abort));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Non-blocking completion check.
    pub fn try_complete(&self) -> Option<FetchResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(flume::TryRecvError::Empty) => None,
            Err(flume::TryRecvError::Disconnected) => Some(Err(FetchError::Aborted {
                url: self.url.clone(),
            })),
        }
    }

    /// Block until the request completes. Only for tools, never the tick loop.
    pub fn wait(self) -> FetchResult {
        self.receiver.recv().unwrap_or_else(|_| {
            Err(FetchError::Aborted {
                url: self.url.clone(),
            })
        })
    }

    pub fn abort(mut self) {
        if let Some(abort) = self.abort.take() {
            log::debug!("[Fetch] Aborting {}", self.url);
            abort();
        }
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle").field("url", &self.url).finish()
    }
}

pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> FetchHandle;
}

/// Directory part of a manifest URL, including the trailing separator.
/// Buffer and video URIs are resolved against it.
pub fn url_root(manifest_url: &str) -> &str {
    match manifest_url.rfind('/') {
        Some(i) => &manifest_url[..=i],
        None => "",
    }
}

/// Reads `file://` URLs or bare paths from the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn fetch(&self, url: &str) -> FetchHandle {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        let result = std::fs::read(&path).map_err(|e| FetchError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        });
        if let Ok(bytes) = &result {
            log::trace!("[Fetch] Read {} bytes from {}", bytes.len(), path.display());
        }
        FetchHandle::ready(url, result)
    }
}

#[cfg(feature = "native")]
pub use http::HttpFetcher;

#[cfg(feature = "native")]
mod http {
    use super::*;

    /// HTTP transport on a tokio runtime.
    pub struct HttpFetcher {
        client: reqwest::Client,
        handle: tokio::runtime::Handle,
        _runtime: Option<tokio::runtime::Runtime>,
    }

    impl HttpFetcher {
        /// Own a small runtime for requests.
        pub fn new() -> Result<Self, FetchError> {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("holovideo-fetch")
                .enable_all()
                .build()
                .map_err(|e| FetchError::Transport {
                    url: String::new(),
                    message: format!("failed to start runtime: {}", e),
                })?;
            let handle = runtime.handle().clone();
            Ok(Self {
                client: reqwest::Client::new(),
                handle,
                _runtime: Some(runtime),
            })
        }

        /// Run requests on an existing runtime.
        pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
            Self {
                client: reqwest::Client::new(),
                handle,
                _runtime: None,
            }
        }
    }

    async fn get(client: reqwest::Client, url: String) -> FetchResult {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.clone(),
            message: e.to_string(),
        };
        let response = client.get(&url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }

    impl Fetcher for HttpFetcher {
        fn fetch(&self, url: &str) -> FetchHandle {
            let (tx, rx) = flume::bounded(1);
            let client = self.client.clone();
            let owned = url.to_string();
            let task = self.handle.spawn(async move {
                let result = get(client, owned).await;
                if tx.send_async(result).await.is_err() {
                    log::trace!("[Fetch] Result dropped, handle gone");
                }
            });
            FetchHandle::new(url, rx).with_abort(move || task.abort())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_url_root() {
        assert_eq!(url_root("https://cdn.example.com/clips/a/stream.gltf"), "https://cdn.example.com/clips/a/");
        assert_eq!(url_root("stream.gltf"), "");
    }

    #[test]
    fn test_file_fetcher() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"holo").unwrap();
        let url = format!("file://{}", file.path().display());

        let handle = FileFetcher.fetch(&url);
        assert_eq!(handle.try_complete().unwrap().unwrap(), b"holo".to_vec());

        let missing = FileFetcher.fetch("/definitely/not/here.bin");
        assert!(matches!(missing.wait(), Err(FetchError::Io { .. })));
    }

    #[test]
    fn test_dropped_sender_reads_as_abort() {
        let (tx, rx) = flume::bounded::<FetchResult>(1);
        let handle = FetchHandle::new("x.bin", rx);
        assert!(handle.try_complete().is_none());
        drop(tx);
        assert!(matches!(handle.try_complete(), Some(Err(FetchError::Aborted { .. }))));
    }
}
