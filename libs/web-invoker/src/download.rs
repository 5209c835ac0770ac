//! File helpers for downloads.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tempfile::TempPath;
use url::Url;

use crate::error::{InvalidUriKind, InvokeError};
use crate::executor::Executor;
use crate::request::{RequestBuilder, Verb};

/// Prefix of temporary download files
pub const TEMP_FILE_PREFIX: &str = "download";

/// Write `content` to `path`, replacing the file.
///
/// # Errors
///
/// Returns [`InvokeError::Io`] if the file cannot be written.
pub fn write_to_file(path: &Path, content: &[u8]) -> Result<(), InvokeError> {
    std::fs::write(path, content)?;
    Ok(())
}

/// Copy `reader` into `path`, replacing the file. Returns the bytes written.
pub(crate) fn stream_to_file(path: &Path, reader: &mut dyn Read) -> Result<u64, InvokeError> {
    let mut out = BufWriter::new(File::create(path)?);
    let written = std::io::copy(reader, &mut out).map_err(InvokeError::from_io)?;
    out.flush()?;
    Ok(written)
}

/// Extension of the last path segment of `url`, without the dot
///
/// ```ignore
/// let url = Url::parse("http://example.com/images/logo.png?v=2")?;
/// assert_eq!(extension_of(&url).as_deref(), Some("png"));
/// ```
#[must_use]
pub fn extension_of(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, extension) = segment.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_owned())
}

/// Create an empty temporary file named after `url`'s extension.
///
/// The file is deleted when the returned path is dropped.
///
/// # Errors
///
/// Returns [`InvokeError::Io`] if the file cannot be created.
pub fn temp_file_for(url: &Url) -> Result<TempPath, InvokeError> {
    let suffix = extension_of(url).map(|ext| format!(".{ext}")).unwrap_or_default();
    let file = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .suffix(&suffix)
        .tempfile()?;
    Ok(file.into_temp_path())
}

/// GET `url` into a new temporary file.
///
/// # Errors
///
/// Returns the request error, [`InvokeError::HttpStatus`] for a status of 300
/// or more, or the I/O error that stopped the write.
pub fn download_to_temp_file(executor: &Executor, url: &str) -> Result<TempPath, InvokeError> {
    let target = Url::parse(url).map_err(|e| InvokeError::InvalidUri {
        url: url.to_owned(),
        kind: InvalidUriKind::ParseError,
        reason: e.to_string(),
    })?;
    let path = temp_file_for(&target)?;
    tracing::debug!(url, path = %path.display(), "downloading to temporary file");
    executor
        .execute(RequestBuilder::new(Verb::Get, target))?
        .write_to_file(&path)?;
    Ok(path)
}

/// GET `url` into `path`, replacing the file.
///
/// # Errors
///
/// See [`download_to_temp_file`].
pub fn download_to_file(executor: &Executor, url: &str, path: &Path) -> Result<(), InvokeError> {
    tracing::debug!(url, path = %path.display(), "downloading to file");
    executor.execute(RequestBuilder::get(url))?.write_to_file(path)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::InvokerConfig;
    use crate::transport::HyperTransport;
    use httpmock::prelude::*;
    use std::sync::Arc;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(&url("http://a/x/logo.png?v=1")).as_deref(), Some("png"));
        assert_eq!(extension_of(&url("http://a/archive.tar.gz")).as_deref(), Some("gz"));
        assert_eq!(extension_of(&url("http://a/x/")), None);
        assert_eq!(extension_of(&url("http://a/README")), None);
        assert_eq!(extension_of(&url("http://a/.hidden")), None);
        assert_eq!(extension_of(&url("http://a.com")), None);
    }

    #[test]
    fn test_temp_file_naming() {
        let path = temp_file_for(&url("http://a/file.json")).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("download"));
        assert!(name.ends_with(".json"));
        assert!(path.exists());
        let kept = path.to_path_buf();
        drop(path);
        assert!(!kept.exists());
    }

    #[test]
    fn test_stream_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copy.bin");
        let mut reader: &[u8] = b"0123456789";
        assert_eq!(stream_to_file(&path, &mut reader).unwrap(), 10);
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");
    }

    #[test]
    fn test_download_helpers() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::GET).path("/files/report.csv");
            then.status(200).body("a,b\n1,2\n");
        });
        server.mock(|when, then| {
            when.path("/files/missing.csv");
            then.status(404);
        });

        let executor = Executor::with_transport(Arc::new(HyperTransport::with_config(
            &InvokerConfig::for_testing(),
        )));

        let temp = download_to_temp_file(&executor, &server.url("/files/report.csv")).unwrap();
        assert!(temp.to_string_lossy().ends_with(".csv"));
        assert_eq!(std::fs::read_to_string(&temp).unwrap(), "a,b\n1,2\n");

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("report.csv");
        download_to_file(&executor, &server.url("/files/report.csv"), &target).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "a,b\n1,2\n");

        let err = download_to_file(&executor, &server.url("/files/missing.csv"), &target).unwrap_err();
        assert!(matches!(err, InvokeError::HttpStatus { status: 404, .. }));
    }
}
