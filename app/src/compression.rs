// ==============================================================================
// compression.rs - Plain/Gzip Stream Helpers
// ==============================================================================
// Description: Opens output and input streams, gzip-compressed by extension
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Extension that selects gzip compression
pub const GZIP_EXTENSION: &str = ".gz";

/// Output stream that must be finished explicitly so gzip trailers and
/// write errors are not lost on drop
pub enum OutputStream {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputStream {
    pub fn create(path: &Path, gzip: bool) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(if gzip {
            OutputStream::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            OutputStream::Plain(file)
        })
    }

    /// Flush everything and close the stream
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputStream::Plain(mut writer) => writer.flush(),
            OutputStream::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputStream::Plain(w) => w.write(buf),
            OutputStream::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputStream::Plain(w) => w.flush(),
            OutputStream::Gzip(w) => w.flush(),
        }
    }
}

/// File written under a temporary name and moved into place on `commit`
///
/// Dropping it without committing removes the partial file.
pub struct AtomicOutput {
    stream: Option<OutputStream>,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl AtomicOutput {
    pub fn create(path: &Path, gzip: bool) -> io::Result<Self> {
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let stream = OutputStream::create(&tmp_path, gzip)?;
        Ok(Self {
            stream: Some(stream),
            tmp_path,
            final_path: path.to_path_buf(),
        })
    }

    pub fn commit(mut self) -> io::Result<PathBuf> {
        let finished = match self.stream.take() {
            Some(stream) => stream.finish(),
            None => Ok(()),
        };
        if let Err(e) = finished.and_then(|_| std::fs::rename(&self.tmp_path, &self.final_path)) {
            let _ = std::fs::remove_file(&self.tmp_path);
            return Err(e);
        }
        Ok(self.final_path.clone())
    }
}

impl Write for AtomicOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.write(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "output already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicOutput {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

/// Whether a path name ends in `.gz`
pub fn is_gzip_path(path: &Path) -> bool {
    path.to_string_lossy().ends_with(GZIP_EXTENSION)
}

/// Open a file for line reading, decompressing `.gz` files
pub fn open_input(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    Ok(if is_gzip_path(path) {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}
