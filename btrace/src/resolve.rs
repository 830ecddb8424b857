//! Resolves the debug file for a primary object: build-id, `.gnu_debuglink`,
//! `.gnu_debugaltlink`, MiniDebugInfo (`.gnu_debugdata`), and dSYM bundles.
//!
//! The probing order follows the GNU/gdb convention: build-id first (unconditional), then
//! debuglink (CRC-32 gated), then MiniDebugInfo, then debugaltlink, then dSYM on Mach-O. Every
//! actual byte read is routed through [`ByteSource`] so a caller embedding this crate in a
//! constrained host can substitute its own file access.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use btrace_common::DSymPathExt;

/// Default root under which distributions publish build-id keyed debug files.
const DEFAULT_DEBUG_ROOT: &str = "/usr/lib/debug";

/// A read-only byte source, the trait boundary the resolver uses for all file access.
///
/// A `std::fs`-backed implementation is provided via [`FsByteSource`] for convenience, but is
/// not itself part of the specified core: callers may substitute views backed by a sandboxed
/// filesystem, a remote symbol store, or an in-memory cache.
pub trait ByteSource {
    /// Reads `len` bytes starting at `offset` from the object located at `path`.
    fn read_range(&self, path: &Path, offset: u64, len: usize) -> io::Result<Cow<'_, [u8]>>;

    /// Reads the entire object located at `path`.
    fn read_all(&self, path: &Path) -> io::Result<Cow<'_, [u8]>>;

    /// Returns whether `path` exists and is readable.
    fn exists(&self, path: &Path) -> bool;
}

/// A [`ByteSource`] backed directly by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsByteSource;

impl ByteSource for FsByteSource {
    fn read_range(&self, path: &Path, offset: u64, len: usize) -> io::Result<Cow<'_, [u8]>> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = fs::File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(Cow::Owned(buf))
    }

    fn read_all(&self, path: &Path) -> io::Result<Cow<'_, [u8]>> {
        Ok(Cow::Owned(fs::read(path)?))
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Classifies why debug-file resolution failed or was skipped, per the error kinds of §7.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No candidate path existed or was readable.
    #[error("no debug file found at {0}")]
    NotFound(PathBuf),

    /// A candidate was found but its CRC-32 did not match the recorded one.
    #[error("debuglink CRC mismatch for {0}")]
    CrcMismatch(PathBuf),

    /// A dSYM sibling was found but its build UUID did not match the primary's.
    #[error("dSYM UUID mismatch for {0}")]
    UuidMismatch(PathBuf),

    /// MiniDebugInfo decompression failed.
    #[error("minidebuginfo decompression failed")]
    MiniDebugInfo(#[from] MiniDebugInfoError),

    /// An I/O error occurred while probing a candidate.
    #[error("I/O error resolving debug file")]
    Io(#[from] io::Error),
}

/// The record used to probe for a separate debug file, gathered from the primary container.
#[derive(Debug, Clone, Default)]
pub struct DebugFileHints {
    /// Hex-encoded build-id, if the primary carries an `NT_GNU_BUILD_ID` note.
    pub build_id: Option<String>,
    /// `.gnu_debuglink` target file name and its recorded CRC-32.
    pub debuglink: Option<(String, u32)>,
    /// `.gnu_debugaltlink` target file name.
    pub debugaltlink: Option<String>,
    /// Raw `.gnu_debugdata` section contents (XZ-compressed ELF), if present.
    pub debugdata: Option<Vec<u8>>,
}

/// The outcome of a successful resolution.
pub enum ResolvedDebugFile {
    /// A separate file was found at this path; the caller should re-enter the container reader.
    Path(PathBuf),
    /// MiniDebugInfo was decompressed in-memory; the caller should re-enter the ELF reader with
    /// this buffer as an override view.
    InMemory(Vec<u8>),
}

/// Overrides to the default search roots, analogous to the spec's `StateConfig` override.
#[derive(Debug, Clone)]
pub struct SearchPaths {
    /// Root directories searched for build-id keyed debug files (default: `/usr/lib/debug`).
    pub debug_roots: Vec<PathBuf>,
}

impl Default for SearchPaths {
    fn default() -> Self {
        SearchPaths {
            debug_roots: vec![PathBuf::from(DEFAULT_DEBUG_ROOT)],
        }
    }
}

/// Attempts to resolve a separate debug file for `primary`, given the hints extracted from its
/// container, following the probing order of §4.5.
pub fn resolve_debug_file(
    source: &impl ByteSource,
    primary: &Path,
    hints: &DebugFileHints,
    search: &SearchPaths,
) -> Result<ResolvedDebugFile, ResolveError> {
    if let Some(build_id) = &hints.build_id {
        if let Some(path) = resolve_build_id(source, build_id, search) {
            return Ok(ResolvedDebugFile::Path(path));
        }
    }

    if let Some((name, crc)) = &hints.debuglink {
        match resolve_debuglink(source, primary, name, *crc) {
            Ok(Some(path)) => return Ok(ResolvedDebugFile::Path(path)),
            Ok(None) => {}
            Err(err) => tracing::debug!(error = %err, "debuglink candidate rejected"),
        }
    }

    if let Some(data) = &hints.debugdata {
        let decompressed = decompress_minidebuginfo(data, MiniDebugInfoLimits::default())?;
        return Ok(ResolvedDebugFile::InMemory(decompressed));
    }

    if let Some(name) = &hints.debugaltlink {
        if let Some(path) = resolve_debugaltlink(source, primary, name) {
            return Ok(ResolvedDebugFile::Path(path));
        }
    }

    if let Some(path) = primary.dsym_parent().and_then(|dsym| dsym.resolve_dsym()) {
        if source.exists(&path) {
            return Ok(ResolvedDebugFile::Path(path));
        }
    }

    Err(ResolveError::NotFound(primary.to_path_buf()))
}

/// Builds the `/usr/lib/debug/.build-id/XX/YYYY….debug` path and returns it if it exists.
fn resolve_build_id(
    source: &impl ByteSource,
    build_id_hex: &str,
    search: &SearchPaths,
) -> Option<PathBuf> {
    if build_id_hex.len() < 3 {
        return None;
    }
    let (prefix, rest) = build_id_hex.split_at(2);

    for root in &search.debug_roots {
        let candidate = root
            .join(".build-id")
            .join(prefix)
            .join(format!("{rest}.debug"));
        if source.exists(&candidate) {
            return Some(candidate);
        }
    }

    None
}

/// Tries `<dir(primary)>/<name>`, then `<dir(primary)>/.debug/<name>`, then
/// `/usr/lib/debug/<dir(primary)>/<name>`, verifying the CRC-32 of each candidate.
fn resolve_debuglink(
    source: &impl ByteSource,
    primary: &Path,
    name: &str,
    expected_crc: u32,
) -> Result<Option<PathBuf>, ResolveError> {
    let dir = primary.parent().unwrap_or_else(|| Path::new(""));

    let candidates = [
        dir.join(name),
        dir.join(".debug").join(name),
        PathBuf::from(DEFAULT_DEBUG_ROOT).join(dir.strip_prefix("/").unwrap_or(dir)).join(name),
    ];

    for candidate in candidates {
        if !source.exists(&candidate) {
            continue;
        }

        let data = source.read_all(&candidate)?;
        let actual_crc = crc32fast::hash(&data);
        if actual_crc == expected_crc {
            return Ok(Some(candidate));
        }

        tracing::debug!(path = %candidate.display(), "debuglink CRC mismatch, trying next candidate");
    }

    Ok(None)
}

/// Identical path logic to [`resolve_debuglink`], but without CRC verification: debugaltlink
/// targets are verified by the DWARF reader matching `DW_FORM_GNU_ref_alt` offsets instead.
fn resolve_debugaltlink(source: &impl ByteSource, primary: &Path, name: &str) -> Option<PathBuf> {
    let dir = primary.parent().unwrap_or_else(|| Path::new(""));

    let candidates = [
        dir.join(name),
        dir.join(".debug").join(name),
        PathBuf::from(DEFAULT_DEBUG_ROOT).join(dir.strip_prefix("/").unwrap_or(dir)).join(name),
    ];

    candidates.into_iter().find(|candidate| source.exists(candidate))
}

/// Caps imposed on MiniDebugInfo decompression, resolving §9's open question (b).
#[derive(Debug, Clone, Copy)]
pub struct MiniDebugInfoLimits {
    /// Maximum cumulative number of decompressed bytes before aborting.
    pub max_output_size: usize,
    /// Maximum number of consecutive calls to the decoder that make zero progress.
    pub max_zero_progress_iterations: u32,
}

impl Default for MiniDebugInfoLimits {
    fn default() -> Self {
        MiniDebugInfoLimits {
            max_output_size: 256 * 1024 * 1024,
            max_zero_progress_iterations: 2,
        }
    }
}

/// Errors surfaced while decompressing a `.gnu_debugdata` (MiniDebugInfo) XZ stream.
#[derive(Debug, thiserror::Error)]
pub enum MiniDebugInfoError {
    /// The decoder made no progress for [`MiniDebugInfoLimits::max_zero_progress_iterations`]
    /// consecutive calls; the stream is presumed corrupt or adversarial.
    #[error("minidebuginfo decompression made no progress")]
    NoProgress,

    /// Decompressed output exceeded [`MiniDebugInfoLimits::max_output_size`].
    #[error("minidebuginfo output exceeded the configured size limit")]
    OutputTooLarge,

    /// The underlying LZMA2/XZ decoder reported a stream error.
    #[error("xz stream error: {0}")]
    Xz(#[from] xz2::stream::Error),
}

/// Decompresses a `.gnu_debugdata` XZ stream, enforcing the caps in [`MiniDebugInfoLimits`].
///
/// The XZ container, BCJ filter chain, and LZMA2 range coder themselves are delegated to
/// [`xz2`] (liblzma bindings); this function only drives the streaming decode loop and the
/// two caps that the C implementation leaves to the caller.
pub fn decompress_minidebuginfo(
    input: &[u8],
    limits: MiniDebugInfoLimits,
) -> Result<Vec<u8>, MiniDebugInfoError> {
    use xz2::stream::{Action, Status, Stream};

    let mut stream = Stream::new_stream_decoder(u64::MAX, 0)?;
    let mut output = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    let mut zero_progress = 0u32;

    let mut consumed = 0usize;
    loop {
        let total_in_before = stream.total_in();
        let total_out_before = stream.total_out();

        let action = if consumed >= input.len() {
            Action::Finish
        } else {
            Action::Run
        };

        let status = stream.process(&input[consumed..], &mut chunk, action)?;

        let produced = (stream.total_out() - total_out_before) as usize;
        output.extend_from_slice(&chunk[..produced]);
        if output.len() > limits.max_output_size {
            return Err(MiniDebugInfoError::OutputTooLarge);
        }

        consumed += (stream.total_in() - total_in_before) as usize;

        if produced == 0 && stream.total_in() == total_in_before {
            zero_progress += 1;
            if zero_progress >= limits.max_zero_progress_iterations {
                return Err(MiniDebugInfoError::NoProgress);
            }
        } else {
            zero_progress = 0;
        }

        if status == Status::StreamEnd {
            break;
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemSource(Mutex<HashMap<PathBuf, Vec<u8>>>);

    impl MemSource {
        fn insert(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
            self.0.lock().unwrap().insert(path.into(), data);
        }
    }

    impl ByteSource for MemSource {
        fn read_range(&self, path: &Path, offset: u64, len: usize) -> io::Result<Cow<'_, [u8]>> {
            let guard = self.0.lock().unwrap();
            let data = guard
                .get(path)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
            let start = offset as usize;
            Ok(Cow::Owned(data[start..start + len].to_vec()))
        }

        fn read_all(&self, path: &Path) -> io::Result<Cow<'_, [u8]>> {
            let guard = self.0.lock().unwrap();
            guard
                .get(path)
                .cloned()
                .map(Cow::Owned)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn exists(&self, path: &Path) -> bool {
            self.0.lock().unwrap().contains_key(path)
        }
    }

    #[test]
    fn test_resolve_build_id() {
        let source = MemSource::default();
        source.insert(
            "/usr/lib/debug/.build-id/f1/c3bcc0279865fe3058404b2831d9e64135386c.debug",
            vec![1, 2, 3],
        );

        let search = SearchPaths::default();
        let path = resolve_build_id(&source, "f1c3bcc0279865fe3058404b2831d9e64135386c", &search)
            .expect("build-id path should resolve");
        assert_eq!(
            path,
            PathBuf::from("/usr/lib/debug/.build-id/f1/c3bcc0279865fe3058404b2831d9e64135386c.debug")
        );
    }

    #[test]
    fn test_resolve_build_id_missing() {
        let source = MemSource::default();
        let search = SearchPaths::default();
        assert!(resolve_build_id(&source, "deadbeef", &search).is_none());
    }

    #[test]
    fn test_resolve_debuglink_sibling() {
        let source = MemSource::default();
        let data = b"debug contents".to_vec();
        let crc = crc32fast::hash(&data);
        source.insert("/bin/app.debug", data);

        let resolved = resolve_debuglink(&source, Path::new("/bin/app"), "app.debug", crc)
            .unwrap()
            .expect("sibling debuglink should resolve");
        assert_eq!(resolved, PathBuf::from("/bin/app.debug"));
    }

    #[test]
    fn test_resolve_debuglink_crc_mismatch_falls_through() {
        let source = MemSource::default();
        source.insert("/bin/app.debug", b"corrupted".to_vec());
        source.insert("/bin/.debug/app.debug", b"debug contents".to_vec());
        let crc = crc32fast::hash(b"debug contents");

        let resolved = resolve_debuglink(&source, Path::new("/bin/app"), "app.debug", crc)
            .unwrap()
            .expect("the .debug/ sibling should be tried after the CRC mismatch");
        assert_eq!(resolved, PathBuf::from("/bin/.debug/app.debug"));
    }

    #[test]
    fn test_resolve_debuglink_all_candidates_rejected() {
        let source = MemSource::default();
        source.insert("/bin/app.debug", b"corrupted".to_vec());

        let resolved =
            resolve_debuglink(&source, Path::new("/bin/app"), "app.debug", 0xdead_beef).unwrap();
        assert!(resolved.is_none());
    }

    fn xz_compress(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_minidebuginfo_round_trip() {
        let original = b"a fake ELF symbol table payload, repeated ".repeat(200);
        let compressed = xz_compress(&original);

        let decompressed =
            decompress_minidebuginfo(&compressed, MiniDebugInfoLimits::default()).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn test_minidebuginfo_output_too_large() {
        let original = vec![0u8; 64 * 1024];
        let compressed = xz_compress(&original);

        let limits = MiniDebugInfoLimits {
            max_output_size: 1024,
            ..MiniDebugInfoLimits::default()
        };

        let err = decompress_minidebuginfo(&compressed, limits).unwrap_err();
        assert!(matches!(err, MiniDebugInfoError::OutputTooLarge));
    }

    /// Matches §8 scenario S4: an ELF with only `.gnu_debugdata` (MiniDebugInfo) resolves to the
    /// decompressed in-memory payload, ahead of the (absent) debugaltlink fallback.
    #[test]
    fn test_resolve_debug_file_minidebuginfo_only() {
        let source = MemSource::default();
        let original = b"a fake symbol table, repeated ".repeat(100);
        let hints = DebugFileHints {
            debugdata: Some(xz_compress(&original)),
            ..DebugFileHints::default()
        };

        let resolved =
            resolve_debug_file(&source, Path::new("/bin/app"), &hints, &SearchPaths::default())
                .expect("minidebuginfo should resolve");

        match resolved {
            ResolvedDebugFile::InMemory(data) => assert_eq!(data, original),
            ResolvedDebugFile::Path(_) => panic!("expected an in-memory result"),
        }
    }

    #[test]
    fn test_resolve_debug_file_debugaltlink_sibling() {
        let source = MemSource::default();
        source.insert("/bin/app.altdebug", b"alt debug contents".to_vec());

        let hints = DebugFileHints {
            debugaltlink: Some("app.altdebug".to_owned()),
            ..DebugFileHints::default()
        };

        let resolved =
            resolve_debug_file(&source, Path::new("/bin/app"), &hints, &SearchPaths::default())
                .expect("debugaltlink sibling should resolve");
        assert!(matches!(resolved, ResolvedDebugFile::Path(p) if p == Path::new("/bin/app.altdebug")));
    }

    #[test]
    fn test_resolve_debug_file_falls_through_in_probing_order() {
        // build-id misses, debuglink CRC fails, no debugdata, debugaltlink resolves.
        let source = MemSource::default();
        source.insert("/bin/app.debug", b"corrupted".to_vec());
        source.insert("/bin/app.altdebug", b"alt debug contents".to_vec());

        let hints = DebugFileHints {
            build_id: Some("deadbeef".to_owned()),
            debuglink: Some(("app.debug".to_owned(), 0xdead_beef)),
            debugaltlink: Some("app.altdebug".to_owned()),
            debugdata: None,
        };

        let resolved =
            resolve_debug_file(&source, Path::new("/bin/app"), &hints, &SearchPaths::default())
                .expect("should fall through to debugaltlink");
        assert!(matches!(resolved, ResolvedDebugFile::Path(p) if p == Path::new("/bin/app.altdebug")));
    }

    #[test]
    fn test_resolve_debug_file_no_candidates_not_found() {
        let source = MemSource::default();
        let err = resolve_debug_file(
            &source,
            Path::new("/bin/app"),
            &DebugFileHints::default(),
            &SearchPaths::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }
}
