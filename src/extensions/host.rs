//! Host functions exposed to extension scripts
//!
//! This is the complete list of capabilities a handler has beyond the Rhai
//! core language: file operations, archive extraction, path helpers, HTTP
//! GET and logging. There is no process execution and no environment
//! access.
//!
//! ## Categories
//!
//! - **fs**: read_file, read_file_bytes, write_file, append_file, exists,
//!   is_file, is_dir, mkdir, list_dir, glob_list, copy_file, move_file, remove
//! - **archive**: extract(archive, dest)
//! - **paths**: join_path, basename, dirname, file_stem
//! - **http**: http_get, http_get_bytes, http_download
//! - **log**: log, debug, warn

use super::archive;
use crate::output;
use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

const HOST_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

type HostResult<T> = Result<T, Box<EvalAltResult>>;

/// Register every host function; log lines are prefixed with `ext_id`.
pub fn register_all(engine: &mut Engine, ext_id: &str) {
    // fs
    engine.register_fn("read_file", read_file);
    engine.register_fn("read_file_bytes", read_file_bytes);
    engine.register_fn("write_file", write_file);
    engine.register_fn("write_file", write_file_bytes);
    engine.register_fn("append_file", append_file);
    engine.register_fn("append_file", append_file_bytes);
    engine.register_fn("exists", |path: &str| Path::new(path).exists());
    engine.register_fn("is_file", |path: &str| Path::new(path).is_file());
    engine.register_fn("is_dir", |path: &str| Path::new(path).is_dir());
    engine.register_fn("mkdir", mkdir);
    engine.register_fn("list_dir", list_dir);
    engine.register_fn("glob_list", glob_list);
    engine.register_fn("copy_file", copy_file);
    engine.register_fn("move_file", move_file);
    engine.register_fn("remove", remove);

    // archive
    engine.register_fn("extract", |archive_path: &str, dest: &str| -> HostResult<()> {
        archive::extract(Path::new(archive_path), Path::new(dest)).map_err(Into::into)
    });

    // paths
    engine.register_fn("join_path", join_path);
    engine.register_fn("basename", basename);
    engine.register_fn("dirname", dirname);
    engine.register_fn("file_stem", file_stem);

    // http
    engine.register_fn("http_get", http_get);
    engine.register_fn("http_get_bytes", http_get_bytes);
    engine.register_fn("http_download", http_download);

    // log
    let id = ext_id.to_string();
    engine.register_fn("log", move |msg: &str| output::detail(&format!("[{}] {}", id, msg)));
    let id = ext_id.to_string();
    engine.register_fn("debug", move |msg: &str| {
        output::detail(&format!("[{}:debug] {}", id, msg))
    });
    let id = ext_id.to_string();
    engine.register_fn("warn", move |msg: &str| {
        output::warning(&format!("[{}] {}", id, msg))
    });
}

fn read_file(path: &str) -> HostResult<String> {
    std::fs::read_to_string(path).map_err(|e| format!("read {} failed: {}", path, e).into())
}

fn read_file_bytes(path: &str) -> HostResult<Blob> {
    std::fs::read(path).map_err(|e| format!("read {} failed: {}", path, e).into())
}

fn write_file(path: &str, content: &str) -> HostResult<()> {
    write_bytes(path, content.as_bytes())
}

fn write_file_bytes(path: &str, content: Blob) -> HostResult<()> {
    write_bytes(path, &content)
}

fn write_bytes(path: &str, content: &[u8]) -> HostResult<()> {
    let path = Path::new(path);
    crate::fs_utils::ensure_parent_dir(path)
        .and_then(|_| std::fs::write(path, content))
        .map_err(|e| format!("write {} failed: {}", path.display(), e).into())
}

fn append_file(path: &str, content: &str) -> HostResult<()> {
    append_bytes(path, content.as_bytes())
}

fn append_file_bytes(path: &str, content: Blob) -> HostResult<()> {
    append_bytes(path, &content)
}

/// Create or extend `path`; lets a script write a large body in chunks.
fn append_bytes(path: &str, content: &[u8]) -> HostResult<()> {
    let path = Path::new(path);
    crate::fs_utils::ensure_parent_dir(path)
        .and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
        })
        .and_then(|mut file| file.write_all(content))
        .map_err(|e| format!("append {} failed: {}", path.display(), e).into())
}

fn mkdir(path: &str) -> HostResult<()> {
    std::fs::create_dir_all(path).map_err(|e| format!("mkdir {} failed: {}", path, e).into())
}

/// Entry paths of a directory, sorted.
fn list_dir(path: &str) -> HostResult<Array> {
    let entries = std::fs::read_dir(path).map_err(|e| format!("list {} failed: {}", path, e))?;
    let mut paths: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().to_string_lossy().to_string())
        .collect();
    paths.sort();
    Ok(paths.into_iter().map(Dynamic::from).collect())
}

fn glob_list(pattern: &str) -> Array {
    glob::glob(pattern)
        .map(|paths| {
            paths
                .filter_map(|p| p.ok())
                .map(|p| Dynamic::from(p.to_string_lossy().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn copy_file(src: &str, dest: &str) -> HostResult<()> {
    crate::fs_utils::ensure_parent_dir(Path::new(dest))
        .and_then(|_| std::fs::copy(src, dest))
        .map(|_| ())
        .map_err(|e| format!("copy {} -> {} failed: {}", src, dest, e).into())
}

fn move_file(src: &str, dest: &str) -> HostResult<()> {
    crate::fs_utils::ensure_parent_dir(Path::new(dest))
        .and_then(|_| std::fs::rename(src, dest))
        .map_err(|e| format!("move {} -> {} failed: {}", src, dest, e).into())
}

/// Remove a file or a whole directory tree. Missing paths are fine.
fn remove(path: &str) -> HostResult<()> {
    let target = Path::new(path);
    let result = match std::fs::symlink_metadata(target) {
        Err(_) => return Ok(()),
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(target),
        Ok(_) => std::fs::remove_file(target),
    };
    result.map_err(|e| format!("remove {} failed: {}", path, e).into())
}

fn join_path(a: &str, b: &str) -> String {
    Path::new(a).join(b).to_string_lossy().to_string()
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn dirname(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn get(url: &str) -> HostResult<ureq::Response> {
    ureq::get(url)
        .timeout(HOST_HTTP_TIMEOUT)
        .set("User-Agent", concat!("salt/", env!("CARGO_PKG_VERSION")))
        .call()
        .map_err(|e| format!("HTTP GET {} failed: {}", url, e).into())
}

fn http_get(url: &str) -> HostResult<String> {
    get(url)?
        .into_string()
        .map_err(|e| format!("failed to read response from {}: {}", url, e).into())
}

fn http_get_bytes(url: &str) -> HostResult<Blob> {
    let mut body = Vec::new();
    get(url)?
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| format!("failed to read response from {}: {}", url, e))?;
    Ok(body)
}

/// Stream `url` into `dest`, returning `dest`.
///
/// The body goes to a temp file beside `dest`, which replaces `dest` only
/// once the response has been read to the end.
fn http_download(url: &str, dest: &str) -> HostResult<String> {
    let dest_path = Path::new(dest);
    let write_err = |e: std::io::Error| -> Box<EvalAltResult> {
        format!("write {} failed: {}", dest, e).into()
    };
    crate::fs_utils::ensure_parent_dir(dest_path).map_err(write_err)?;
    let dir = dest_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;

    let mut body = get(url)?.into_reader();
    std::io::copy(&mut body, temp.as_file_mut())
        .map_err(|e| format!("failed to read response from {}: {}", url, e))?;
    temp.persist(dest_path).map_err(|e| write_err(e.error))?;
    Ok(dest.to_string())
}
