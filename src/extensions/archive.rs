//! Archive unpacking for extension packages and handler scripts.
//!
//! The format is sniffed from the leading bytes and only then guessed from
//! the file name, so `.saltextension` packages need no special casing.
//! Entries that would land outside the destination are refused.

use crate::output;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarXz,
    TarBz2,
    TarZst,
    Zip,
}

impl ArchiveFormat {
    /// Identify a format from the first bytes of a file.
    pub fn sniff(head: &[u8]) -> Option<Self> {
        match head {
            [0x1f, 0x8b, ..] => Some(Self::TarGz),
            [0xfd, b'7', b'z', b'X', b'Z', 0x00, ..] => Some(Self::TarXz),
            [b'B', b'Z', b'h', ..] => Some(Self::TarBz2),
            [0x28, 0xb5, 0x2f, 0xfd, ..] => Some(Self::TarZst),
            [b'P', b'K', 0x03, 0x04, ..] | [b'P', b'K', 0x05, 0x06, ..] => Some(Self::Zip),
            _ if head.len() >= 262 && &head[257..262] == b"ustar" => Some(Self::Tar),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Sniff `path`, falling back to its name.
    pub fn detect(path: &Path) -> Result<Self, String> {
        let mut file =
            File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
        let mut head = [0u8; 512];
        let mut filled = 0;
        while filled < head.len() {
            match file.read(&mut head[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(format!("cannot read {}: {}", path.display(), e)),
            }
        }

        Self::sniff(&head[..filled])
            .or_else(|| Self::from_name(&path.to_string_lossy()))
            .ok_or_else(|| format!("unrecognized archive format: {}", path.display()))
    }
}

/// Unpack `archive` into `dest`, creating `dest` if needed.
pub fn extract(archive: &Path, dest: &Path) -> Result<(), String> {
    let format = ArchiveFormat::detect(archive)?;
    std::fs::create_dir_all(dest)
        .map_err(|e| format!("cannot create {}: {}", dest.display(), e))?;

    let name = archive
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());
    let pb = output::spinner(&format!("extracting {}", name));

    let result = match format {
        ArchiveFormat::Zip => extract_zip(archive, dest),
        tar_format => open_tar_stream(archive, tar_format).and_then(|r| extract_tar(r, dest)),
    };
    pb.finish_and_clear();

    result?;
    output::detail(&format!("extracted {} to {}", name, dest.display()));
    Ok(())
}

fn open_tar_stream(archive: &Path, format: ArchiveFormat) -> Result<Box<dyn Read>, String> {
    let file =
        File::open(archive).map_err(|e| format!("cannot open {}: {}", archive.display(), e))?;
    let reader = BufReader::new(file);

    Ok(match format {
        ArchiveFormat::Tar => Box::new(reader),
        ArchiveFormat::TarGz => Box::new(flate2::read::GzDecoder::new(reader)),
        ArchiveFormat::TarXz => Box::new(xz2::read::XzDecoder::new(reader)),
        ArchiveFormat::TarBz2 => Box::new(bzip2::read::BzDecoder::new(reader)),
        ArchiveFormat::TarZst => Box::new(
            zstd::stream::read::Decoder::new(reader)
                .map_err(|e| format!("zstd init error: {}", e))?,
        ),
        ArchiveFormat::Zip => return Err("zip is not a tar stream".to_string()),
    })
}

/// Collapse `.` and `..` without touching the filesystem.
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Refuse to write through a symlink that already exists under `dest`.
fn reject_symlinked_components(dest: &Path, target: &Path) -> Result<(), String> {
    let relative = target
        .strip_prefix(dest)
        .map_err(|_| format!("entry outside destination: {}", target.display()))?;

    let mut current = dest.to_path_buf();
    for component in relative.components() {
        current.push(component);
        if let Ok(meta) = std::fs::symlink_metadata(&current)
            && meta.file_type().is_symlink()
        {
            return Err(format!("symlink in entry path: {}", current.display()));
        }
    }
    Ok(())
}

fn check_link_target(dest: &Path, link_parent: &Path, target: &Path) -> Result<(), String> {
    if target.has_root() {
        return Err(format!("absolute link target: {}", target.display()));
    }
    let resolved = normalize_lexical(&link_parent.join(target));
    if !resolved.starts_with(normalize_lexical(dest)) {
        return Err(format!(
            "link target escapes destination: {} -> {}",
            link_parent.display(),
            target.display()
        ));
    }
    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<(), String> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| format!("tar read error: {}", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| format!("tar entry error: {}", e))?;
        let path = entry
            .path()
            .map_err(|e| format!("tar path error: {}", e))?
            .into_owned();

        if path.has_root() || path.components().any(|c| c == Component::ParentDir) {
            return Err(format!("unsafe entry path: {}", path.display()));
        }
        if path.as_os_str().is_empty() || path == Path::new(".") {
            continue;
        }

        let target = dest.join(&path);
        reject_symlinked_components(dest, &target)?;

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let link = entry
                .link_name()
                .map_err(|e| format!("tar link error: {}", e))?
                .ok_or_else(|| format!("link without target: {}", path.display()))?;
            check_link_target(dest, target.parent().unwrap_or(dest), &link)?;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }
        entry
            .unpack(&target)
            .map_err(|e| format!("cannot unpack {}: {}", path.display(), e))?;
    }
    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), String> {
    let file =
        File::open(archive).map_err(|e| format!("cannot open {}: {}", archive.display(), e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| format!("zip read error: {}", e))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| format!("zip entry error: {}", e))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(format!("unsafe entry path: {}", entry.name()));
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| format!("cannot create {}: {}", target.display(), e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }
        let mut out = File::create(&target)
            .map_err(|e| format!("cannot create {}: {}", target.display(), e))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| format!("write error for {}: {}", target.display(), e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode)).ok();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_tar_gz(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_sniff_magic_bytes() {
        assert_eq!(ArchiveFormat::sniff(&[0x1f, 0x8b, 8]), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::sniff(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::sniff(b"BZh91AY"), Some(ArchiveFormat::TarBz2));
        assert_eq!(ArchiveFormat::sniff(b"plain text"), None);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(ArchiveFormat::from_name("a.TGZ"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("a.tar.zst"), Some(ArchiveFormat::TarZst));
        assert_eq!(ArchiveFormat::from_name("a.saltextension"), None);
    }

    #[test]
    fn test_extract_tar_gz_with_unusual_name() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.saltextension");
        write_tar_gz(&archive, &[("ext/package.json", "{}"), ("ext/h.rhai", "1")]);

        let dest = dir.path().join("out");
        extract(&archive, &dest).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.join("ext/package.json")).unwrap(),
            "{}"
        );
        assert!(dest.join("ext/h.rhai").is_file());
    }

    #[test]
    fn test_extract_zip() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("ext/readme.txt", options).unwrap();
            zip.write_all(b"hello").unwrap();
            zip.finish().unwrap();
        }

        let dest = dir.path().join("out");
        extract(&archive, &dest).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.join("ext/readme.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_unrecognized_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("notes.txt");
        std::fs::write(&archive, "just text").unwrap();
        let err = extract(&archive, &dir.path().join("out")).unwrap_err();
        assert!(err.contains("unrecognized archive format"));
    }

    #[test]
    fn test_link_target_escape_rejected() {
        let dest = Path::new("/tmp/dest");
        assert!(check_link_target(dest, Path::new("/tmp/dest/a"), Path::new("../b")).is_ok());
        assert!(check_link_target(dest, Path::new("/tmp/dest/a"), Path::new("../../x")).is_err());
        assert!(check_link_target(dest, Path::new("/tmp/dest"), Path::new("/etc/passwd")).is_err());
    }
}
