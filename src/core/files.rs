//! Lookup of archived attachment files.
//!
//! Legacy file paths were written by several generations of the application
//! with different filesystem encodings, so finding a file on disk takes a
//! few attempts before giving up.

use crate::core::error::Result;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use ulid::Ulid;

#[derive(Clone, Debug, PartialEq)]
pub struct FileInfo {
    pub backend: String,
    /// Backend-relative path or id.
    pub file_id: String,
    pub size: u64,
    pub checksum: String,
}

pub trait FileResolver {
    /// `None` when the file cannot be found under any archive root.
    fn resolve(&self, archived_path: &str) -> Result<Option<FileInfo>>;

    /// Raw contents, for files migrated inline (minutes).
    fn read(&self, archived_path: &str) -> Result<Option<Vec<u8>>>;
}

pub struct ArchiveResolver {
    archive_dirs: Vec<PathBuf>,
    backend: String,
    avoid_storage_check: bool,
    symlink: Option<(String, PathBuf)>,
}

impl ArchiveResolver {
    pub fn new(archive_dirs: Vec<PathBuf>, backend: &str) -> Self {
        Self {
            archive_dirs,
            backend: backend.to_string(),
            avoid_storage_check: false,
            symlink: None,
        }
    }

    /// Trust the archive: skip size and checksum computation.
    pub fn avoid_storage_check(mut self, avoid: bool) -> Self {
        self.avoid_storage_check = avoid;
        self
    }

    /// Files whose path is not valid UTF-8 get a symlink with a clean name
    /// in `target`, served by `backend`.
    pub fn with_symlinks(mut self, backend: &str, target: PathBuf) -> Self {
        self.symlink = Some((backend.to_string(), target));
        self
    }

    fn locate(&self, root: &Path, archived_path: &str) -> io::Result<Option<PathBuf>> {
        let direct = root.join(archived_path);
        if archived_path.is_ascii() || direct.exists() {
            return Ok(direct.exists().then_some(direct));
        }
        for candidate in encoded_variants(archived_path) {
            let path = root.join(candidate);
            if path.exists() {
                return Ok(Some(path));
            }
        }
        // Some names are mangled beyond recovery; a lone file in the
        // expected directory is the one we want.
        let Some(parent) = direct.parent() else {
            return Ok(None);
        };
        let entries = match fs::read_dir(parent) {
            Ok(entries) => entries.collect::<io::Result<Vec<_>>>()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match entries.as_slice() {
            [only] => Ok(Some(only.path())),
            _ => Ok(None),
        }
    }

    fn describe(&self, root: &Path, path: &Path) -> Result<Option<FileInfo>> {
        let (size, checksum) = if self.avoid_storage_check {
            (0, String::new())
        } else {
            match file_checksum(path) {
                Ok(found) => found,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        };
        let rel = path.strip_prefix(root).unwrap_or(path);
        if let Some(rel) = rel.to_str() {
            return Ok(Some(FileInfo {
                backend: self.backend.clone(),
                file_id: rel.to_string(),
                size,
                checksum,
            }));
        }
        let Some((backend, target)) = &self.symlink else {
            return Ok(None);
        };
        let name = Ulid::new().to_string();
        make_symlink(path, &target.join(&name))?;
        Ok(Some(FileInfo {
            backend: backend.clone(),
            file_id: name,
            size,
            checksum,
        }))
    }
}

impl FileResolver for ArchiveResolver {
    fn resolve(&self, archived_path: &str) -> Result<Option<FileInfo>> {
        for root in &self.archive_dirs {
            if let Some(path) = self.locate(root, archived_path)? {
                return self.describe(root, &path);
            }
        }
        Ok(None)
    }

    fn read(&self, archived_path: &str) -> Result<Option<Vec<u8>>> {
        for root in &self.archive_dirs {
            if let Some(path) = self.locate(root, archived_path)? {
                return Ok(Some(fs::read(path)?));
            }
        }
        Ok(None)
    }
}

/// The same name as Latin-1 bytes, then with non-ASCII characters replaced.
fn encoded_variants(name: &str) -> Vec<OsString> {
    let mut out = Vec::new();
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        if name.chars().all(|c| (c as u32) <= 0xff) {
            out.push(OsString::from_vec(name.chars().map(|c| c as u8).collect()));
        }
    }
    out.push(OsString::from(
        name.chars()
            .map(|c| if c.is_ascii() { c } else { '?' })
            .collect::<String>(),
    ));
    out
}

fn file_checksum(path: &Path) -> io::Result<(u64, String)> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Ok((size, hex))
}

#[cfg(unix)]
fn make_symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn make_symlink(original: &Path, link: &Path) -> io::Result<()> {
    fs::copy(original, link).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_file_with_checksum() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("2010/a")).unwrap();
        fs::write(tmp.path().join("2010/a/slides.pdf"), b"abc").unwrap();
        let r = ArchiveResolver::new(vec![tmp.path().to_path_buf()], "legacy");
        let info = r.resolve("2010/a/slides.pdf").unwrap().unwrap();
        assert_eq!(info.backend, "legacy");
        assert_eq!(info.file_id, "2010/a/slides.pdf");
        assert_eq!(info.size, 3);
        assert_eq!(
            info.checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn later_archive_roots_are_searched() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        fs::write(second.path().join("x.txt"), b"x").unwrap();
        let r = ArchiveResolver::new(
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            "fs",
        );
        assert!(r.resolve("x.txt").unwrap().is_some());
        assert!(r.resolve("missing.txt").unwrap().is_none());
    }

    #[test]
    fn single_candidate_directory_fallback() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("d")).unwrap();
        fs::write(tmp.path().join("d/R_sum_.pdf"), b"x").unwrap();
        let r = ArchiveResolver::new(vec![tmp.path().to_path_buf()], "fs");
        let info = r.resolve("d/Résumé.pdf").unwrap().unwrap();
        assert_eq!(info.file_id, "d/R_sum_.pdf");

        fs::write(tmp.path().join("d/other.pdf"), b"y").unwrap();
        assert!(r.resolve("d/Résumé.pdf").unwrap().is_none());
    }

    #[test]
    fn storage_check_can_be_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("big.bin"), vec![0u8; 2048]).unwrap();
        let r = ArchiveResolver::new(vec![tmp.path().to_path_buf()], "fs").avoid_storage_check(true);
        let info = r.resolve("big.bin").unwrap().unwrap();
        assert_eq!(info.size, 0);
        assert!(info.checksum.is_empty());
    }

    #[test]
    fn read_returns_contents() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("minutes.html"), b"<p>hi</p>").unwrap();
        let r = ArchiveResolver::new(vec![tmp.path().to_path_buf()], "fs");
        assert_eq!(r.read("minutes.html").unwrap().unwrap(), b"<p>hi</p>");
        assert!(r.read("nope.html").unwrap().is_none());
    }
}
