//! Output sink for extracted payloads.
//!
//! Payloads are staged to a temporary file first (they need hashing before
//! the final name is known), then handed to an [`Emitter`] under their
//! rewritten relative path.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

/// What happened to one emitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Written; carries the byte count
    Written(u64),
    /// Target already existed and was left alone
    Skipped,
}

/// Destination for staged payload files, keyed by relative path.
pub trait Emitter: Send + Sync {
    fn emit(&self, target: &str, staged: &Path) -> io::Result<EmitOutcome>;

    /// Whether `target` is already there. Lets callers skip fetching it at all.
    fn exists(&self, _target: &str) -> io::Result<bool> {
        Ok(false)
    }

    /// Short backend name for log lines
    fn name(&self) -> &'static str;
}

impl<E: Emitter + ?Sized> Emitter for Box<E> {
    fn emit(&self, target: &str, staged: &Path) -> io::Result<EmitOutcome> {
        (**self).emit(target, staged)
    }

    fn exists(&self, target: &str) -> io::Result<bool> {
        (**self).exists(target)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Writes under a base directory with atomic tmp→rename. Existing files are skipped.
#[derive(Debug, Clone)]
pub struct FileSystemEmitter {
    base_path: PathBuf,
}

impl FileSystemEmitter {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a target under the base directory. Absolute paths and `..` are rejected.
    pub fn resolve(&self, target: &str) -> io::Result<PathBuf> {
        let relative = Path::new(target);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if target.is_empty() || escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("target path must stay inside the output directory: {target:?}"),
            ));
        }
        Ok(self.base_path.join(relative))
    }
}

impl Emitter for FileSystemEmitter {
    fn exists(&self, target: &str) -> io::Result<bool> {
        Ok(self.resolve(target)?.exists())
    }

    fn emit(&self, target: &str, staged: &Path) -> io::Result<EmitOutcome> {
        let final_path = self.resolve(target)?;
        if final_path.exists() {
            log::debug!("{} exists, skipping", final_path.display());
            return Ok(EmitOutcome::Skipped);
        }
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = final_path.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let written = {
            let mut src = File::open(staged)?;
            let mut dst = File::create(&tmp_path)?;
            io::copy(&mut src, &mut dst)?
        };
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        Ok(EmitOutcome::Written(written))
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}
