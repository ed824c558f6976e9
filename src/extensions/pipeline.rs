//! Recursive post-processing of downloaded files.
//!
//! A path is handed to the first extension that claims it (by file
//! extension for files, by folder signature for directories). Every path a
//! handler produces is classified again, until only unclaimed paths remain.
//! Those are the result.
//!
//! A path is processed at most once per run. If a handler hands back a path
//! that was already processed, that path is kept as a final output instead
//! of being processed again.

use super::{ExtensionHandler, Registry};
use crate::error::ExtensionError;
use crate::output;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Upper bound on handler invocations per run
pub const DEFAULT_MAX_STEPS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File,
    Folder,
}

pub struct Pipeline<'r> {
    registry: &'r Registry,
    max_steps: usize,
}

impl<'r> Pipeline<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Handler that would process `path`, if any.
    pub fn handler_for(&self, path: &Path) -> Option<&'r dyn ExtensionHandler> {
        self.classify(path).map(|(_, handler)| handler)
    }

    fn classify(&self, path: &Path) -> Option<(Kind, &'r dyn ExtensionHandler)> {
        let meta = std::fs::metadata(path).ok()?;
        if meta.is_dir() {
            return self
                .registry
                .lookup_folder(path)
                .map(|handler| (Kind::Folder, handler));
        }
        if !meta.is_file() {
            return None;
        }
        extension_candidates(path)
            .iter()
            .find_map(|ext| self.registry.lookup_file_extension(ext))
            .map(|handler| (Kind::File, handler))
    }

    /// Process `input` to a fixed point, returning the final paths.
    ///
    /// Returns `[input]` when nothing claims it. Each call starts from an
    /// empty result set.
    pub fn process(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, ExtensionError> {
        let mut outputs: Vec<PathBuf> = Vec::new();
        let mut processed: HashSet<PathBuf> = HashSet::new();
        let mut pending = vec![input.to_path_buf()];
        let mut steps = 0;

        while let Some(current) = pending.pop() {
            let claimed = if processed.contains(&current) {
                None
            } else {
                self.classify(&current)
            };
            let Some((kind, handler)) = claimed else {
                push_unique(&mut outputs, current);
                continue;
            };

            steps += 1;
            if steps > self.max_steps {
                return Err(ExtensionError::StepLimit(self.max_steps));
            }
            processed.insert(current.clone());

            output::sub_action(&format!(
                "{} <- {}",
                handler.id(),
                current.file_name().unwrap_or_default().to_string_lossy()
            ));
            let produced = match kind {
                Kind::File => handler.handle_file(&current, output_dir)?,
                Kind::Folder => handler.handle_folder(&current, output_dir)?,
            };

            // Depth-first, keeping the handler's order
            for path in produced.into_iter().rev() {
                if !path.exists() {
                    return Err(ExtensionError::MissingOutput {
                        id: handler.id().to_string(),
                        path,
                    });
                }
                pending.push(path);
            }
        }

        Ok(outputs)
    }
}

fn push_unique(outputs: &mut Vec<PathBuf>, path: PathBuf) {
    if !outputs.contains(&path) {
        outputs.push(path);
    }
}

/// File extensions to try for `path`, longest first.
///
/// `game.tar.gz` gives `["tar.gz", "gz"]`. A leading dot on the name
/// (`.bashrc`) does not start an extension.
pub fn extension_candidates(path: &Path) -> Vec<String> {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return Vec::new();
    };
    let body = name.trim_start_matches('.');
    let offset = name.len() - body.len();

    body.match_indices('.')
        .map(|(i, _)| &name[offset + i + 1..])
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
        .collect()
}
