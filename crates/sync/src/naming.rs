use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use todosync_provider::path as remote_path;

/// Default task list and archive file names.
///
/// The done file for a primary named exactly like [`todo`](Self::todo) is
/// [`done`](Self::done) in the same directory. Any other primary gets
/// `<stem>_<done>`, and a name without a stem (such as `.txt`) has no done
/// file at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNames {
    pub todo: String,
    pub done: String,
}
impl Default for FileNames {
    fn default() -> Self {
        Self { todo: "todo.txt".to_string(), done: "done.txt".to_string() }
    }
}
impl FileNames {
    pub fn done_name(&self, name: &str) -> Option<String> {
        let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
        if stem.is_empty() {
            return None;
        }
        match name == self.todo {
            true => Some(self.done.clone()),
            false => Some(format!("{stem}_{}", self.done)),
        }
    }

    pub fn done_path(&self, primary: &Path) -> Option<PathBuf> {
        let name = primary.file_name()?.to_str()?;
        Some(primary.with_file_name(self.done_name(name)?))
    }

    /// Same rule applied to a remote path.
    pub fn done_remote_path(&self, primary: &str) -> Option<String> {
        let done = self.done_name(remote_path::file_name(primary))?;
        Some(remote_path::join(remote_path::parent(primary), &done))
    }
}
