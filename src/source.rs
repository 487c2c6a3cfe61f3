//! Lazy producers of tasks.
//!
//! The pool pulls from a source through one dedicated producer, so
//! implementations take `&mut self` and need no internal locking.

use super::task::BoxedTask;
use std::{
    fmt,
    fs,
    iter::Fuse,
    path::{Path, PathBuf},
};
use regex::Regex;
use tracing::{trace, warn};

/// Pulled from the producer task. Implementations that wait on files or
/// sockets must return `true` from [`is_blocking`](Self::is_blocking) so the
/// pool calls them off the runtime threads.
pub trait TaskSource<T>: Send {
    /// Next task, or `None` once exhausted. After the first `None` the pool
    /// never calls this again.
    fn next_task(&mut self) -> Option<BoxedTask<T>>;

    /// Exact number of tasks this source will still produce, when known.
    fn size_hint(&self) -> Option<usize> {
        None
    }

    /// `next_task` may block the calling thread.
    fn is_blocking(&self) -> bool {
        false
    }
}

/// Factory functions: `|| -> Option<BoxedTask<T>>`.
impl<T, F> TaskSource<T> for F
where
    F: FnMut() -> Option<BoxedTask<T>> + Send,
{
    fn next_task(&mut self) -> Option<BoxedTask<T>> {
        self()
    }
}

/// Source over an in-memory sequence of tasks.
pub struct IterSource<I: Iterator> {
    iter: Fuse<I>,
}

impl<I: Iterator> IterSource<I> {
    pub fn new<C>(tasks: C) -> Self
    where
        C: IntoIterator<IntoIter = I>,
    {
        Self {
            iter: tasks.into_iter().fuse(),
        }
    }
}

impl<T, I> TaskSource<T> for IterSource<I>
where
    I: Iterator<Item = BoxedTask<T>> + Send,
{
    fn next_task(&mut self) -> Option<BoxedTask<T>> {
        self.iter.next()
    }

    fn size_hint(&self) -> Option<usize> {
        match self.iter.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower),
            _ => None,
        }
    }
}

impl<T> From<Vec<BoxedTask<T>>> for IterSource<std::vec::IntoIter<BoxedTask<T>>> {
    fn from(tasks: Vec<BoxedTask<T>>) -> Self {
        Self::new(tasks)
    }
}

/// Walks a directory tree lazily and turns every regular file whose name
/// matches `pattern` into a task.
///
/// Directories are read one at a time as the pool asks for more work.
/// Unreadable entries are logged and skipped.
pub struct DirSource<F> {
    pattern: Regex,
    pending_dirs: Vec<PathBuf>,
    current: Option<fs::ReadDir>,
    make_task: F,
    done: bool,
}

impl<F> fmt::Debug for DirSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirSource")
            .field("pattern", &self.pattern.as_str())
            .field("pending_dirs", &self.pending_dirs)
            .field("done", &self.done)
            .finish()
    }
}

impl<F> DirSource<F> {
    pub fn new(root: impl AsRef<Path>, pattern: &str, make_task: F) -> Result<Self, regex::Error> {
        Ok(Self::with_regex(root, Regex::new(pattern)?, make_task))
    }

    pub fn with_regex(root: impl AsRef<Path>, pattern: Regex, make_task: F) -> Self {
        Self {
            pattern,
            pending_dirs: vec![root.as_ref().to_path_buf()],
            current: None,
            make_task,
            done: false,
        }
    }

    fn next_match(&mut self) -> Option<PathBuf> {
        loop {
            let Some(entries) = self.current.as_mut() else {
                let dir = self.pending_dirs.pop()?;
                match fs::read_dir(&dir) {
                    Ok(entries) => self.current = Some(entries),
                    Err(e) => warn!(dir = %dir.display(), error = %e, "skipping unreadable directory"),
                }
                continue;
            };

            let entry = match entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
                None => {
                    self.current = None;
                    continue;
                }
            };

            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "cannot stat entry");
                    continue;
                }
            };

            if file_type.is_dir() {
                self.pending_dirs.push(entry.path());
            } else if file_type.is_file() {
                let name = entry.file_name();
                if self.pattern.is_match(&name.to_string_lossy()) {
                    return Some(entry.path());
                }
            }
        }
    }
}

impl<T, F> TaskSource<T> for DirSource<F>
where
    F: FnMut(PathBuf) -> BoxedTask<T> + Send,
{
    fn next_task(&mut self) -> Option<BoxedTask<T>> {
        if self.done {
            return None;
        }
        match self.next_match() {
            Some(path) => {
                trace!(path = %path.display(), "matched file");
                Some((self.make_task)(path))
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    fn is_blocking(&self) -> bool {
        true
    }
}
