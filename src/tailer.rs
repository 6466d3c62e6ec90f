/// Tails one of the game's text logs, returning only the lines appended since
/// the previous poll.
///
/// The reader keeps a single byte offset into the file. By default it starts
/// at the current end of file so that history already on disk is ignored.
///
/// Rotation handling: the game client truncates its logs when it restarts.
/// We detect this by comparing the current file size to our offset: if the
/// file shrank, we restart from byte 0. Anything re-read that way is only
/// partially filtered by the dedup window, which never spans a truncation.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Byte offset already consumed from one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogPosition {
    pub offset: u64,
}

pub struct TailReader {
    path:     PathBuf,
    position: LogPosition,
}

impl TailReader {
    /// Start at the current end of file. A missing file starts at 0, so
    /// everything it contains once created will be read.
    pub fn at_end(path: PathBuf) -> Self {
        let offset = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        tracing::debug!("Tailer for {:?} initialised at byte {}", path, offset);
        Self { path, position: LogPosition { offset } }
    }

    /// Start at byte 0 and replay whatever the file already holds.
    pub fn from_start(path: PathBuf) -> Self {
        Self { path, position: LogPosition::default() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> LogPosition {
        self.position
    }

    /// Read the newly appended lines. Never fails: I/O errors are logged and
    /// the next poll simply retries from the same offset.
    pub fn poll(&mut self) -> Vec<String> {
        match self.read_new_lines() {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!("Tailer read error on {:?}: {}", self.path, e);
                Vec::new()
            }
        }
    }

    fn read_new_lines(&mut self) -> std::io::Result<Vec<String>> {
        let file_len = match std::fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(_) => return Ok(Vec::new()), // File doesn't exist yet, wait
        };

        // Rotation: file shrank since our last read
        if file_len < self.position.offset {
            tracing::info!("{:?} truncated — restarting from byte 0", self.path);
            self.position.offset = 0;
        }

        if file_len == self.position.offset {
            return Ok(Vec::new()); // No new data
        }

        let delta = file_len - self.position.offset;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.position.offset))?;

        // Bounded to the size we measured; bytes appended after the stat are
        // picked up by the next poll.
        let mut buf = Vec::with_capacity(delta as usize);
        file.take(delta).read_to_end(&mut buf)?;

        self.position.offset += buf.len() as u64;
        Ok(split_lines(&String::from_utf8_lossy(&buf)))
    }
}

/// Split a chunk into lines, dropping the empty fragment after a final newline.
fn split_lines(chunk: &str) -> Vec<String> {
    let mut lines: Vec<String> = chunk
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_owned())
        .collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    #[test]
    fn ignores_existing_content_by_default() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "old line").unwrap();
        f.flush().unwrap();

        let mut tail = TailReader::at_end(f.path().to_path_buf());
        assert!(tail.poll().is_empty());

        append(f.path(), "line one\nline two\n");
        assert_eq!(tail.poll(), vec!["line one", "line two"]);
        assert!(tail.poll().is_empty());
    }

    #[test]
    fn from_start_replays_file() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "first").unwrap();
        f.flush().unwrap();

        let mut tail = TailReader::from_start(f.path().to_path_buf());
        assert_eq!(tail.poll(), vec!["first"]);
    }

    #[test]
    fn offset_tracks_file_size() {
        let f = NamedTempFile::new().unwrap();
        let mut tail = TailReader::at_end(f.path().to_path_buf());
        assert_eq!(tail.position().offset, 0);

        append(f.path(), "abc\r\n");
        assert_eq!(tail.poll(), vec!["abc"]);
        assert_eq!(tail.position().offset, 5);

        append(f.path(), "defg\n");
        tail.poll();
        assert_eq!(tail.position().offset, 10);
        assert_eq!(tail.position().offset, std::fs::metadata(f.path()).unwrap().len());
    }

    #[test]
    fn detects_truncation() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "original content").unwrap();
        f.flush().unwrap();

        let mut tail = TailReader::at_end(f.path().to_path_buf());
        assert!(tail.position().offset > 0);

        // Simulate rotation: overwrite with shorter content
        let mut f2 = std::fs::File::create(f.path()).unwrap();
        writeln!(f2, "new").unwrap();
        f2.flush().unwrap();

        assert_eq!(tail.poll(), vec!["new"]);
        assert_eq!(tail.position().offset, 4);
    }

    #[test]
    fn missing_file_is_a_no_op_until_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wakfu.log");

        let mut tail = TailReader::at_end(path.clone());
        assert!(tail.poll().is_empty());
        assert_eq!(tail.position().offset, 0);

        std::fs::write(&path, "created\n").unwrap();
        assert_eq!(tail.poll(), vec!["created"]);
    }

    #[test]
    fn keeps_partial_trailing_fragment() {
        let f = NamedTempFile::new().unwrap();
        let mut tail = TailReader::at_end(f.path().to_path_buf());
        append(f.path(), "complete\npartial");
        assert_eq!(tail.poll(), vec!["complete", "partial"]);
    }
}
