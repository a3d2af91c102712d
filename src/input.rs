//! Landmark stream from the external hand-pose detector: JSON lines read
//! from stdin, a regular file, or a FIFO.

use anyhow::{Result, anyhow};
use std::{
    fmt, fs,
    io::{self, BufRead, BufReader},
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandmarkSource {
    Stdin,
    Path(PathBuf),
}

impl LandmarkSource {
    /// `-` is stdin, an empty string falls back to `default`.
    pub fn parse(spec: &str, default: PathBuf) -> Self {
        match spec.trim() {
            "-" => Self::Stdin,
            "" => Self::Path(default),
            p => Self::Path(PathBuf::from(p)),
        }
    }

    /// Opening a FIFO blocks until a writer shows up.
    pub fn open(&self) -> Result<Box<dyn BufRead + Send>> {
        match self {
            Self::Stdin => Ok(Box::new(BufReader::new(io::stdin()))),
            Self::Path(p) => {
                let f = fs::File::open(p)
                    .map_err(|e| anyhow!("failed to open landmark source {}: {e}", p.display()))?;
                Ok(Box::new(BufReader::new(f)))
            }
        }
    }

    /// Only a FIFO gets a new writer after EOF. A regular file is read once;
    /// a missing path is waited for, since the FIFO may not exist yet.
    pub fn reopenable(&self) -> bool {
        match self {
            Self::Stdin => false,
            Self::Path(p) => fs::metadata(p).map_or(true, |m| m.file_type().is_fifo()),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Stdin => Path::new("-"),
            Self::Path(p) => p,
        }
    }
}

impl fmt::Display for LandmarkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => f.write_str("stdin"),
            Self::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_spec() {
        let def = PathBuf::from("/run/handctl.landmarks");
        assert_eq!(LandmarkSource::parse("-", def.clone()), LandmarkSource::Stdin);
        assert_eq!(
            LandmarkSource::parse("  ", def.clone()),
            LandmarkSource::Path(def.clone())
        );
        assert_eq!(
            LandmarkSource::parse("/tmp/hands.jsonl", def),
            LandmarkSource::Path("/tmp/hands.jsonl".into())
        );
        assert!(!LandmarkSource::Stdin.reopenable());
        assert_eq!(LandmarkSource::Stdin.path(), Path::new("-"));
    }

    #[test]
    fn test_open_reads_lines() {
        let path = std::env::temp_dir().join(format!("handctl-src-{}.jsonl", std::process::id()));
        fs::write(&path, "{\"hands\":[]}\n\n{\"hands\":[]}\n").unwrap();
        let src = LandmarkSource::Path(path.clone());
        let lines: Vec<String> = src.open().unwrap().lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 3);
        let _ = fs::remove_file(&path);

        assert!(LandmarkSource::Path("/nonexistent/handctl".into()).open().is_err());
    }

    #[test]
    fn test_only_fifo_is_reopened() {
        let dir = std::env::temp_dir().join(format!("handctl-reopen-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let file = dir.join("recorded.jsonl");
        fs::write(&file, "{\"hands\":[]}\n").unwrap();
        assert!(!LandmarkSource::Path(file).reopenable());
        assert!(LandmarkSource::Path(dir.join("not-yet")).reopenable());

        let fifo = dir.join("live.landmarks");
        let made = std::process::Command::new("mkfifo").arg(&fifo).status();
        if made.is_ok_and(|s| s.success()) {
            assert!(LandmarkSource::Path(fifo).reopenable());
        }
        let _ = fs::remove_dir_all(&dir);
    }
}
