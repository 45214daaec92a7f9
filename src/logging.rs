use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub struct RunLog {
    file: Option<File>,
    path: Option<PathBuf>,
}

impl RunLog {
    pub fn create(prefix: &str) -> Result<Self> {
        let path = PathBuf::from(format!("{prefix}_bbviprs.log"));
        let file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
        Ok(Self {
            file: Some(file),
            path: Some(path),
        })
    }

    pub fn disabled() -> Self {
        Self {
            file: None,
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn line(&mut self, message: &str) -> Result<()> {
        info!("{message}");
        self.write(message)
    }

    pub fn warn(&mut self, message: &str) -> Result<()> {
        warn!("{message}");
        self.write(&format!("WARNING: {message}"))
    }

    fn write(&mut self, message: &str) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{message}")?;
        }
        Ok(())
    }
}
