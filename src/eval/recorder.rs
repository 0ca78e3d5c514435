use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::environment::Observation;
use crate::eval::EpisodeResult;

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Line<'a> {
    Observation(&'a Observation),
    Result(&'a EpisodeResult),
}

/// Writes one `<worker>_<episode>.jsonl` file per episode under `dir`.
pub struct EpisodeRecorder {
    dir: PathBuf,
    worker: usize,
    current: Option<(PathBuf, BufWriter<File>)>,
}

impl EpisodeRecorder {
    pub fn new(dir: &Path, worker: usize) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            worker,
            current: None,
        })
    }

    pub fn path_for(&self, episode: usize) -> PathBuf {
        self.dir.join(format!("{}_{}.jsonl", self.worker, episode))
    }

    pub fn begin(&mut self, episode: usize) -> std::io::Result<()> {
        let path = self.path_for(episode);
        let file = File::create(&path)?;
        self.current = Some((path, BufWriter::new(file)));
        Ok(())
    }

    fn write(&mut self, line: &Line) -> std::io::Result<()> {
        let Some((_, writer)) = self.current.as_mut() else {
            return Ok(());
        };
        serde_json::to_writer(&mut *writer, line)?;
        writer.write_all(b"\n")
    }

    pub fn record(&mut self, observation: &Observation) -> std::io::Result<()> {
        self.write(&Line::Observation(observation))
    }

    /// Append the result and flush; returns the written file.
    pub fn finish(&mut self, result: Option<&EpisodeResult>) -> std::io::Result<Option<PathBuf>> {
        if let Some(result) = result {
            self.write(&Line::Result(result))?;
        }
        match self.current.take() {
            Some((path, mut writer)) => {
                writer.flush()?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}
