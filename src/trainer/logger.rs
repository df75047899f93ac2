use std::{
    fmt::Debug,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::{info, trace, warn};

/// Receives the training curve of a run.
pub trait Logger: Debug {
    fn epoch_loss(&mut self, epoch: u32, loss: f32);

    fn batch_loss(&mut self, epoch: u32, batch: u32, loss: f32);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MockLogger;

impl Logger for MockLogger {
    fn epoch_loss(&mut self, _epoch: u32, _loss: f32) {}

    fn batch_loss(&mut self, _epoch: u32, _batch: u32, _loss: f32) {}
}

/// Forwards the losses to `tracing`, epochs at info level and batches at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn epoch_loss(&mut self, epoch: u32, loss: f32) {
        info!(epoch, loss, "epoch finished");
    }

    fn batch_loss(&mut self, epoch: u32, batch: u32, loss: f32) {
        trace!(epoch, batch, loss, "batch finished");
    }
}

/// Writes one epoch loss per line.
#[derive(Debug)]
pub struct LogFile {
    file: PathBuf,
    writer: BufWriter<File>,
}

impl LogFile {
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self {
            file: path.as_ref().to_owned(),
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl Logger for LogFile {
    fn epoch_loss(&mut self, _epoch: u32, loss: f32) {
        if let Err(e) = writeln!(self.writer, "{}", loss).and_then(|_| self.writer.flush()) {
            warn!(file = %self.file.display(), error = %e, "couldn't log the loss");
        }
    }

    fn batch_loss(&mut self, _epoch: u32, _batch: u32, _loss: f32) {}
}
