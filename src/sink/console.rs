use std::io::{self, Stdout, Write};

use async_trait::async_trait;

use crate::record::Record;
use crate::sink::{Sink, SinkError};

const RULE: &str = "===========";

/// Prints one bracketed block per record.
#[derive(Debug)]
pub struct ConsoleSink<W> {
    writer: W,
}

impl ConsoleSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: Write + Send> Sink for ConsoleSink<W> {
    fn name(&self) -> &str {
        "console"
    }

    async fn deliver(&mut self, record: &Record) -> Result<(), SinkError> {
        self.writer.write_all(render(record).as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

pub fn render(record: &Record) -> String {
    format!(
        "{RULE}\n\
         mac: {}\n\
         model: {}\n\
         mode: {}\n\
         date: {}\n\
         temp: {}\n\
         humidity: {}\n\
         {RULE}\n\
         \n\
         \n",
        record.mac, record.model, record.mode, record.date, record.temp, record.humidity,
    )
}
