use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

/// Log lines go to stdout and, with a path, to a freshly created log file too.
pub(crate) fn make_writer(path: Option<&Path>) -> io::Result<BoxMakeWriter> {
    match path {
        Some(path) => {
            let file = File::create(path)?;
            Ok(BoxMakeWriter::new(io::stdout.and(Mutex::new(file))))
        }
        None => Ok(BoxMakeWriter::new(io::stdout)),
    }
}
