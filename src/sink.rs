//! Sorted output sinks.

use std::fmt::Display;
use std::io::{self, prelude::*};

/// Receiver of the sorted record sequence. Records are delivered one at a time in ascending order.
pub trait RecordSink<T> {
    /// Accepts the next sorted record.
    fn put(&mut self, record: T) -> io::Result<()>;
}

impl<T> RecordSink<T> for Vec<T> {
    fn put(&mut self, record: T) -> io::Result<()> {
        self.push(record);
        return Ok(());
    }
}

/// Sink writing records in their [`Display`] form separated by a delimiter.
pub struct DelimitedWriter<W: Write> {
    writer: W,
    delimiter: String,
    written: usize,
}

impl<W: Write> DelimitedWriter<W> {
    pub fn new(writer: W, delimiter: impl Into<String>) -> Self {
        DelimitedWriter {
            writer,
            delimiter: delimiter.into(),
            written: 0,
        }
    }

    /// Number of records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes the underlying writer and returns it.
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        return Ok(self.writer);
    }
}

impl<T: Display, W: Write> RecordSink<T> for DelimitedWriter<W> {
    fn put(&mut self, record: T) -> io::Result<()> {
        if self.written > 0 {
            self.writer.write_all(self.delimiter.as_bytes())?;
        }
        write!(self.writer, "{}", record)?;
        self.written += 1;

        return Ok(());
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{DelimitedWriter, RecordSink};

    #[rstest]
    #[case(vec![], " ", "")]
    #[case(vec!["a"], " ", "a")]
    #[case(vec!["a", "b", "c"], " ", "a b c")]
    #[case(vec!["a", "b"], "\n", "a\nb")]
    fn test_delimited_writer(#[case] records: Vec<&str>, #[case] delimiter: &str, #[case] expected: &str) {
        let mut sink = DelimitedWriter::new(Vec::new(), delimiter);
        for record in &records {
            sink.put(record).unwrap();
        }
        assert_eq!(sink.written(), records.len());

        let output = sink.finish().unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), expected);
    }
}
