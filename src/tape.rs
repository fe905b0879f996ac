//! File-backed sequential-access tape.

use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::fs;
use std::io::{self, prelude::*};
use std::marker::PhantomData;
use std::mem;
use std::path::{Path, PathBuf};

use log;

use crate::codec::RecordCodec;
use crate::sink::RecordSink;

/// Contract violation: a tape operation invoked in a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidState {
    unit: Option<usize>,
    reason: &'static str,
}

impl InvalidState {
    pub fn new(unit: Option<usize>, reason: &'static str) -> Self {
        InvalidState { unit, reason }
    }

    /// Unit number of the tape the violation happened on, if any.
    pub fn unit(&self) -> Option<usize> {
        self.unit
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

impl Error for InvalidState {}

impl Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Some(unit) => write!(f, "tape {}: {}", unit, self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Tape operation error.
#[derive(Debug)]
pub enum TapeError<S: Error, D: Error> {
    /// Backing file read/write/delete error.
    IO(io::Error),
    /// Record serialization error.
    SerializationError(S),
    /// Record deserialization error.
    DeserializationError(D),
    /// Operation invoked in a wrong tape state.
    InvalidState(InvalidState),
}

impl<S, D> Error for TapeError<S, D>
where
    S: Error + 'static,
    D: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            TapeError::IO(err) => err,
            TapeError::SerializationError(err) => err,
            TapeError::DeserializationError(err) => err,
            TapeError::InvalidState(err) => err,
        })
    }
}

impl<S: Error, D: Error> Display for TapeError<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            TapeError::IO(err) => write!(f, "tape I/O operation failed: {}", err),
            TapeError::SerializationError(err) => write!(f, "record serialization error: {}", err),
            TapeError::DeserializationError(err) => write!(f, "record deserialization error: {}", err),
            TapeError::InvalidState(err) => write!(f, "invalid tape state: {}", err),
        }
    }
}

/// Result of a tape operation for records `T` encoded by codec `C`.
pub type TapeResult<R, T, C> = Result<
    R,
    TapeError<<C as RecordCodec<T>>::SerializationError, <C as RecordCodec<T>>::DeserializationError>,
>;

/// Tape open state. Every transition is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeMode {
    /// Freshly created or truncated. Accepts distributed runs.
    Unopened,
    /// Open for read, the cursor walks the runs.
    Read,
    /// Open for write, records accumulate into the last run.
    Write,
    /// Backing file deleted.
    Disposed,
}

/// Cursor register: the record read from the active run and not consumed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor<T> {
    Holding(T),
    Exhausted,
}

/// Run ledger entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Run {
    /// Records written to the run.
    pub len: usize,
    /// Records not read yet.
    pub remaining: usize,
}

/// Buffered tape file reader counting the bytes consumed by the codec.
struct TapeReader {
    inner: io::BufReader<fs::File>,
    position: u64,
}

impl Read for TapeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.inner.read(buf)?;
        self.position += len as u64;
        Ok(len)
    }
}

/// Sequential-access storage unit backed by a single file.
///
/// A tape stores an ordered sequence of sorted runs. During a merge pass it is read run by run through the
/// cursor register: [`Tape::read_record`] moves within the active run, [`Tape::advance_to_next_run`] crosses
/// a run boundary.
pub struct Tape<T, C> {
    /// Tape unit number.
    unit: usize,
    /// Backing file path.
    path: PathBuf,
    /// Backing file read/write buffer size.
    rw_buf_size: Option<usize>,

    mode: TapeMode,
    runs: Vec<Run>,
    active_run: usize,
    /// Absolute byte offset of the next record to be read.
    offset: u64,
    /// Records stored in the backing file.
    stored: usize,
    /// Records read from the backing file since the tape was opened for read.
    consumed: usize,
    cursor: Cursor<T>,

    reader: Option<TapeReader>,
    writer: Option<io::BufWriter<fs::File>>,

    codec: PhantomData<C>,
}

impl<T, C> Tape<T, C>
where
    C: RecordCodec<T>,
{
    /// Creates an empty unopened tape with the backing file `tape-<unit>` in `dir`.
    /// A leftover file with the same name is truncated.
    pub fn create(dir: &Path, unit: usize, rw_buf_size: Option<usize>) -> TapeResult<Self, T, C> {
        let path = dir.join(format!("tape-{}", unit));
        fs::File::create(&path).map_err(TapeError::IO)?;

        log::trace!("tape {} created at {}", unit, path.display());

        return Ok(Tape {
            unit,
            path,
            rw_buf_size,
            mode: TapeMode::Unopened,
            runs: Vec::new(),
            active_run: 0,
            offset: 0,
            stored: 0,
            consumed: 0,
            cursor: Cursor::Exhausted,
            reader: None,
            writer: None,
            codec: PhantomData,
        });
    }

    pub fn unit(&self) -> usize {
        self.unit
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> TapeMode {
        self.mode
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn active_run(&self) -> usize {
        self.active_run
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn cursor(&self) -> &Cursor<T> {
        &self.cursor
    }

    /// Returns the record held in the cursor register.
    pub fn current(&self) -> Option<&T> {
        match &self.cursor {
            Cursor::Holding(record) => Some(record),
            Cursor::Exhausted => None,
        }
    }

    /// Number of records not consumed yet, the held one included.
    pub fn unread_count(&self) -> usize {
        let held = match self.cursor {
            Cursor::Holding(_) => 1,
            Cursor::Exhausted => 0,
        };
        self.runs.iter().map(|run| run.remaining).sum::<usize>() + held
    }

    pub fn is_empty(&self) -> bool {
        self.unread_count() == 0
    }

    /// Writes a sorted run at the end of the tape. Used by the distribution stage only.
    pub fn append_run(&mut self, records: impl IntoIterator<Item = T>) -> TapeResult<(), T, C> {
        self.expect_mode(TapeMode::Unopened, "runs can only be appended to an unopened tape")?;

        let mut len = 0;
        for record in records.into_iter() {
            self.encode(&record)?;
            len += 1;
        }
        self.runs.push(Run { len, remaining: len });

        log::trace!("tape {}: run #{} of {} records appended", self.unit, self.runs.len(), len);

        return Ok(());
    }

    /// Discards the tape content and the run ledger. The tape becomes empty and unopened.
    pub fn truncate(&mut self) -> TapeResult<(), T, C> {
        self.expect_not_disposed()?;

        self.reader = None;
        self.writer = None;
        fs::File::create(&self.path).map_err(TapeError::IO)?;

        self.mode = TapeMode::Unopened;
        self.runs.clear();
        self.active_run = 0;
        self.offset = 0;
        self.stored = 0;
        self.consumed = 0;
        self.cursor = Cursor::Exhausted;

        log::trace!("tape {} truncated", self.unit);

        return Ok(());
    }

    /// Opens the tape for read, rewinds it to the first run and loads the first record into the cursor.
    pub fn open_for_read(&mut self) -> TapeResult<(), T, C> {
        self.expect_not_disposed()?;
        if self.stored == 0 {
            return Err(self.invalid_state("an empty tape cannot be opened for read"));
        }

        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(TapeError::IO)?;
        }
        let file = fs::File::open(&self.path).map_err(TapeError::IO)?;
        self.reader = Some(TapeReader {
            inner: match self.rw_buf_size {
                Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
                None => io::BufReader::new(file),
            },
            position: 0,
        });

        for run in self.runs.iter_mut() {
            run.remaining = run.len;
        }
        self.mode = TapeMode::Read;
        self.active_run = 0;
        self.offset = 0;
        self.consumed = 0;
        self.cursor = Cursor::Exhausted;

        log::trace!("tape {} opened for read ({} runs)", self.unit, self.runs.len());

        return self.read_record();
    }

    /// Loads the next record of the active run into the cursor register.
    /// The cursor becomes exhausted once the active run has no more records.
    pub fn read_record(&mut self) -> TapeResult<(), T, C> {
        self.expect_mode(TapeMode::Read, "tape is not open for read")?;

        let has_next = match self.runs.get(self.active_run) {
            Some(run) => run.remaining > 0,
            None => false,
        };
        if !has_next {
            self.cursor = Cursor::Exhausted;
            return Ok(());
        }

        let record = self.decode()?;
        self.runs[self.active_run].remaining -= 1;
        self.cursor = Cursor::Holding(record);

        return Ok(());
    }

    /// Moves the cursor to the first record of the next run. The cursor becomes exhausted if the active run
    /// is the last one.
    pub fn advance_to_next_run(&mut self) -> TapeResult<(), T, C> {
        self.expect_mode(TapeMode::Read, "tape is not open for read")?;

        let unfinished = match self.runs.get(self.active_run) {
            Some(run) => run.remaining > 0,
            None => false,
        };
        if unfinished || self.current().is_some() {
            return Err(self.invalid_state("active run is not exhausted"));
        }

        if self.active_run + 1 < self.runs.len() {
            self.active_run += 1;
            self.read_record()
        } else {
            self.cursor = Cursor::Exhausted;
            Ok(())
        }
    }

    /// Moves the held record out of the cursor register.
    pub fn take_record(&mut self) -> TapeResult<T, T, C> {
        match mem::replace(&mut self.cursor, Cursor::Exhausted) {
            Cursor::Holding(record) => Ok(record),
            Cursor::Exhausted => Err(self.invalid_state("cursor register holds no record")),
        }
    }

    /// Truncates the tape and opens it for write with an empty run to accumulate records into.
    pub fn open_for_write(&mut self) -> TapeResult<(), T, C> {
        self.truncate()?;
        self.mode = TapeMode::Write;
        self.runs.push(Run::default());

        log::trace!("tape {} opened for write", self.unit);

        return Ok(());
    }

    /// Starts a new empty run on a tape open for write.
    pub fn start_run(&mut self) -> TapeResult<(), T, C> {
        self.expect_mode(TapeMode::Write, "tape is not open for write")?;
        self.runs.push(Run::default());

        return Ok(());
    }

    /// Appends a record to the last run.
    pub fn write_record(&mut self, record: T) -> TapeResult<(), T, C> {
        self.expect_mode(TapeMode::Write, "tape is not open for write")?;
        self.encode(&record)?;

        match self.runs.last_mut() {
            Some(run) => {
                run.len += 1;
                run.remaining += 1;
            }
            None => self.runs.push(Run { len: 1, remaining: 1 }),
        }

        return Ok(());
    }

    /// Emits every unread record to the sink and deletes the backing file.
    /// Returns the number of records emitted. Disposing an already disposed tape is a no-op.
    pub fn drain_and_dispose<K>(&mut self, sink: &mut K) -> TapeResult<usize, T, C>
    where
        K: RecordSink<T>,
    {
        if self.mode == TapeMode::Disposed {
            return Ok(0);
        }

        let mut drained = 0;
        if self.unread_count() > 0 {
            self.expect_mode(TapeMode::Read, "only a tape open for read can be drained")?;

            if let Cursor::Holding(record) = mem::replace(&mut self.cursor, Cursor::Exhausted) {
                sink.put(record).map_err(TapeError::IO)?;
                drained += 1;
            }
            while self.consumed < self.stored {
                let record = self.decode()?;
                sink.put(record).map_err(TapeError::IO)?;
                drained += 1;
            }
            for run in self.runs.iter_mut() {
                run.remaining = 0;
            }
        }

        self.reader = None;
        self.writer = None;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(TapeError::IO(err)),
        }

        self.mode = TapeMode::Disposed;
        self.runs.clear();
        self.stored = 0;
        self.consumed = 0;

        log::trace!("tape {} disposed ({} records drained)", self.unit, drained);

        return Ok(drained);
    }

    fn encode(&mut self, record: &T) -> TapeResult<(), T, C> {
        if self.writer.is_none() {
            let file = fs::OpenOptions::new()
                .append(true)
                .open(&self.path)
                .map_err(TapeError::IO)?;
            self.writer = Some(match self.rw_buf_size {
                Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
                None => io::BufWriter::new(file),
            });
        }

        if let Some(writer) = self.writer.as_mut() {
            C::serialize(writer, record).map_err(TapeError::SerializationError)?;
        }
        self.stored += 1;

        return Ok(());
    }

    fn decode(&mut self) -> TapeResult<T, T, C> {
        let unit = self.unit;
        // unreachable while the run ledger matches the stored records
        if self.consumed >= self.stored {
            return Err(TapeError::InvalidState(InvalidState::new(
                Some(unit),
                "read past the end of the tape",
            )));
        }

        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => {
                return Err(TapeError::InvalidState(InvalidState::new(
                    Some(unit),
                    "tape has no open reader",
                )))
            }
        };
        let record = C::deserialize(&mut *reader).map_err(TapeError::DeserializationError)?;
        self.offset = reader.position;
        self.consumed += 1;

        return Ok(record);
    }

    fn expect_mode(&self, mode: TapeMode, reason: &'static str) -> TapeResult<(), T, C> {
        if self.mode != mode {
            return Err(self.invalid_state(reason));
        }
        return Ok(());
    }

    fn expect_not_disposed(&self) -> TapeResult<(), T, C> {
        if self.mode == TapeMode::Disposed {
            return Err(self.invalid_state("tape is disposed"));
        }
        return Ok(());
    }

    fn invalid_state(
        &self,
        reason: &'static str,
    ) -> TapeError<<C as RecordCodec<T>>::SerializationError, <C as RecordCodec<T>>::DeserializationError> {
        TapeError::InvalidState(InvalidState::new(Some(self.unit), reason))
    }
}

impl<T: Debug, C> Debug for Tape<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tape")
            .field("unit", &self.unit)
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("runs", &self.runs)
            .field("active_run", &self.active_run)
            .field("offset", &self.offset)
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{Cursor, Run, Tape, TapeError, TapeMode};
    use crate::codec::RmpCodec;
    use crate::sink::RecordSink;

    type CharTape = Tape<char, RmpCodec>;

    struct BrokenSink;

    impl RecordSink<char> for BrokenSink {
        fn put(&mut self, _record: char) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "test error"))
        }
    }

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn read_run(tape: &mut CharTape) -> Vec<char> {
        let mut records = Vec::new();
        while tape.current().is_some() {
            records.push(tape.take_record().unwrap());
            tape.read_record().unwrap();
        }
        records
    }

    #[rstest]
    fn test_runs_are_read_one_at_a_time(tmp_dir: tempfile::TempDir) {
        let mut tape = CharTape::create(tmp_dir.path(), 1, None).unwrap();
        tape.append_run(vec!['a', 'c', 'e']).unwrap();
        tape.append_run(vec!['b']).unwrap();
        assert_eq!(tape.unread_count(), 4);
        assert_eq!(tape.mode(), TapeMode::Unopened);

        tape.open_for_read().unwrap();
        assert_eq!(tape.cursor(), &Cursor::Holding('a'));
        assert_eq!(tape.unread_count(), 4);
        assert!(tape.offset() > 0);

        assert_eq!(read_run(&mut tape), vec!['a', 'c', 'e']);
        assert_eq!(tape.cursor(), &Cursor::Exhausted);
        assert_eq!(tape.unread_count(), 1);
        assert!(!tape.is_empty());

        tape.advance_to_next_run().unwrap();
        assert_eq!(tape.active_run(), 1);
        assert_eq!(read_run(&mut tape), vec!['b']);
        assert!(tape.is_empty());

        tape.advance_to_next_run().unwrap();
        assert_eq!(tape.active_run(), 1);
        assert_eq!(tape.cursor(), &Cursor::Exhausted);
    }

    #[rstest]
    fn test_advance_over_unfinished_run_is_rejected(tmp_dir: tempfile::TempDir) {
        let mut tape = CharTape::create(tmp_dir.path(), 1, None).unwrap();
        tape.append_run(vec!['a', 'b']).unwrap();
        tape.append_run(vec!['c']).unwrap();
        tape.open_for_read().unwrap();

        let result = tape.advance_to_next_run();
        assert!(matches!(result, Err(TapeError::InvalidState(_))));
    }

    #[rstest]
    fn test_write_accumulates_runs(tmp_dir: tempfile::TempDir) {
        let mut tape = CharTape::create(tmp_dir.path(), 4, Some(16)).unwrap();
        tape.open_for_write().unwrap();
        assert!(tape.is_empty());
        assert_eq!(tape.runs(), &[Run { len: 0, remaining: 0 }]);

        tape.write_record('a').unwrap();
        tape.write_record('d').unwrap();
        tape.start_run().unwrap();
        tape.write_record('b').unwrap();
        assert_eq!(tape.runs(), &[Run { len: 2, remaining: 2 }, Run { len: 1, remaining: 1 }]);
        assert_eq!(tape.unread_count(), 3);

        tape.open_for_read().unwrap();
        assert_eq!(read_run(&mut tape), vec!['a', 'd']);
        tape.advance_to_next_run().unwrap();
        assert_eq!(read_run(&mut tape), vec!['b']);
    }

    #[rstest]
    fn test_open_for_write_discards_content(tmp_dir: tempfile::TempDir) {
        let mut tape = CharTape::create(tmp_dir.path(), 2, None).unwrap();
        tape.append_run(vec!['x', 'y']).unwrap();
        tape.open_for_write().unwrap();
        tape.write_record('z').unwrap();

        tape.open_for_read().unwrap();
        assert_eq!(read_run(&mut tape), vec!['z']);
        assert_eq!(std::fs::metadata(tape.path()).unwrap().len(), tape.offset());
    }

    #[rstest]
    fn test_wrong_mode_is_rejected(tmp_dir: tempfile::TempDir) {
        let mut tape = CharTape::create(tmp_dir.path(), 1, None).unwrap();

        assert!(matches!(tape.read_record(), Err(TapeError::InvalidState(_))));
        assert!(matches!(tape.write_record('a'), Err(TapeError::InvalidState(_))));
        assert!(matches!(tape.open_for_read(), Err(TapeError::InvalidState(_))));
        assert!(matches!(tape.take_record(), Err(TapeError::InvalidState(_))));

        tape.append_run(vec!['a']).unwrap();
        tape.open_for_read().unwrap();
        assert!(matches!(tape.append_run(vec!['b']), Err(TapeError::InvalidState(_))));
    }

    #[rstest]
    fn test_truncate(tmp_dir: tempfile::TempDir) {
        let mut tape = CharTape::create(tmp_dir.path(), 1, None).unwrap();
        tape.append_run(vec!['a', 'b']).unwrap();
        tape.open_for_read().unwrap();

        tape.truncate().unwrap();
        assert!(tape.is_empty());
        assert!(tape.runs().is_empty());
        assert_eq!(tape.mode(), TapeMode::Unopened);
        assert_eq!(std::fs::metadata(tape.path()).unwrap().len(), 0);
    }

    #[rstest]
    fn test_drain_and_dispose(tmp_dir: tempfile::TempDir) {
        let mut tape = CharTape::create(tmp_dir.path(), 1, None).unwrap();
        tape.append_run(vec!['a', 'b', 'c']).unwrap();
        tape.open_for_read().unwrap();
        tape.take_record().unwrap();
        tape.read_record().unwrap();

        let mut sink = Vec::new();
        assert_eq!(tape.drain_and_dispose(&mut sink).unwrap(), 2);
        assert_eq!(sink, vec!['b', 'c']);
        assert_eq!(tape.mode(), TapeMode::Disposed);
        assert!(!tape.path().exists());

        assert_eq!(tape.drain_and_dispose(&mut sink).unwrap(), 0);
        assert!(matches!(tape.open_for_write(), Err(TapeError::InvalidState(_))));
    }

    #[rstest]
    fn test_dispose_does_not_touch_other_tapes(tmp_dir: tempfile::TempDir) {
        let mut empty = CharTape::create(tmp_dir.path(), 1, None).unwrap();
        let mut full = CharTape::create(tmp_dir.path(), 2, None).unwrap();
        full.append_run(vec!['a', 'b']).unwrap();

        let mut sink = Vec::new();
        assert_eq!(empty.drain_and_dispose(&mut sink).unwrap(), 0);
        assert_eq!(empty.drain_and_dispose(&mut sink).unwrap(), 0);
        assert!(sink.is_empty());

        full.open_for_read().unwrap();
        assert_eq!(full.drain_and_dispose(&mut sink).unwrap(), 2);
        assert_eq!(sink, vec!['a', 'b']);
    }

    #[rstest]
    fn test_drain_requires_open_for_read(tmp_dir: tempfile::TempDir) {
        let mut tape = CharTape::create(tmp_dir.path(), 1, None).unwrap();
        tape.append_run(vec!['a']).unwrap();

        let mut sink = Vec::new();
        assert!(matches!(tape.drain_and_dispose(&mut sink), Err(TapeError::InvalidState(_))));
        assert!(tape.path().exists());
    }

    #[rstest]
    #[case(None)]
    #[case(Some(3))]
    fn test_offset_follows_consumed_bytes(tmp_dir: tempfile::TempDir, #[case] rw_buf_size: Option<usize>) {
        let mut tape = CharTape::create(tmp_dir.path(), 1, rw_buf_size).unwrap();
        tape.append_run(vec!['a', 'b', 'c']).unwrap();

        tape.open_for_read().unwrap();
        // a single-char string takes a fixstr marker and one byte
        assert_eq!(tape.offset(), 2);

        tape.take_record().unwrap();
        tape.read_record().unwrap();
        assert_eq!(tape.offset(), 4);

        read_run(&mut tape);
        assert_eq!(std::fs::metadata(tape.path()).unwrap().len(), tape.offset());
    }

    #[rstest]
    fn test_sink_failure_is_io_error(tmp_dir: tempfile::TempDir) {
        let mut tape = CharTape::create(tmp_dir.path(), 1, None).unwrap();
        tape.append_run(vec!['a', 'b']).unwrap();
        tape.open_for_read().unwrap();

        let result = tape.drain_and_dispose(&mut BrokenSink);
        assert!(matches!(result, Err(TapeError::IO(_))));
        assert_ne!(tape.mode(), TapeMode::Disposed);
    }

    #[rstest]
    fn test_read_past_stored_records_is_rejected(tmp_dir: tempfile::TempDir) {
        let mut tape = CharTape::create(tmp_dir.path(), 1, None).unwrap();
        tape.append_run(vec!['a']).unwrap();
        tape.open_for_read().unwrap();
        tape.take_record().unwrap();

        // ledger claims one more record than the file holds
        tape.runs[0].remaining = 1;

        assert!(matches!(tape.read_record(), Err(TapeError::InvalidState(_))));
    }
}
