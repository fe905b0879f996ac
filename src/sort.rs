//! Balanced merge sorter.

use log;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use crate::codec::{RecordCodec, RmpCodec};
use crate::distribution::distribute;
use crate::merge::MergeRound;
use crate::sink::RecordSink;
use crate::tape::{InvalidState, Tape, TapeError};

/// Default maximum number of records in an initial run.
pub const DEFAULT_CAPACITY: usize = 1 << 20;
/// Default number of tape units.
pub const DEFAULT_UNITS: usize = 6;

/// Sorting error.
#[derive(Debug)]
pub enum SortError<S: Error, D: Error, I: Error> {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
    /// Data serialization error.
    SerializationError(S),
    /// Data deserialization error.
    DeserializationError(D),
    /// Input data stream error
    InputError(I),
    /// Run capacity or tape units number rejected.
    InvalidConfiguration(String),
    /// Sort engine contract violation.
    InvalidState(InvalidState),
}

/// Sorting error of a sorter for records `T` from an input failing with `E`, encoded by codec `C`.
pub type SorterError<T, E, C> =
    SortError<<C as RecordCodec<T>>::SerializationError, <C as RecordCodec<T>>::DeserializationError, E>;

impl<S, D, I> Error for SortError<S, D, I>
where
    S: Error + 'static,
    D: Error + 'static,
    I: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::SerializationError(err) => Some(err),
            SortError::DeserializationError(err) => Some(err),
            SortError::InputError(err) => Some(err),
            SortError::InvalidConfiguration(_) => None,
            SortError::InvalidState(err) => Some(err),
        }
    }
}

impl<S: Error, D: Error, I: Error> Display for SortError<S, D, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::SerializationError(err) => write!(f, "data serialization error: {}", err),
            SortError::DeserializationError(err) => write!(f, "data deserialization error: {}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::InvalidConfiguration(msg) => write!(f, "invalid configuration: {}", msg),
            SortError::InvalidState(err) => write!(f, "invalid state: {}", err),
        }
    }
}

impl<S: Error, D: Error, I: Error> From<TapeError<S, D>> for SortError<S, D, I> {
    fn from(err: TapeError<S, D>) -> Self {
        match err {
            TapeError::IO(err) => SortError::IO(err),
            TapeError::SerializationError(err) => SortError::SerializationError(err),
            TapeError::DeserializationError(err) => SortError::DeserializationError(err),
            TapeError::InvalidState(err) => SortError::InvalidState(err),
        }
    }
}

/// Sort summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortReport {
    /// Records sorted.
    pub records: usize,
    /// Initial runs created by the distribution.
    pub runs: usize,
    /// Merge rounds performed.
    pub rounds: usize,
}

/// Balanced merge sorter builder. Provides methods for [`BalancedMergeSorter`] initialization.
#[derive(Clone)]
pub struct BalancedMergeSorterBuilder<T, E, C = RmpCodec>
where
    T: Send,
    E: Error,
    C: RecordCodec<T>,
{
    /// Maximum number of records in an initial run.
    capacity: usize,
    /// Number of tape units.
    units: usize,
    /// Number of threads to be used to sort a run in memory.
    threads_number: Option<usize>,
    /// Directory to be used to store tapes.
    tmp_dir: Option<Box<Path>>,
    /// Tape file read/write buffer size.
    rw_buf_size: Option<usize>,

    /// Record codec type.
    codec_type: PhantomData<C>,
    /// Input item type.
    item_type: PhantomData<T>,
    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<T, E, C> BalancedMergeSorterBuilder<T, E, C>
where
    T: Send,
    E: Error,
    C: RecordCodec<T>,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        BalancedMergeSorterBuilder::default()
    }

    /// Builds a [`BalancedMergeSorter`] instance using provided configuration.
    pub fn build(self) -> Result<BalancedMergeSorter<T, E, C>, SorterError<T, E, C>> {
        BalancedMergeSorter::new(
            self.capacity,
            self.units,
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.rw_buf_size,
        )
    }

    /// Sets maximum number of records in an initial run.
    pub fn with_capacity(mut self, capacity: usize) -> BalancedMergeSorterBuilder<T, E, C> {
        self.capacity = capacity;
        return self;
    }

    /// Sets number of tape units. Half of them are read and half are written during a merge round.
    pub fn with_units(mut self, units: usize) -> BalancedMergeSorterBuilder<T, E, C> {
        self.units = units;
        return self;
    }

    /// Sets number of threads to be used to sort a run in memory.
    pub fn with_threads_number(mut self, threads_number: usize) -> BalancedMergeSorterBuilder<T, E, C> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store tapes.
    pub fn with_tmp_dir(mut self, path: &Path) -> BalancedMergeSorterBuilder<T, E, C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets tape read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> BalancedMergeSorterBuilder<T, E, C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

impl<T, E, C> Default for BalancedMergeSorterBuilder<T, E, C>
where
    T: Send,
    E: Error,
    C: RecordCodec<T>,
{
    fn default() -> Self {
        BalancedMergeSorterBuilder {
            capacity: DEFAULT_CAPACITY,
            units: DEFAULT_UNITS,
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            codec_type: PhantomData,
            item_type: PhantomData,
            input_error_type: PhantomData,
        }
    }
}

/// Balanced multiway merge sorter.
///
/// Sorts in two phases. The distribution phase splits the input into runs of `capacity` records, sorts them
/// in memory and spreads them over the first half of the tapes. Every merge round then merges the runs of
/// one half of the tapes into longer runs on the other half and swaps the halves, until all records end up in
/// a single run on a single tape, which is finally drained into the sink.
pub struct BalancedMergeSorter<T, E, C = RmpCodec>
where
    T: Send,
    E: Error,
    C: RecordCodec<T>,
{
    /// Maximum number of records in an initial run.
    capacity: usize,
    /// Number of tape units.
    units: usize,
    /// Run sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store tapes.
    tmp_dir: tempfile::TempDir,
    /// Tape file read/write buffer size.
    rw_buf_size: Option<usize>,

    /// Record codec type.
    codec_type: PhantomData<C>,
    /// Input item type.
    item_type: PhantomData<T>,
    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<T, E, C> BalancedMergeSorter<T, E, C>
where
    T: Send,
    E: Error,
    C: RecordCodec<T>,
{
    /// Creates a new balanced merge sorter instance.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of records in an initial run. Must be positive.
    /// * `units` - Number of tape units. Must be even and not less than 4.
    /// * `threads_number` - Number of threads to be used to sort a run in memory. If the parameter is [`None`]
    ///   runs are sorted in a single thread.
    /// * `tmp_path` - Directory to be used to store tapes. If parameter is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Tape files read/write buffer size.
    pub fn new(
        capacity: usize,
        units: usize,
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
    ) -> Result<Self, SorterError<T, E, C>> {
        Self::validate(capacity, units)?;

        return Ok(BalancedMergeSorter {
            capacity,
            units,
            rw_buf_size,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
            codec_type: PhantomData,
            item_type: PhantomData,
            input_error_type: PhantomData,
        });
    }

    fn validate(capacity: usize, units: usize) -> Result<(), SorterError<T, E, C>> {
        if capacity == 0 {
            return Err(SortError::InvalidConfiguration(String::from(
                "run capacity must be positive",
            )));
        }
        if units < 4 || units % 2 != 0 {
            return Err(SortError::InvalidConfiguration(format!(
                "tape units number must be even and at least 4, got {}",
                units
            )));
        }

        log::info!("sorting with run capacity {} over {} tapes", capacity, units);

        return Ok(());
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SorterError<T, E, C>> {
        let threads_number = threads_number.unwrap_or(1);
        log::info!("initializing thread-pool (threads: {})", threads_number);

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SorterError<T, E, C>> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Directory the tapes are stored in.
    pub fn tmp_dir(&self) -> &Path {
        self.tmp_dir.path()
    }

    /// Sorts data from the input and writes it to the sink in ascending order.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `sink` - Sorted data receiver
    pub fn sort<I, K>(&mut self, input: I, sink: &mut K) -> Result<SortReport, SorterError<T, E, C>>
    where
        T: Ord,
        I: IntoIterator<Item = Result<T, E>>,
        K: RecordSink<T>,
    {
        self.sort_by(input, sink, T::cmp)
    }

    /// Sorts data from the input using a custom compare function and writes it to the sink.
    /// Records comparing equal keep their input order.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `sink` - Sorted data receiver
    /// * `compare` - Function be be used to compare records
    pub fn sort_by<I, K, F>(&mut self, input: I, sink: &mut K, compare: F) -> Result<SortReport, SorterError<T, E, C>>
    where
        I: IntoIterator<Item = Result<T, E>>,
        K: RecordSink<T>,
        F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    {
        let mut tapes = self.create_tapes()?;

        let distribution = distribute(input, self.capacity, &mut tapes, &self.thread_pool, compare)?;
        let mut report = SortReport {
            records: distribution.records,
            runs: distribution.runs,
            rounds: 0,
        };

        let mut round = MergeRound::initial(self.units);
        let mut runs = distribution.runs;
        while tapes.iter().filter(|tape| !tape.is_empty()).count() > 1 {
            let merged = round.merge(&mut tapes, compare)?;
            report.rounds += 1;

            if merged >= runs {
                return Err(SortError::InvalidState(InvalidState::new(
                    None,
                    "merge round did not reduce the number of runs",
                )));
            }
            runs = merged;

            round = round.swap();
            for &idx in round.write_side() {
                tapes[idx].truncate()?;
            }
        }

        let drained = Self::drain(&mut tapes, sink)?;
        if drained != report.records {
            return Err(SortError::InvalidState(InvalidState::new(
                None,
                "number of drained records differs from the number of distributed records",
            )));
        }

        log::info!(
            "sorting done ({} records, {} runs, {} merge rounds)",
            report.records,
            report.runs,
            report.rounds
        );

        return Ok(report);
    }

    fn create_tapes(&self) -> Result<Vec<Tape<T, C>>, SorterError<T, E, C>> {
        let mut tapes = Vec::with_capacity(self.units);
        for unit in 1..=self.units {
            tapes.push(Tape::create(self.tmp_dir.path(), unit, self.rw_buf_size)?);
        }

        return Ok(tapes);
    }

    fn drain<K>(tapes: &mut [Tape<T, C>], sink: &mut K) -> Result<usize, SorterError<T, E, C>>
    where
        K: RecordSink<T>,
    {
        let mut drained = 0;
        for tape in tapes.iter_mut() {
            if !tape.is_empty() {
                if tape.runs().len() > 1 {
                    return Err(SortError::InvalidState(InvalidState::new(
                        Some(tape.unit()),
                        "converged tape holds more than one run",
                    )));
                }
                log::debug!("draining tape {}", tape.unit());
                tape.open_for_read()?;
            }
            drained += tape.drain_and_dispose(sink)?;
        }

        return Ok(drained);
    }
}
