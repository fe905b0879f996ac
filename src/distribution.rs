//! Initial run distribution.

use std::cmp::Ordering;
use std::error::Error;
use std::mem;

use log;
use rayon::slice::ParallelSliceMut;

use crate::buffer::RunBuffer;
use crate::codec::RecordCodec;
use crate::sort::{SortError, SorterError};
use crate::tape::{Tape, TapeResult};

/// Distribution stage summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Distribution {
    /// Records consumed from the input.
    pub records: usize,
    /// Initial runs written.
    pub runs: usize,
}

/// Reads the input in chunks of `capacity` records, sorts every chunk in memory and appends it as a run to
/// the first half of `tapes` in round-robin order: run `n` goes to tape `n mod (tapes.len() / 2)`.
/// The last run may be shorter than `capacity`.
///
/// # Arguments
/// * `input` - Input stream data to be fetched from
/// * `capacity` - Maximum number of records in a run
/// * `tapes` - Tape units, the first half receives the runs
/// * `thread_pool` - Thread pool the in-memory chunk sort runs in
/// * `compare` - Function to be used to compare records
pub fn distribute<T, E, C, I, F>(
    input: I,
    capacity: usize,
    tapes: &mut [Tape<T, C>],
    thread_pool: &rayon::ThreadPool,
    compare: F,
) -> Result<Distribution, SorterError<T, E, C>>
where
    T: Send,
    E: Error,
    C: RecordCodec<T>,
    I: IntoIterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
{
    let ways = tapes.len() / 2;
    if ways == 0 || capacity == 0 {
        return Err(SortError::InvalidConfiguration(format!(
            "cannot distribute runs of {} records over {} tapes",
            capacity,
            tapes.len()
        )));
    }

    let mut distribution = Distribution::default();
    let mut buffer = RunBuffer::new(capacity);

    for item in input.into_iter() {
        match item {
            Ok(item) => buffer.push(item),
            Err(err) => return Err(SortError::InputError(err)),
        }
        distribution.records += 1;

        if buffer.is_full() {
            let run = mem::replace(&mut buffer, RunBuffer::new(capacity));
            write_run(run, &mut tapes[distribution.runs % ways], thread_pool, compare)?;
            distribution.runs += 1;
        }
    }

    if !buffer.is_empty() {
        write_run(buffer, &mut tapes[distribution.runs % ways], thread_pool, compare)?;
        distribution.runs += 1;
    }

    log::debug!(
        "distribution done ({} records in {} runs over {} tapes)",
        distribution.records,
        distribution.runs,
        ways
    );

    return Ok(distribution);
}

fn write_run<T, C, F>(
    mut buffer: RunBuffer<T>,
    tape: &mut Tape<T, C>,
    thread_pool: &rayon::ThreadPool,
    compare: F,
) -> TapeResult<(), T, C>
where
    T: Send,
    C: RecordCodec<T>,
    F: Fn(&T, &T) -> Ordering + Sync + Send,
{
    log::debug!("sorting run data ({} records) ...", buffer.len());
    thread_pool.install(|| {
        buffer.par_sort_by(compare);
    });

    log::debug!("saving run data to tape {}", tape.unit());
    tape.append_run(buffer)
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{distribute, Distribution};
    use crate::codec::RmpCodec;
    use crate::sort::SortError;
    use crate::tape::{Run, Tape};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    #[fixture]
    fn thread_pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap()
    }

    fn create_tapes(dir: &tempfile::TempDir, units: usize) -> Vec<Tape<char, RmpCodec>> {
        (1..=units)
            .map(|unit| Tape::create(dir.path(), unit, None).unwrap())
            .collect()
    }

    fn read_tape(tape: &mut Tape<char, RmpCodec>) -> Vec<char> {
        let mut sink = Vec::new();
        tape.open_for_read().unwrap();
        tape.drain_and_dispose(&mut sink).unwrap();
        sink
    }

    #[rstest]
    fn test_runs_are_round_robined_over_half_of_tapes(tmp_dir: tempfile::TempDir, thread_pool: rayon::ThreadPool) {
        let mut tapes = create_tapes(&tmp_dir, 4);
        let input = "gfedcba".chars().map(|c| Ok::<_, io::Error>(c));

        let distribution = distribute(input, 3, &mut tapes, &thread_pool, char::cmp).unwrap();
        assert_eq!(distribution, Distribution { records: 7, runs: 3 });

        assert_eq!(
            tapes[0].runs(),
            &[Run { len: 3, remaining: 3 }, Run { len: 1, remaining: 1 }]
        );
        assert_eq!(tapes[1].runs(), &[Run { len: 3, remaining: 3 }]);
        assert!(tapes[2].is_empty());
        assert!(tapes[3].is_empty());

        assert_eq!(read_tape(&mut tapes[0]), vec!['e', 'f', 'g', 'a']);
        assert_eq!(read_tape(&mut tapes[1]), vec!['b', 'c', 'd']);
    }

    #[rstest]
    fn test_input_error_aborts_distribution(tmp_dir: tempfile::TempDir, thread_pool: rayon::ThreadPool) {
        let mut tapes = create_tapes(&tmp_dir, 4);
        let input = vec![Ok('a'), Err(io::Error::new(io::ErrorKind::Other, "test error"))];

        let result = distribute(input, 3, &mut tapes, &thread_pool, char::cmp);
        assert!(matches!(result, Err(SortError::InputError(_))));
    }

    #[rstest]
    fn test_empty_input(tmp_dir: tempfile::TempDir, thread_pool: rayon::ThreadPool) {
        let mut tapes = create_tapes(&tmp_dir, 4);
        let input: Vec<Result<char, io::Error>> = Vec::new();

        let distribution = distribute(input, 3, &mut tapes, &thread_pool, char::cmp).unwrap();
        assert_eq!(distribution, Distribution::default());
        assert!(tapes.iter().all(|tape| tape.is_empty()));
    }
}
