//! Balanced multiway merge round.

use std::cmp::Ordering;

use log;

use crate::codec::RecordCodec;
use crate::tape::{InvalidState, Tape, TapeError, TapeResult};

/// Tape roles of a single merge round.
///
/// Runs are merged from the tapes of the read side into runs on the tapes of the write side. The read set of
/// the round is the read-side tapes holding any data; the write target moves round-robin over the write side
/// every time a merged run is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRound {
    read_side: Vec<usize>,
    write_side: Vec<usize>,
}

impl MergeRound {
    pub fn new(read_side: Vec<usize>, write_side: Vec<usize>) -> Self {
        MergeRound { read_side, write_side }
    }

    /// Roles of the first round over `units` tapes: the first half, which holds the distributed runs, is read.
    pub fn initial(units: usize) -> Self {
        let ways = units / 2;
        MergeRound::new((0..ways).collect(), (ways..units).collect())
    }

    pub fn read_side(&self) -> &[usize] {
        &self.read_side
    }

    pub fn write_side(&self) -> &[usize] {
        &self.write_side
    }

    /// Roles of the next round: the write side becomes the read side and vice versa.
    pub fn swap(self) -> Self {
        MergeRound::new(self.write_side, self.read_side)
    }

    /// Merges every run of the read side. Returns the number of merged runs written to the write side.
    ///
    /// The `n`-th runs of all read tapes form the `n`-th merged run. Among equal records the one from the
    /// tape with the lowest unit number is written first.
    pub fn merge<T, C, F>(&self, tapes: &mut [Tape<T, C>], compare: F) -> TapeResult<usize, T, C>
    where
        C: RecordCodec<T>,
        F: Fn(&T, &T) -> Ordering,
    {
        if self.write_side.is_empty() {
            return Err(TapeError::InvalidState(InvalidState::new(None, "merge round has no write tapes")));
        }
        if let Some(&busy) = self.write_side.iter().find(|&&idx| !tapes[idx].is_empty()) {
            return Err(TapeError::InvalidState(InvalidState::new(
                Some(tapes[busy].unit()),
                "write tape is not empty at the start of a merge round",
            )));
        }

        let mut read_set: Vec<usize> = self
            .read_side
            .iter()
            .copied()
            .filter(|&idx| !tapes[idx].is_empty())
            .collect();
        read_set.sort_by_key(|&idx| tapes[idx].unit());

        for &idx in &read_set {
            tapes[idx].open_for_read()?;
        }

        let mut runs = 0;
        while !read_set.is_empty() {
            let target = self.write_side[runs % self.write_side.len()];
            if runs < self.write_side.len() {
                tapes[target].open_for_write()?;
            } else {
                tapes[target].start_run()?;
            }
            runs += 1;

            while let Some(source) = select_min(tapes, &read_set, &compare) {
                let record = tapes[source].take_record()?;
                tapes[target].write_record(record)?;
                tapes[source].read_record()?;
            }

            if read_set.iter().all(|&idx| tapes[idx].is_empty()) {
                break;
            }
            for &idx in &read_set {
                tapes[idx].advance_to_next_run()?;
            }
        }

        log::info!(
            "merge round done: {} tapes merged into {} runs on {} tapes",
            read_set.len(),
            runs,
            runs.min(self.write_side.len())
        );

        return Ok(runs);
    }
}

/// Returns the index of the read tape holding the minimal record, ties broken by the lowest unit number.
/// Returns [`None`] if the active runs of all tapes are exhausted.
pub fn select_min<T, C, F>(tapes: &[Tape<T, C>], read_set: &[usize], compare: F) -> Option<usize>
where
    C: RecordCodec<T>,
    F: Fn(&T, &T) -> Ordering,
{
    let mut min: Option<(usize, &T)> = None;

    for &idx in read_set {
        let record = match tapes[idx].current() {
            Some(record) => record,
            None => continue,
        };
        min = match min {
            Some((min_idx, min_record)) => match compare(record, min_record) {
                Ordering::Less => Some((idx, record)),
                Ordering::Equal if tapes[idx].unit() < tapes[min_idx].unit() => Some((idx, record)),
                _ => Some((min_idx, min_record)),
            },
            None => Some((idx, record)),
        };
    }

    min.map(|(idx, _)| idx)
}
