//! `tape-sort` is a balanced multiway external merge sort over simulated tapes.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory. This crate implements the classical balanced merge variant working on
//! sequential-access storage units ("tapes"), each of them backed by a file. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! Sorting is achieved in two phases:
//!
//! * **Distribution:**
//!   the input is split into runs of a fixed number of records (run capacity), every run is sorted in memory
//!   and appended to one of the first `units / 2` tapes in round-robin order.
//! * **Balanced merge:**
//!   every round merges the runs of one half of the tapes (the `n`-th runs of all tapes together) into longer
//!   runs distributed over the other half, then the halves swap roles. Rounds repeat until a single tape holds
//!   all the records in a single run, which is drained into the output sink.
//!
//! The sort is stable: records comparing equal are emitted in their input order.
//! Records are stored on tapes using `MessagePack` serialization by default, any other format can be plugged
//! in by implementing [`RecordCodec`].
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io::{self, prelude::*};
//! use std::path;
//!
//! use tape_sort::{BalancedMergeSorter, BalancedMergeSorterBuilder, DelimitedWriter};
//!
//! fn main() {
//!     let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
//!     let output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());
//!
//!     let mut sorter: BalancedMergeSorter<String, io::Error> = BalancedMergeSorterBuilder::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_capacity(100_000)
//!         .with_units(6)
//!         .build()
//!         .unwrap();
//!
//!     let mut sink = DelimitedWriter::new(output_writer, "\n");
//!     sorter.sort(input_reader.lines(), &mut sink).unwrap();
//!     sink.finish().unwrap();
//! }
//! ```

pub mod buffer;
pub mod codec;
pub mod distribution;
pub mod merge;
pub mod sink;
pub mod sort;
pub mod tape;

pub use buffer::RunBuffer;
pub use codec::{RecordCodec, RmpCodec};
pub use distribution::{distribute, Distribution};
pub use merge::MergeRound;
pub use sink::{DelimitedWriter, RecordSink};
pub use sort::{BalancedMergeSorter, BalancedMergeSorterBuilder, SortError, SortReport, SorterError};
pub use tape::{Cursor, InvalidState, Run, Tape, TapeError, TapeMode};
