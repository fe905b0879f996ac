//! Tape record encoding.

use std::error::Error;
use std::io;

/// Record codec interface. Provides methods for writing a single record to a tape file and reading it back.
///
/// Records are stored back to back without any framing, so a codec must be able to tell where a record ends
/// by decoding it.
pub trait RecordCodec<T> {
    type SerializationError: Error;
    type DeserializationError: Error;

    /// Writes a record to the tape writer.
    fn serialize<W: io::Write>(writer: &mut W, record: &T) -> Result<(), Self::SerializationError>;

    /// Reads the next record from the tape reader.
    fn deserialize<R: io::Read>(reader: &mut R) -> Result<T, Self::DeserializationError>;
}

/// RMP (Rust MessagePack) record codec.
/// It uses MessagePack as a data serialization format.
/// For more information see https://msgpack.org/.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmpCodec;

impl<T> RecordCodec<T> for RmpCodec
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned,
{
    type SerializationError = rmp_serde::encode::Error;
    type DeserializationError = rmp_serde::decode::Error;

    fn serialize<W: io::Write>(writer: &mut W, record: &T) -> Result<(), Self::SerializationError> {
        rmp_serde::encode::write(writer, record)
    }

    fn deserialize<R: io::Read>(reader: &mut R) -> Result<T, Self::DeserializationError> {
        rmp_serde::decode::from_read(reader)
    }
}
