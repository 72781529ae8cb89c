//! Cache dump format (spec.md §6): gzip-wrapped, length-prefixed records
//! of `{key_bytes, store_unix, expiration_unix, value_bytes}`. Keys and
//! values are opaque; callers marshal/unmarshal their own value type.

use crate::error::Result;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

pub fn dump<W: Write>(
    writer: W,
    entries: impl Iterator<Item = (Vec<u8>, u64, u64, Vec<u8>)>,
) -> Result<()> {
    let mut encoder = GzEncoder::new(writer, Compression::default());
    for (key, stored_unix, expiration_unix, value) in entries {
        encoder.write_all(&(key.len() as u32).to_be_bytes())?;
        encoder.write_all(&key)?;
        encoder.write_all(&stored_unix.to_be_bytes())?;
        encoder.write_all(&expiration_unix.to_be_bytes())?;
        encoder.write_all(&(value.len() as u32).to_be_bytes())?;
        encoder.write_all(&value)?;
    }
    encoder.finish()?;
    Ok(())
}

/// Streams records out of a dump, invoking `on_entry` for each. Stops
/// cleanly at a clean EOF between records; any other truncation bubbles
/// up as an I/O error.
pub fn load<R: Read>(
    reader: R,
    mut on_entry: impl FnMut(Vec<u8>, u64, u64, Vec<u8>),
) -> Result<()> {
    let mut decoder = GzDecoder::new(reader);
    loop {
        let mut len_buf = [0u8; 4];
        match decoder.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let key_len = u32::from_be_bytes(len_buf) as usize;
        let mut key = vec![0u8; key_len];
        decoder.read_exact(&mut key)?;

        let mut stored_buf = [0u8; 8];
        decoder.read_exact(&mut stored_buf)?;
        let stored_unix = u64::from_be_bytes(stored_buf);

        let mut exp_buf = [0u8; 8];
        decoder.read_exact(&mut exp_buf)?;
        let expiration_unix = u64::from_be_bytes(exp_buf);

        let mut vlen_buf = [0u8; 4];
        decoder.read_exact(&mut vlen_buf)?;
        let value_len = u32::from_be_bytes(vlen_buf) as usize;
        let mut value = vec![0u8; value_len];
        decoder.read_exact(&mut value)?;

        on_entry(key, stored_unix, expiration_unix, value);
    }
    Ok(())
}
