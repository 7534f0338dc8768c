//! Decoding of tagged, driver-owned channel buffers into typed arrays.
//!
//! The driver describes each channel buffer of a chunk with a small integer tag.
//! The tag indexes a fixed table of element layouts; the table must agree with
//! the driver's.

use std::ffi::c_void;

use bytemuck::Pod;
use eeg_types::{SampleType, TypedArray, TypedChunk};

use crate::types::DecodeError;

/// Element layout per tag, in tag order.
pub const TYPE_TABLE: [SampleType; 4] = [
    SampleType::F32,  // 0
    SampleType::U8,   // 1
    SampleType::Size, // 2
    SampleType::F64,  // 3
];

/// Looks up the layout for `tag`.
pub fn sample_type(tag: u8) -> Result<SampleType, DecodeError> {
    TYPE_TABLE
        .get(tag as usize)
        .copied()
        .ok_or(DecodeError::UnknownTypeTag(tag))
}

/// Byte length of `len` elements of `sample_type`.
fn byte_len(sample_type: SampleType, len: usize, available: usize) -> Result<usize, DecodeError> {
    len.checked_mul(sample_type.width())
        .ok_or(DecodeError::ShortBuffer {
            expected: usize::MAX,
            actual: available,
        })
}

fn read_all<T: Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Decodes `len` elements laid out per `tag` from the front of `bytes`.
pub fn decode_bytes(tag: u8, bytes: &[u8], len: usize) -> Result<TypedArray, DecodeError> {
    let sample_type = sample_type(tag)?;
    let expected = byte_len(sample_type, len, bytes.len())?;
    if bytes.len() < expected {
        return Err(DecodeError::ShortBuffer {
            expected,
            actual: bytes.len(),
        });
    }
    let bytes = &bytes[..expected];

    Ok(match sample_type {
        SampleType::F32 => TypedArray::F32(read_all(bytes)),
        SampleType::U8 => TypedArray::U8(bytes.to_vec()),
        SampleType::Size => {
            TypedArray::U64(read_all::<usize>(bytes).into_iter().map(|v| v as u64).collect())
        }
        SampleType::F64 => TypedArray::F64(read_all(bytes)),
    })
}

/// Decodes one driver-owned channel buffer into an owned array.
///
/// # Safety
/// `ptr` must be valid for reads of `len` elements of the layout `tag` names.
/// Unknown tags are rejected before `ptr` is touched.
pub unsafe fn decode_raw(tag: u8, ptr: *const c_void, len: usize) -> Result<TypedArray, DecodeError> {
    let total = byte_len(sample_type(tag)?, len, 0)?;
    if len == 0 {
        return decode_bytes(tag, &[], 0);
    }
    // Slices are limited to isize::MAX bytes
    if total > isize::MAX as usize {
        return Err(DecodeError::ShortBuffer {
            expected: total,
            actual: 0,
        });
    }
    let bytes = std::slice::from_raw_parts(ptr as *const u8, total);
    decode_bytes(tag, bytes, len)
}

/// Decodes every channel buffer of a chunk.
///
/// All tags and pointers are validated before any memory is read, so a bad
/// chunk is rejected as a whole.
///
/// # Safety
/// Each non-null pointer in `buffers` must be valid for reads of `len`
/// elements of the layout its tag names.
pub unsafe fn decode_chunk(
    tags: &[u8],
    buffers: &[*const c_void],
    len: usize,
) -> Result<TypedChunk, DecodeError> {
    if tags.len() != buffers.len() {
        return Err(DecodeError::ChannelCountMismatch {
            expected: tags.len(),
            actual: buffers.len(),
        });
    }
    for (index, (&tag, ptr)) in tags.iter().zip(buffers).enumerate() {
        sample_type(tag)?;
        if ptr.is_null() && len > 0 {
            return Err(DecodeError::NullChannelPointer(index));
        }
    }

    let channels = tags
        .iter()
        .zip(buffers)
        .map(|(&tag, &ptr)| decode_raw(tag, ptr, len))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TypedChunk::new(channels, len))
}
