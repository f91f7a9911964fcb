//! The offload frame codec.
//!
//! ```text
//! [0..4)   u32 little-endian: N = byte length of the metadata block
//! [4..4+N) UTF-8 JSON encoding of `MessageMetadata`
//! [4+N..)  f32 IEEE-754 little-endian, contiguous, row-major per `shape`
//! ```

use crate::{FrameError, specs::MessageMetadata};

type MetaLen = u32;
const META_LEN_SIZE: usize = size_of::<MetaLen>();
const ELEM_SIZE: usize = size_of::<f32>();

/// Encodes `metadata` and `payload` into a single frame.
///
/// # Arguments
/// * `metadata` - The frame's metadata block.
/// * `payload` - The tensor data, row-major per `metadata.shape`.
///
/// # Returns
/// The encoded frame.
pub fn encode(metadata: &MessageMetadata, payload: &[f32]) -> Vec<u8> {
    // SAFETY: Serialize impl for `MessageMetadata` is derived and holds no
    //         non string-key maps.
    let json = serde_json::to_vec(metadata).unwrap();

    let mut buf = Vec::with_capacity(META_LEN_SIZE + json.len() + payload.len() * ELEM_SIZE);
    buf.extend_from_slice(&(json.len() as MetaLen).to_le_bytes());
    buf.extend_from_slice(&json);
    extend_le_floats(&mut buf, payload);
    buf
}

/// Decodes a frame produced by `encode`.
///
/// The source buffer is never modified and may be arbitrarily aligned, the
/// payload is copied into a fresh vector.
///
/// # Arguments
/// * `buf` - The whole frame.
///
/// # Returns
/// The metadata and payload, or the reason the frame is malformed.
pub fn decode(buf: &[u8]) -> Result<(MessageMetadata, Vec<f32>), FrameError> {
    let Some((len_buf, rest)) = buf.split_first_chunk::<META_LEN_SIZE>() else {
        return Err(FrameError::MissingHeader { len: buf.len() });
    };

    let declared = MetaLen::from_le_bytes(*len_buf) as usize;
    if declared > rest.len() {
        return Err(FrameError::MetadataLength {
            declared,
            available: rest.len(),
        });
    }

    let (meta, raw) = rest.split_at(declared);
    let metadata: MessageMetadata = serde_json::from_slice(meta)?;
    metadata.validate()?;

    if raw.len() % ELEM_SIZE != 0 {
        return Err(FrameError::PayloadAlignment { len: raw.len() });
    }

    let payload = raw
        .chunks_exact(ELEM_SIZE)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok((metadata, payload))
}

#[cfg(target_endian = "little")]
fn extend_le_floats(buf: &mut Vec<u8>, payload: &[f32]) {
    buf.extend_from_slice(bytemuck::cast_slice(payload));
}

#[cfg(not(target_endian = "little"))]
fn extend_le_floats(buf: &mut Vec<u8>, payload: &[f32]) {
    for x in payload {
        buf.extend_from_slice(&x.to_le_bytes());
    }
}
