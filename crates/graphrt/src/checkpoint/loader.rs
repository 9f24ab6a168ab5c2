use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::{CheckpointFormatError, MAGIC, VERSION};
use crate::tensor::{checked_byte_len, DType, RawTensor};

pub(crate) fn read_checkpoint(
    path: &Path,
) -> Result<Vec<(String, RawTensor)>, CheckpointFormatError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(CheckpointFormatError::BadMagic);
    }
    let version = read_u32(&mut reader)?;
    if version != VERSION {
        return Err(CheckpointFormatError::UnsupportedVersion(version));
    }

    let count = read_u32(&mut reader)? as usize;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name_len = read_u32(&mut reader)? as usize;
        let name = String::from_utf8(read_bytes(&mut reader, name_len)?)
            .map_err(|_| CheckpointFormatError::InvalidName)?;

        let tag = read_u32(&mut reader)?;
        let dtype = DType::from_tag(tag).ok_or(CheckpointFormatError::UnknownDType(tag))?;

        let rank = read_u32(&mut reader)? as usize;
        let mut dims = Vec::with_capacity(rank.min(16));
        for _ in 0..rank {
            let dim = read_u64(&mut reader)?;
            dims.push(usize::try_from(dim).map_err(|_| CheckpointFormatError::DimOverflow(dim))?);
        }

        if checked_byte_len(dtype, &dims).is_none() {
            return Err(CheckpointFormatError::ShapeOverflow(dims));
        }

        let len = read_u64(&mut reader)?;
        let len = usize::try_from(len).map_err(|_| CheckpointFormatError::DimOverflow(len))?;
        let bytes = read_bytes(&mut reader, len)?;
        let tensor = RawTensor::new(dtype, dims, bytes)?;
        entries.push((name, tensor));
    }
    Ok(entries)
}

fn read_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, CheckpointFormatError> {
    let mut bytes = Vec::new();
    reader.take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(CheckpointFormatError::Truncated);
    }
    Ok(bytes)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, CheckpointFormatError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, CheckpointFormatError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
