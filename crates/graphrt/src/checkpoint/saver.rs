use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{CheckpointFormatError, MAGIC, VERSION};
use crate::tensor::RawTensor;

/// Writes named tensors as `MAGIC`, version, entry count, then per entry the name, dtype tag,
/// dims and payload bytes. All integers are little-endian.
pub(crate) fn write_checkpoint(
    path: &Path,
    entries: &[(String, RawTensor)],
) -> Result<(), CheckpointFormatError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&(entries.len() as u32).to_le_bytes())?;

    for (name, tensor) in entries {
        let name_bytes = name.as_bytes();
        writer.write_all(&(name_bytes.len() as u32).to_le_bytes())?;
        writer.write_all(name_bytes)?;

        writer.write_all(&tensor.dtype().tag().to_le_bytes())?;

        let dims = tensor.dims();
        writer.write_all(&(dims.len() as u32).to_le_bytes())?;
        for &dim in dims {
            writer.write_all(&(dim as u64).to_le_bytes())?;
        }

        writer.write_all(&(tensor.byte_len() as u64).to_le_bytes())?;
        writer.write_all(tensor.bytes())?;
    }
    writer.flush()?;
    Ok(())
}
