//! This module is responsible for exfilling finished measurements to disk,
//! and for reading them back.
//!
//! Records are written as `.npz` archives (a zip of `.npy` arrays) so the files
//! load straight into `numpy.load`. Metadata rides along as `metadata.json`.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use byte_slice_cast::{AsByteSlice, AsMutByteSlice};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::{
    average::{AveragedTrace, AveragingDomain},
    errors::ExportError,
    record::{MeasurementKind, MeasurementMetadata, MeasurementRecord, RecordData},
    waterfall::WaterfallSnapshot,
    yfactor::estimate,
    FrequencyAxis, Trace,
};

const NPY_MAGIC: &[u8] = b"\x93NUMPY\x01\x00";
// Header (magic, length and dict) is padded out to a multiple of this
const NPY_ALIGN: usize = 64;

#[cfg(target_endian = "little")]
const F64_DESCR: &str = "<f8";
#[cfg(target_endian = "big")]
const F64_DESCR: &str = ">f8";

/// `{timestamp}_{name}`, or `{timestamp}_yfactor_{name}` for Y-factor records
pub fn file_stem(record: &MeasurementRecord, name: &str) -> String {
    let ts = &record.metadata().timestamp;
    match record.data() {
        RecordData::YFactor { .. } => format!("{ts}_yfactor_{name}"),
        _ => format!("{ts}_{name}"),
    }
}

/// Build the `.npy` v1.0 header for a C-ordered f64 array of `shape`
fn npy_header(shape: &[usize]) -> Vec<u8> {
    let dims = match shape {
        [n] => format!("({n},)"),
        _ => format!(
            "({})",
            shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut dict =
        format!("{{'descr': '{F64_DESCR}', 'fortran_order': False, 'shape': {dims}, }}");
    // Magic + 2 length bytes + dict + trailing newline
    let unpadded = NPY_MAGIC.len() + 2 + dict.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');

    let mut header = Vec::with_capacity(unpadded + padding);
    header.extend_from_slice(NPY_MAGIC);
    header.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header
}

fn write_npy<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    shape: &[usize],
    data: &[f64],
) -> Result<(), ExportError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(format!("{name}.npy"), options)?;
    zip.write_all(&npy_header(shape))?;
    zip.write_all(data.as_byte_slice())?;
    Ok(())
}

/// Write `record` as an npz archive into `writer`, returning the writer when done
pub fn write_npz<W: Write + Seek>(
    record: &MeasurementRecord,
    writer: W,
) -> Result<W, ExportError> {
    let mut zip = ZipWriter::new(writer);
    let freq = record.axis().as_slice();
    write_npy(&mut zip, "freq", &[freq.len()], freq)?;
    match record.data() {
        RecordData::Trace(trace) => {
            write_npy(&mut zip, "data", &[trace.len()], trace.as_slice())?;
        }
        RecordData::Waterfall(snap) => {
            write_npy(
                &mut zip,
                "waterfall",
                &[snap.rows(), snap.cols()],
                snap.as_slice(),
            )?;
        }
        RecordData::YFactor { hot, cold, result } => {
            write_npy(&mut zip, "hot_data", &[hot.len()], hot.as_slice())?;
            write_npy(&mut zip, "cold_data", &[cold.len()], cold.as_slice())?;
            write_npy(&mut zip, "y_factor", &[result.len()], &result.y)?;
            write_npy(&mut zip, "t_sys", &[result.len()], &result.t_sys)?;
            if let Some(nf) = &result.noise_figure {
                write_npy(&mut zip, "nf_db", &[nf.db.len()], &nf.db)?;
            }
        }
    }
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file("metadata.json", options)?;
    serde_json::to_writer_pretty(&mut zip, record.metadata())?;
    Ok(zip.finish()?)
}

/// Save `record` under `dir` as `<stem>.npz`.
///
/// A blank `name` means the operator declined to save, and nothing is written.
pub fn save(
    record: &MeasurementRecord,
    name: &str,
    dir: &Path,
) -> Result<Option<PathBuf>, ExportError> {
    let name = name.trim();
    if name.is_empty() {
        info!("No name entered. Not saving.");
        return Ok(None);
    }
    let path = dir.join(format!("{}.npz", file_stem(record, name)));
    // Only a complete archive ever shows up under the final name
    let tmp = NamedTempFile::new_in(dir)?;
    let tmp = write_npz(record, BufWriter::new(tmp))?
        .into_inner()
        .map_err(|e| e.into_error())?;
    tmp.persist(&path).map_err(|e| e.error)?;
    info!("Saved data as {}", path.display());
    Ok(Some(path))
}

/// `file`, with `.npz` appended unless it already ends in it
pub fn npz_path(file: &Path) -> PathBuf {
    if file.extension().map_or(false, |ext| ext == "npz") {
        return file.to_owned();
    }
    let mut path = file.as_os_str().to_owned();
    path.push(".npz");
    PathBuf::from(path)
}

fn malformed(what: impl Into<String>) -> ExportError {
    ExportError::Malformed(what.into())
}

/// Read one `.npy` array, returning its shape and C-ordered samples
fn read_npy<R: Read>(mut reader: R, name: &str) -> Result<(Vec<usize>, Vec<f64>), ExportError> {
    let mut preamble = [0u8; 10];
    reader.read_exact(&mut preamble)?;
    if &preamble[..8] != NPY_MAGIC {
        return Err(malformed(format!("{name} is not a version 1.0 npy array")));
    }
    let mut dict = vec![0u8; u16::from_le_bytes([preamble[8], preamble[9]]) as usize];
    reader.read_exact(&mut dict)?;
    let dict = String::from_utf8(dict).map_err(|_| malformed(format!("{name} header")))?;

    if !dict.contains(&format!("'descr': '{F64_DESCR}'")) {
        return Err(malformed(format!("{name} is not native-endian f64")));
    }
    if !dict.contains("'fortran_order': False") {
        return Err(malformed(format!("{name} is Fortran ordered")));
    }
    let shape = dict
        .split_once("'shape': (")
        .and_then(|(_, rest)| rest.split_once(')'))
        .ok_or_else(|| malformed(format!("{name} has no shape")))?
        .0
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| malformed(format!("{name} has a bad shape")))?;

    let mut data = vec![0f64; shape.iter().product()];
    reader.read_exact(data.as_mut_byte_slice())?;
    Ok((shape, data))
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<(Vec<usize>, Vec<f64>), ExportError> {
    let entry = format!("{name}.npy");
    read_npy(archive.by_name(&entry)?, &entry)
}

/// A 1-D entry that lines up with the frequency axis
fn read_trace<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    bins: usize,
) -> Result<Trace, ExportError> {
    match read_entry(archive, name)? {
        (shape, data) if shape == [bins] => Ok(Trace::new(data)),
        (shape, _) => Err(malformed(format!(
            "{name} has shape {shape:?}, expected ({bins},)"
        ))),
    }
}

fn extra_f64(metadata: &MeasurementMetadata, key: &str) -> Result<f64, ExportError> {
    metadata
        .extra
        .get(key)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| malformed(format!("metadata has no usable {key}")))
}

/// Read a measurement archive written by [`save`] back into a record.
///
/// Y-factor results are recomputed from the stored hot and cold traces and the
/// recorded load temperatures, so they come back exactly as they were saved.
pub fn load(path: &Path) -> Result<MeasurementRecord, ExportError> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
    let metadata: MeasurementMetadata = serde_json::from_reader(archive.by_name("metadata.json")?)?;
    let freq = match read_entry(&mut archive, "freq")? {
        (shape, freq) if shape.len() == 1 => freq,
        (shape, _) => return Err(malformed(format!("freq has shape {shape:?}"))),
    };
    let axis = Arc::new(FrequencyAxis::from(freq));
    let bins = axis.len();

    let data = match metadata.measurement_type {
        MeasurementKind::SingleTrace | MeasurementKind::AveragedTrace => {
            RecordData::Trace(read_trace(&mut archive, "data", bins)?)
        }
        MeasurementKind::Waterfall => {
            let (shape, data) = read_entry(&mut archive, "waterfall")?;
            match shape[..] {
                [rows, cols] if cols == bins => RecordData::Waterfall(
                    WaterfallSnapshot::from_rows(axis.clone(), rows, data)
                        .map_err(|e| malformed(e.to_string()))?,
                ),
                _ => return Err(malformed(format!("waterfall has shape {shape:?}"))),
            }
        }
        MeasurementKind::YfactorNoiseTemperature | MeasurementKind::YfactorNoiseFigure => {
            let hot = read_trace(&mut archive, "hot_data", bins)?;
            let cold = read_trace(&mut archive, "cold_data", bins)?;
            let enr_db = match metadata.measurement_type {
                MeasurementKind::YfactorNoiseFigure => Some(extra_f64(&metadata, "enr_db")?),
                _ => None,
            };
            let n_cold = match metadata.extra.get("n_avg_cold") {
                Some(n) => n
                    .parse()
                    .map_err(|_| malformed("metadata has a bad n_avg_cold"))?,
                None => metadata.n_avg,
            };
            let hot = AveragedTrace::with_count(hot, metadata.n_avg, AveragingDomain::Linear);
            let cold = AveragedTrace::with_count(cold, n_cold, AveragingDomain::Linear);
            let result = estimate(
                &hot,
                &cold,
                extra_f64(&metadata, "t_hot_kelvin")?,
                extra_f64(&metadata, "t_cold_kelvin")?,
                enr_db,
            )
            .map_err(|e| malformed(e.to_string()))?;
            RecordData::YFactor {
                hot: hot.into_trace(),
                cold: cold.into_trace(),
                result,
            }
        }
    };
    debug!(path = %path.display(), kind = ?metadata.measurement_type, "Loaded measurement");
    Ok(MeasurementRecord::from_parts(axis, data, metadata))
}
