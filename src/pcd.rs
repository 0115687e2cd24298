// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Minimal PCD (Point Cloud Data v0.7) reader and writer.
//!
//! Reads `ascii` and `binary` files carrying `x y z` plus an optional packed
//! `rgb` or `rgba` field; any other fields are skipped. Non-finite points are
//! dropped on read, so decoded buffers are always dense. Writes little-endian
//! `binary` files with fields `x y z rgb`.
//!
//! Packed color is stored as `0x00RRGGBB` reinterpreted as a 32-bit float, the
//! layout used by PCL.

use crate::{
    buffer::{Point, PointBuffer},
    error::Error,
};
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Read, Write},
    path::Path,
};
use tracing::{debug, instrument};

/// Upper bound on the buffer preallocated from the `POINTS` header entry.
const MAX_PREALLOCATED_POINTS: usize = 1 << 20;

/// Scalar type of one PCD field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Float,
    Signed,
    Unsigned,
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    size: usize,
    kind: FieldType,
    count: usize,
    /// Byte offset inside one binary record.
    offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataFormat {
    Ascii,
    Binary,
}

#[derive(Debug)]
struct Header {
    fields: Vec<Field>,
    points: usize,
    data: DataFormat,
    /// Bytes in one binary record.
    record_size: usize,
}

impl Header {
    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Index of `name` among the whitespace separated values of an ascii line.
    fn ascii_column(&self, name: &str) -> Option<usize> {
        let mut column = 0;
        for f in &self.fields {
            if f.name == name {
                return Some(column);
            }
            column += f.count;
        }
        None
    }
}

fn parse_header<R: BufRead>(reader: &mut R) -> Result<Header, Error> {
    let mut names: Vec<String> = Vec::new();
    let mut sizes: Vec<usize> = Vec::new();
    let mut kinds: Vec<FieldType> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut width: Option<usize> = None;
    let mut height: usize = 1;
    let mut points: Option<usize> = None;

    let mut line = String::new();
    let data = loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::Pcd("missing DATA line".into()));
        }
        let mut tokens = line.split_whitespace();
        let Some(key) = tokens.next() else {
            continue;
        };
        if key.starts_with('#') {
            continue;
        }
        let values: Vec<&str> = tokens.collect();
        match key.to_ascii_uppercase().as_str() {
            "VERSION" | "VIEWPOINT" => {}
            "FIELDS" => names = values.iter().map(|s| s.to_string()).collect(),
            "SIZE" => sizes = parse_list(&values, "SIZE")?,
            "COUNT" => counts = parse_list(&values, "COUNT")?,
            "TYPE" => {
                kinds = values
                    .iter()
                    .map(|t| match *t {
                        "F" => Ok(FieldType::Float),
                        "I" => Ok(FieldType::Signed),
                        "U" => Ok(FieldType::Unsigned),
                        other => Err(Error::Pcd(format!("unknown field type {}", other))),
                    })
                    .collect::<Result<_, _>>()?;
            }
            "WIDTH" => width = Some(parse_value(&values, "WIDTH")?),
            "HEIGHT" => height = parse_value(&values, "HEIGHT")?,
            "POINTS" => points = Some(parse_value(&values, "POINTS")?),
            "DATA" => match values.first().copied() {
                Some("ascii") => break DataFormat::Ascii,
                Some("binary") => break DataFormat::Binary,
                other => {
                    return Err(Error::Pcd(format!(
                        "unsupported DATA format {}",
                        other.unwrap_or("<none>")
                    )));
                }
            },
            other => return Err(Error::Pcd(format!("unknown header entry {}", other))),
        }
    };

    if counts.is_empty() {
        counts = vec![1; names.len()];
    }
    if sizes.len() != names.len() || kinds.len() != names.len() || counts.len() != names.len() {
        return Err(Error::Pcd(format!(
            "header lists {} fields but {} sizes, {} types, {} counts",
            names.len(),
            sizes.len(),
            kinds.len(),
            counts.len()
        )));
    }

    let oversized = || Error::Pcd("record size overflows".into());
    let mut fields = Vec::with_capacity(names.len());
    let mut offset: usize = 0;
    for (((name, size), kind), count) in names.into_iter().zip(sizes).zip(kinds).zip(counts) {
        let bytes = size.checked_mul(count).ok_or_else(oversized)?;
        fields.push(Field {
            name,
            size,
            kind,
            count,
            offset,
        });
        offset = offset.checked_add(bytes).ok_or_else(oversized)?;
    }

    let points = match (points, width) {
        (Some(p), _) => p,
        (None, Some(w)) => w
            .checked_mul(height)
            .ok_or_else(|| Error::Pcd(format!("WIDTH {} × HEIGHT {} overflows", w, height)))?,
        (None, None) => return Err(Error::Pcd("missing POINTS and WIDTH".into())),
    };

    let header = Header {
        fields,
        points,
        data,
        record_size: offset,
    };
    for axis in ["x", "y", "z"] {
        match header.field(axis) {
            Some(f) if f.kind == FieldType::Float && (f.size == 4 || f.size == 8) => {}
            Some(f) => {
                return Err(Error::Pcd(format!(
                    "field {} must be F4 or F8, got {:?}{}",
                    axis, f.kind, f.size
                )));
            }
            None => return Err(Error::Pcd(format!("missing field {}", axis))),
        }
    }
    if let Some(f) = color_field(&header) {
        if f.size != 4 {
            return Err(Error::Pcd(format!("field {} must be 4 bytes", f.name)));
        }
    }
    let used = ["x", "y", "z"].into_iter().filter_map(|n| header.field(n));
    if let Some(f) = used.chain(color_field(&header)).find(|f| f.count == 0) {
        return Err(Error::Pcd(format!("field {} has COUNT 0", f.name)));
    }
    Ok(header)
}

fn parse_list(values: &[&str], key: &str) -> Result<Vec<usize>, Error> {
    values
        .iter()
        .map(|v| {
            v.parse()
                .map_err(|_| Error::Pcd(format!("invalid {} value {}", key, v)))
        })
        .collect()
}

fn parse_value(values: &[&str], key: &str) -> Result<usize, Error> {
    match values {
        [v] => v
            .parse()
            .map_err(|_| Error::Pcd(format!("invalid {} value {}", key, v))),
        _ => Err(Error::Pcd(format!("{} expects one value", key))),
    }
}

fn color_field(header: &Header) -> Option<&Field> {
    header.field("rgb").or_else(|| header.field("rgba"))
}

#[inline]
fn unpack_rgb(packed: u32) -> [u8; 3] {
    [(packed >> 16) as u8, (packed >> 8) as u8, packed as u8]
}

#[inline]
fn pack_rgb(rgb: [u8; 3]) -> u32 {
    (rgb[0] as u32) << 16 | (rgb[1] as u32) << 8 | rgb[2] as u32
}

/// Decode a PCD stream into a buffer tagged with `frame_id`.
pub fn read<R: BufRead>(mut reader: R, frame_id: &str) -> Result<PointBuffer, Error> {
    let header = parse_header(&mut reader)?;
    let mut out = PointBuffer::with_capacity(header.points.min(MAX_PREALLOCATED_POINTS), frame_id);

    match header.data {
        DataFormat::Ascii => read_ascii(reader, &header, &mut out)?,
        DataFormat::Binary => read_binary(reader, &header, &mut out)?,
    }

    debug!(
        points = header.points,
        kept = out.len(),
        "decoded {:?} PCD",
        header.data
    );
    Ok(out)
}

fn read_ascii<R: BufRead>(reader: R, header: &Header, out: &mut PointBuffer) -> Result<(), Error> {
    // Header validation guarantees the coordinate columns exist
    let column = |name| header.ascii_column(name).unwrap_or(0);
    let (cx, cy, cz) = (column("x"), column("y"), column("z"));
    let color = color_field(header).map(|f| (header.ascii_column(&f.name).unwrap_or(0), f.kind));

    let mut decoded = 0;
    for line in reader.lines() {
        if decoded == header.points {
            break;
        }
        let line = line?;
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.is_empty() {
            continue;
        }
        let coord = |c: usize| -> Result<f32, Error> {
            let v = values
                .get(c)
                .ok_or_else(|| Error::Pcd(format!("short ascii record at point {}", decoded)))?;
            // PCL writes invalid points as "nan"
            v.parse::<f32>()
                .map_err(|_| Error::Pcd(format!("invalid coordinate {}", v)))
        };
        let (x, y, z) = (coord(cx)?, coord(cy)?, coord(cz)?);

        let rgb = match color {
            Some((c, kind)) => {
                let v = values
                    .get(c)
                    .ok_or_else(|| Error::Pcd(format!("short ascii record at point {}", decoded)))?;
                let packed = match kind {
                    FieldType::Float => v.parse::<f32>().map(f32::to_bits).ok(),
                    _ => v.parse::<u32>().ok(),
                }
                .ok_or_else(|| Error::Pcd(format!("invalid color {}", v)))?;
                unpack_rgb(packed)
            }
            None => [0; 3],
        };

        decoded += 1;
        let p = Point::new(x, y, z, rgb);
        if p.is_finite() {
            out.push(p);
        }
    }

    if decoded < header.points {
        return Err(Error::Pcd(format!(
            "expected {} points, found {}",
            header.points, decoded
        )));
    }
    Ok(())
}

fn read_binary<R: Read>(mut reader: R, header: &Header, out: &mut PointBuffer) -> Result<(), Error> {
    let record = header.record_size;
    if record.checked_mul(header.points).is_none() {
        return Err(Error::Pcd(format!(
            "binary payload of {} records of {} bytes overflows",
            header.points, record
        )));
    }

    let coord = |field: &Field, rec: &[u8]| -> f32 {
        let bytes = &rec[field.offset..field.offset + field.size];
        match field.size {
            8 => f64::from_le_bytes(bytes.try_into().unwrap_or([0; 8])) as f32,
            _ => f32::from_le_bytes(bytes.try_into().unwrap_or([0; 4])),
        }
    };
    // Header validation guarantees these fields exist
    let (Some(fx), Some(fy), Some(fz)) = (header.field("x"), header.field("y"), header.field("z"))
    else {
        return Err(Error::Pcd("missing coordinate field".into()));
    };
    let color = color_field(header);

    let mut buf = vec![0u8; record];
    for _ in 0..header.points {
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::Pcd(format!("binary payload shorter than {} points", header.points))
            }
            _ => Error::Io(e),
        })?;
        let rec = buf.as_slice();
        let rgb = match color {
            Some(f) => unpack_rgb(u32::from_le_bytes([
                rec[f.offset],
                rec[f.offset + 1],
                rec[f.offset + 2],
                rec[f.offset + 3],
            ])),
            None => [0; 3],
        };
        let p = Point::new(coord(fx, rec), coord(fy, rec), coord(fz, rec), rgb);
        if p.is_finite() {
            out.push(p);
        }
    }
    Ok(())
}

/// Read the PCD file at `path`, tagging the buffer with `frame_id`.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_file(path: impl AsRef<Path>, frame_id: &str) -> Result<PointBuffer, Error> {
    let file = File::open(path.as_ref())?;
    read(BufReader::new(file), frame_id)
}

/// Encode `buffer` as a binary PCD with fields `x y z rgb`.
pub fn write<W: Write>(mut writer: W, buffer: &PointBuffer) -> Result<(), Error> {
    let n = buffer.len();
    write!(
        writer,
        "# .PCD v0.7 - Point Cloud Data file format\n\
         VERSION 0.7\n\
         FIELDS x y z rgb\n\
         SIZE 4 4 4 4\n\
         TYPE F F F F\n\
         COUNT 1 1 1 1\n\
         WIDTH {n}\n\
         HEIGHT 1\n\
         VIEWPOINT 0 0 0 1 0 0 0\n\
         POINTS {n}\n\
         DATA binary\n"
    )?;

    let mut data = Vec::with_capacity(n * 16);
    for p in buffer.iter() {
        data.extend_from_slice(&p.x.to_le_bytes());
        data.extend_from_slice(&p.y.to_le_bytes());
        data.extend_from_slice(&p.z.to_le_bytes());
        data.extend_from_slice(&pack_rgb(p.rgb).to_le_bytes());
    }
    writer.write_all(&data)?;
    writer.flush()?;
    Ok(())
}

/// Write `buffer` to a binary PCD file at `path`, replacing any existing file.
#[instrument(skip_all, fields(path = %path.as_ref().display(), n_points = buffer.len()))]
pub fn write_file(path: impl AsRef<Path>, buffer: &PointBuffer) -> Result<(), Error> {
    let file = File::create(path.as_ref())?;
    write(BufWriter::new(file), buffer)
}
