//! Frame-level decoder and encoder for the binary `.JB` job files PBS
//! writes under its spool directory.
//!
//! A job file is a fixed preamble followed by attribute records and a
//! sentinel. Each record is a 24-byte little-endian header, the
//! NUL-terminated name and resource, the value with two trailing bytes,
//! and 80 bytes of zero padding. A header whose `length` field equals
//! -711 terminates the list.

use std::io::{self, Read, Write};

use crate::error::{ExporterError, Result};

use super::job::Job;
use super::schema::{
    attr_length, AttrSpec, JobSchema, ATTR_HEADER_SIZE, JOB_ATTR_END_FLAG, JOB_ATTR_PADDING,
    JOB_ATTR_START_POS,
};
use super::value;

/// Fixed preamble of the job file. The codec reads past it; only tests
/// look inside.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFileHeader {
    pub version: i32,
    pub flags: i32,
    pub stime: i64,
    pub obit_time: i64,
}

impl JobFileHeader {
    pub fn from_bytes(bytes: &[u8; ATTR_HEADER_SIZE]) -> Self {
        JobFileHeader {
            version: i32::from_le_bytes(bytes[0..4].try_into().expect("4 byte slice")),
            flags: i32::from_le_bytes(bytes[4..8].try_into().expect("4 byte slice")),
            stime: i64::from_le_bytes(bytes[8..16].try_into().expect("8 byte slice")),
            obit_time: i64::from_le_bytes(bytes[16..24].try_into().expect("8 byte slice")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AttrHeader {
    length: i32,
    name: i32,
    resource: i32,
    value: i32,
    flags: i32,
    refcount: i32,
}

impl AttrHeader {
    fn from_bytes(bytes: &[u8; ATTR_HEADER_SIZE]) -> Self {
        let field = |i: usize| {
            i32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().expect("4 byte slice"))
        };
        AttrHeader {
            length: field(0),
            name: field(1),
            resource: field(2),
            value: field(3),
            flags: field(4),
            refcount: field(5),
        }
    }

    fn to_bytes(self) -> [u8; ATTR_HEADER_SIZE] {
        let mut bytes = [0u8; ATTR_HEADER_SIZE];
        for (i, field) in [
            self.length,
            self.name,
            self.resource,
            self.value,
            self.flags,
            self.refcount,
        ]
        .into_iter()
        .enumerate()
        {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }
}

pub struct Decoder<R> {
    reader: R,
    buf: Vec<u8>,
    strict: bool,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Decoder {
            reader,
            buf: vec![0; 1024],
            strict: false,
        }
    }

    /// In strict mode any attribute whose `(name, resource)` pair is not in
    /// the schema is an error; fixture tests use this to catch schema drift
    /// when PBS adds attributes.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Read the fixed preamble header at the start of the file.
    pub fn read_file_header(&mut self) -> Result<JobFileHeader> {
        let mut bytes = [0u8; ATTR_HEADER_SIZE];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|e| ExporterError::Framing(format!("reading job file header: {e}")))?;

        Ok(JobFileHeader::from_bytes(&bytes))
    }

    pub fn decode(&mut self) -> Result<Job> {
        // position one header before the first attribute payload
        self.skip(JOB_ATTR_START_POS - ATTR_HEADER_SIZE)?;

        let mut job = Job::default();
        let schema = JobSchema::get();

        while let Some(header) = self.read_attr_header()? {
            self.read_attribute(&mut job, schema, &header)?;
        }

        Ok(job)
    }

    /// Read the next 24-byte attribute header. Returns `None` on the
    /// end-of-attributes sentinel or on a clean EOF at a record boundary;
    /// EOF inside the header is a framing error.
    fn read_attr_header(&mut self) -> Result<Option<AttrHeader>> {
        let mut bytes = [0u8; ATTR_HEADER_SIZE];
        let mut filled = 0;

        while filled < bytes.len() {
            match self.reader.read(&mut bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ExporterError::Framing(format!(
                        "reading job attribute header: {e}"
                    )))
                }
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < bytes.len() {
            return Err(ExporterError::Framing(
                "truncated job attribute header".to_string(),
            ));
        }

        let header = AttrHeader::from_bytes(&bytes);
        if header.length == JOB_ATTR_END_FLAG {
            return Ok(None);
        }

        Ok(Some(header))
    }

    fn read_attribute(
        &mut self,
        job: &mut Job,
        schema: &JobSchema,
        header: &AttrHeader,
    ) -> Result<()> {
        let name_len = header_len(header.name, "name")?;
        let resource_len = header_len(header.resource, "resource")?;
        let value_len = header_len(header.value, "value")?;

        let name = self.read_field(name_len)?;
        let resource = self.read_field(resource_len)?;
        let value = self.read_value(value_len)?;

        // Discard the residual padding as computed from the header rather
        // than assuming the fixed constant, so a padding change in a future
        // PBS release cannot desynchronise the stream.
        let residual = header.length as i64
            - ATTR_HEADER_SIZE as i64
            - name_len as i64
            - resource_len as i64
            - value_len as i64;
        if residual < 0 {
            return Err(ExporterError::Framing(format!(
                "attribute record length {} shorter than its fields",
                header.length
            )));
        }
        self.skip(residual as usize)?;

        match schema.lookup(&name, &resource) {
            Some(spec) => {
                value::decode_slot((spec.get_mut)(job), &value, spec.separator).map_err(|e| {
                    ExporterError::ValueParse(format!(
                        "attribute '{name}', resource: '{resource}': {e}"
                    ))
                })
            }
            None if self.strict => Err(ExporterError::UnknownAttribute { name, resource }),
            None => Ok(()),
        }
    }

    /// Read a name or resource field and trim its trailing NULs.
    fn read_field(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        Ok(trim_trailing_nuls(bytes))
    }

    /// Read a value field. The value is suffixed with two bytes of which
    /// the last may not be NUL: drop one byte unconditionally, then trim
    /// trailing NULs from what remains.
    fn read_value(&mut self, len: usize) -> Result<String> {
        if len == 0 {
            return Ok(String::new());
        }

        let bytes = self.read_bytes(len)?;
        let bytes = &bytes[..bytes.len() - 1];
        Ok(trim_trailing_nuls(bytes))
    }

    // Attribute fields use declared sizes over a reliable delimiter; one
    // reusable buffer grows to the largest field seen.
    fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }

        self.reader
            .read_exact(&mut self.buf[..len])
            .map_err(|e| ExporterError::Framing(format!("reading job attribute field: {e}")))?;

        Ok(&self.buf[..len])
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        let discarded = io::copy(&mut self.reader.by_ref().take(len as u64), &mut io::sink())
            .map_err(|e| ExporterError::Framing(format!("seeking to next attribute: {e}")))?;

        if discarded as usize != len {
            return Err(ExporterError::Framing(format!(
                "unexpected EOF while skipping {len} bytes"
            )));
        }

        Ok(())
    }
}

fn header_len(len: i32, field: &str) -> Result<usize> {
    usize::try_from(len)
        .map_err(|_| ExporterError::Framing(format!("negative {field} length {len}")))
}

fn trim_trailing_nuls(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

pub struct Encoder<W> {
    writer: W,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Encoder { writer }
    }

    pub fn encode(&mut self, job: &Job) -> Result<()> {
        // zeroed preamble up to one header before the first payload
        self.writer
            .write_all(&[0u8; JOB_ATTR_START_POS - ATTR_HEADER_SIZE])?;

        for spec in JobSchema::get().specs() {
            self.write_attribute(spec, job)?;
        }

        // dummy attribute header indicating end of attribute list
        let sentinel = AttrHeader {
            length: JOB_ATTR_END_FLAG,
            ..Default::default()
        };
        self.writer.write_all(&sentinel.to_bytes())?;

        Ok(())
    }

    fn write_attribute(&mut self, spec: &AttrSpec, job: &Job) -> Result<()> {
        let value = value::encode_slot((spec.get)(job), spec.separator);

        let name_len = attr_length(spec.name.len(), 1);
        let resource_len = attr_length(spec.resource.len(), 1);
        let value_len = attr_length(value.len(), 2);

        let header = AttrHeader {
            length: (ATTR_HEADER_SIZE + name_len + resource_len + value_len + JOB_ATTR_PADDING)
                as i32,
            name: name_len as i32,
            resource: resource_len as i32,
            value: value_len as i32,
            flags: 0,
            refcount: 0,
        };
        self.writer.write_all(&header.to_bytes())?;

        if name_len > 0 {
            self.writer.write_all(spec.name.as_bytes())?;
            self.writer.write_all(&[0])?;
        }
        if resource_len > 0 {
            self.writer.write_all(spec.resource.as_bytes())?;
            self.writer.write_all(&[0])?;
        }
        if value_len > 0 {
            self.writer.write_all(value.as_bytes())?;
            self.writer.write_all(&[0, 0])?;
        }

        self.writer.write_all(&[0u8; JOB_ATTR_PADDING])?;

        Ok(())
    }
}

/// Decode a job from the raw contents of a `.JB` file in lenient mode.
pub fn from_bytes(data: &[u8]) -> Result<Job> {
    Decoder::new(data).decode()
}

/// Decode a job, failing on any attribute the schema does not know.
pub fn from_bytes_strict(data: &[u8]) -> Result<Job> {
    Decoder::new(data).strict(true).decode()
}

/// Encode a job into the binary job file form.
pub fn to_bytes(job: &Job) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    Encoder::new(&mut buf).encode(job)?;
    Ok(buf)
}
