use crate::variant::VariantRecord;
use log::debug;
use noodles::bgzf;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};

const BGZF_HEADER_SIZE: usize = 18;

/// Check whether a file starts with a valid BGZF header.
fn is_bgzf<R: Read + Seek>(reader: &mut R) -> io::Result<bool> {
    let mut header = [0u8; BGZF_HEADER_SIZE];
    let result = match reader.read_exact(&mut header) {
        Ok(()) => Ok(header[0..2] == [0x1f, 0x8b]
            && header[2] == 0x08
            && header[3] == 0x04
            && header[10..12] == [0x06, 0x00]
            && header[12..14] == [b'B', b'C']
            && header[14..16] == [0x02, 0x00]),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    };
    reader.seek(SeekFrom::Start(0))?;
    result
}

/// Open a plain or BGZF-compressed text file for line reading.
pub fn open_text(path: &str) -> io::Result<Box<dyn BufRead + Send>> {
    let mut file = File::open(path).map_err(|e| {
        io::Error::new(e.kind(), format!("Failed to open '{}': {}", path, e))
    })?;
    if is_bgzf(&mut file)? {
        Ok(Box::new(BufReader::new(bgzf::io::Reader::new(file))))
    } else if [".gz", ".bgz"].iter().any(|ext| path.ends_with(ext)) {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "'{}' is regular gzip, not BGZF. Convert with: zcat '{}' | bgzip > out.gz",
                path, path
            ),
        ))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Streaming VCF reader yielding one record per data line. Records with
/// symbolic, breakend or spanning-deletion alleles are skipped.
pub struct VcfReader<R: BufRead> {
    reader: R,
    samples: Vec<String>,
    line_number: usize,
    line: String,
}

impl VcfReader<Box<dyn BufRead + Send>> {
    pub fn from_path(path: &str) -> io::Result<Self> {
        VcfReader::new(open_text(path)?)
    }
}

impl<R: BufRead> VcfReader<R> {
    /// Consume the header up to and including the `#CHROM` line.
    pub fn new(mut reader: R) -> io::Result<Self> {
        let mut line = String::new();
        let mut line_number = 0;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "VCF ended before the #CHROM header line",
                ));
            }
            line_number += 1;
            if line.starts_with("##") {
                continue;
            }
            if line.starts_with("#CHROM") {
                let samples = line
                    .trim_end()
                    .split('\t')
                    .skip(9)
                    .map(str::to_string)
                    .collect();
                return Ok(VcfReader {
                    reader,
                    samples,
                    line_number,
                    line: String::new(),
                });
            }
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Line {}: expected a VCF header line", line_number),
            ));
        }
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }
}

fn invalid(line_number: usize, msg: impl std::fmt::Display) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("VCF line {}: {}", line_number, msg),
    )
}

fn is_symbolic(allele: &str) -> bool {
    allele.starts_with('<') || allele.contains('[') || allele.contains(']') || allele == "*"
}

/// Parse one VCF data line. Returns `Ok(None)` for records this tool cannot
/// represent as sequence.
pub fn parse_vcf_line(line: &str, line_number: usize) -> io::Result<Option<VariantRecord>> {
    let fields: Vec<&str> = line.trim_end_matches(['\n', '\r']).split('\t').collect();
    if fields.len() < 8 {
        return Err(invalid(line_number, "fewer than 8 columns"));
    }
    let position: usize = fields[1]
        .parse()
        .map_err(|e| invalid(line_number, format!("bad POS '{}': {}", fields[1], e)))?;
    if position == 0 {
        return Err(invalid(line_number, "POS must be 1-based"));
    }
    let reference = fields[3].to_ascii_uppercase();
    if reference.is_empty() || reference == "." {
        return Err(invalid(line_number, "missing REF allele"));
    }
    let alts: Vec<&str> = if fields[4] == "." {
        Vec::new()
    } else {
        fields[4].split(',').collect()
    };
    if let Some(alt) = alts.iter().find(|a| is_symbolic(a)) {
        debug!(
            "Skipping {}:{} with non-sequence allele {}",
            fields[0], position, alt
        );
        return Ok(None);
    }

    let genotypes = match fields.get(8) {
        Some(format) => {
            let gt_index = format.split(':').position(|key| key == "GT");
            fields[9..]
                .iter()
                .map(|sample| {
                    gt_index
                        .and_then(|i| sample.split(':').nth(i))
                        .unwrap_or(".")
                        .to_string()
                })
                .collect()
        }
        None => Vec::new(),
    };

    Ok(Some(VariantRecord::new(
        fields[0],
        position - 1,
        fields[2],
        reference.as_bytes(),
        alts.iter()
            .map(|a| a.to_ascii_uppercase().into_bytes())
            .collect(),
        genotypes,
    )))
}

impl<R: BufRead> Iterator for VcfReader<R> {
    type Item = io::Result<VariantRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
            self.line_number += 1;
            if self.line.trim().is_empty() {
                continue;
            }
            match parse_vcf_line(&self.line, self.line_number) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
