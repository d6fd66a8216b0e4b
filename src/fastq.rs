use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bio::io::{fasta, fastq};
use serde::Serialize;

use crate::error::KiraError;

pub const DEFAULT_MAX_READ_LEN: usize = 150;
const QUALITY: u8 = b'F';

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConvertStats {
    pub records: usize,
    pub reads: usize,
}

/// Rewrites FASTA as FASTQ with constant quality, splitting sequences longer
/// than `max_len` into `<name>_0`, `<name>_1`, ... reads. The read name keeps
/// the header description.
pub fn convert_fasta<R: Read, W: Write>(
    reader: R,
    writer: W,
    max_len: usize,
) -> Result<ConvertStats, KiraError> {
    if max_len == 0 {
        return Err(KiraError::InvalidConfig(
            "max read length must be at least 1".to_string(),
        ));
    }
    let mut stats = ConvertStats::default();
    let mut fq_writer = fastq::Writer::new(writer);

    for record in fasta::Reader::new(reader).records() {
        let record = record.map_err(|err| KiraError::InvalidFasta(err.to_string()))?;
        let name = match record.desc() {
            Some(desc) => format!("{} {desc}", record.id()),
            None => record.id().to_string(),
        };
        stats.reads += write_reads(&mut fq_writer, &name, record.seq(), max_len)?;
        stats.records += 1;
    }
    fq_writer
        .flush()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(stats)
}

pub fn convert_fasta_file(
    input: &Path,
    output: &Path,
    max_len: usize,
) -> Result<ConvertStats, KiraError> {
    let reader = File::open(input)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", input.display())))?;
    let writer = File::create(output)
        .map_err(|err| KiraError::Filesystem(format!("create {}: {err}", output.display())))?;
    convert_fasta(reader, writer, max_len)
}

fn write_reads<W: Write>(
    writer: &mut fastq::Writer<W>,
    name: &str,
    seq: &[u8],
    max_len: usize,
) -> Result<usize, KiraError> {
    if seq.len() <= max_len {
        write_read(writer, name, seq)?;
        return Ok(1);
    }
    let mut count = 0usize;
    for (index, chunk) in seq.chunks(max_len).enumerate() {
        write_read(writer, &format!("{name}_{index}"), chunk)?;
        count += 1;
    }
    Ok(count)
}

fn write_read<W: Write>(
    writer: &mut fastq::Writer<W>,
    name: &str,
    seq: &[u8],
) -> Result<(), KiraError> {
    let quality = vec![QUALITY; seq.len()];
    writer
        .write(name, None, seq, &quality)
        .map_err(|err| KiraError::Filesystem(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(input: &str, max_len: usize) -> (String, ConvertStats) {
        let mut out = Vec::new();
        let stats = convert_fasta(input.as_bytes(), &mut out, max_len).unwrap();
        (String::from_utf8(out).unwrap(), stats)
    }

    #[test]
    fn short_sequence_is_one_read() {
        let (out, stats) = convert(">r1\nACGT\n", 150);
        assert_eq!(out, "@r1\nACGT\n+\nFFFF\n");
        assert_eq!(stats, ConvertStats { records: 1, reads: 1 });
    }

    #[test]
    fn long_sequence_is_split_with_remainder() {
        let (out, stats) = convert(">r1\nACGTACG\n", 3);
        assert_eq!(
            out,
            "@r1_0\nACG\n+\nFFF\n@r1_1\nTAC\n+\nFFF\n@r1_2\nG\n+\nF\n"
        );
        assert_eq!(stats.reads, 3);
    }

    #[test]
    fn exact_multiple_has_no_remainder() {
        let (out, _) = convert(">r\nAAAA\n", 2);
        assert_eq!(out, "@r_0\nAA\n+\nFF\n@r_1\nAA\n+\nFF\n");
    }

    #[test]
    fn wrapped_sequence_lines_are_joined() {
        let (out, stats) = convert(">a desc\nAC\nGT\n>b\nT\n", 10);
        assert_eq!(out, "@a desc\nACGT\n+\nFFFF\n@b\nT\n+\nF\n");
        assert_eq!(stats.records, 2);
    }

    #[test]
    fn split_reads_keep_description_before_index() {
        let (out, _) = convert(">r7 sample=liver\nACGTA\n", 4);
        assert_eq!(
            out,
            "@r7 sample=liver_0\nACGT\n+\nFFFF\n@r7 sample=liver_1\nA\n+\nF\n"
        );
    }

    #[test]
    fn sequence_without_header_is_rejected() {
        let mut out = Vec::new();
        let err = convert_fasta("ACGT\n".as_bytes(), &mut out, 10).unwrap_err();
        assert!(matches!(err, KiraError::InvalidFasta(_)));
    }
}
