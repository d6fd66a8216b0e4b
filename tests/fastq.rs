use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_series_resolver::app::convert_fasta;
use kira_series_resolver::error::KiraError;
use kira_series_resolver::fastq::convert_fasta_file;
use kira_series_resolver::output::JsonOutput;

#[test]
fn file_conversion_splits_long_reads() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("reads.fasta");
    let output = temp.path().join("reads.fastq");
    fs::write(&input, ">seq1\nAAAAACCCCC\nGG\n>seq2\nTT\n").unwrap();

    let stats = convert_fasta_file(&input, &output, 5).unwrap();
    assert_eq!(stats.records, 2);
    assert_eq!(stats.reads, 4);

    let content = fs::read_to_string(&output).unwrap();
    let headers = content
        .lines()
        .filter(|line| line.starts_with('@'))
        .collect::<Vec<_>>();
    assert_eq!(headers, vec!["@seq1_0", "@seq1_1", "@seq1_2", "@seq2"]);
    assert!(content.contains("@seq1_2\nGG\n+\nFF\n"));
}

#[test]
fn app_conversion_reports_stats() {
    let temp = tempfile::tempdir().unwrap();
    let input = Utf8PathBuf::from_path_buf(temp.path().join("in.fa")).unwrap();
    let output = Utf8PathBuf::from_path_buf(temp.path().join("out.fq")).unwrap();
    fs::write(input.as_std_path(), ">r\nACGT\n").unwrap();

    let result = convert_fasta(&input, &output, 150, &JsonOutput).unwrap();
    assert_eq!(result.stats.reads, 1);
    assert_eq!(result.max_read_len, 150);
    assert_eq!(
        fs::read_to_string(output.as_std_path()).unwrap(),
        "@r\nACGT\n+\nFFFF\n"
    );
}

#[test]
fn missing_input_is_a_filesystem_error() {
    let temp = tempfile::tempdir().unwrap();
    let err = convert_fasta_file(
        &temp.path().join("absent.fa"),
        &temp.path().join("out.fq"),
        10,
    )
    .unwrap_err();
    assert_matches!(err, KiraError::Filesystem(_));
}

#[test]
fn zero_max_length_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("in.fa");
    fs::write(&input, ">r\nA\n").unwrap();
    let err = convert_fasta_file(&input, &temp.path().join("out.fq"), 0).unwrap_err();
    assert_matches!(err, KiraError::InvalidConfig(_));
}
