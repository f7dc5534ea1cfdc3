use super::*;

use std::io::Cursor;

//-----------------------------------------------------------------------------

#[test]
fn region_parsing() {
    let region = Region::parse("x:0-15").unwrap();
    assert_eq!(region, Region { name: String::from("x"), lower: 0, upper: 15 });
    assert!(region.contains(0));
    assert!(region.contains(14));
    assert!(!region.contains(15));

    let region = Region::parse("chr22:1,000-10,000,000").unwrap();
    assert_eq!(region.lower, 1000, "Commas in the bounds should be ignored");
    assert_eq!(region.upper, 10_000_000);

    let region = Region::parse("y").unwrap();
    assert_eq!(region, Region::full("y"));
    assert!(region.contains(123_456), "An open region contains every position");

    let region = Region::parse("x:10-0").unwrap();
    assert_eq!(region.upper, 0, "An upper bound of 0 means the end of the sequence");
    assert!(region.contains(10));

    assert!(Region::parse("").is_err());
    assert!(Region::parse("x:5").is_err());
    assert!(Region::parse("x:a-b").is_err());
    assert!(Region::parse("x:10-5").is_err(), "An empty interval should be rejected");

    assert_eq!(Region::parse("x:0-15").unwrap().to_string(), "x:0-15");
}

//-----------------------------------------------------------------------------

#[test]
fn fasta_parsing() {
    let data = b">x first sequence\nACGTAC\nGTACGT\n\n>y\nTTTT\n";
    let reference = Reference::parse(Cursor::new(&data[..])).unwrap();

    assert_eq!(reference.sequence_names(), &[String::from("x"), String::from("y")]);
    assert_eq!(reference.sequence_len("x").unwrap(), 12, "Sequence lines should be concatenated");
    assert_eq!(reference.sequence_len("y").unwrap(), 4);
    assert!(reference.sequence_len("z").is_err());

    assert_eq!(reference.subsequence("x", 0, 6).unwrap(), b"ACGTAC");
    assert_eq!(reference.subsequence("x", 4, 8).unwrap(), b"ACGT", "Intervals may span line breaks");
    assert_eq!(reference.subsequence("x", 12, 12).unwrap(), b"");
    assert!(reference.subsequence("x", 0, 13).is_err());
    assert!(reference.subsequence("x", 8, 4).is_err());
}

#[test]
fn invalid_fasta() {
    assert!(Reference::parse(Cursor::new(&b"ACGT\n"[..])).is_err(), "Data before a header should fail");
    assert!(Reference::parse(Cursor::new(&b">x\nAC\n>x\nGT\n"[..])).is_err(), "Duplicate names should fail");
}

//-----------------------------------------------------------------------------

fn example_vcf() -> &'static [u8] {
    b"##fileformat=VCFv4.1\n\
      ##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele Frequency\">\n\
      #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts1\ts2\n\
      x\t9\t.\tG\tA,C,T\t99\t.\tAF=0.01,0.6,0.1\tGT\t0|1\t2|3\n\
      x\t14\t.\tGT\t<CN2>\t99\t.\tAF=0.05\tGT\t1|0\t./1\n\
      y\t3\t.\tA\tC\t99\t.\tNS=2\tGT:DP\t0/1:10\t1:7\n"
}

#[test]
fn vcf_header() {
    let variants = VariantFile::parse(Cursor::new(example_vcf())).unwrap();
    assert_eq!(variants.num_samples(), 2);
    assert_eq!(variants.num_haplotypes(), 4);
    assert_eq!(variants.samples(), &[String::from("s1"), String::from("s2")]);
    assert_eq!(variants.records().len(), 3);
}

#[test]
fn vcf_records() {
    let variants = VariantFile::parse(Cursor::new(example_vcf())).unwrap();

    let first = &variants.records()[0];
    assert_eq!(first.chrom, "x");
    assert_eq!(first.position, 9);
    assert_eq!(first.reference(), "G");
    assert_eq!(first.allele_count(), 4);
    assert_eq!(first.alleles[1..], [String::from("A"), String::from("C"), String::from("T")]);
    assert!((first.frequencies[0] - 0.29).abs() < 1e-9, "Reference AF is 1 - sum(alts)");
    assert!((first.frequencies[2] - 0.6).abs() < 1e-9);
    assert_eq!(first.genotypes, vec![0, 1, 2, 3]);
    assert_eq!(first.carriers(0), vec![0]);
    assert_eq!(first.carriers(2), vec![2]);

    // Symbolic alleles keep their tokens, and missing genotypes count as
    // the reference.
    let second = &variants.records()[1];
    assert_eq!(second.alleles[1], "<CN2>");
    assert_eq!(second.genotypes, vec![1, 0, 0, 1]);

    // Unphased and haploid genotypes, GT not the only FORMAT field.
    let third = &variants.records()[2];
    assert_eq!(third.genotypes, vec![0, 1, 1, 1], "A haploid call covers both haplotypes");
    assert!((third.frequencies[0] - 1.0).abs() < 1e-9, "Missing AF leaves the reference at 1");
    assert!((third.frequencies[1] - 0.0).abs() < 1e-9);
}

#[test]
fn vcf_region_filter() {
    let variants = VariantFile::parse(Cursor::new(example_vcf())).unwrap();
    let region = Region::parse("x:0-10").unwrap();
    let records = variants.records_in(&region);
    assert_eq!(records.len(), 1, "Only the first record starts within x:0-10");
    assert_eq!(records[0].position, 9);

    let region = Region::parse("x").unwrap();
    assert_eq!(variants.records_in(&region).len(), 2);
}

#[test]
fn invalid_vcf() {
    // No header line.
    let result = VariantFile::parse(Cursor::new(&b"x\t9\t.\tG\tA\t99\t.\t.\n"[..]));
    assert!(result.is_err(), "Records before the header should fail");

    let with_header = |record: &str| {
        let text = format!(
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts1\n{}\n", record
        );
        VariantFile::parse(Cursor::new(text.into_bytes()))
    };
    assert!(with_header("x\t0\t.\tG\tA\t99\t.\t.\tGT\t0|1").is_err(), "Position 0 should fail");
    assert!(with_header("x\tfoo\t.\tG\tA\t99\t.\t.\tGT\t0|1").is_err(), "Invalid position should fail");
    assert!(with_header("x\t5\t.\tG\tA\t99\t.\t.\tGT\t0|9").is_err(), "Out-of-range genotype should fail");
    assert!(with_header("x\t5\t.\tG\tA\t99\t.\t.\tDP\t10").is_err(), "Missing GT field should fail");
    assert!(with_header("x\t5\t.\tG\tA\t99\t.\t.\tGT\t0|1\t1|1").is_err(), "Extra sample columns should fail");
}

//-----------------------------------------------------------------------------

#[test]
fn sam_record_round_trip() {
    let line = "read1\t4\t*\t14\t255\t*\t*\t0\t0\tGAAATT\t*\tRG:Z:sample1\tNM:i:2";
    let record = SamRecord::parse(line).unwrap();
    assert_eq!(record.qname, "read1");
    assert_eq!(record.flag, 4);
    assert_eq!(record.pos, 14);
    assert_eq!(record.seq, "GAAATT");
    assert_eq!(record.get_aux("RG"), Some("sample1"));
    assert_eq!(record.get_aux("NM"), Some("2"));
    assert_eq!(record.get_aux("XX"), None);
    assert_eq!(record.to_line(), line, "A parsed record should serialize identically");
}

#[test]
fn sam_aux_update() {
    let mut record = SamRecord::unmapped("read1", "ACGT");
    assert_eq!(record.flag, 4);
    record.set_aux("mp", 'i', "100");
    record.set_aux("mp", 'i', "200");
    assert_eq!(record.get_aux("mp"), Some("200"), "Setting a tag twice should replace it");
    assert_eq!(record.aux.len(), 1);
}

#[test]
fn invalid_sam() {
    assert!(SamRecord::parse("too\tfew\tfields").is_err());
    assert!(
        SamRecord::parse("r\tx\t*\t1\t255\t*\t*\t0\t0\tA\t*").is_err(),
        "A non-numeric flag should fail"
    );
    assert!(
        SamRecord::parse("r\t4\t*\t1\t255\t*\t*\t0\t0\tA\t*\tbad").is_err(),
        "A malformed auxiliary field should fail"
    );
}

#[test]
fn sam_file() {
    let data = b"@HD\tVN:1.6\n\
                 @RG\tID:sample1\n\
                 @RG\tID:sample2\tDS:other\n\
                 read1\t4\t*\t14\t255\t*\t*\t0\t0\tGAAATT\t*\tRG:Z:sample1\n\
                 read2\t4\t*\t17\t255\t*\t*\t0\t0\tATTTTC\t*\n";
    let mut sam = SamFile::parse(Cursor::new(&data[..])).unwrap();
    assert_eq!(sam.header.len(), 3);
    assert_eq!(sam.records.len(), 2);
    assert_eq!(sam.read_groups(), vec!["sample1", "sample2"]);

    sam.add_read_group("sample1");
    assert_eq!(sam.header.len(), 3, "Existing read groups should not be duplicated");
    sam.add_read_group("sample3");
    assert_eq!(sam.read_groups(), vec!["sample1", "sample2", "sample3"]);

    sam.add_program("VA", "aligner", "aligner -x");
    let mut buffer: Vec<u8> = Vec::new();
    sam.write(&mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert!(text.contains("@PG\tID:VA\tPN:aligner"));
    assert!(text.ends_with("ATTTTC\t*\n"));
}

//-----------------------------------------------------------------------------

#[test]
fn read_meta_round_trip() {
    let meta = ReadMeta { end: 1234, substitutions: 2, indels: 0, var_nodes: 1, var_bases: 3 };
    let mut buffer: Vec<u8> = Vec::new();
    write_read_fasta("ACGTACGT", &meta, &mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert_eq!(header, ">pos=1234;sub=2;ind=0;vnd=1;vbs=3");
    assert_eq!(lines.next().unwrap(), "ACGTACGT");

    let parsed = parse_read_meta(header).unwrap();
    assert_eq!(parsed, meta);

    assert!(parse_read_meta(">pos=12;bad").is_err());
    assert!(parse_read_meta(">pos=x").is_err());
    assert!(parse_read_meta(">foo=1").is_err());
}

//-----------------------------------------------------------------------------
