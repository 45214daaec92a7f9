use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bbviprs::io::{read_genotype_phenotype, read_genotypes, read_phenotype, read_table, read_variants};
use bbviprs::logging::RunLog;
use bbviprs::prs::{PrsConfig, run, write_harmonized};
use bbviprs::sumstats::{SumstatsConfig, load_sumstats};
use bbviprs::sweep::{SweepConfig, SweepGrid};
use bbviprs::types::InitStrategy;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;

const GENOTYPES: &str = "\
FID IID PAT MAT SEX PHENOTYPE rs1_A rs2_C rs3_G rs4_T rs5_A rs6_C
F1 S1 0 0 1 0.1 0 0 2 0 1 1
F2 S2 0 0 2 1.2 1 1 1 2 0 1
F3 S3 0 0 1 2.3 2 2 0 1 1 1
F4 S4 0 0 2 0.2 0 1 1 0 2 1
F5 S5 0 0 1 0.9 1 1 2 1 0 1
F6 S6 0 0 2 2.1 2 1 0 2 1 1
F7 S7 0 0 1 -0.1 0 0 1 1 2 1
F8 S8 0 0 2 1.1 1 2 0 0 1 1
F9 S9 0 0 1 1.8 2 2 1 1 0 1
F10 S10 0 0 2 0.3 0 0 2 2 2 1
F11 S11 0 0 1 -9 1 NA 1 1 1 1
";

const VARIANTS: &str = "\
SNP\tA1\tA2
rs1\tA\tG
rs2\tC\tT
rs3\tG\tA
rs4\tT\tC
rs5\tA\tC
rs6\tC\tA
";

const SUMSTATS: &str = "\
rsid,effect_allele,other_allele,beta,se,n,p
rs1,A,G,0.5,0.1,5000,1e-6
rs2,G,A,0.05,0.1,5000,0.6
rs3,A,G,-0.1,0.1,5000,0.3
rs4,T,C,0.02,,5000,0.8
rs5,A,C,0.03,0.1,5000,0.7
rs6,C,A,0.01,0.1,5000,0.9
rs7,A,G,0.2,0.1,5000,0.01
rs1,A,G,9.9,0.1,5000,0.5
rs8,I,D,0.1,0.1,5000,0.5
";

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

fn write_gz(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    let file = fs::File::create(&path).expect("create fixture");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(contents.as_bytes())
        .expect("compress fixture");
    encoder.finish().expect("finish gzip");
    path
}

fn fixture_config(dir: &TempDir) -> PrsConfig {
    let root = dir.path();
    PrsConfig {
        genotypes: write(root, "toy.raw", GENOTYPES),
        variants: write_gz(root, "toy.variants.gz", VARIANTS),
        sumstats: write(root, "toy.sumstats.csv", SUMSTATS),
        out_prefix: root.join("toy").to_string_lossy().into_owned(),
        ..PrsConfig::default()
    }
}

#[test]
fn reads_plink_raw_genotypes() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(dir.path(), "toy.raw", GENOTYPES);
    let geno = read_genotypes(&path).expect("genotypes");
    assert_eq!(geno.sample_ids.len(), 11);
    assert_eq!(geno.sample_ids[0], "S1");
    assert_eq!(
        geno.snp_ids,
        vec!["rs1_A", "rs2_C", "rs3_G", "rs4_T", "rs5_A", "rs6_C"]
    );
    assert_eq!(geno.dosages[[2, 0]], 2.0);
    assert!(geno.dosages[[10, 1]].is_nan());

    let phenotype = read_genotype_phenotype(&path)
        .expect("phenotype")
        .expect("PHENOTYPE column");
    assert_eq!(phenotype["S3"], 2.3);
    assert_eq!(phenotype["S11"], -9.0);
}

#[test]
fn reads_compressed_variants() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_gz(dir.path(), "toy.variants.gz", VARIANTS);
    let df = read_table(&path).expect("table");
    assert_eq!(df.height(), 6);
    let variants = read_variants(&path).expect("variants");
    assert_eq!(variants[2].snp, "rs3");
    assert_eq!(variants[2].a1, "G");
    assert_eq!(variants[2].a2, "A");
}

#[test]
fn reads_named_phenotype_column() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(
        dir.path(),
        "pheno.tsv",
        "FID\tIID\theight\tbmi\nF1\tS1\t1.7\t22\nF2\tS2\t1.8\t25\n",
    );
    let bmi = read_phenotype(&path, Some("BMI")).expect("phenotype");
    assert_eq!(bmi["S2"], 25.0);
    let first = read_phenotype(&path, None).expect("phenotype");
    assert_eq!(first["S1"], 1.7);
}

#[test]
fn sumstats_filters_and_derived_se() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(dir.path(), "toy.sumstats.csv", SUMSTATS);
    let mut log = RunLog::disabled();

    let all = load_sumstats(&path, &SumstatsConfig::default(), &mut log).expect("sumstats");
    let ids: Vec<&str> = all.iter().map(|r| r.snp.as_str()).collect();
    assert_eq!(ids, vec!["rs1", "rs2", "rs3", "rs4", "rs5", "rs6", "rs7"]);
    assert_eq!(all[0].beta, 0.5);
    let derived = &all[3];
    assert!(derived.se > 0.0 && derived.se.is_finite());
    // |beta| / se recovers the chi-square quantile of P.
    assert!((derived.beta.abs() / derived.se - 0.253_347).abs() < 1e-4);

    let strict = SumstatsConfig {
        p_threshold: 0.5,
        ..SumstatsConfig::default()
    };
    let kept = load_sumstats(&path, &strict, &mut log).expect("sumstats");
    let ids: Vec<&str> = kept.iter().map(|r| r.snp.as_str()).collect();
    assert_eq!(ids, vec!["rs1", "rs3", "rs7"]);
}

#[test]
fn harmonize_subcommand_writes_table() {
    let dir = TempDir::new().expect("tempdir");
    let config = fixture_config(&dir);
    let out = dir.path().join("harmonized.tsv");
    let data = write_harmonized(&config, &out).expect("harmonize");

    assert_eq!(data.report.overlap, 6);
    assert_eq!(data.report.flipped, 1);
    assert_eq!(data.report.reversed, 1);
    assert_eq!(data.report.monomorphic, 1);
    assert_eq!(data.report.retained, 5);
    // S11 has no phenotype and is removed before harmonization.
    assert_eq!(data.sample_ids.len(), 10);
    assert_eq!(data.sumstats[2].beta, 0.1);

    let table = read_table(&out).expect("read back");
    assert_eq!(table.height(), 5);
    assert!(table.column("Z").is_ok());
}

#[test]
fn full_run_writes_results_and_weights() {
    let dir = TempDir::new().expect("tempdir");
    let config = PrsConfig {
        init: InitStrategy::Infinitesimal { h2: 0.5 },
        grid: SweepGrid {
            scale1: vec![1.0, 0.1],
            scale2: 0.01,
            mixture_prob: vec![0.2, 0.8],
        },
        sweep: SweepConfig {
            steps: 50,
            n_mc_samples: 10,
            ..SweepConfig::default()
        },
        ..fixture_config(&dir)
    };
    let result = run(&config).expect("run");

    assert_eq!(result.table.len(), 4);
    assert!(result.results_path.exists());
    let results = read_table(&result.results_path).expect("results");
    assert_eq!(results.height(), 4);

    let weights_path = result.weights_path.expect("weights written");
    let weights = read_table(&weights_path).expect("weights");
    assert_eq!(weights.height(), result.harmonized.n_snps());
    assert!(weights.column("WEIGHT").is_ok());
    let sd = weights
        .column("SD")
        .expect("SD column")
        .f64()
        .expect("SD is float");
    assert!(sd.into_iter().all(|v| v.is_some_and(|v| v > 0.0)));

    assert!(dir.path().join("toy_bbviprs.log").exists());
}

#[test]
fn missing_input_file_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let config = PrsConfig {
        sumstats: dir.path().join("absent.txt"),
        ..fixture_config(&dir)
    };
    assert!(run(&config).is_err());
}

#[test]
fn run_log_writes_lines_and_warnings() {
    let dir = TempDir::new().expect("tempdir");
    let prefix = dir.path().join("run").to_string_lossy().into_owned();
    let mut log = RunLog::create(&prefix).expect("log");
    log.line("first line").expect("line");
    log.warn("something odd").expect("warn");
    let path = log.path().expect("log path").to_path_buf();
    drop(log);
    let text = fs::read_to_string(&path).expect("read log");
    assert_eq!(text, "first line\nWARNING: something odd\n");
    assert!(RunLog::disabled().path().is_none());
}

#[test]
fn failed_initialization_marks_every_point_failed() {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path();
    // rs1 and rs2 carry identical dosages, so the LD matrix is singular.
    let genotypes = "\
FID IID PAT MAT SEX PHENOTYPE rs1_A rs2_C rs3_G
F1 S1 0 0 1 0.4 0 0 1
F2 S2 0 0 2 1.1 1 1 2
F3 S3 0 0 1 2.0 2 2 0
F4 S4 0 0 2 0.7 1 1 1
F5 S5 0 0 1 1.6 2 2 2
F6 S6 0 0 2 0.2 0 0 0
";
    let sumstats = "\
SNP\tA1\tA2\tBETA\tSE\tN\tP
rs1\tA\tG\t0.3\t0.1\t1e12\t0.001
rs2\tC\tT\t0.3\t0.1\t1e12\t0.001
rs3\tG\tA\t0.05\t0.1\t1e12\t0.6
";
    let config = PrsConfig {
        genotypes: write(root, "collinear.raw", genotypes),
        variants: write(root, "collinear.variants", VARIANTS),
        sumstats: write(root, "collinear.sumstats", sumstats),
        out_prefix: root.join("collinear").to_string_lossy().into_owned(),
        init: InitStrategy::Infinitesimal { h2: 0.5 },
        grid: SweepGrid {
            scale1: vec![1.0, 0.1],
            scale2: 0.01,
            mixture_prob: vec![0.5],
        },
        sweep: SweepConfig {
            steps: 10,
            n_mc_samples: 5,
            ..SweepConfig::default()
        },
        ..PrsConfig::default()
    };
    let result = run(&config).expect("run completes");

    assert_eq!(result.table.len(), 2);
    assert_eq!(result.table.n_failed(), 2);
    for record in result.table.records() {
        let status = record.status();
        assert!(
            status.starts_with("failed: closed-form initialization failed"),
            "{status}"
        );
    }
    assert!(result.results_path.exists());
    assert_eq!(read_table(&result.results_path).expect("results").height(), 2);
    assert!(result.weights_path.is_none());
    assert!(!root.join("collinear_weights.tsv").exists());
}
