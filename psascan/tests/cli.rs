use anyhow::Result;
use assert_cmd::Command;
use pretty_assertions::assert_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{fs, io::Write, path::Path};
use tempfile::TempDir;

const PRG: &str = "psascan";

// --------------------------------------------------
fn write_input(dir: &TempDir, name: &str, content: &[u8]) -> Result<String> {
    let path = dir.path().join(name);
    fs::File::create(&path)?.write_all(content)?;
    Ok(path.to_string_lossy().to_string())
}

// --------------------------------------------------
fn read_sa5(path: &str) -> Result<Vec<u64>> {
    let bytes = fs::read(path)?;
    assert_eq!(bytes.len() % 5, 0, "output is not 5-byte records");
    Ok(bytes
        .chunks_exact(5)
        .map(|rec| {
            u64::from_le_bytes([
                rec[0], rec[1], rec[2], rec[3], rec[4], 0, 0, 0,
            ])
        })
        .collect())
}

// --------------------------------------------------
fn reference_sa(text: &[u8]) -> Vec<u64> {
    let mut sa: Vec<u64> = (0..text.len() as u64).collect();
    sa.sort_by(|&a, &b| text[a as usize..].cmp(&text[b as usize..]));
    sa
}

// --------------------------------------------------
fn run_ok(args: &[&str]) -> Result<()> {
    let output = Command::cargo_bin(PRG)?.args(args).output().expect("fail");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

// --------------------------------------------------
#[test]
fn banana() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_input(&dir, "banana.txt", b"banana")?;
    run_ok(&[&input])?;

    let output = format!("{input}.sa5");
    assert!(Path::new(&output).exists());

    // Offsets of: a, ana, anana, banana, na, nana.
    assert_eq!(read_sa5(&output)?, vec![5, 3, 1, 0, 4, 2]);

    // Exact little-endian record bytes.
    let bytes = fs::read(&output)?;
    assert_eq!(&bytes[..5], &[5, 0, 0, 0, 0]);
    assert_eq!(&bytes[5..10], &[3, 0, 0, 0, 0]);
    Ok(())
}

// --------------------------------------------------
#[test]
fn mississippi() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_input(&dir, "m.txt", b"mississippi")?;
    run_ok(&[&input])?;
    assert_eq!(
        read_sa5(&format!("{input}.sa5"))?,
        vec![10, 7, 4, 1, 0, 9, 8, 6, 3, 5, 2]
    );
    Ok(())
}

// --------------------------------------------------
#[test]
fn unary_text() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_input(&dir, "a8.txt", b"aaaaaaaa")?;
    run_ok(&[&input])?;
    assert_eq!(
        read_sa5(&format!("{input}.sa5"))?,
        vec![7, 6, 5, 4, 3, 2, 1, 0]
    );
    Ok(())
}

// --------------------------------------------------
#[test]
fn output_and_gap_options() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_input(&dir, "in.txt", b"abracadabra")?;
    let output = dir.path().join("custom.sa").to_string_lossy().to_string();
    let gap = dir.path().join("work").to_string_lossy().to_string();
    run_ok(&["-o", &output, "-g", &gap, "-v", &input])?;

    assert_eq!(read_sa5(&output)?, reference_sa(b"abracadabra"));
    Ok(())
}

// --------------------------------------------------
#[test]
fn two_blocks_match_reference() -> Result<()> {
    // 100 bytes over {a, b} with 1 KiB of RAM: two blocks and a real
    // streaming phase.
    let mut rng = StdRng::seed_from_u64(1234);
    let text: Vec<u8> = (0..100).map(|_| rng.gen_range(b'a'..=b'b')).collect();

    let dir = TempDir::new()?;
    let input = write_input(&dir, "two.txt", &text)?;
    run_ok(&["-m", "1K", &input])?;

    assert_eq!(read_sa5(&format!("{input}.sa5"))?, reference_sa(&text));
    Ok(())
}

// --------------------------------------------------
#[test]
fn many_blocks_match_reference() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(4321);
    let text: Vec<u8> = (0..6000).map(|_| rng.gen_range(0..5u8)).collect();

    let dir = TempDir::new()?;
    let input = write_input(&dir, "many.txt", &text)?;
    run_ok(&["--mem", "4K", "-v", &input])?;

    assert_eq!(read_sa5(&format!("{input}.sa5"))?, reference_sa(&text));

    // All working files are cleaned up.
    let leftovers: Vec<_> = fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name != "many.txt" && name != "many.txt.sa5")
        .collect();
    assert_eq!(leftovers, Vec::<String>::new());
    Ok(())
}

// --------------------------------------------------
#[test]
fn repetitive_multi_block() -> Result<()> {
    // a^n across several blocks: monotone ranks, the slow-partition
    // fallback and plenty of one-slot gap pressure.
    let text = vec![b'a'; 4000];
    let dir = TempDir::new()?;
    let input = write_input(&dir, "rep.txt", &text)?;
    run_ok(&["-m", "3K", &input])?;

    let expected: Vec<u64> = (0..4000u64).rev().collect();
    assert_eq!(read_sa5(&format!("{input}.sa5"))?, expected);
    Ok(())
}

// --------------------------------------------------
#[test]
fn mebibyte_smoke() -> Result<()> {
    // 1 MiB over a 5-letter alphabet in a dozen blocks, checked in full
    // against the reference sorter.
    let mut rng = StdRng::seed_from_u64(2026);
    let text: Vec<u8> =
        (0..1024 * 1024).map(|_| rng.gen_range(0..5u8)).collect();

    let dir = TempDir::new()?;
    let input = write_input(&dir, "smoke.txt", &text)?;
    run_ok(&["-m", "1M", &input])?;

    assert_eq!(read_sa5(&format!("{input}.sa5"))?, reference_sa(&text));
    Ok(())
}

// --------------------------------------------------
#[test]
fn empty_input_dies() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_input(&dir, "empty.txt", b"")?;
    let output = Command::cargo_bin(PRG)?.args([&input]).output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("empty input"), "stderr: {stderr}");
    Ok(())
}

// --------------------------------------------------
#[test]
fn missing_input_dies() -> Result<()> {
    Command::cargo_bin(PRG)?
        .args(["/no/such/file"])
        .assert()
        .failure();
    Ok(())
}

// --------------------------------------------------
#[test]
fn byte_255_dies() -> Result<()> {
    let mut text = vec![b'x'; 500];
    text[250] = 255;
    let dir = TempDir::new()?;
    let input = write_input(&dir, "bad.txt", &text)?;
    let output = Command::cargo_bin(PRG)?
        .args(["-m", "1K", &input])
        .output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("255"), "stderr: {stderr}");
    Ok(())
}

// --------------------------------------------------
#[test]
fn bad_mem_limit_dies() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_input(&dir, "x.txt", b"xyz")?;
    for bad in ["0", "12Q", "lots"] {
        Command::cargo_bin(PRG)?
            .args(["-m", bad, &input])
            .assert()
            .failure();
    }
    Ok(())
}
