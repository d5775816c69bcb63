use anyhow::{anyhow, bail, Result};
use clap::Parser;
use format_num::NumberFormat;
use libpsascan::{
    read_text_length,
    types::{BuilderArgs, Int, Uint40},
    write_suffix_array,
};
use log::info;
use regex::Regex;
use std::time::Instant;

// --------------------------------------------------
#[derive(Parser, Debug)]
#[command(author, version, about, arg_required_else_help = true)]
pub struct Cli {
    /// Input file
    #[arg(value_name = "FILE")]
    pub input: String,

    /// RAM budget in MiB; the suffixes K, M and G select other units
    #[arg(short, long, value_name = "LIMIT", default_value = "3072")]
    pub mem: String,

    /// Output SA path
    #[arg(short, long, value_name = "OUTFILE")]
    pub output: Option<String>,

    /// Working gap-file prefix
    #[arg(short, long, value_name = "GAPFILE")]
    pub gap: Option<String>,

    /// Verbose internal logs
    #[arg(short, long)]
    pub verbose: bool,
}

// --------------------------------------------------
pub fn run(cli: Cli) -> Result<()> {
    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            log::LevelFilter::Info
        } else {
            log::LevelFilter::Off
        })
        .target(env_logger::Target::Stderr)
        .init();

    let mem_bytes = parse_mem(&cli.mem)?;
    let num_threads = num_cpus::get();
    info!(
        "Using {num_threads} thread{}",
        if num_threads == 1 { "" } else { "s" }
    );
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .unwrap();

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| format!("{}.sa5", cli.input));
    let gap_prefix = cli.gap.clone().unwrap_or_else(|| output.clone());

    let text_len = read_text_length(&cli.input)?;
    let num_fmt = NumberFormat::new();
    info!(
        "Input '{}' of {} bytes, RAM budget {} bytes",
        cli.input,
        num_fmt.format(",.0", text_len as f64),
        num_fmt.format(",.0", mem_bytes as f64),
    );

    let mut args = BuilderArgs::new(&cli.input, &output);
    args.gap_prefix = gap_prefix;
    args.mem_bytes = mem_bytes;
    args.max_threads = num_threads;

    // 5-byte output records cover texts up to 2^40 - 1; anything longer
    // switches to 8-byte records.
    let now = Instant::now();
    let written = if text_len <= Uint40::MAX {
        write_suffix_array::<Uint40>(&args)?
    } else {
        write_suffix_array::<u64>(&args)?
    };
    info!(
        "Wrote {} byte{} to '{output}' in {:?}",
        num_fmt.format(",.0", written as f64),
        if written == 1 { "" } else { "s" },
        now.elapsed()
    );

    Ok(())
}

// --------------------------------------------------
/// Parse the RAM limit: a bare number means MiB, a K/M/G suffix selects
/// the unit explicitly.
fn parse_mem(input: &str) -> Result<usize> {
    let mem_re = Regex::new(r"^(\d+)\s*([KkMmGg]?)$").unwrap();
    let caps = mem_re
        .captures(input)
        .ok_or_else(|| anyhow!(r#"illegal RAM limit: "{input}""#))?;
    let value: usize = caps[1]
        .parse()
        .map_err(|_| anyhow!(r#"illegal RAM limit: "{input}""#))?;
    let bytes = match &caps[2] {
        "K" | "k" => value.checked_mul(1 << 10),
        "G" | "g" => value.checked_mul(1 << 30),
        _ => value.checked_mul(1 << 20),
    };
    match bytes {
        Some(bytes) if bytes > 0 => Ok(bytes),
        _ => bail!(r#"illegal RAM limit: "{input}""#),
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::parse_mem;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_mem() -> Result<()> {
        assert_eq!(parse_mem("3072")?, 3072 << 20);
        assert_eq!(parse_mem("1")?, 1 << 20);
        assert_eq!(parse_mem("16K")?, 16 << 10);
        assert_eq!(parse_mem("512M")?, 512 << 20);
        assert_eq!(parse_mem("2g")?, 2 << 30);

        for bad in ["", "0", "12Q", "-5", "1.5G", "G"] {
            assert!(parse_mem(bad).is_err(), "{bad}");
        }
        Ok(())
    }
}
