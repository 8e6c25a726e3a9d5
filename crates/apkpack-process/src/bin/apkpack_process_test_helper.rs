//! Stand-in build tool for the `apkpack-process` integration tests.
//!
//! Flags are applied in order: `--stdout-bytes N`, `--stderr-bytes N`,
//! `--print TEXT`, `--eprint TEXT`, `--print-cwd`, `--exit CODE`.

use std::{
    env,
    io::{self, Write},
    process::ExitCode,
};

fn fill(mut writer: impl Write, bytes: usize, byte: u8) -> io::Result<()> {
    let chunk = [byte; 4096];
    let mut left = bytes;
    while left > 0 {
        let n = left.min(chunk.len());
        writer.write_all(&chunk[..n])?;
        left -= n;
    }
    writer.flush()
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{flag} needs a value"))
}

fn number<T: std::str::FromStr>(text: &str, flag: &str) -> Result<T, String> {
    text.parse()
        .map_err(|_| format!("{flag} expects a number, got {text:?}"))
}

fn run() -> Result<u8, String> {
    let mut args = env::args().skip(1);
    let mut code = 0;
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--stdout-bytes" => {
                let n = number(&value(&mut args, &flag)?, &flag)?;
                fill(io::stdout().lock(), n, b'o').map_err(|err| err.to_string())?;
            }
            "--stderr-bytes" => {
                let n = number(&value(&mut args, &flag)?, &flag)?;
                fill(io::stderr().lock(), n, b'e').map_err(|err| err.to_string())?;
            }
            "--print" => println!("{}", value(&mut args, &flag)?),
            "--eprint" => eprintln!("{}", value(&mut args, &flag)?),
            "--print-cwd" => {
                let cwd = env::current_dir().map_err(|err| err.to_string())?;
                println!("{}", cwd.display());
            }
            "--exit" => code = number(&value(&mut args, &flag)?, &flag)?,
            other => return Err(format!("unknown flag {other}")),
        }
    }
    Ok(code)
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(2)
        }
    }
}
