//! `extent`: print all rows on a stage, optionally in-course only, with
//! fixed hunt bells at the front and fixed tenors at the back.

use std::io::Write;
use std::process::ExitCode;

use anyhow::bail;
use structopt::StructOpt;

use rowframe::{Bell, ExtentIterator, InCourseExtentIterator, Stage};

#[derive(Debug, StructOpt)]
#[structopt(name = "extent", about = "Print all rows.")]
struct Args {
    /// The number of bells.  This option is required
    #[structopt(short = "b", long = "bells")]
    bells: u8,

    /// The number of fixed 'hunt' bells at the front of each row
    #[structopt(short = "u", long = "hunts", default_value = "0")]
    hunts: usize,

    /// The number of fixed tenors at the end of each row
    #[structopt(short = "t", long = "tenors", default_value = "0")]
    tenors: usize,

    /// Only list in-course rows
    #[structopt(short = "i", long = "in-course")]
    in_course: bool,
}

fn run(args: &Args) -> anyhow::Result<()> {
    let bells = args.bells as usize;
    if bells < args.hunts + args.tenors || bells == 0 {
        bail!("more hunt bells and fixed tenors than the total number of bells");
    }
    if bells >= Bell::MAX_BELLS {
        bail!("the number of bells must be less than {}", Bell::MAX_BELLS);
    }
    let stage = Stage::new(args.bells);
    let working = bells - args.hunts - args.tenors;

    let out = std::io::stdout().lock();
    let mut out = std::io::BufWriter::new(out);
    if args.in_course {
        for row in InCourseExtentIterator::new(working, args.hunts, stage) {
            writeln!(out, "{}", row)?;
        }
    } else {
        for row in ExtentIterator::new(working, args.hunts, stage) {
            writeln!(out, "{}", row)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::from_args();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("extent: {:#}", e);
            ExitCode::from(1)
        }
    }
}
