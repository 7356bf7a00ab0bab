//! `musgrep`: grep rows from standard input for music.

use std::io::{BufRead, Write};
use std::process::ExitCode;

use anyhow::{anyhow, bail};
use colored::Colorize;
use structopt::StructOpt;

use rowframe::{MusicCounter, RowBuf, Stage};

#[derive(Debug, StructOpt)]
#[structopt(name = "musgrep", about = "Grep rows for music.")]
struct Args {
    /// The number of bells.  This option is required
    #[structopt(short = "b", long = "bells")]
    bells: u8,

    /// Print the number of matching rows
    #[structopt(short = "c", long = "count")]
    count: bool,

    /// Print the total score of the matching rows
    #[structopt(short = "s", long = "score")]
    score: bool,

    /// Print the number of rows with a positive score
    #[structopt(short = "p", long = "positive")]
    positive: bool,

    /// Print the number of rows with a negative score
    #[structopt(short = "n", long = "negative")]
    negative: bool,

    /// Highlight matching rows instead of filtering
    #[structopt(short = "H", long = "highlight")]
    highlight: bool,

    /// Match only in-course rows
    #[structopt(short = "i", long = "in-course")]
    in_course: bool,

    /// The music patterns to match
    patterns: Vec<String>,
}

fn run(args: &Args) -> anyhow::Result<()> {
    if args.bells == 0 || (args.bells as usize) > rowframe::Bell::MAX_BELLS {
        bail!("the number of bells must be positive and at most {}", rowframe::Bell::MAX_BELLS);
    }
    let stage = Stage::new(args.bells);
    let mut music = MusicCounter::default();
    for p in &args.patterns {
        music
            .add_pattern(p, stage)
            .map_err(|e| anyhow!("error parsing music pattern: {}", e))?;
    }
    if music.is_empty() {
        bail!("no music patterns given");
    }

    let output_rows = !args.count && !args.score && !args.positive && !args.negative;
    let use_colour = args.highlight && atty_stdout();

    let mut count = 0usize;
    let mut count_positive = 0usize;
    let mut count_negative = 0usize;

    let stdin = std::io::stdin().lock();
    let out = std::io::stdout().lock();
    let mut out = std::io::BufWriter::new(out);
    for line in stdin.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(row) = RowBuf::parse(trimmed) else {
            continue;
        };
        if row.stage() != stage {
            continue;
        }
        if args.in_course && row.parity() == rowframe::Parity::Odd {
            continue;
        }

        let old_score = music.score();
        if music.process_row(&row) {
            count += 1;
            let delta = music.score() - old_score;
            if delta > 0 {
                count_positive += 1;
            } else if delta < 0 {
                count_negative += 1;
            }
            if output_rows {
                if use_colour {
                    writeln!(out, "{}", trimmed.reversed())?;
                } else if args.highlight {
                    // Fall back to a marker when not writing to a terminal
                    writeln!(out, "{} *", trimmed)?;
                } else {
                    writeln!(out, "{}", trimmed)?;
                }
            }
        } else if output_rows && args.highlight {
            writeln!(out, "{}", trimmed)?;
        }
    }

    let mut counters = Vec::new();
    if args.positive {
        counters.push(count_positive.to_string());
    }
    if args.negative {
        counters.push(count_negative.to_string());
    }
    if args.count {
        counters.push(count.to_string());
    }
    if args.score {
        counters.push(music.score().to_string());
    }
    if !counters.is_empty() {
        writeln!(out, "{}", counters.join("\t"))?;
    }
    out.flush()?;
    Ok(())
}

fn atty_stdout() -> bool {
    // `colored` disables itself when the stream is not a terminal
    colored::control::SHOULD_COLORIZE.should_colorize()
}

fn main() -> ExitCode {
    let args = Args::from_args();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("musgrep: {:#}", e);
            ExitCode::from(1)
        }
    }
}
