//! `fextent`: search for maximal sets of mutually true leads by simulated
//! annealing.

use std::io::Write;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail};
use ordered_float::OrderedFloat;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use structopt::StructOpt;

use fextent::{SearchFlags, State, Weighting};
use rowframe::{Change, Group, Method, Parity, RowBuf, Stage};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "fextent",
    about = "Search for maximal sets of mutually true leads."
)]
struct Args {
    /// The number of bells
    #[structopt(short = "b", long = "bells")]
    bells: u8,

    /// The number of annealing iterations to perform
    #[structopt(short = "n", long = "iterations", default_value = "100000")]
    iterations: usize,

    /// Look for mutually true courses rather than leads
    #[structopt(short = "c", long = "whole-courses")]
    whole_courses: bool,

    /// Look for mutually true tenors-together leads (or courses)
    #[structopt(short = "t", long = "tenors-together")]
    tenors_together: bool,

    /// Look for in-course lead heads (or course heads)
    #[structopt(short = "i", long = "in-course")]
    in_course: bool,

    /// Do not require a fixed treble
    #[structopt(short = "p", long = "principle")]
    principle: bool,

    /// Repeat this many times (-1 to repeat indefinitely)
    #[structopt(short = "l", long = "loop", default_value = "1")]
    loops: i64,

    /// Part-end rows (repeatable)
    #[structopt(short = "P", long = "part-end")]
    part_ends: Vec<String>,

    /// Require certain leads (or courses) to be present (repeatable)
    #[structopt(short = "r", long = "required")]
    required: Vec<String>,

    /// Require linkage between leads (or courses)
    #[structopt(short = "k", long = "linkage")]
    linkage: bool,

    /// The calls available for linkage (repeatable)
    #[structopt(short = "C", long = "call")]
    calls: Vec<String>,

    /// Seed the random number generator
    #[structopt(long = "seed")]
    seed: Option<u64>,

    /// Suppress all output other than the maximum length
    #[structopt(short = "q", long = "quiet")]
    quiet: bool,

    /// Display progress on standard error
    #[structopt(short = "u", long = "status")]
    status: bool,

    /// Print the matching leads (or courses)
    #[structopt(long = "print-leads")]
    print_leads: bool,

    /// Only print sets of at least this many leads
    #[structopt(long = "min-leads", default_value = "0")]
    min_leads: usize,

    /// Weighting options, as OPTION=WEIGHT (repeatable); options are
    /// b/base, i/in-course, o/out-of-course, t/tenors-together,
    /// f/tenors-over, k/linked
    #[structopt(short = "W", long = "weighting")]
    weightings: Vec<String>,

    /// The method's place notation
    method: String,
}

fn parse_weighting(specs: &[String]) -> anyhow::Result<Weighting> {
    let mut w = Weighting::default();
    for spec in specs {
        let (opt, value) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("weighting must be specified as OPTION=WEIGHT"))?;
        let value: f64 = value
            .parse()
            .map_err(|_| anyhow!("invalid weighting: '{}'", value))?;
        match opt {
            "i" | "in-course" => w.in_course = value,
            "o" | "out-of-course" => w.out_of_course = value,
            "t" | "tenors-together" => w.tenors_together = value,
            "f" | "tenors-over" => w.tenors_over = value,
            "k" | "linked" => w.linked = value,
            "b" | "base" => w.base = value,
            other => bail!("unknown weighting option: '{}'", other),
        }
    }
    Ok(w)
}

struct Setup {
    method: Method,
    flags: SearchFlags,
    part_ends: Group,
    required: Vec<RowBuf>,
    calls: Vec<Change>,
    weighting: Weighting,
}

fn validate(args: &Args) -> anyhow::Result<Setup> {
    if args.bells < 4 || (args.bells as usize) >= rowframe::Bell::MAX_BELLS {
        bail!(
            "the number of bells must be between 4 and {} (inclusive)",
            rowframe::Bell::MAX_BELLS - 1
        );
    }
    let stage = Stage::new(args.bells);

    let method = Method::parse(&args.method, stage)
        .map_err(|e| anyhow!("invalid method place notation: {}", e))?;
    if args.principle && args.whole_courses {
        bail!("searching for principles in whole courses is not supported");
    }

    let flags = SearchFlags {
        whole_courses: args.whole_courses,
        tenors_together: args.tenors_together,
        in_course: args.in_course,
        principle: args.principle,
    };

    // Part ends
    let n = stage.num_bells();
    let mut generators = Vec::new();
    for s in &args.part_ends {
        let g = RowBuf::parse_with_stage(s, stage)
            .map_err(|e| anyhow!("invalid part end '{}': {}", s, e))?;
        if args.linkage && args.whole_courses && g[n - 1].index() != n - 1 {
            bail!(
                "part end groups affecting the tenor are not supported for \
                 linked touches in whole courses"
            );
        }
        generators.push(g);
    }
    let part_ends = if generators.is_empty() {
        Group::trivial(stage)
    } else {
        Group::closure(generators).map_err(|e| anyhow!("{}", e))?
    };

    // Required rows
    let mut required = Vec::new();
    for s in &args.required {
        let r = RowBuf::parse_with_stage(s, stage)
            .map_err(|e| anyhow!("invalid required row '{}': {}", s, e))?;
        if args.in_course && r.parity() == Parity::Odd {
            bail!(
                "out-of-course lead '{}' required in in-course composition",
                r
            );
        }
        required.push(r);
    }

    // Calls
    let mut call_strs = args.calls.clone();
    if call_strs.is_empty() && args.linkage {
        call_strs.push("14".to_owned());
        eprintln!("no calls specified -- assuming fourths place bobs");
    } else if !call_strs.is_empty() && !args.linkage {
        call_strs.clear();
        eprintln!("calls ignored when linkage is not required");
    }
    let mut calls = Vec::new();
    for s in &call_strs {
        let ch = Change::parse(s, stage)
            .map_err(|e| anyhow!("unable to parse change '{}': {}", s, e))?;
        if ch.parity() != method.lead_end_change().parity() && args.in_course {
            bail!("out-of-course call '{}' specified for in-course composition", ch);
        }
        calls.push(ch);
    }
    if args.linkage {
        eprintln!("warning: linkage handling is experimental");
    }

    Ok(Setup {
        method,
        flags,
        part_ends,
        required,
        calls,
        weighting: parse_weighting(&args.weightings)?,
    })
}

fn run(args: &Args) -> anyhow::Result<()> {
    let setup = validate(args)?;

    let mut state = State::new(
        &setup.method,
        setup.flags,
        &setup.part_ends,
        &setup.required,
        &setup.calls,
        &setup.weighting,
    )
    .map_err(|e| anyhow!("error initialising state: {}", e))?;

    let seed = args.seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    });
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let out = std::io::stdout().lock();
    let mut out = std::io::BufWriter::new(out);
    if !args.quiet {
        writeln!(out, "Started with seed {}", seed)?;
        writeln!(
            out,
            "Using part-end group of order {}",
            setup.part_ends.len()
        )?;
        out.flush()?;
    }

    let lead_len = setup.method.lead_len();
    let mut max_leads = 0usize;
    let mut best_score = OrderedFloat(f64::MIN);

    let mut iteration = 0i64;
    while args.loops == -1 || iteration < args.loops {
        iteration += 1;

        state.anneal(args.iterations, &mut rng);
        if args.status {
            eprint!("\rfinished annealing pass {}        \r", iteration);
        }

        if args.linkage && !state.fully_linked() {
            state.prune_unlinked();
        }
        if !state.check() {
            let mut err = std::io::stderr().lock();
            writeln!(err, "internal consistency failure")?;
            state.dump(&mut err)?;
            bail!("internal consistency failure");
        }

        if state.length() > max_leads && (!args.linkage || state.fully_linked()) {
            max_leads = state.length();
        }
        best_score = best_score.max(OrderedFloat(state.score()));

        if !args.quiet {
            write!(out, "{} leads ({})", state.length(), state.length() * lead_len)?;
            if args.linkage && !state.fully_linked() {
                write!(out, " not fully linked ({:2.0}%)", state.percent_linked())?;
            }
            if args.loops != 1 {
                write!(
                    out,
                    " [highest = {} leads ({})]",
                    max_leads,
                    max_leads * lead_len
                )?;
            }
            writeln!(out)?;
            out.flush()?;
        }

        if args.print_leads
            && state.length() >= args.min_leads
            && (!args.linkage || state.fully_linked())
        {
            state.dump(&mut out)?;
            writeln!(out, "\n\n")?;
            out.flush()?;
        }

        state.clear().map_err(|e| anyhow!("{}", e))?;
    }

    if args.quiet {
        writeln!(out, "{}", max_leads)?;
    } else if args.loops != 1 {
        writeln!(out, "Best score {}", best_score.into_inner())?;
    }
    out.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    simple_logger::init_with_level(log::Level::Warn).expect("logger initialises once");
    let args = Args::from_args();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fextent: {:#}", e);
            ExitCode::from(1)
        }
    }
}
