//! `splices`: find and describe the splices between methods.

use std::io::Write;
use std::process::ExitCode;

use anyhow::{anyhow, bail};
use itertools::Itertools;
use structopt::StructOpt;

use methsearch::splice::{group_methods, Splice, SpliceOptions};
use rowframe::{LiteLibrary, Method, Stage};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "splices",
    about = "Search for splices.  With no methods on the command line, \
             methods are read from standard input and all splices between \
             them are located."
)]
struct Args {
    /// The number of bells.  This option is required
    #[structopt(short = "b", long = "bells")]
    bells: u8,

    /// Only consider in-course lead heads
    #[structopt(short = "i", long = "in-course")]
    in_course: bool,

    /// Calculate half-lead splices instead of whole-lead splices
    #[structopt(short = "a", long = "half-lead")]
    half_lead: bool,

    /// Use place notations instead of names in the output
    #[structopt(short = "p", long = "place-notation")]
    show_pn: bool,

    /// Group together methods with mutual splices
    #[structopt(short = "g", long = "group-together")]
    group: bool,

    /// Display pairs of methods with no splice too
    #[structopt(short = "n", long = "null-splice")]
    null_splices: bool,

    /// Methods given on the command line as place notation
    methods: Vec<String>,
}

fn read_methods(args: &Args, stage: Stage) -> anyhow::Result<Vec<(Method, String)>> {
    let mut methods = Vec::new();
    for (i, pn) in args.methods.iter().enumerate() {
        let m = Method::parse(pn, stage)
            .map_err(|e| anyhow!("invalid method place notation: {}", e))?;
        methods.push((m, format!("Method {}", i + 1)));
    }
    if methods.len() < 2 {
        let lib = LiteLibrary::read(std::io::stdin().lock())?;
        for entry in lib.entries() {
            match entry.method(stage) {
                Ok(m) => {
                    let name = if entry.payload.is_empty() {
                        entry.place_notation.clone()
                    } else {
                        entry.payload.clone()
                    };
                    methods.push((m, name));
                }
                Err(e) => log::warn!("line {}: {}", entry.line, e),
            }
        }
    }
    if methods.len() < 2 {
        bail!("need at least two methods to find splices");
    }
    Ok(methods)
}

fn run(args: &Args) -> anyhow::Result<()> {
    if args.bells < 3 || (args.bells as usize) > rowframe::Bell::MAX_BELLS {
        bail!(
            "the number of bells must be between 3 and {}",
            rowframe::Bell::MAX_BELLS
        );
    }
    let stage = Stage::new(args.bells);
    let options = SpliceOptions {
        in_course_only: args.in_course,
        half_lead: args.half_lead,
    };
    let methods = read_methods(args, stage)?;
    let display = |i: usize| -> String {
        if args.show_pn {
            methods[i].0.format_pn()
        } else {
            methods[i].1.clone()
        }
    };

    let out = std::io::stdout().lock();
    let mut out = std::io::BufWriter::new(out);

    if args.group {
        let only_methods: Vec<Method> = methods.iter().map(|(m, _)| m.clone()).collect();
        for (class, description) in group_methods(&only_methods, options) {
            if class.len() < 2 && !args.null_splices {
                continue;
            }
            let names = class.iter().map(|&i| display(i)).join("\t");
            writeln!(out, "{}\t{}", names, description)?;
        }
    } else {
        for (i, j) in (0..methods.len()).tuple_combinations() {
            let splice = Splice::between(&methods[i].0, &methods[j].0, options);
            if splice.is_trivial() && !args.null_splices {
                continue;
            }
            writeln!(
                out,
                "{}\t{}\t{}",
                display(i),
                display(j),
                splice.describe()
            )?;
        }
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
            eprintln!("splices: {:#}", e);
            ExitCode::from(1)
        }
    }
}
