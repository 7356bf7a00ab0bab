//! The `methsearch` binary: maps the flag surface onto [`SearchParams`] and
//! streams the results out.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use structopt::StructOpt;

use methsearch::output::{FormatString, XmlWriter};
use methsearch::params::{ClassReq, FilterMode, LeadHeadKind, SearchParams};
use methsearch::{Expression, MethodProperties, SearchOutcome, SearchSignal, Searcher};
use rowframe::{Change, Group, LiteLibrary, RowBuf, Stage};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "methsearch",
    about = "Search for change-ringing methods matching a set of constraints."
)]
struct Args {
    /// The number of bells
    #[structopt(short = "b", long = "bells")]
    bells: u8,

    /// The lead length (required for principles; otherwise derived from the
    /// treble's path)
    #[structopt(short = "n", long = "lead-length")]
    lead_len: Option<usize>,

    /// The number of hunt bells (0 searches for principles)
    #[structopt(short = "U", long = "hunts", default_value = "1")]
    hunts: usize,

    /// The number of times the treble dodges in each position
    #[structopt(short = "G", long = "treble-dodges", default_value = "0")]
    treble_dodges: usize,

    /// The treble's path, given as a range of places "F-B"
    #[structopt(short = "Z", long = "treble-path")]
    treble_path: Option<String>,

    /// Require palindromic symmetry
    #[structopt(short = "s", long = "sym")]
    sym: bool,
    /// Require rotational symmetry
    #[structopt(short = "k", long = "skewsym")]
    skewsym: bool,
    /// Require glide (double) symmetry
    #[structopt(short = "d", long = "doubsym")]
    doubsym: bool,
    /// Require mirror symmetry
    #[structopt(long = "mirror")]
    mirror: bool,

    /// Require plain-bob (regular) lead heads
    #[structopt(short = "r", long = "regular")]
    regular: bool,
    /// Require cyclic lead ends
    #[structopt(short = "c", long = "cyclic")]
    cyclic: bool,
    /// Require offset-cyclic lead heads
    #[structopt(long = "offset-cyclic")]
    offset_cyclic: bool,
    /// Accept a regular lead head for any number of hunt bells
    #[structopt(long = "any-regular-hl")]
    any_regular: bool,
    /// Show methods with unusual lead-head cycle structures
    #[structopt(short = "A", long = "all-methods")]
    show_all: bool,

    /// Maximum consecutive blows in one place
    #[structopt(short = "p", long = "max-blows", default_value = "0")]
    max_consec_blows: usize,
    /// Maximum places in any one change
    #[structopt(short = "l", long = "max-places", default_value = "0")]
    max_places: usize,
    /// Maximum adjacent places in any one change
    #[structopt(short = "j", long = "max-adj-places", default_value = "0")]
    max_adj_places: usize,
    /// Require right-place methods
    #[structopt(short = "w", long = "right-place")]
    right_place: bool,
    /// Disallow place notations involving the top pair of bells
    #[structopt(short = "f", long = "no-78s")]
    no_78s: bool,
    /// Require symmetric sections
    #[structopt(long = "sym-sects")]
    sym_sects: bool,
    /// Require the parity rule within each division
    #[structopt(long = "parity-hack")]
    parity_hack: bool,
    /// Require a 12 or 1N lead end
    #[structopt(long = "require-limited-le")]
    require_limited_le: bool,
    /// Prefer variants with a 12 or 1N lead end
    #[structopt(short = "E", long = "prefer-limited-le")]
    prefer_limited_le: bool,

    /// Require a surprise method
    #[structopt(short = "S", long = "surprise")]
    surprise: bool,
    /// Require a treble bob method
    #[structopt(short = "T", long = "treble-bob")]
    treble_bob: bool,
    /// Require a delight method
    #[structopt(long = "delight")]
    delight: bool,
    #[structopt(long = "strict-delight")]
    strict_delight: bool,
    #[structopt(long = "exercise")]
    exercise: bool,
    #[structopt(long = "strict-exercise")]
    strict_exercise: bool,
    #[structopt(long = "pas-alla-tria")]
    pas_alla_tria: bool,
    #[structopt(long = "pas-alla-tessera")]
    pas_alla_tessera: bool,
    #[structopt(long = "delight3")]
    delight3: bool,
    #[structopt(long = "delight4")]
    delight4: bool,

    /// The method mask
    #[structopt(short = "m", long = "mask", default_value = "*")]
    mask: String,

    /// Restrict the changes used; prefix with '!' to exclude instead
    #[structopt(long = "changes")]
    changes: Option<String>,

    /// Falseness options: comma-separated l, c, h, e, e+, x, CPS, :GROUPS,
    /// s=ROW (start the proof from ROW), r=ROW[;ROW...] (avoid rows)
    #[structopt(short = "F", long = "falseness")]
    falseness: Option<String>,

    /// Music patterns to score (repeatable)
    #[structopt(short = "M", long = "music")]
    music: Vec<String>,

    /// Row format for output
    #[structopt(short = "R", long = "format")]
    format: Option<String>,

    /// Histogram format: count distinct values at the end of the search
    #[structopt(short = "H", long = "histogram")]
    histogram: Option<String>,

    /// Require an expression to hold (repeatable)
    #[structopt(short = "Q", long = "require")]
    require: Vec<String>,

    /// Part-end rows (repeatable)
    #[structopt(short = "P", long = "part-end")]
    part_ends: Vec<String>,

    /// Rows to avoid (repeatable)
    #[structopt(long = "avoid-row")]
    avoid_rows: Vec<String>,

    /// Fix a prefix of the place notation
    #[structopt(long = "prefix")]
    prefix: Option<String>,

    /// Filter methods from standard input instead of searching
    #[structopt(short = "I", long = "filter")]
    filter: bool,
    /// Emit exactly the input methods which do NOT match
    #[structopt(long = "invert-filter")]
    invert_filter: bool,
    /// Filter the method libraries instead of standard input
    #[structopt(long = "filter-lib")]
    filter_lib: bool,

    /// Resume the search from this place notation
    #[structopt(long = "start-at")]
    start_at: Option<String>,
    /// Stop after this many methods
    #[structopt(long = "limit")]
    limit: Option<u64>,
    /// Give up after this many seconds
    #[structopt(long = "timeout")]
    timeout: Option<u64>,
    /// Try the changes at each position in random order
    #[structopt(long = "random")]
    random: bool,
    /// Seed for --random
    #[structopt(long = "seed", default_value = "0")]
    seed: u64,

    /// Write output to a file instead of standard output
    #[structopt(short = "o", long = "output")]
    output: Option<PathBuf>,
    /// Output mode: "fmt" or "xml"
    #[structopt(short = "O", long = "output-format", default_value = "fmt")]
    output_format: String,
    /// Method library files (repeatable; default from METHOD_LIBRARY)
    #[structopt(short = "L", long = "library")]
    libraries: Vec<PathBuf>,

    /// Suppress the method output
    #[structopt(short = "q", long = "quiet")]
    quiet: bool,
    /// Print the number of methods found
    #[structopt(long = "count")]
    count: bool,
    /// Print just the number of methods found
    #[structopt(long = "raw-count")]
    raw_count: bool,
    /// Print the number of search nodes visited
    #[structopt(long = "node-count")]
    node_count: bool,
}

fn parse_falseness(spec: &str, params: &mut SearchParams) -> anyhow::Result<()> {
    for part in spec.split(',') {
        let part = part.trim();
        if let Some(groups) = part.strip_prefix(':') {
            params.allowed_falseness = Some(expand_group_ranges(groups)?);
            continue;
        }
        if let Some(row) = part.strip_prefix("s=") {
            // The reference row that proofs (and coset labels) start from
            params.start_row = RowBuf::parse_with_stage(row, params.stage)
                .map_err(|e| anyhow!("invalid row in -Fs: {}", e))?;
            continue;
        }
        if let Some(rows) = part.strip_prefix("r=") {
            for row in rows.split(';') {
                let r = RowBuf::parse_with_stage(row, params.stage)
                    .map_err(|e| anyhow!("invalid row in -Fr: {}", e))?;
                params.avoid_rows.insert(r);
            }
            continue;
        }
        match part {
            "l" => params.true_lead = true,
            "c" => params.true_course = true,
            "h" => params.true_half_lead = true,
            "e" => params.true_extent = true,
            "e+" => params.true_positive_extent = true,
            "n" => params.true_trivial = true,
            "x" => params.true_trivial = false,
            "CPS" => params.require_cps = true,
            "" => {}
            other => bail!("unknown falseness option '{}'", other),
        }
    }
    Ok(())
}

/// Expands `A-F` style ranges in a falseness group list.
fn expand_group_ranges(spec: &str) -> anyhow::Result<String> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if i + 2 < chars.len() && chars[i + 1] == '-' {
            let (lo, hi) = (chars[i], chars[i + 2]);
            if !lo.is_ascii_alphabetic() || !hi.is_ascii_alphabetic() || hi < lo {
                bail!("invalid falseness group range '{}-{}'", lo, hi);
            }
            for c in lo..=hi {
                out.push(c);
            }
            i += 3;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    Ok(out)
}

fn build_params(args: &Args) -> anyhow::Result<SearchParams> {
    if args.bells < 3 || (args.bells as usize) > rowframe::Bell::MAX_BELLS {
        bail!(
            "the number of bells must be between 3 and {}",
            rowframe::Bell::MAX_BELLS
        );
    }
    let stage = Stage::new(args.bells);
    let mut params = SearchParams::new(stage);

    params.lead_len = args.lead_len.unwrap_or(0);
    params.hunt_bells = args.hunts;
    params.treble_dodges = args.treble_dodges;
    if let Some(range) = &args.treble_path {
        let (f, b) = range
            .split_once('-')
            .ok_or_else(|| anyhow!("treble path must be given as F-B"))?;
        params.treble_front = f.parse().context("invalid treble path")?;
        params.treble_back = b.parse().context("invalid treble path")?;
    }

    params.sym = args.sym;
    params.skewsym = args.skewsym;
    params.doubsym = args.doubsym;
    params.mirrorsym = args.mirror;

    params.lead_head_kind = if args.regular {
        LeadHeadKind::PlainBob
    } else if args.cyclic {
        LeadHeadKind::Cyclic
    } else if args.offset_cyclic {
        LeadHeadKind::OffsetCyclic
    } else if args.any_regular {
        LeadHeadKind::AnyRegular
    } else {
        LeadHeadKind::Any
    };
    params.show_all_meths = args.show_all;
    params.require_offset_cyclic = args.offset_cyclic;

    params.max_consec_blows = args.max_consec_blows;
    params.max_places_per_change = args.max_places;
    params.max_consec_places = args.max_adj_places;
    params.right_place = args.right_place;
    params.no_78_pns = args.no_78s;
    params.sym_sects = args.sym_sects;
    params.same_place_parity = args.parity_hack;
    params.require_limited_le = args.require_limited_le;
    params.prefer_limited_le = args.prefer_limited_le;

    params.class = match (
        args.surprise,
        args.treble_bob,
        args.delight,
        args.strict_delight,
        args.exercise,
        args.strict_exercise,
        args.pas_alla_tria,
        args.pas_alla_tessera,
        args.delight3,
        args.delight4,
    ) {
        (true, ..) => Some(ClassReq::Surprise),
        (_, true, ..) => Some(ClassReq::TrebleBob),
        (_, _, true, ..) => Some(ClassReq::Delight),
        (_, _, _, true, ..) => Some(ClassReq::StrictDelight),
        (_, _, _, _, true, ..) => Some(ClassReq::Exercise),
        (_, _, _, _, _, true, ..) => Some(ClassReq::StrictExercise),
        (_, _, _, _, _, _, true, ..) => Some(ClassReq::PasAllaTria),
        (_, _, _, _, _, _, _, true, ..) => Some(ClassReq::PasAllaTessera),
        (_, _, _, _, _, _, _, _, true, _) => Some(ClassReq::Delight3),
        (_, _, _, _, _, _, _, _, _, true) => Some(ClassReq::Delight4),
        _ => None,
    };

    params.mask = args.mask.clone();

    if let Some(changes) = &args.changes {
        let (include, list) = match changes.strip_prefix('!') {
            Some(rest) => (false, rest),
            None => (true, changes.as_str()),
        };
        let mut set = HashSet::new();
        for pn in list.split(',') {
            set.insert(
                Change::parse(pn, stage)
                    .map_err(|e| anyhow!("invalid change '{}': {}", pn, e))?,
            );
        }
        params.changes_filter = Some((include, set));
    }

    if let Some(spec) = &args.falseness {
        parse_falseness(spec, &mut params)?;
    }
    params.music_patterns = args.music.clone();

    for expr in &args.require {
        params
            .require_exprs
            .push(Expression::parse(expr).map_err(|e| anyhow!("invalid expression: {}", e))?);
    }

    if !args.part_ends.is_empty() {
        let mut gens = Vec::new();
        for s in &args.part_ends {
            gens.push(
                RowBuf::parse_with_stage(s, stage)
                    .map_err(|e| anyhow!("invalid part end '{}': {}", s, e))?,
            );
        }
        params.part_ends = Group::closure(gens).map_err(|e| anyhow!("{}", e))?;
    }
    for s in &args.avoid_rows {
        params.avoid_rows.insert(
            RowBuf::parse_with_stage(s, stage)
                .map_err(|e| anyhow!("invalid row '{}': {}", s, e))?,
        );
    }
    if let Some(prefix) = &args.prefix {
        params.prefix = rowframe::PnBlock::parse(prefix, stage)
            .map_err(|e| anyhow!("invalid prefix: {}", e))?
            .into_changes();
    }
    if let Some(start) = &args.start_at {
        params.start_at = rowframe::PnBlock::parse(start, stage)
            .map_err(|e| anyhow!("invalid --start-at: {}", e))?
            .into_changes();
    }

    params.search_limit = args.limit;
    params.timeout = args.timeout.map(Duration::from_secs);
    params.random_order = args.random;
    params.seed = args.seed;

    params.filter_mode = if args.invert_filter {
        FilterMode::InvertFilter
    } else if args.filter || args.filter_lib {
        FilterMode::Filter
    } else {
        FilterMode::Search
    };

    params.validate().map_err(|e| anyhow!("{}", e))?;
    methsearch::mask::restrict_changes(&mut params).map_err(|e| anyhow!("{}", e))?;
    Ok(params)
}

fn load_libraries(args: &Args) -> anyhow::Result<LiteLibrary> {
    let mut paths = args.libraries.clone();
    if paths.is_empty() {
        paths = LiteLibrary::default_paths();
    }
    if paths.is_empty() {
        bail!("no method libraries given (use -L or set METHOD_LIBRARY)");
    }
    let mut combined = String::new();
    for path in &paths {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("can't read library {}", path.display()))?;
        combined.push_str(&text);
        combined.push('\n');
    }
    Ok(LiteLibrary::read(combined.as_bytes())?)
}

fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let params = build_params(args)?;

    let out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path)
                .with_context(|| format!("can't open output file {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut out = out;

    let format = match &args.format {
        Some(f) => FormatString::parse(f).map_err(|e| anyhow!("invalid format: {}", e))?,
        None => FormatString::default(),
    };
    let histogram_fmt = match &args.histogram {
        Some(f) => Some(FormatString::parse(f).map_err(|e| anyhow!("invalid histogram: {}", e))?),
        None => None,
    };
    let mut histogram: BTreeMap<String, u64> = BTreeMap::new();

    let xml_mode = match args.output_format.as_str() {
        "fmt" | "utf8" => false,
        "xml" => true,
        other => bail!("unknown output format '{}'", other),
    };
    let mut xml = xml_mode.then(|| XmlWriter::new(Vec::new()));

    let abort_flag = Arc::new(AtomicBool::new(false));
    {
        let flag = abort_flag.clone();
        let _ = ctrlc::set_handler(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
    }

    let quiet = args.quiet;
    let mut emit_error = None;
    let outcome: SearchOutcome;
    {
        let mut emit = |props: &MethodProperties| -> Result<(), SearchSignal> {
            if let Some(h) = &histogram_fmt {
                *histogram.entry(h.format(props)).or_insert(0) += 1;
            }
            if quiet {
                return Ok(());
            }
            let result = match &mut xml {
                Some(writer) => writer.write_method(props),
                None => writeln!(out, "{}", format.format(props)),
            };
            if let Err(e) = result {
                emit_error = Some(e);
                return Err(SearchSignal::Aborted);
            }
            Ok(())
        };

        let mut searcher =
            Searcher::new(&params).map_err(|e| anyhow!("{}", e))?;
        searcher.set_abort_flag(abort_flag);

        outcome = if args.filter || args.invert_filter {
            let lib = LiteLibrary::read(std::io::stdin().lock())?;
            searcher.filter(&lib, &mut emit)
        } else if args.filter_lib {
            let lib = load_libraries(args)?;
            searcher.filter(&lib, &mut emit)
        } else {
            searcher.run(&mut emit)
        };
    }

    if let Some(e) = emit_error {
        return Err(anyhow!("write failure: {}", e));
    }
    if let Some(mut writer) = xml {
        writer.finish()?;
        // XML is buffered so that an aborted run still emits a document
        out.write_all(&writer.into_inner())?;
    }
    out.flush()?;

    if histogram_fmt.is_some() {
        let mut err = std::io::stderr().lock();
        for (value, count) in &histogram {
            writeln!(err, "{}\t{}", count, value)?;
        }
    }

    match outcome.signal {
        Some(SearchSignal::Timeout) => eprintln!("timed out"),
        Some(SearchSignal::Aborted) => eprintln!("aborted"),
        Some(SearchSignal::LimitReached) | None => {}
    }

    if args.raw_count {
        writeln!(out, "{}", outcome.search_count)?;
    } else if args.count {
        writeln!(out, "Found {} methods", outcome.search_count)?;
    }
    if args.node_count {
        writeln!(out, "{} nodes", outcome.node_count)?;
    }
    out.flush()?;

    // In filter mode, finding nothing is reported through the exit status
    if (args.filter || args.invert_filter || args.filter_lib) && outcome.search_count == 0 {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    simple_logger::init_with_level(log::Level::Warn).expect("logger initialises once");
    let args = Args::from_args();
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("methsearch: {:#}", e);
            ExitCode::from(2)
        }
    }
}
