//! taxrollup: lineage-annotated counts from BIOM/OTU tables, rolled up by rank
//!  * extract   – table (+ optional Newick tree) → long-format counts
//!  * aggregate – long-format counts → counts at one taxonomic rank
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command, value_parser};
use log::info;

use taxrollup_rs::{
    AbundanceTable, AggregateOptions, DummyValues, LineageResolver, LongTable, MissingPolicy,
    Tree, TreeIndex, aggregate, extract, to_long_table,
};

/// Roll-up flags shared by `extract --rank` and `aggregate`.
fn rollup_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("policy")
            .short('p')
            .long("policy")
            .help("Treatment of unclassified taxa: sum, remove or zero_counts")
            .default_value("sum"),
    )
    .arg(
        Arg::new("group-by")
            .short('g')
            .long("group-by")
            .help("Grouping column (repeatable); default: every column left of `kingdom`")
            .action(ArgAction::Append),
    )
    .arg(
        Arg::new("dummy")
            .short('d')
            .long("dummy")
            .help("Unclassified marker for a rank, e.g. genus=unclassified (repeatable)")
            .action(ArgAction::Append),
    )
    .arg(
        Arg::new("simple")
            .long("simple")
            .help("Group on the target rank only, ignoring higher ranks")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("keep-all")
            .long("keep-all")
            .help("Keep the remaining non-taxonomic columns (first value per group)")
            .action(ArgAction::SetTrue),
    )
}

fn cli() -> Command {
    let extract_cmd = Command::new("extract")
        .about("Resolve lineages and write one row per nonzero observation x sample count")
        .arg(
            Arg::new("input")      // TSV
                .short('i')
                .long("input")
                .help("OTU table in TSV format"),
        )
        .arg(
            Arg::new("biom")       // BIOM
                .short('m')
                .long("biom")
                .help("OTU table in BIOM (HDF5) format"),
        )
        .group(
            ArgGroup::new("table")
                .args(["input", "biom"])
                .required(true),
        )
        .arg(
            Arg::new("tree")
                .short('t')
                .long("tree")
                .help("Reference tree in Newick format with rank-prefixed internal labels"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Output long-format table (.csv for commas, tab-separated otherwise)")
                .default_value("counts.tsv"),
        )
        .arg(
            Arg::new("key")
                .short('k')
                .long("key")
                .help("Constant grouping column NAME=VALUE prepended to every row (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("fill-dummies")
                .long("fill-dummies")
                .help("Write bare rank prefixes (g__) for ranks without a label")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("rank")
                .short('r')
                .long("rank")
                .help("Roll the extracted counts up to this rank before writing"),
        );

    let aggregate_cmd = Command::new("aggregate")
        .about("Roll a long-format count table up to one taxonomic rank")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .help("Long-format table with kingdom..species and count columns")
                .required(true),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Output table (.csv for commas, tab-separated otherwise)")
                .default_value("aggregated.tsv"),
        )
        .arg(
            Arg::new("rank")
                .short('r')
                .long("rank")
                .help("Target rank: kingdom, phylum, class, order, family, genus or species")
                .required(true),
        );

    Command::new("taxrollup")
        .about("Taxonomic roll-up of microbial abundance tables")
        .subcommand_required(true)
        .arg(
            Arg::new("threads")
                .long("threads")
                .help("Worker threads (default: all cores)")
                .value_parser(value_parser!(usize))
                .global(true),
        )
        .subcommand(rollup_args(extract_cmd))
        .subcommand(rollup_args(aggregate_cmd))
}

fn rollup_options(m: &ArgMatches, rank: &str) -> Result<AggregateOptions> {
    let policy: MissingPolicy = m
        .get_one::<String>("policy")
        .map_or(Ok(MissingPolicy::default()), |p| p.parse())?;
    let mut dummies = DummyValues::default();
    for entry in m.get_many::<String>("dummy").into_iter().flatten() {
        dummies.parse_override(entry)?;
    }
    let grouping: Vec<String> = m
        .get_many::<String>("group-by")
        .into_iter()
        .flatten()
        .cloned()
        .collect();

    Ok(AggregateOptions::at(rank)?
        .with_policy(policy)
        .with_grouping(grouping)
        .with_dummy_values(dummies)
        .simple(m.get_flag("simple"))
        .keep_remaining(m.get_flag("keep-all")))
}

fn parse_key(text: &str) -> Result<(String, String)> {
    match text.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_owned(), value.to_owned()))
        }
        _ => bail!("invalid --key {text:?}; expected NAME=VALUE"),
    }
}

fn write_table(table: &LongTable, path: &str) -> Result<()> {
    info!("Start writing output.");
    table
        .to_path(path)
        .with_context(|| format!("write {path}"))?;
    info!("wrote {} rows to {path}", table.len());
    Ok(())
}

fn run_extract(m: &ArgMatches) -> Result<()> {
    /* ─────────── Read table (TSV or BIOM) ─────────── */
    let t0 = Instant::now();
    info!("Start parsing input.");
    let table = if let Some(tsv) = m.get_one::<String>("input") {
        AbundanceTable::read_tsv(tsv).with_context(|| format!("read OTU table {tsv}"))?
    } else {
        let biom = m.get_one::<String>("biom").context("no input table given")?;
        AbundanceTable::read_biom(biom).with_context(|| format!("read BIOM file {biom}"))?
    };
    info!(
        "table: {} observations x {} samples ({} ms)",
        table.observation_ids().len(),
        table.sample_ids().len(),
        t0.elapsed().as_millis()
    );

    /* ─────────── Load tree ─────────── */
    let index = match m.get_one::<String>("tree") {
        Some(path) => {
            let t1 = Instant::now();
            let tree = Tree::read_newick(path).context("parse newick")?;
            let index = TreeIndex::build(tree).with_context(|| format!("index tree {path}"))?;
            info!(
                "tree: {} nodes, {} leaves ({} ms)",
                index.tree().len(),
                index.leaf_count(),
                t1.elapsed().as_millis()
            );
            Some(index)
        }
        None => None,
    };

    /* ─────────── Resolve & extract ─────────── */
    let resolver =
        LineageResolver::new(index.as_ref()).with_unclassified_filled(m.get_flag("fill-dummies"));
    let cells = extract(&table, &resolver).context("extract counts")?;
    let keys = m
        .get_many::<String>("key")
        .into_iter()
        .flatten()
        .map(|s| parse_key(s))
        .collect::<Result<Vec<_>>>()?;
    let mut long = to_long_table(&cells, &keys)?;

    /* ─────────── Optional roll-up ─────────── */
    if let Some(rank) = m.get_one::<String>("rank") {
        let opts = rollup_options(m, rank)?;
        long = aggregate(&long, &opts).with_context(|| format!("aggregate at {rank}"))?;
    }

    let out_file = m.get_one::<String>("output").context("no output path")?;
    write_table(&long, out_file)
}

fn run_aggregate(m: &ArgMatches) -> Result<()> {
    let in_file = m.get_one::<String>("input").context("no input table given")?;
    let out_file = m.get_one::<String>("output").context("no output path")?;
    let rank = m.get_one::<String>("rank").context("no target rank given")?;
    let opts = rollup_options(m, rank)?;

    /* ─────────── Read table ─────────── */
    let t0 = Instant::now();
    info!("Start parsing input.");
    let table = LongTable::from_path(in_file).with_context(|| format!("read {in_file}"))?;
    info!("{} rows, {} columns ({} ms)", table.len(), table.columns().len(), t0.elapsed().as_millis());

    /* ─────────── Aggregate ─────────── */
    let rolled = aggregate(&table, &opts).with_context(|| format!("aggregate at {rank}"))?;
    write_table(&rolled, out_file)
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();
    let m = cli().get_matches();
    let (name, sub) = m.subcommand().context("no subcommand given")?;

    /* ─────────── Rayon pool ─────────── */
    let threads = sub.get_one::<usize>("threads").copied().unwrap_or_else(num_cpus::get);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("build rayon pool")?;

    match name {
        "extract" => run_extract(sub),
        "aggregate" => run_aggregate(sub),
        other => bail!("unknown subcommand {other:?}"),
    }
}
