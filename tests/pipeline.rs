use std::fs;
use std::path::PathBuf;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use taxrollup_rs::{
    AbundanceTable, AggregateOptions, LineageResolver, LongTable, MissingPolicy, Rank, Tree,
    TreeIndex, aggregate, extract, to_long_table,
};

const OTU_TABLE: &str = "\
# Constructed from biom file
#OTU ID\tS1\tS2
OTU1\t5\t0
OTU2\t1\t2
OTU3\t0\t4
TACG\t3\t3
OTU9\t2\t0
";

const TREE: &str = "(((OTU1,OTU2)g__Blautia,(OTU3)g__Dorea)f__Lachnospiraceae,TACG)k__Bacteria;";

struct Inputs {
    dir: TempDir,
    table: PathBuf,
    tree: PathBuf,
}

#[fixture]
fn inputs() -> Inputs {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join("otus.tsv");
    let tree = dir.path().join("ref.nwk");
    fs::write(&table, OTU_TABLE).unwrap();
    fs::write(&tree, TREE).unwrap();
    Inputs { dir, table, tree }
}

fn extracted(inputs: &Inputs, fill: bool) -> LongTable {
    let table = AbundanceTable::read_tsv(inputs.table.to_str().unwrap()).unwrap();
    let tree = Tree::read_newick(inputs.tree.to_str().unwrap()).unwrap();
    let index = TreeIndex::build(tree).unwrap();
    let resolver = LineageResolver::new(Some(&index)).with_unclassified_filled(fill);
    let cells = extract(&table, &resolver).unwrap();
    to_long_table(&cells, &[("run".to_owned(), "R1".to_owned())]).unwrap()
}

fn count_of(table: &LongTable, sample: &str, column: &str, value: &str) -> Option<u64> {
    (0..table.len())
        .find(|&i| table.value(i, "sample_id") == Some(sample) && table.value(i, column) == Some(value))
        .map(|i| table.rows()[i].count())
}

#[rstest]
fn extracted_rows_carry_tree_lineages(inputs: Inputs) {
    let long = extracted(&inputs, false);
    assert_eq!(long.len(), 7);
    assert_eq!(long.total_count(), 20);

    let otu1 = (0..long.len()).find(|&i| long.value(i, "observation_id") == Some("OTU1")).unwrap();
    assert_eq!(long.value(otu1, "kingdom"), Some("k__Bacteria"));
    assert_eq!(long.value(otu1, "family"), Some("f__Lachnospiraceae"));
    assert_eq!(long.value(otu1, "genus"), Some("g__Blautia"));
    assert_eq!(long.value(otu1, "phylum"), None);

    let variant = (0..long.len()).find(|&i| long.value(i, "observation_id") == Some("TACG")).unwrap();
    assert_eq!(long.value(variant, "is_sequencing_variant"), Some("true"));
    assert_eq!(long.value(variant, "genus"), None);

    let stray = (0..long.len()).find(|&i| long.value(i, "observation_id") == Some("OTU9")).unwrap();
    assert_eq!(long.value(stray, "kingdom"), None);
    assert_eq!(long.value(stray, "run"), Some("R1"));
}

#[rstest]
fn filled_dummies_cover_every_rank(inputs: Inputs) {
    let long = extracted(&inputs, true);
    for rank in Rank::ALL {
        assert!((0..long.len()).all(|i| long.value(i, rank.column()).is_some()));
    }
    let stray = (0..long.len()).find(|&i| long.value(i, "observation_id") == Some("OTU9")).unwrap();
    assert_eq!(long.value(stray, "genus"), Some("g__"));
}

#[rstest]
#[case("counts.tsv")]
#[case("counts.csv")]
fn long_table_survives_disk(inputs: Inputs, #[case] name: &str) {
    let long = extracted(&inputs, false);
    let path = inputs.dir.path().join(name);
    long.to_path(&path).unwrap();
    let back = LongTable::from_path(&path).unwrap();
    assert_eq!(back, long);

    let text = fs::read_to_string(&path).unwrap();
    let sep = if name.ends_with(".csv") { ',' } else { '\t' };
    assert!(text.starts_with(&format!("run{sep}sample_id{sep}kingdom")));
}

#[rstest]
#[case(MissingPolicy::Sum, 5, 20)]
#[case(MissingPolicy::Remove, 3, 12)]
#[case(MissingPolicy::ZeroCounts, 6, 20)]
fn simple_genus_rollup(
    inputs: Inputs,
    #[case] policy: MissingPolicy,
    #[case] rows: usize,
    #[case] total: u64,
) {
    let long = extracted(&inputs, false);
    let opts = AggregateOptions::at("genus").unwrap().simple(true).with_policy(policy);
    let out = aggregate(&long, &opts).unwrap();
    assert_eq!(out.header(), ["run", "sample_id", "genus", "count"]);
    assert_eq!(out.len(), rows);
    assert_eq!(out.total_count(), total);
    assert_eq!(count_of(&out, "S1", "genus", "g__Blautia"), Some(6));
    assert_eq!(count_of(&out, "S2", "genus", "g__Dorea"), Some(4));
    match policy {
        MissingPolicy::Sum => assert_eq!(count_of(&out, "S1", "genus", "g__"), Some(5)),
        MissingPolicy::Remove => assert_eq!(count_of(&out, "S1", "genus", "g__"), None),
        MissingPolicy::ZeroCounts => assert_eq!(count_of(&out, "S1", "genus", "g__Dorea"), Some(0)),
    }
}

#[rstest]
fn hierarchical_rollup_from_disk(inputs: Inputs) {
    let path = inputs.dir.path().join("counts.tsv");
    extracted(&inputs, false).to_path(&path).unwrap();
    let long = LongTable::from_path(&path).unwrap();

    let out = aggregate(&long, &AggregateOptions::new(Rank::Genus)).unwrap();
    assert_eq!(
        out.header(),
        ["run", "sample_id", "kingdom", "phylum", "class", "order", "family", "genus", "count"]
    );
    // S1: Blautia, TACG (kingdom only), OTU9 (nothing); S2: Blautia, Dorea, TACG
    assert_eq!(out.len(), 6);
    assert_eq!(out.total_count(), 20);

    let family = aggregate(&long, &AggregateOptions::new(Rank::Family)).unwrap();
    assert_eq!(count_of(&family, "S2", "family", "f__Lachnospiraceae"), Some(6));
}

// Greengenes-style support values and multi-rank labels, quoted as in released trees.
const QUOTED_TREE: &str = "((OTU1:0.1,OTU2:0.2)'0.998:g__[Ruminococcus]; s__gnavus':0.3,\
(OTU3:0.4)'f__Lachnospiraceae; g__Blautia':0.1)'0.95:k__Bacteria; p__Firmicutes; f__Ruminococcaceae';";

const QUOTED_TABLE: &str = "\
#OTU ID\tS1\tS2
OTU1\t5\t0
OTU2\t1\t2
OTU3\t4\t0
";

#[fixture]
fn quoted_inputs() -> Inputs {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join("otus.tsv");
    let tree = dir.path().join("gg.tree");
    fs::write(&table, QUOTED_TABLE).unwrap();
    fs::write(&tree, QUOTED_TREE).unwrap();
    Inputs { dir, table, tree }
}

#[rstest]
fn quoted_greengenes_tree_resolves_and_rolls_up(quoted_inputs: Inputs) {
    let table = AbundanceTable::read_tsv(quoted_inputs.table.to_str().unwrap()).unwrap();
    let tree = Tree::read_newick(quoted_inputs.tree.to_str().unwrap()).unwrap();
    let index = TreeIndex::build(tree).unwrap();
    let resolver = LineageResolver::new(Some(&index));
    let long = to_long_table(&extract(&table, &resolver).unwrap(), &[]).unwrap();
    assert_eq!(long.len(), 4);

    let row = |id: &str| (0..long.len()).find(|&i| long.value(i, "observation_id") == Some(id)).unwrap();
    let otu1 = row("OTU1");
    assert_eq!(long.value(otu1, "kingdom"), Some("k__Bacteria"));
    assert_eq!(long.value(otu1, "phylum"), Some("p__Firmicutes"));
    assert_eq!(long.value(otu1, "family"), Some("f__Ruminococcaceae"));
    assert_eq!(long.value(otu1, "genus"), Some("g__[Ruminococcus]"));
    assert_eq!(long.value(otu1, "species"), Some("s__gnavus"));

    // the nearer family label shadows the one on the root
    let otu3 = row("OTU3");
    assert_eq!(long.value(otu3, "family"), Some("f__Lachnospiraceae"));
    assert_eq!(long.value(otu3, "genus"), Some("g__Blautia"));
    assert_eq!(long.value(otu3, "phylum"), Some("p__Firmicutes"));

    let out = aggregate(&long, &AggregateOptions::new(Rank::Genus)).unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(out.total_count(), 12);
    assert_eq!(count_of(&out, "S1", "genus", "g__Ruminococcus"), Some(6));
    assert_eq!(count_of(&out, "S1", "genus", "g__Blautia"), Some(4));
    assert_eq!(count_of(&out, "S2", "genus", "g__Ruminococcus"), Some(2));
    assert!((0..out.len()).all(|i| out.value(i, "genus") != Some("g__[Ruminococcus]")));
}
