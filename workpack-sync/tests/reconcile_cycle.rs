//! Full reconcile cycles driven in memory: extract, merge, split, then a
//! second cycle over the committed results.

use rstest::rstest;
use workpack_core::{ChangeSet, Config, Dataset, Row, RowId, Table, TableName, Value, WorkPackageName};
use workpack_sync::{partition, split, ChangeExtractor, MergeEngine};

const CONFIG: &str = r#"
file: survey.gpkg
work-packages:
  - { name: TeamA, value: A, project: org/team-a }
  - { name: TeamB, value: B, project: org/team-b }
tables:
  - { name: farms, method: filter-column, filter-column-name: team }
"#;

const GEO_CONFIG: &str = r#"
file: survey.gpkg
work-packages:
  - name: North
    value: "POLYGON ((0 5, 10 5, 10 10, 0 10, 0 5))"
    project: org/north
  - name: South
    value: "POLYGON ((0 0, 10 0, 10 5, 0 5, 0 0))"
    project: org/south
tables:
  - { name: trees, method: filter-geometry }
"#;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn farm(fid: i64, team: &str, name: &str) -> Row {
    Row::from([
        ("fid".to_string(), Value::Integer(fid)),
        ("team".to_string(), Value::from(team)),
        ("name".to_string(), Value::from(name)),
    ])
}

fn tree(fid: i64, x: f64, y: f64) -> Row {
    Row::from([
        ("fid".to_string(), Value::Integer(fid)),
        ("geometry".to_string(), Value::Geometry(format!("POINT ({x} {y})"))),
    ])
}

fn master() -> Dataset {
    let mut farms = Table::new("farms", "fid");
    farms.rows = vec![
        farm(1, "A", "one"),
        farm(2, "A", "two"),
        farm(3, "B", "three"),
        farm(5, "B", "five"),
    ];
    let mut trees = Table::new("trees", "fid");
    trees.rows = vec![tree(1, 1.0, 1.0), tree(2, 5.0, 5.0), tree(3, 2.0, 8.0)];
    Dataset::new(vec![farms, trees])
}

struct Cycle {
    master: Dataset,
    work_packages: Vec<(WorkPackageName, Dataset)>,
    master_changes: ChangeSet,
    wp_changes: Vec<(WorkPackageName, ChangeSet)>,
}

/// One reconcile over the given bases and current states.
fn reconcile(
    config: &Config,
    master_base: &Dataset,
    master_current: &Dataset,
    currents: &[Dataset],
) -> Cycle {
    let extractor = ChangeExtractor::new();
    let master_changes = extractor.extract(master_base, master_current).expect("extract master");
    let wp_changes: Vec<_> = config
        .work_packages
        .iter()
        .zip(currents)
        .map(|(wp, current)| {
            let base = partition(master_base, wp);
            (wp.name.clone(), extractor.extract(&base, current).expect("extract wp"))
        })
        .collect();

    let merged = MergeEngine::default()
        .merge(master_base, &master_changes, &wp_changes)
        .expect("merge");

    let work_packages = config
        .work_packages
        .iter()
        .zip(currents)
        .map(|(wp, current)| {
            let out = split(&extractor, &merged.master, wp, Some(current)).expect("split");
            assert_eq!(out.push.apply(current).expect("apply push"), out.output);
            (wp.name.clone(), out.output)
        })
        .collect();

    Cycle {
        master: merged.master,
        work_packages,
        master_changes,
        wp_changes,
    }
}

#[test]
fn edits_from_every_side_reach_every_side() {
    init_logging();
    let config = Config::from_yaml_str(CONFIG).expect("config");
    let base = master();
    let views: Vec<Dataset> = config.work_packages.iter().map(|wp| partition(&base, wp)).collect();

    // Master deletes farm 5; TeamA renames farm 1; TeamB renames farm 5 and
    // adds farm 10.
    let mut master_current = base.clone();
    master_current.tables[0].rows.retain(|r| r["fid"] != Value::Integer(5));

    let mut team_a = views[0].clone();
    team_a.tables[0].rows[0] = farm(1, "A", "renamed");

    let mut team_b = views[1].clone();
    team_b.tables[0].rows[1] = farm(5, "B", "X");
    team_b.tables[0].rows.push(farm(10, "B", "ten"));

    let cycle = reconcile(&config, &base, &master_current, &[team_a, team_b]);

    let farms = cycle.master.table(&TableName::from("farms")).unwrap();
    let ids: Vec<RowId> = farms.keyed().unwrap().into_keys().collect();
    assert_eq!(ids, vec![RowId::from(1), RowId::from(2), RowId::from(3), RowId::from(10)]);
    assert_eq!(farms.rows[0], farm(1, "A", "renamed"));

    let (_, team_b_out) = &cycle.work_packages[1];
    let b_farms = team_b_out.table(&TableName::from("farms")).unwrap();
    assert_eq!(b_farms.rows, vec![farm(3, "B", "three"), farm(10, "B", "ten")]);
}

#[test]
fn second_cycle_without_edits_is_empty() {
    init_logging();
    let config = Config::from_yaml_str(CONFIG).expect("config");
    let base = master();
    let views: Vec<Dataset> = config.work_packages.iter().map(|wp| partition(&base, wp)).collect();
    let mut team_a = views[0].clone();
    team_a.tables[0].rows.push(farm(7, "A", "seven"));

    let first = reconcile(&config, &base, &base, &[team_a, views[1].clone()]);
    let outputs: Vec<Dataset> = first.work_packages.iter().map(|(_, ds)| ds.clone()).collect();

    let second = reconcile(&config, &first.master, &first.master, &outputs);
    assert!(second.master_changes.is_empty());
    assert!(second.wp_changes.iter().all(|(_, cs)| cs.is_empty()));
    assert_eq!(second.master, first.master);
}

#[rstest]
#[case::inside(2.0, 8.0, true)]
#[case::on_boundary(5.0, 5.0, true)]
#[case::outside(1.0, 1.0, false)]
fn geometry_work_package_sees_trees_in_its_boundary(
    #[case] x: f64,
    #[case] y: f64,
    #[case] expected: bool,
) {
    let config = Config::from_yaml_str(GEO_CONFIG).expect("config");
    let north = config
        .work_package(&WorkPackageName::from("North"))
        .expect("north");
    let mut ds = master();
    ds.tables[1].rows = vec![tree(42, x, y)];
    let view = partition(&ds, north);
    assert_eq!(view.table(&TableName::from("trees")).unwrap().rows.len() == 1, expected);
}
