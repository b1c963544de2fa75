//! Work-package configuration.
//!
//! # File format
//!
//! ```yaml
//! file: survey.gpkg
//! work-packages:
//!   - name: TeamA
//!     value: A
//!     project: org/survey-team-a
//! tables:
//!   - name: farms
//!     method: filter-column
//!     filter-column-name: owner
//!   - name: trees
//!     method: filter-geometry
//! ```
//!
//! The YAML is parsed into raw structs and validated once into an immutable
//! [`Config`]. Work-package declaration order is kept: it breaks ties when
//! two work packages edit the same row.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::rule::{parse_boundary, FilterRule, FilterValue};
use crate::types::{ProjectId, TableName, WorkPackageName};

/// Geometry column used when a geometry table does not name one.
pub const DEFAULT_GEOMETRY_COLUMN: &str = "geometry";

/// Base-store key reserved for the master project.
pub const MASTER_KEY: &str = "master";

// ---------------------------------------------------------------------------
// Raw (as parsed)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    file: String,
    #[serde(default)]
    work_packages: Vec<RawWorkPackage>,
    #[serde(default)]
    tables: Vec<RawTable>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawWorkPackage {
    name: String,
    value: FilterValue,
    #[serde(alias = "mergin-project")]
    project: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum RawMethod {
    FilterColumn,
    FilterGeometry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawTable {
    name: String,
    method: RawMethod,
    filter_column_name: Option<String>,
    geometry_column: Option<String>,
}

// ---------------------------------------------------------------------------
// Validated
// ---------------------------------------------------------------------------

/// How a filtered table decides row membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterMethod {
    Column { column: String },
    Geometry { column: String },
}

/// A table whose rows are split between work packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredTable {
    pub name: TableName,
    pub method: FilterMethod,
}

/// One declared work package with its resolved per-table rules.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPackage {
    pub name: WorkPackageName,
    pub value: FilterValue,
    pub project: ProjectId,
    rules: BTreeMap<TableName, FilterRule>,
}

impl WorkPackage {
    /// Rule for `table`, or `None` when the table is copied unfiltered.
    pub fn rule_for(&self, table: &TableName) -> Option<&FilterRule> {
        self.rules.get(table)
    }
}

/// Validated, immutable configuration for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Dataset file name inside each project.
    pub file: String,
    /// Work packages in declaration order.
    pub work_packages: Vec<WorkPackage>,
    pub tables: Vec<FilteredTable>,
}

impl Config {
    /// Load and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &contents)
    }

    /// Parse and validate YAML that did not come from a file.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(&PathBuf::from("<inline>"), contents)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.file.trim().is_empty() {
            return Err(ConfigError::MissingDatasetFile);
        }

        let mut tables = Vec::with_capacity(raw.tables.len());
        let mut seen_tables = HashSet::new();
        for table in raw.tables {
            let name = TableName::from(table.name);
            if !seen_tables.insert(name.clone()) {
                return Err(ConfigError::DuplicateTable(name));
            }
            let method = match table.method {
                RawMethod::FilterColumn => match table.filter_column_name {
                    Some(column) if !column.is_empty() => FilterMethod::Column { column },
                    _ => return Err(ConfigError::MissingFilterColumn { table: name }),
                },
                RawMethod::FilterGeometry => FilterMethod::Geometry {
                    column: table
                        .geometry_column
                        .unwrap_or_else(|| DEFAULT_GEOMETRY_COLUMN.to_string()),
                },
            };
            tables.push(FilteredTable { name, method });
        }

        let mut work_packages = Vec::with_capacity(raw.work_packages.len());
        let mut seen_names = HashSet::new();
        let mut seen_projects = HashSet::new();
        for wp in raw.work_packages {
            validate_name(&wp.name)?;
            let name = WorkPackageName::from(wp.name);
            if !seen_names.insert(name.clone()) {
                return Err(ConfigError::DuplicateWorkPackage(name));
            }
            validate_project(&wp.project)?;
            let project = ProjectId::from(wp.project);
            if !seen_projects.insert(project.clone()) {
                return Err(ConfigError::DuplicateProject { project });
            }
            let rules = resolve_rules(&name, &wp.value, &tables)?;
            work_packages.push(WorkPackage {
                name,
                value: wp.value,
                project,
                rules,
            });
        }

        Ok(Self {
            file: raw.file,
            work_packages,
            tables,
        })
    }

    /// Reject work packages that point back at the master project.
    pub fn check_master(&self, master: &ProjectId) -> Result<(), ConfigError> {
        validate_project(&master.0)?;
        match self.work_packages.iter().find(|wp| &wp.project == master) {
            Some(wp) => Err(ConfigError::MasterAsWorkPackage {
                work_package: wp.name.clone(),
                project: master.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn work_package(&self, name: &WorkPackageName) -> Option<&WorkPackage> {
        self.work_packages.iter().find(|wp| &wp.name == name)
    }

    pub fn is_filtered(&self, table: &TableName) -> bool {
        self.tables.iter().any(|t| &t.name == table)
    }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        Some("empty")
    } else if name == MASTER_KEY {
        Some("reserved for the master project")
    } else if name.starts_with('.') {
        Some("must not start with '.'")
    } else if name.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Project ids name directories below the store root: relative,
/// `/`-separated, no empty, `.` or `..` segments.
fn validate_project(project: &str) -> Result<(), ConfigError> {
    let reason = if project.is_empty() {
        Some("empty")
    } else if project.starts_with('/') || project.contains('\\') || project.contains(':') {
        Some("must be a relative `/`-separated path")
    } else if project
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        Some("must not contain empty, '.' or '..' segments")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigError::InvalidProject {
            project: project.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn resolve_rules(
    work_package: &WorkPackageName,
    value: &FilterValue,
    tables: &[FilteredTable],
) -> Result<BTreeMap<TableName, FilterRule>, ConfigError> {
    let mut rules = BTreeMap::new();
    for table in tables {
        let rule = match &table.method {
            FilterMethod::Column { column } => {
                let values = value.scalars();
                if values.is_empty() {
                    return Err(ConfigError::InvalidFilterValue {
                        work_package: work_package.clone(),
                        table: table.name.clone(),
                        reason: "empty value list".to_string(),
                    });
                }
                FilterRule::ColumnEquals {
                    column: column.clone(),
                    values,
                }
            }
            FilterMethod::Geometry { column } => {
                let wkt = value.as_wkt().ok_or_else(|| ConfigError::InvalidBoundary {
                    work_package: work_package.clone(),
                    reason: "value must be a WKT polygon".to_string(),
                })?;
                let boundary = parse_boundary(wkt).map_err(|reason| {
                    ConfigError::InvalidBoundary {
                        work_package: work_package.clone(),
                        reason,
                    }
                })?;
                FilterRule::Intersects {
                    column: column.clone(),
                    boundary,
                }
            }
        };
        rules.insert(table.name.clone(), rule);
    }
    Ok(rules)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ScalarValue;

    const BASIC: &str = r#"
file: farms.gpkg
work-packages:
  - name: Kyle
    value: 1
    project: org/kyle
  - name: Emma
    value: [2, 3]
    mergin-project: org/emma
tables:
  - name: farms
    method: filter-column
    filter-column-name: fid
  - name: trees
    method: filter-column
    filter-column-name: farm_id
"#;

    #[test]
    fn parses_basic_config_in_declaration_order() {
        let config = Config::from_yaml_str(BASIC).expect("valid config");
        assert_eq!(config.file, "farms.gpkg");
        let names: Vec<_> = config.work_packages.iter().map(|wp| wp.name.0.as_str()).collect();
        assert_eq!(names, ["Kyle", "Emma"]);
        assert_eq!(config.work_packages[1].project, ProjectId::from("org/emma"));

        let emma = config.work_package(&WorkPackageName::from("Emma")).unwrap();
        assert_eq!(
            emma.rule_for(&TableName::from("trees")),
            Some(&FilterRule::ColumnEquals {
                column: "farm_id".into(),
                values: vec![ScalarValue::Integer(2), ScalarValue::Integer(3)],
            })
        );
        assert!(emma.rule_for(&TableName::from("owners")).is_none());
        assert!(config.is_filtered(&TableName::from("farms")));
    }

    #[test]
    fn geometry_table_defaults_column_and_parses_boundary() {
        let yaml = r#"
file: farms.gpkg
work-packages:
  - name: North
    value: "POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))"
    project: org/north
tables:
  - name: trees
    method: filter-geometry
"#;
        let config = Config::from_yaml_str(yaml).expect("valid config");
        let rule = config.work_packages[0]
            .rule_for(&TableName::from("trees"))
            .unwrap();
        assert!(matches!(rule, FilterRule::Intersects { column, .. } if column == "geometry"));
    }

    #[test]
    fn duplicate_work_package_name_is_rejected() {
        let yaml = r#"
file: farms.gpkg
work-packages:
  - { name: A, value: 1, project: org/a }
  - { name: A, value: 2, project: org/b }
"#;
        let err = Config::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateWorkPackage(ref n) if n.0 == "A"), "got: {err}");
    }

    #[test]
    fn geometry_table_rejects_non_polygon_value() {
        let yaml = r#"
file: farms.gpkg
work-packages:
  - { name: A, value: "POINT (1 1)", project: org/a }
tables:
  - { name: trees, method: filter-geometry }
"#;
        let err = Config::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBoundary { .. }), "got: {err}");
    }

    #[test]
    fn reserved_and_unsafe_names_are_rejected() {
        for name in ["master", "", "a/b", ".hidden"] {
            let yaml = format!(
                "file: f.gpkg\nwork-packages:\n  - {{ name: \"{name}\", value: 1, project: org/x }}\n"
            );
            let err = Config::from_yaml_str(&yaml).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidName { .. }), "{name}: {err}");
        }
    }

    #[test]
    fn project_ids_stay_inside_the_store() {
        for project in ["../../x", "org/../x", "/abs/x", "org//x", "C:\\\\x", ""] {
            let yaml = format!(
                "file: f.gpkg\nwork-packages:\n  - {{ name: A, value: 1, project: \"{project}\" }}\n"
            );
            let err = Config::from_yaml_str(&yaml).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidProject { .. }), "{project}: {err}");
        }
        let config = Config::from_yaml_str(BASIC).unwrap();
        let err = config.check_master(&ProjectId::from("../master")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProject { .. }));
    }

    #[test]
    fn work_package_may_not_target_master() {
        let config = Config::from_yaml_str(BASIC).unwrap();
        let err = config.check_master(&ProjectId::from("org/kyle")).unwrap_err();
        assert!(matches!(err, ConfigError::MasterAsWorkPackage { .. }));
        config.check_master(&ProjectId::from("org/master")).expect("distinct master");
    }
}
