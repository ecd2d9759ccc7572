//! Streaming reader for RF2 release files.
//!
//! Files are tab-separated with a header line naming the columns. The
//! reader validates the leading columns of each table, locates refset tail
//! columns by header name, and pushes one callback per row into the
//! component factory. Core component tables are read before dependent
//! tables.
//!
//! For FULL archives every historical version of every component is
//! present; rows are grouped by effective time and dispatched in ascending
//! release order so the history-aware factory can commit each release
//! atomically.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::File,
    io::{BufRead, BufReader},
    path::PathBuf,
    sync::Arc,
};

use tracing::{debug, info};

use crate::{
    errors::TermError,
    rf2::{ComponentFactory, ImportType, Rf2Table, parse_effective_time},
    store::DocKind,
};

/// One file of a release archive.
pub struct Rf2File {
    pub table: Rf2Table,
    pub name: String,
    pub reader: Box<dyn BufRead + Send>,
}

/// Source of release files. Archive unpacking happens upstream; a source
/// only hands over named readers.
pub trait Rf2Source {
    fn files(&mut self) -> Result<Vec<Rf2File>, TermError>;
}

/// Source walking an extracted release directory, matching RF2 file names
/// against the release type token.
pub struct DirectorySource {
    root: PathBuf,
    import_type: ImportType,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, import_type: ImportType) -> Self {
        Self {
            root: root.into(),
            import_type,
        }
    }

    fn walk(&self, dir: &std::path::Path, found: &mut Vec<PathBuf>) -> Result<(), TermError> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.walk(&path, found)?;
            } else {
                found.push(path);
            }
        }
        Ok(())
    }
}

impl Rf2Source for DirectorySource {
    fn files(&mut self) -> Result<Vec<Rf2File>, TermError> {
        let mut paths = Vec::new();
        self.walk(&self.root, &mut paths)?;
        paths.sort();

        let token = self.import_type.file_token();
        let mut files = Vec::new();
        for path in paths {
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(table) = Rf2Table::detect(name) else {
                continue;
            };
            if !name.contains(token) {
                continue;
            }
            files.push(Rf2File {
                table,
                name: name.to_string(),
                reader: Box::new(BufReader::new(File::open(&path)?)),
            });
        }
        Ok(files)
    }
}

/// Per-module effective-time cutoffs: rows at or below the cutoff for
/// their module are skipped before they reach the factory.
#[derive(Debug, Clone, Default)]
pub struct ModuleCutoffs {
    per_kind: HashMap<DocKind, HashMap<String, i32>>,
}

impl ModuleCutoffs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.per_kind.is_empty()
    }

    /// Record the greatest effective time already present for a module.
    pub fn observe(&mut self, kind: DocKind, module_id: &str, effective_time: i32) {
        let cutoff = self
            .per_kind
            .entry(kind)
            .or_default()
            .entry(module_id.to_string())
            .or_insert(effective_time);
        *cutoff = (*cutoff).max(effective_time);
    }

    pub fn should_skip(&self, kind: DocKind, module_id: &str, effective_time: Option<i32>) -> bool {
        match (
            effective_time,
            self.per_kind.get(&kind).and_then(|cutoffs| cutoffs.get(module_id)),
        ) {
            (Some(effective_time), Some(cutoff)) => effective_time <= *cutoff,
            _ => false,
        }
    }
}

struct ParsedRow {
    table: Rf2Table,
    field_names: Arc<Vec<String>>,
    columns: Vec<String>,
}

/// Reader pushing release rows into a [`ComponentFactory`].
#[derive(Default)]
pub struct ReleaseReader {
    module_ids: HashSet<String>,
    cutoffs: Option<ModuleCutoffs>,
}

impl ReleaseReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict ingestion to the given modules. An empty filter admits all.
    pub fn with_module_filter(mut self, module_ids: HashSet<String>) -> Self {
        self.module_ids = module_ids;
        self
    }

    /// Skip rows at or below the per-module effective-time cutoff.
    pub fn with_module_cutoffs(mut self, cutoffs: ModuleCutoffs) -> Self {
        self.cutoffs = Some(cutoffs);
        self
    }

    /// Read a whole release, driving the factory callbacks.
    pub fn read_release(
        &self,
        source: &mut dyn Rf2Source,
        import_type: ImportType,
        factory: &mut dyn ComponentFactory,
    ) -> Result<(), TermError> {
        let mut files = source.files()?;
        files.sort_by_key(|file| (file.table.dependency_order(), file.name.clone()));
        if files.is_empty() {
            return Err(TermError::Validation(
                "release archive contains no RF2 files".to_string(),
            ));
        }

        if import_type == ImportType::Full {
            self.read_full_release(files, factory)
        } else {
            for file in files {
                info!(file = file.name.as_str(), "reading release file");
                self.read_file(file, &mut |table, field_names, columns| {
                    dispatch(table, field_names, &columns, factory)
                })?;
            }
            Ok(())
        }
    }

    /// Collect every row of every file, then dispatch release by release
    /// in ascending effective-time order, core tables first within each
    /// release.
    fn read_full_release(
        &self,
        files: Vec<Rf2File>,
        factory: &mut dyn ComponentFactory,
    ) -> Result<(), TermError> {
        let mut releases: BTreeMap<Option<i32>, Vec<ParsedRow>> = BTreeMap::new();
        for file in files {
            info!(file = file.name.as_str(), "collecting full release file");
            self.read_file(file, &mut |table, field_names, columns| {
                let effective_time = parse_effective_time(&columns[1]);
                releases.entry(effective_time).or_default().push(ParsedRow {
                    table,
                    field_names,
                    columns,
                });
                Ok(())
            })?;
        }
        for (effective_time, mut rows) in releases {
            debug!(?effective_time, rows = rows.len(), "dispatching release");
            rows.sort_by_key(|row| row.table.dependency_order());
            for row in rows {
                dispatch(row.table, row.field_names.clone(), &row.columns, factory)?;
            }
        }
        Ok(())
    }

    fn read_file(
        &self,
        file: Rf2File,
        sink: &mut dyn FnMut(Rf2Table, Arc<Vec<String>>, Vec<String>) -> Result<(), TermError>,
    ) -> Result<(), TermError> {
        let table = file.table;
        let file_name = file.name;
        let mut lines = file.reader.lines();
        let header = lines
            .next()
            .transpose()?
            .ok_or_else(|| TermError::InvalidRf2Content {
                file: file_name.clone(),
                detail: "missing header line".to_string(),
            })?;
        let field_names: Arc<Vec<String>> =
            Arc::new(header.split('\t').map(str::to_string).collect());

        let expected = table.expected_header();
        if field_names.len() < expected.len()
            || field_names
                .iter()
                .zip(expected)
                .any(|(actual, expected)| actual != expected)
        {
            return Err(TermError::InvalidRf2Content {
                file: file_name,
                detail: format!("unexpected header `{}`", field_names.join("\t")),
            });
        }

        for line in lines {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let columns: Vec<String> = line.split('\t').map(str::to_string).collect();
            if columns.len() != field_names.len() {
                return Err(TermError::InvalidRf2Content {
                    file: file_name.clone(),
                    detail: format!(
                        "expected {} columns, found {}",
                        field_names.len(),
                        columns.len()
                    ),
                });
            }
            let module_id = &columns[3];
            if !self.module_ids.is_empty() && !self.module_ids.contains(module_id) {
                continue;
            }
            if let Some(cutoffs) = &self.cutoffs {
                let effective_time = parse_effective_time(&columns[1]);
                if cutoffs.should_skip(table.doc_kind(), module_id, effective_time) {
                    continue;
                }
            }
            sink(table, field_names.clone(), columns)?;
        }
        Ok(())
    }
}

fn dispatch(
    table: Rf2Table,
    field_names: Arc<Vec<String>>,
    columns: &[String],
    factory: &mut dyn ComponentFactory,
) -> Result<(), TermError> {
    match table {
        Rf2Table::Concept => factory.new_concept_state(
            &columns[0], &columns[1], &columns[2], &columns[3], &columns[4],
        ),
        Rf2Table::Description | Rf2Table::TextDefinition => factory.new_description_state(
            &columns[0], &columns[1], &columns[2], &columns[3], &columns[4], &columns[5],
            &columns[6], &columns[7], &columns[8],
        ),
        Rf2Table::StatedRelationship | Rf2Table::Relationship => factory.new_relationship_state(
            &columns[0],
            &columns[1],
            &columns[2],
            &columns[3],
            &columns[4],
            &columns[5],
            &columns[6],
            &columns[7],
            &columns[8],
            &columns[9],
            table == Rf2Table::StatedRelationship,
        ),
        Rf2Table::ConcreteRelationship => factory.new_concrete_relationship_state(
            &columns[0], &columns[1], &columns[2], &columns[3], &columns[4], &columns[5],
            &columns[6], &columns[7], &columns[8], &columns[9],
        ),
        Rf2Table::Identifier => factory.new_identifier_state(
            &columns[0], &columns[1], &columns[2], &columns[3], &columns[4], &columns[5],
        ),
        Rf2Table::RefsetMember => factory.new_reference_set_member_state(
            &field_names,
            &columns[0],
            &columns[1],
            &columns[2],
            &columns[3],
            &columns[4],
            &columns[5],
            &columns[6..],
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Recording factory used to observe dispatched callbacks.
    #[derive(Default)]
    struct RecordingFactory {
        concepts: Vec<(String, String, String)>,
        relationships: Vec<(String, bool)>,
        members: Vec<(String, Vec<(String, String)>)>,
    }

    impl ComponentFactory for RecordingFactory {
        fn new_concept_state(
            &mut self,
            concept_id: &str,
            effective_time: &str,
            active: &str,
            _module_id: &str,
            _definition_status_id: &str,
        ) -> Result<(), TermError> {
            self.concepts.push((
                concept_id.to_string(),
                effective_time.to_string(),
                active.to_string(),
            ));
            Ok(())
        }

        fn new_description_state(
            &mut self,
            _description_id: &str,
            _effective_time: &str,
            _active: &str,
            _module_id: &str,
            _concept_id: &str,
            _language_code: &str,
            _type_id: &str,
            _term: &str,
            _case_significance_id: &str,
        ) -> Result<(), TermError> {
            Ok(())
        }

        fn new_relationship_state(
            &mut self,
            relationship_id: &str,
            _effective_time: &str,
            _active: &str,
            _module_id: &str,
            _source_id: &str,
            _destination_id: &str,
            _relationship_group: &str,
            _type_id: &str,
            _characteristic_type_id: &str,
            _modifier_id: &str,
            stated: bool,
        ) -> Result<(), TermError> {
            self.relationships.push((relationship_id.to_string(), stated));
            Ok(())
        }

        fn new_concrete_relationship_state(
            &mut self,
            _relationship_id: &str,
            _effective_time: &str,
            _active: &str,
            _module_id: &str,
            _source_id: &str,
            _value: &str,
            _relationship_group: &str,
            _type_id: &str,
            _characteristic_type_id: &str,
            _modifier_id: &str,
        ) -> Result<(), TermError> {
            Ok(())
        }

        fn new_identifier_state(
            &mut self,
            _alternate_identifier: &str,
            _effective_time: &str,
            _active: &str,
            _module_id: &str,
            _identifier_scheme_id: &str,
            _referenced_component_id: &str,
        ) -> Result<(), TermError> {
            Ok(())
        }

        fn new_reference_set_member_state(
            &mut self,
            field_names: &[String],
            member_id: &str,
            _effective_time: &str,
            _active: &str,
            _module_id: &str,
            _refset_id: &str,
            _referenced_component_id: &str,
            other_values: &[String],
        ) -> Result<(), TermError> {
            let tail = field_names
                .iter()
                .skip(6)
                .cloned()
                .zip(other_values.iter().cloned())
                .collect();
            self.members.push((member_id.to_string(), tail));
            Ok(())
        }
    }

    struct VecSource(Vec<(Rf2Table, &'static str, &'static str)>);

    impl Rf2Source for VecSource {
        fn files(&mut self) -> Result<Vec<Rf2File>, TermError> {
            Ok(self
                .0
                .drain(..)
                .map(|(table, name, content)| Rf2File {
                    table,
                    name: name.to_string(),
                    reader: Box::new(Cursor::new(content.as_bytes().to_vec())),
                })
                .collect())
        }
    }

    const CONCEPT_DELTA: &str = "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId\n\
        100001\t20230131\t1\t900000000000207008\t900000000000074008\n\
        100002\t\t0\t900000000000012004\t900000000000074008\n";

    /// Rows reach the factory with raw column values.
    #[test]
    fn test_reads_concept_rows() {
        let mut source = VecSource(vec![(
            Rf2Table::Concept,
            "sct2_Concept_Delta_INT_20230131.txt",
            CONCEPT_DELTA,
        )]);
        let mut factory = RecordingFactory::default();
        ReleaseReader::new()
            .read_release(&mut source, ImportType::Delta, &mut factory)
            .unwrap();
        assert_eq!(
            factory.concepts,
            vec![
                ("100001".into(), "20230131".into(), "1".into()),
                ("100002".into(), "".into(), "0".into()),
            ]
        );
    }

    /// The module filter drops rows of other modules.
    #[test]
    fn test_module_filter() {
        let mut source = VecSource(vec![(
            Rf2Table::Concept,
            "sct2_Concept_Delta_INT_20230131.txt",
            CONCEPT_DELTA,
        )]);
        let mut factory = RecordingFactory::default();
        ReleaseReader::new()
            .with_module_filter(HashSet::from(["900000000000012004".to_string()]))
            .read_release(&mut source, ImportType::Delta, &mut factory)
            .unwrap();
        assert_eq!(factory.concepts.len(), 1);
        assert_eq!(factory.concepts[0].0, "100002");
    }

    /// Per-module cutoffs drop rows at or below the recorded maximum.
    #[test]
    fn test_module_cutoffs() {
        let mut source = VecSource(vec![(
            Rf2Table::Concept,
            "sct2_Concept_Snapshot_INT_20230131.txt",
            CONCEPT_DELTA,
        )]);
        let mut cutoffs = ModuleCutoffs::new();
        cutoffs.observe(DocKind::Concept, "900000000000207008", 20230131);
        let mut factory = RecordingFactory::default();
        ReleaseReader::new()
            .with_module_cutoffs(cutoffs)
            .read_release(&mut source, ImportType::Snapshot, &mut factory)
            .unwrap();
        // The released row is at the cutoff, the unreleased row survives.
        assert_eq!(factory.concepts.len(), 1);
        assert_eq!(factory.concepts[0].0, "100002");
    }

    /// Stated relationship files dispatch with the stated flag set.
    #[test]
    fn test_stated_flag() {
        let content = "id\teffectiveTime\tactive\tmoduleId\tsourceId\tdestinationId\trelationshipGroup\ttypeId\tcharacteristicTypeId\tmodifierId\n\
            7000\t20230131\t1\t900000000000207008\t100001\t138875005\t0\t116680003\t900000000000010007\t900000000000451002\n";
        let mut source = VecSource(vec![(
            Rf2Table::StatedRelationship,
            "sct2_StatedRelationship_Delta_INT_20230131.txt",
            content,
        )]);
        let mut factory = RecordingFactory::default();
        ReleaseReader::new()
            .read_release(&mut source, ImportType::Delta, &mut factory)
            .unwrap();
        assert_eq!(factory.relationships, vec![("7000".to_string(), true)]);
    }

    /// Refset tail columns are located by header name and passed in order.
    #[test]
    fn test_refset_tail_columns() {
        let content = "id\teffectiveTime\tactive\tmoduleId\trefsetId\treferencedComponentId\trangeConstraint\tattributeRule\n\
            a1b2\t20230131\t1\t900000000000207008\t723562003\t363698007\t<< 442083009\t\n";
        let mut source = VecSource(vec![(
            Rf2Table::RefsetMember,
            "der2_ssRefset_MRCMAttributeRangeDelta_INT_20230131.txt",
            content,
        )]);
        let mut factory = RecordingFactory::default();
        ReleaseReader::new()
            .read_release(&mut source, ImportType::Delta, &mut factory)
            .unwrap();
        assert_eq!(factory.members.len(), 1);
        assert_eq!(
            factory.members[0].1,
            vec![
                ("rangeConstraint".to_string(), "<< 442083009".to_string()),
                ("attributeRule".to_string(), String::new()),
            ]
        );
    }

    /// A header mismatch fails the file.
    #[test]
    fn test_bad_header_rejected() {
        let mut source = VecSource(vec![(
            Rf2Table::Concept,
            "sct2_Concept_Delta_INT_20230131.txt",
            "id\tactive\tmoduleId\tdefinitionStatusId\n",
        )]);
        let mut factory = RecordingFactory::default();
        let result =
            ReleaseReader::new().read_release(&mut source, ImportType::Delta, &mut factory);
        assert!(matches!(result, Err(TermError::InvalidRf2Content { .. })));
    }
}
