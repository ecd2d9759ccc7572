//! Integration tests driving RF2 imports end to end over the in-memory
//! store: effective-time conflict handling, patch releases, FULL history
//! loading and rollback on failure.

use std::{fs, path::Path, sync::Arc};

use term_internal::{
    branch::{BranchService, path::MAIN},
    config::CoreConfig,
    domain::{code_system::CodeSystemService, concept::Concept, refset_member::ReferenceSetMember},
    errors::TermError,
    integrity::service::IntegrityService,
    rf2::{
        ImportType,
        import::{ImportService, ImportStatus, Rf2ImportConfiguration},
        patch::PATCH_ALL_RELEASES,
    },
    store::{DocKind, IndexStore, memory::MemStore, query::Query},
};

struct Harness {
    store: Arc<MemStore>,
    branching: Arc<BranchService<MemStore>>,
    code_systems: Arc<CodeSystemService>,
    imports: ImportService<MemStore>,
}

fn harness() -> Harness {
    let store = Arc::new(MemStore::new());
    let branching = Arc::new(BranchService::new(Arc::clone(&store)));
    branching.create_branch(MAIN).expect("create MAIN");
    let code_systems = Arc::new(CodeSystemService::new());
    let imports = ImportService::new(
        Arc::clone(&branching),
        Arc::clone(&code_systems),
        CoreConfig::default(),
    );
    Harness {
        store,
        branching,
        code_systems,
        imports,
    }
}

fn write_release(dir: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        fs::write(dir.join(name), content).expect("write release file");
    }
}

fn concepts_on(store: &MemStore, query: &Query) -> Vec<Concept> {
    store
        .stream::<Concept>(query, 100)
        .expect("stream concepts")
        .collect::<Result<_, _>>()
        .expect("deserialize concepts")
}

const CONCEPT_DELTA_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId\n";

/// A DELTA into an empty root leaves the branch fully consistent: the
/// concept is visible and active and the full stated sweep reports
/// nothing.
#[test]
fn delta_import_into_empty_main() {
    let h = harness();
    let release = tempfile::tempdir().expect("tempdir");
    write_release(
        release.path(),
        &[(
            "sct2_Concept_Delta_INT_20230101.txt",
            &format!(
                "{CONCEPT_DELTA_HEADER}100000\t20230101\t1\t900000000000207008\t900000000000074008\n"
            ),
        )],
    );

    let job_id = h
        .imports
        .start_local_file_import(
            Rf2ImportConfiguration::new(ImportType::Delta, MAIN),
            release.path(),
        )
        .expect("import");
    let job = h.imports.get_job(&job_id).expect("job");
    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(job.max_effective_time, Some(20230101));

    let criteria = h.branching.criteria_on_branch(MAIN).expect("criteria");
    let visible = concepts_on(
        &h.store,
        &Query::bool_query()
            .must(criteria.query_for(DocKind::Concept))
            .build(),
    );
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].concept_id, "100000");
    assert!(visible[0].fields.active);
    assert_eq!(visible[0].fields.effective_time, Some(20230101));

    let integrity = IntegrityService::new(Arc::clone(&h.store), 100);
    let report = integrity
        .find_all_components_with_bad_integrity(&h.branching, MAIN, true)
        .expect("full sweep");
    assert!(report.is_empty());
}

/// Re-importing the same DELTA skips every row: the skipped counter equals
/// the component count and no further writes become visible.
#[test]
fn delta_reimport_skips_superseded_rows() {
    let h = harness();
    let release = tempfile::tempdir().expect("tempdir");
    write_release(
        release.path(),
        &[(
            "sct2_Concept_Delta_INT_20230101.txt",
            &format!(
                "{CONCEPT_DELTA_HEADER}\
                 100000\t20230101\t1\t900000000000207008\t900000000000074008\n\
                 100001\t20230101\t1\t900000000000207008\t900000000000074008\n"
            ),
        )],
    );

    let config = Rf2ImportConfiguration::new(ImportType::Delta, MAIN);
    h.imports
        .start_local_file_import(config.clone(), release.path())
        .expect("first import");
    let rows_after_first = h
        .store
        .stream_rows(DocKind::Concept, &Query::MatchAll, 100)
        .expect("rows")
        .count();

    let second_job = h
        .imports
        .start_local_file_import(config, release.path())
        .expect("second import");
    let job = h.imports.get_job(&second_job).expect("job");
    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(job.skipped_components.get(&DocKind::Concept), Some(&2));

    let rows_after_second = h
        .store
        .stream_rows(DocKind::Concept, &Query::MatchAll, 100)
        .expect("rows")
        .count();
    assert_eq!(rows_after_first, rows_after_second);
}

/// A designated patch release version may replace its own effective time,
/// while newer rows stay untouched.
#[test]
fn delta_patch_release_replaces_same_effective_time() {
    let h = harness();

    let first = tempfile::tempdir().expect("tempdir");
    write_release(
        first.path(),
        &[(
            "sct2_Concept_Delta_INT_20230101.txt",
            &format!(
                "{CONCEPT_DELTA_HEADER}\
                 100000\t20230101\t1\t900000000000207008\t900000000000074008\n\
                 100001\t20230201\t1\t900000000000207008\t900000000000074008\n"
            ),
        )],
    );
    h.imports
        .start_local_file_import(
            Rf2ImportConfiguration::new(ImportType::Delta, MAIN),
            first.path(),
        )
        .expect("seed import");

    // Patch 20230101: the same-time row is replaced, the newer row is not.
    let patch = tempfile::tempdir().expect("tempdir");
    write_release(
        patch.path(),
        &[(
            "sct2_Concept_Delta_INT_20230101.txt",
            &format!(
                "{CONCEPT_DELTA_HEADER}\
                 100000\t20230101\t0\t900000000000207008\t900000000000074008\n\
                 100001\t20230201\t0\t900000000000207008\t900000000000074008\n"
            ),
        )],
    );
    let mut config = Rf2ImportConfiguration::new(ImportType::Delta, MAIN);
    config.patch_release_version = Some(20230101);
    let job_id = h
        .imports
        .start_local_file_import(config, patch.path())
        .expect("patch import");
    let job = h.imports.get_job(&job_id).expect("job");
    assert_eq!(job.skipped_components.get(&DocKind::Concept), Some(&1));

    let criteria = h.branching.criteria_on_branch(MAIN).expect("criteria");
    let visible = concepts_on(
        &h.store,
        &Query::bool_query()
            .must(criteria.query_for(DocKind::Concept))
            .build(),
    );
    let patched = visible.iter().find(|c| c.concept_id == "100000").expect("100000");
    assert!(!patched.fields.active);
    let untouched = visible.iter().find(|c| c.concept_id == "100001").expect("100001");
    assert!(untouched.fields.active);
}

/// With the disable sentinel every snapshot row is accepted regardless of
/// prior effective times.
#[test]
fn snapshot_with_patch_sentinel_accepts_everything() {
    let h = harness();

    let seed = tempfile::tempdir().expect("tempdir");
    write_release(
        seed.path(),
        &[(
            "sct2_Concept_Delta_INT_20230101.txt",
            &format!(
                "{CONCEPT_DELTA_HEADER}100000\t20230101\t1\t900000000000207008\t900000000000074008\n"
            ),
        )],
    );
    h.imports
        .start_local_file_import(
            Rf2ImportConfiguration::new(ImportType::Delta, MAIN),
            seed.path(),
        )
        .expect("seed import");

    let snapshot = tempfile::tempdir().expect("tempdir");
    write_release(
        snapshot.path(),
        &[(
            "sct2_Concept_Snapshot_INT_20230101.txt",
            &format!(
                "{CONCEPT_DELTA_HEADER}100000\t20230101\t0\t900000000000207008\t900000000000074008\n"
            ),
        )],
    );
    let mut config = Rf2ImportConfiguration::new(ImportType::Snapshot, MAIN);
    config.patch_release_version = Some(PATCH_ALL_RELEASES);
    let job_id = h
        .imports
        .start_local_file_import(config, snapshot.path())
        .expect("snapshot import");
    let job = h.imports.get_job(&job_id).expect("job");
    assert_eq!(job.status, ImportStatus::Completed);
    assert!(job.skipped_components.is_empty());

    let criteria = h.branching.criteria_on_branch(MAIN).expect("criteria");
    let visible = concepts_on(
        &h.store,
        &Query::bool_query()
            .must(criteria.query_for(DocKind::Concept))
            .build(),
    );
    assert_eq!(visible.len(), 1);
    assert!(!visible[0].fields.active, "replacement row must win");
}

/// A snapshot re-import without the sentinel drops rows at the per-module
/// cutoff before they reach the persist buffers.
#[test]
fn snapshot_module_cutoff_drops_stale_rows() {
    let h = harness();

    let seed = tempfile::tempdir().expect("tempdir");
    write_release(
        seed.path(),
        &[(
            "sct2_Concept_Delta_INT_20230101.txt",
            &format!(
                "{CONCEPT_DELTA_HEADER}100000\t20230101\t1\t900000000000207008\t900000000000074008\n"
            ),
        )],
    );
    h.imports
        .start_local_file_import(
            Rf2ImportConfiguration::new(ImportType::Delta, MAIN),
            seed.path(),
        )
        .expect("seed import");

    let snapshot = tempfile::tempdir().expect("tempdir");
    write_release(
        snapshot.path(),
        &[(
            "sct2_Concept_Snapshot_INT_20230101.txt",
            &format!(
                "{CONCEPT_DELTA_HEADER}\
                 100000\t20230101\t0\t900000000000207008\t900000000000074008\n\
                 100001\t20230301\t1\t900000000000207008\t900000000000074008\n"
            ),
        )],
    );
    h.imports
        .start_local_file_import(
            Rf2ImportConfiguration::new(ImportType::Snapshot, MAIN),
            snapshot.path(),
        )
        .expect("snapshot import");

    let criteria = h.branching.criteria_on_branch(MAIN).expect("criteria");
    let visible = concepts_on(
        &h.store,
        &Query::bool_query()
            .must(criteria.query_for(DocKind::Concept))
            .build(),
    );
    let stale = visible.iter().find(|c| c.concept_id == "100000").expect("100000");
    assert!(stale.fields.active, "row at the module cutoff must not re-import");
    let newer = visible.iter().find(|c| c.concept_id == "100001");
    assert!(newer.is_some(), "row above the cutoff imports");
}

/// FULL imports commit each release separately, building true component
/// history on the root branch.
#[test]
fn full_import_builds_history_per_release() {
    let h = harness();
    let release = tempfile::tempdir().expect("tempdir");
    write_release(
        release.path(),
        &[(
            "sct2_Concept_Full_INT_20230101.txt",
            &format!(
                "{CONCEPT_DELTA_HEADER}\
                 100000\t20220101\t1\t900000000000207008\t900000000000074008\n\
                 100000\t20230101\t0\t900000000000207008\t900000000000074008\n"
            ),
        )],
    );

    h.imports
        .start_local_file_import(
            Rf2ImportConfiguration::new(ImportType::Full, MAIN),
            release.path(),
        )
        .expect("full import");

    let all_rows: Vec<_> = h
        .store
        .stream_rows(DocKind::Concept, &Query::MatchAll, 100)
        .expect("rows")
        .collect();
    assert_eq!(all_rows.len(), 2, "both historical versions are kept");
    let timepoints: std::collections::HashSet<i64> =
        all_rows.iter().map(|row| row.start).collect();
    assert_eq!(timepoints.len(), 2, "each release gets its own commit");
    assert_eq!(all_rows.iter().filter(|row| row.end.is_some()).count(), 1);

    let criteria = h.branching.criteria_on_branch(MAIN).expect("criteria");
    let visible = concepts_on(
        &h.store,
        &Query::bool_query()
            .must(criteria.query_for(DocKind::Concept))
            .build(),
    );
    assert_eq!(visible.len(), 1);
    assert!(!visible[0].fields.active);
    assert_eq!(visible[0].fields.effective_time, Some(20230101));
}

/// A broken release file fails the job and rolls back the open commit.
#[test]
fn failed_import_rolls_back() {
    let h = harness();
    let release = tempfile::tempdir().expect("tempdir");
    write_release(
        release.path(),
        &[
            (
                "sct2_Concept_Delta_INT_20230101.txt",
                &format!(
                    "{CONCEPT_DELTA_HEADER}100000\t20230101\t1\t900000000000207008\t900000000000074008\n"
                ),
            ),
            (
                "sct2_Description_Delta_INT_20230101.txt",
                // Wrong column count on the data row.
                "id\teffectiveTime\tactive\tmoduleId\tconceptId\tlanguageCode\ttypeId\tterm\tcaseSignificanceId\n\
                 200001\t20230101\t1\n",
            ),
        ],
    );

    let result = h.imports.start_local_file_import(
        Rf2ImportConfiguration::new(ImportType::Delta, MAIN),
        release.path(),
    );
    assert!(matches!(result, Err(TermError::InvalidRf2Content { .. })));

    assert_eq!(
        h.store
            .stream_rows(DocKind::Concept, &Query::MatchAll, 100)
            .expect("rows")
            .count(),
        0,
        "rolled back writes must not be visible"
    );
    // Import metadata is cleared even on failure.
    let branch = h.branching.branch(MAIN).expect("branch");
    assert!(branch.metadata.get_in("internal", "importType").is_none());
    assert_eq!(h.store.open_cursor_count(), 0);
}

/// Completing a versioned DELTA records a code system version at the
/// maximum observed effective time, and members import with their tail
/// fields.
#[test]
fn versioned_delta_creates_code_system_version() {
    let h = harness();
    let code_system = h.code_systems.create_code_system("SNOMEDCT", MAIN);
    let release = tempfile::tempdir().expect("tempdir");
    write_release(
        release.path(),
        &[
            (
                "sct2_Concept_Delta_INT_20230731.txt",
                &format!(
                    "{CONCEPT_DELTA_HEADER}100000\t20230731\t1\t900000000000207008\t900000000000074008\n"
                ),
            ),
            (
                "der2_ssRefset_MRCMAttributeRangeDelta_INT_20230731.txt",
                "id\teffectiveTime\tactive\tmoduleId\trefsetId\treferencedComponentId\trangeConstraint\tattributeRule\n\
                 bb8e67d2-1a2b-4c3d-8e4f-5a6b7c8d9e0f\t20230731\t1\t900000000000207008\t723562003\t363698007\t<< 442083009\t\n",
            ),
        ],
    );

    let mut config = Rf2ImportConfiguration::new(ImportType::Delta, MAIN);
    config.create_code_system_version = true;
    h.imports
        .start_local_file_import(config, release.path())
        .expect("import");

    let versions = h.code_systems.versions(&code_system.short_name);
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].effective_date, 20230731);

    let members: Vec<ReferenceSetMember> = h
        .store
        .stream::<ReferenceSetMember>(&Query::MatchAll, 100)
        .expect("stream members")
        .collect::<Result<_, _>>()
        .expect("deserialize members");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].additional_field("rangeConstraint"), Some("<< 442083009"));
}
