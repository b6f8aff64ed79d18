use polygon_import_core::archive::ArchiveSelection;
use polygon_import_core::config::ImportOptions;
use polygon_import_core::contract::{
    ClientError, MockProblemSession, MockSessionFactory, ProblemSession,
};
use polygon_import_core::import::{import_many, import_single, ProblemOutcome};
use polygon_import_core::marker::MARKER_FILE_NAME;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

/// Everything the fake remote service was asked to do.
#[derive(Debug, Default)]
struct Remote {
    create_attempts: Vec<String>,
    uploads: Vec<(i64, PathBuf)>,
    commits: Vec<i64>,
    builds: Vec<i64>,
    sessions: Vec<Option<i64>>,
}

#[derive(Debug, Clone, Default)]
struct Behaviour {
    /// Problem id handed out per created name; unknown names get 42.
    ids: HashMap<String, i64>,
    fail_create: bool,
    /// Number of leading `problem.create` calls that fail.
    failing_creates: usize,
    fail_listing: bool,
    fail_view_file: bool,
    fail_bound_session: bool,
    fail_upload_for: Option<i64>,
    fail_build_for: Option<i64>,
    remote_olymp_sty: Option<String>,
}

fn api_error(method: &str) -> ClientError {
    ClientError::Api {
        method: method.to_string(),
        comment: "simulated failure".to_string(),
    }
}

fn fake_session(
    problem_id: Option<i64>,
    remote: Arc<Mutex<Remote>>,
    behaviour: Behaviour,
) -> MockProblemSession {
    let mut session = MockProblemSession::new();
    session.expect_problem_id().return_const(problem_id);

    let api_remote = remote.clone();
    let api_behaviour = behaviour.clone();
    session
        .expect_send_api_request()
        .returning(move |method, params| {
            let mut remote = api_remote.lock().unwrap();
            match method {
                "problem.create" => {
                    let name = params["name"].clone();
                    let earlier_attempts = remote.create_attempts.len();
                    remote.create_attempts.push(name.clone());
                    if api_behaviour.fail_create || earlier_attempts < api_behaviour.failing_creates
                    {
                        return Err(api_error(method));
                    }
                    let id = api_behaviour.ids.get(&name).copied().unwrap_or(42);
                    Ok(json!({"id": id, "name": name}))
                }
                "problem.files" => {
                    if api_behaviour.fail_listing {
                        return Err(api_error(method));
                    }
                    let files: Vec<Value> = api_behaviour
                        .remote_olymp_sty
                        .iter()
                        .map(|_| json!({"name": "olymp.sty"}))
                        .collect();
                    Ok(json!({"resourceFiles": files}))
                }
                "problem.commitChanges" => {
                    assert_eq!(params["minorChanges"], "true");
                    assert_eq!(params["message"], "new");
                    remote.commits.push(problem_id.expect("commit needs a bound session"));
                    Ok(Value::Null)
                }
                "problem.buildPackage" => {
                    assert_eq!(params["full"], "true");
                    assert_eq!(params["verify"], "true");
                    let id = problem_id.expect("build needs a bound session");
                    if api_behaviour.fail_build_for == Some(id) {
                        return Err(api_error(method));
                    }
                    remote.builds.push(id);
                    Ok(Value::Null)
                }
                other => panic!("unexpected API call {other}"),
            }
        });

    let raw_behaviour = behaviour.clone();
    session
        .expect_send_raw_api_request()
        .returning(move |method, _| {
            if raw_behaviour.fail_view_file {
                return Err(api_error(method));
            }
            Ok(raw_behaviour
                .remote_olymp_sty
                .clone()
                .unwrap_or_default()
                .into_bytes())
        });

    let upload_remote = remote;
    session
        .expect_import_problem_from_package()
        .returning(move |dir, skip_standard_resources| {
            assert!(!skip_standard_resources, "standard resources must be uploaded");
            let id = problem_id.expect("upload needs a bound session");
            if behaviour.fail_upload_for == Some(id) {
                return Err(api_error("upload"));
            }
            upload_remote
                .lock()
                .unwrap()
                .uploads
                .push((id, dir.to_path_buf()));
            Ok(())
        });
    session
}

fn fake_factory(remote: Arc<Mutex<Remote>>, behaviour: Behaviour) -> MockSessionFactory {
    let mut factory = MockSessionFactory::new();
    factory.expect_open_session().returning(move |problem_id| {
        remote.lock().unwrap().sessions.push(problem_id);
        if behaviour.fail_bound_session && problem_id.is_some() {
            return Err(ClientError::Session("login rejected".to_string()));
        }
        let session = fake_session(problem_id, remote.clone(), behaviour.clone());
        Ok(Box::new(session) as Box<dyn ProblemSession>)
    });
    factory
}

/// A factory that fails the test on any use.
fn untouchable_factory() -> MockSessionFactory {
    let mut factory = MockSessionFactory::new();
    factory.expect_open_session().never();
    factory
}

fn write_package(dir: &Path, short_name: &str) {
    fs::create_dir_all(dir.join("files")).unwrap();
    fs::write(dir.join("files/olymp.sty"), "local style\n").unwrap();
    fs::write(
        dir.join("problem.xml"),
        format!(
            r#"<problem revision="1" short-name="{short_name}">
  <files><resources><file path="files/olymp.sty"/></resources></files>
</problem>"#
        ),
    )
    .unwrap();
}

fn read_marker(dir: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(dir.join(MARKER_FILE_NAME)).unwrap()).unwrap()
}

#[tokio::test]
async fn fresh_import_records_full_marker() {
    let tmp = tempdir().unwrap();
    let problem = tmp.path().join("aplusb");
    write_package(&problem, "aplusb");

    let remote = Arc::new(Mutex::new(Remote::default()));
    let behaviour = Behaviour {
        remote_olymp_sty: Some("remote style\n".to_string()),
        ..Behaviour::default()
    };
    let factory = fake_factory(remote.clone(), behaviour);

    let report = import_single(tmp.path(), &ImportOptions::default(), &factory)
        .await
        .expect("batch should run");

    assert_eq!(report.problems.len(), 1);
    assert_eq!(report.problems[0].outcome, ProblemOutcome::Imported);
    assert_eq!(
        read_marker(&problem),
        json!({"short-name": "aplusb", "problem-id": 42, "imported": true})
    );

    let remote = remote.lock().unwrap();
    assert_eq!(remote.create_attempts, vec!["aplusb"]);
    assert_eq!(remote.uploads, vec![(42, problem.clone())]);
    assert_eq!(remote.commits, vec![42]);
    assert_eq!(remote.builds, vec![42]);

    // Package layout was normalised for the upload.
    assert!(problem.join("documents/description.txt").is_file());
    assert!(problem.join("documents/tutorial.txt").is_file());

    // Diffs land next to the problems once the batch is done.
    let diff = fs::read_to_string(tmp.path().join("olymp.sty.diff")).unwrap();
    assert!(diff.contains("\naplusb\n"));
    assert!(diff.contains("-remote style"));
    assert!(diff.contains("+local style"));
    assert_eq!(report.diff_files, vec![tmp.path().join("olymp.sty.diff")]);
}

#[tokio::test]
async fn second_run_touches_nothing_remote() {
    let tmp = tempdir().unwrap();
    write_package(&tmp.path().join("aplusb"), "aplusb");
    write_package(&tmp.path().join("maxflow"), "maxflow");

    let remote = Arc::new(Mutex::new(Remote::default()));
    let behaviour = Behaviour {
        ids: HashMap::from([("aplusb".to_string(), 1), ("maxflow".to_string(), 2)]),
        ..Behaviour::default()
    };
    let first = import_single(
        tmp.path(),
        &ImportOptions::default(),
        &fake_factory(remote.clone(), behaviour),
    )
    .await
    .unwrap();
    assert_eq!(first.count(&ProblemOutcome::Imported), 2);

    let second = import_single(tmp.path(), &ImportOptions::default(), &untouchable_factory())
        .await
        .unwrap();
    assert_eq!(second.count(&ProblemOutcome::Skipped), 2);
    assert_eq!(
        read_marker(&tmp.path().join("maxflow")),
        json!({"short-name": "maxflow", "problem-id": 2, "imported": true})
    );
}

#[tokio::test]
async fn resumed_import_skips_creation() {
    let tmp = tempdir().unwrap();
    let problem = tmp.path().join("aplusb");
    write_package(&problem, "aplusb");
    fs::write(
        problem.join(MARKER_FILE_NAME),
        r#"{"problem-id": 42, "short-name": "aplusb"}"#,
    )
    .unwrap();

    let remote = Arc::new(Mutex::new(Remote::default()));
    let factory = fake_factory(remote.clone(), Behaviour::default());
    let report = import_single(tmp.path(), &ImportOptions::default(), &factory)
        .await
        .unwrap();

    assert_eq!(report.problems[0].outcome, ProblemOutcome::Imported);
    let remote = remote.lock().unwrap();
    assert!(remote.create_attempts.is_empty());
    assert_eq!(remote.sessions, vec![Some(42)], "no unbound session is opened");
    assert_eq!(remote.uploads, vec![(42, problem.clone())]);
    assert_eq!(
        read_marker(&problem),
        json!({"short-name": "aplusb", "problem-id": 42, "imported": true})
    );
}

#[tokio::test]
async fn creation_retries_with_suffixed_names() {
    let tmp = tempdir().unwrap();
    let problem = tmp.path().join("aplusb");
    write_package(&problem, "aplusb");

    let remote = Arc::new(Mutex::new(Remote::default()));
    let behaviour = Behaviour {
        fail_create: true,
        ..Behaviour::default()
    };
    let factory = fake_factory(remote.clone(), behaviour);
    let report = import_single(tmp.path(), &ImportOptions::with_retry_count(2), &factory)
        .await
        .unwrap();

    assert_eq!(report.problems[0].outcome, ProblemOutcome::CreateFailed);
    let remote = remote.lock().unwrap();
    assert_eq!(remote.create_attempts, vec!["aplusb", "aplusb-2", "aplusb-3"]);
    assert!(remote.uploads.is_empty());
    assert_eq!(read_marker(&problem), json!({}), "marker stays untouched");
}

#[tokio::test]
async fn one_failing_upload_does_not_stop_the_batch() {
    let tmp = tempdir().unwrap();
    for name in ["p1", "p2", "p3"] {
        write_package(&tmp.path().join(name), name);
    }

    let remote = Arc::new(Mutex::new(Remote::default()));
    let behaviour = Behaviour {
        ids: HashMap::from([
            ("p1".to_string(), 1),
            ("p2".to_string(), 2),
            ("p3".to_string(), 3),
        ]),
        fail_upload_for: Some(2),
        ..Behaviour::default()
    };
    let factory = fake_factory(remote.clone(), behaviour);
    let report = import_single(tmp.path(), &ImportOptions::default(), &factory)
        .await
        .unwrap();

    assert_eq!(report.problems.len(), 3);
    assert_eq!(report.count(&ProblemOutcome::Imported), 2);
    assert_eq!(report.count(&ProblemOutcome::UploadFailed), 1);

    assert_eq!(read_marker(&tmp.path().join("p1"))["imported"], json!(true));
    assert_eq!(read_marker(&tmp.path().join("p3"))["imported"], json!(true));
    assert_eq!(
        read_marker(&tmp.path().join("p2")),
        json!({"short-name": "p2", "problem-id": 2}),
        "creation is kept, imported stays unset"
    );

    let mut committed = remote.lock().unwrap().commits.clone();
    committed.sort();
    assert_eq!(committed, vec![1, 3]);
}

#[tokio::test]
async fn failed_build_leaves_problem_for_next_run() {
    let tmp = tempdir().unwrap();
    let problem = tmp.path().join("aplusb");
    write_package(&problem, "aplusb");

    let remote = Arc::new(Mutex::new(Remote::default()));
    let behaviour = Behaviour {
        fail_build_for: Some(42),
        ..Behaviour::default()
    };
    let report = import_single(
        tmp.path(),
        &ImportOptions::default(),
        &fake_factory(remote.clone(), behaviour),
    )
    .await
    .unwrap();
    assert_eq!(report.problems[0].outcome, ProblemOutcome::CommitFailed);
    assert_eq!(read_marker(&problem), json!({"short-name": "aplusb", "problem-id": 42}));

    // The next run goes straight to upload with the recorded id.
    let remote = Arc::new(Mutex::new(Remote::default()));
    let report = import_single(
        tmp.path(),
        &ImportOptions::default(),
        &fake_factory(remote.clone(), Behaviour::default()),
    )
    .await
    .unwrap();
    assert_eq!(report.problems[0].outcome, ProblemOutcome::Imported);
    assert!(remote.lock().unwrap().create_attempts.is_empty());
}

#[tokio::test]
async fn invalid_descriptor_is_skipped() {
    let tmp = tempdir().unwrap();
    let broken = tmp.path().join("broken");
    fs::create_dir_all(&broken).unwrap();
    fs::write(broken.join("problem.xml"), "<problem revision=\"1\"/>").unwrap();

    let report = import_single(tmp.path(), &ImportOptions::default(), &untouchable_factory())
        .await
        .unwrap();
    assert_eq!(report.problems[0].outcome, ProblemOutcome::InvalidDescriptor);
    assert_eq!(read_marker(&broken), json!({}));
}

#[tokio::test]
async fn corrupt_marker_aborts_the_run() {
    let tmp = tempdir().unwrap();
    let problem = tmp.path().join("aplusb");
    write_package(&problem, "aplusb");
    fs::write(problem.join(MARKER_FILE_NAME), "{oops").unwrap();

    let result = import_single(tmp.path(), &ImportOptions::default(), &untouchable_factory()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn alternate_descriptor_is_used_for_the_short_name() {
    let tmp = tempdir().unwrap();
    let problem = tmp.path().join("pkg");
    write_package(&problem, "pcms-name");
    fs::write(
        problem.join("problem.xml.polygon"),
        r#"<problem short-name="polygon-name"/>"#,
    )
    .unwrap();

    let remote = Arc::new(Mutex::new(Remote::default()));
    import_single(
        tmp.path(),
        &ImportOptions::default(),
        &fake_factory(remote.clone(), Behaviour::default()),
    )
    .await
    .unwrap();

    assert_eq!(remote.lock().unwrap().create_attempts, vec!["polygon-name"]);
    assert!(problem.join("problem.xml.pcms").is_file());
}

fn write_contest_zip(path: &Path, short_name: &str) {
    let mut writer = zip::ZipWriter::new(fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    writer
        .start_file(format!("contest/problems/{short_name}/problem.xml"), options)
        .unwrap();
    writer
        .write_all(format!(r#"<problem short-name="{short_name}"/>"#).as_bytes())
        .unwrap();
    writer.finish().unwrap();
}

#[tokio::test]
async fn import_many_unpacks_selected_archives_and_survives_corrupt_ones() {
    let tmp = tempdir().unwrap();
    write_contest_zip(&tmp.path().join("round1.zip"), "aplusb");
    write_contest_zip(&tmp.path().join("round2.zip"), "ignored");
    fs::write(tmp.path().join("broken.zip"), "not a zip").unwrap();

    let remote = Arc::new(Mutex::new(Remote::default()));
    let selection = ArchiveSelection::from_names(["round1.zip", "broken"]);
    let reports = import_many(
        tmp.path(),
        &selection,
        &ImportOptions::default(),
        &fake_factory(remote.clone(), Behaviour::default()),
    )
    .await
    .unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    let expected_root = tmp.path().join("round1/contest/problems");
    assert_eq!(report.src_dir, expected_root);
    assert_eq!(report.problems[0].outcome, ProblemOutcome::Imported);
    assert_eq!(remote.lock().unwrap().create_attempts, vec!["aplusb"]);
    assert!(!tmp.path().join("round2").exists());
    assert!(!tmp.path().join("broken").exists());

    // Unpacking is not repeated and imported problems are skipped.
    let reports = import_many(
        tmp.path(),
        &selection,
        &ImportOptions::default(),
        &untouchable_factory(),
    )
    .await
    .unwrap();
    assert_eq!(reports[0].problems[0].outcome, ProblemOutcome::Skipped);
}

#[tokio::test]
async fn later_creation_attempt_names_the_problem() {
    let tmp = tempdir().unwrap();
    let problem = tmp.path().join("aplusb");
    write_package(&problem, "aplusb");

    let remote = Arc::new(Mutex::new(Remote::default()));
    let behaviour = Behaviour {
        failing_creates: 1,
        remote_olymp_sty: Some("remote style\n".to_string()),
        ..Behaviour::default()
    };
    let factory = fake_factory(remote.clone(), behaviour);
    let report = import_single(tmp.path(), &ImportOptions::with_retry_count(1), &factory)
        .await
        .unwrap();

    assert_eq!(report.problems[0].outcome, ProblemOutcome::Imported);
    assert_eq!(report.problems[0].short_name.as_deref(), Some("aplusb-2"));
    assert_eq!(remote.lock().unwrap().create_attempts, vec!["aplusb", "aplusb-2"]);
    assert_eq!(
        read_marker(&problem),
        json!({"short-name": "aplusb-2", "problem-id": 42, "imported": true})
    );

    let diff = fs::read_to_string(tmp.path().join("olymp.sty.diff")).unwrap();
    assert!(diff.contains("\naplusb-2\n"), "{diff}");
}

#[tokio::test]
async fn failing_resource_listing_only_skips_the_diff() {
    let tmp = tempdir().unwrap();
    let problem = tmp.path().join("aplusb");
    write_package(&problem, "aplusb");

    let remote = Arc::new(Mutex::new(Remote::default()));
    let behaviour = Behaviour {
        fail_listing: true,
        ..Behaviour::default()
    };
    let report = import_single(
        tmp.path(),
        &ImportOptions::default(),
        &fake_factory(remote.clone(), behaviour),
    )
    .await
    .unwrap();

    assert_eq!(report.problems[0].outcome, ProblemOutcome::Imported);
    assert!(report.diff_files.is_empty());
    assert!(!tmp.path().join("olymp.sty.diff").exists());
    assert_eq!(remote.lock().unwrap().builds, vec![42]);
    assert_eq!(read_marker(&problem)["imported"], json!(true));
}

#[tokio::test]
async fn failing_file_download_only_skips_the_diff() {
    let tmp = tempdir().unwrap();
    let problem = tmp.path().join("aplusb");
    write_package(&problem, "aplusb");

    let remote = Arc::new(Mutex::new(Remote::default()));
    let behaviour = Behaviour {
        remote_olymp_sty: Some("remote style\n".to_string()),
        fail_view_file: true,
        ..Behaviour::default()
    };
    let report = import_single(
        tmp.path(),
        &ImportOptions::default(),
        &fake_factory(remote.clone(), behaviour),
    )
    .await
    .unwrap();

    assert_eq!(report.problems[0].outcome, ProblemOutcome::Imported);
    assert!(report.diff_files.is_empty());
    assert_eq!(remote.lock().unwrap().uploads, vec![(42, problem.clone())]);
}

#[tokio::test]
async fn bound_session_failure_keeps_created_problem() {
    let tmp = tempdir().unwrap();
    let problem = tmp.path().join("aplusb");
    write_package(&problem, "aplusb");

    let remote = Arc::new(Mutex::new(Remote::default()));
    let behaviour = Behaviour {
        fail_bound_session: true,
        ..Behaviour::default()
    };
    let report = import_single(
        tmp.path(),
        &ImportOptions::default(),
        &fake_factory(remote.clone(), behaviour),
    )
    .await
    .unwrap();

    assert_eq!(report.problems[0].outcome, ProblemOutcome::SessionFailed);
    assert_eq!(report.problems[0].problem_id, Some(42));
    assert_eq!(read_marker(&problem), json!({"short-name": "aplusb", "problem-id": 42}));

    let remote = remote.lock().unwrap();
    assert_eq!(remote.sessions, vec![None, Some(42)]);
    assert!(remote.uploads.is_empty());
}

#[tokio::test]
async fn broken_package_layout_does_not_stop_the_batch() {
    let tmp = tempdir().unwrap();
    let broken = tmp.path().join("a");
    write_package(&broken, "a");
    // `documents` must be a directory; a plain file blocks the placeholders.
    fs::write(broken.join("documents"), "not a directory").unwrap();

    let done = tmp.path().join("b");
    write_package(&done, "b");
    fs::write(
        done.join(MARKER_FILE_NAME),
        r#"{"short-name": "b", "problem-id": 7, "imported": true}"#,
    )
    .unwrap();

    let report = import_single(tmp.path(), &ImportOptions::default(), &untouchable_factory())
        .await
        .expect("a broken package is not fatal");

    assert_eq!(report.problems.len(), 2);
    assert_eq!(report.count(&ProblemOutcome::LayoutFailed), 1);
    assert_eq!(report.count(&ProblemOutcome::Skipped), 1);
    let failed = report
        .problems
        .iter()
        .find(|p| p.outcome == ProblemOutcome::LayoutFailed)
        .unwrap();
    assert_eq!(failed.problem_dir, broken);
    assert_eq!(read_marker(&broken), json!({}));
}
