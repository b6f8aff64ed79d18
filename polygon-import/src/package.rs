//! Uploading a local package into a Polygon problem.
//!
//! Walks the package descriptor and replays it as API calls: general info,
//! resource and executable files, checker, validator, solutions and the
//! tests of the main testset. The first failing call aborts the upload.
//! Uploads only overwrite remote state, so repeating one is safe.

use std::fs;
use std::path::Path;

use polygon_import_core::contract::{api_params, ApiFiles, ApiParams, ClientError, ProblemSession};
use polygon_import_core::descriptor::{Descriptor, FileRef, Testset};
use polygon_import_core::locate::DESCRIPTOR_FILE_NAME;
use tracing::{debug, info};

/// Resource files every Polygon problem already has.
pub const STANDARD_RESOURCES: [&str; 5] = [
    "olymp.sty",
    "problem.tex",
    "statements.ftl",
    "testlib.h",
    "tutorial.tex",
];

const MEGABYTE: u64 = 1024 * 1024;

pub async fn upload_package<S>(
    session: &S,
    problem_dir: &Path,
    skip_standard_resources: bool,
) -> Result<(), ClientError>
where
    S: ProblemSession + ?Sized,
{
    let descriptor = Descriptor::from_file(&problem_dir.join(DESCRIPTOR_FILE_NAME))
        .map_err(|e| ClientError::Package(e.to_string()))?;
    info!(
        short_name = descriptor.short_name(),
        problem_id = ?session.problem_id(),
        "Uploading package"
    );

    if let Some(testset) = descriptor.main_testset() {
        update_info(session, &descriptor, testset).await?;
    }

    for resource in descriptor.resources() {
        let name = file_name(&resource.path);
        if skip_standard_resources && STANDARD_RESOURCES.contains(&name) {
            debug!(file = name, "Skipping standard resource");
            continue;
        }
        save_file(session, problem_dir, "resource", resource).await?;
    }

    for source in descriptor.executables() {
        save_file(session, problem_dir, "source", source).await?;
    }

    if let Some(checker) = descriptor.checker() {
        let name = match (&checker.name, &checker.source) {
            (Some(name), _) if name.starts_with("std::") => name.clone(),
            (_, Some(source)) => {
                save_file(session, problem_dir, "source", source).await?;
                file_name(&source.path).to_string()
            }
            (Some(name), None) => name.clone(),
            (None, None) => String::new(),
        };
        if !name.is_empty() {
            session
                .send_api_request("problem.setChecker", api_params([("checker", name.as_str())]))
                .await?;
        }
    }

    if let Some(validator) = descriptor.validators().next() {
        save_file(session, problem_dir, "source", validator).await?;
        session
            .send_api_request(
                "problem.setValidator",
                api_params([("validator", file_name(&validator.path))]),
            )
            .await?;
    }

    for solution in descriptor.solutions() {
        let Some(source) = &solution.source else {
            continue;
        };
        let files = file_content("file", problem_dir, &source.path)?;
        let mut params = api_params([
            ("name", file_name(&source.path)),
            ("tag", solution_tag(&solution.tag)),
        ]);
        if let Some(source_type) = &source.source_type {
            params.insert("sourceType".into(), source_type.clone());
        }
        session
            .send_api_request_with_files("problem.saveSolution", params, files)
            .await?;
    }

    if let Some(testset) = descriptor.main_testset() {
        upload_tests(session, problem_dir, testset).await?;
    }

    info!(short_name = descriptor.short_name(), "Package uploaded");
    Ok(())
}

async fn update_info<S>(session: &S, descriptor: &Descriptor, testset: &Testset) -> Result<(), ClientError>
where
    S: ProblemSession + ?Sized,
{
    let mut params = ApiParams::new();
    if let Some(judging) = &descriptor.judging {
        params.insert("inputFile".into(), or_stdio(&judging.input_file, "stdin"));
        params.insert("outputFile".into(), or_stdio(&judging.output_file, "stdout"));
    }
    if let Some(time_limit) = testset.time_limit {
        params.insert("timeLimit".into(), time_limit.to_string());
    }
    if let Some(memory_limit) = testset.memory_limit {
        params.insert("memoryLimit".into(), (memory_limit / MEGABYTE).to_string());
    }
    session.send_api_request("problem.updateInfo", params).await?;
    Ok(())
}

async fn upload_tests<S>(session: &S, problem_dir: &Path, testset: &Testset) -> Result<(), ClientError>
where
    S: ProblemSession + ?Sized,
{
    let Some(tests) = &testset.tests else {
        return Ok(());
    };
    let testset_name = if testset.name.is_empty() {
        "tests"
    } else {
        testset.name.as_str()
    };

    let mut script = Vec::new();
    for (i, test) in tests.tests.iter().enumerate() {
        let index = i + 1;
        if test.method == "generated" {
            if let Some(cmd) = &test.cmd {
                script.push(format!("{cmd} > {index}"));
            }
            continue;
        }
        let Some(pattern) = &testset.input_path_pattern else {
            continue;
        };
        let files = file_content("testInput", problem_dir, &format_test_path(pattern, index))?;
        let index_str = index.to_string();
        let mut params = api_params([("testset", testset_name), ("testIndex", index_str.as_str())]);
        if test.sample.unwrap_or(false) {
            params.insert("testUseInStatements".into(), "true".into());
        }
        session
            .send_api_request_with_files("problem.saveTest", params, files)
            .await?;
    }

    if !script.is_empty() {
        let source = script.join("\n");
        session
            .send_api_request(
                "problem.saveScript",
                api_params([("testset", testset_name), ("source", source.as_str())]),
            )
            .await?;
    }
    debug!(tests = tests.tests.len(), "Tests uploaded");
    Ok(())
}

async fn save_file<S>(
    session: &S,
    problem_dir: &Path,
    file_type: &str,
    file: &FileRef,
) -> Result<(), ClientError>
where
    S: ProblemSession + ?Sized,
{
    let files = file_content("file", problem_dir, &file.path)?;
    let mut params = api_params([("type", file_type), ("name", file_name(&file.path))]);
    if let Some(source_type) = &file.source_type {
        params.insert("sourceType".into(), source_type.clone());
    }
    session
        .send_api_request_with_files("problem.saveFile", params, files)
        .await?;
    Ok(())
}

/// Reads a package file verbatim as the single file parameter `param`.
fn file_content(param: &str, problem_dir: &Path, relative: &str) -> Result<ApiFiles, ClientError> {
    let content = fs::read(problem_dir.join(relative))?;
    Ok(ApiFiles::from([(param.to_string(), content)]))
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn or_stdio(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Expands a printf-style test path pattern such as `tests/%02d`.
pub fn format_test_path(pattern: &str, index: usize) -> String {
    let Some(start) = pattern.find('%') else {
        return pattern.to_string();
    };
    let rest = &pattern[start + 1..];
    let Some(end) = rest.find('d') else {
        return pattern.to_string();
    };
    let conversion = &rest[..end];
    let width: usize = conversion.trim_start_matches('0').parse().unwrap_or(0);
    let number = if conversion.starts_with('0') {
        format!("{index:0width$}")
    } else {
        format!("{index:width$}")
    };
    format!("{}{}{}", &pattern[..start], number, &rest[end + 1..])
}

/// Maps package solution tags to Polygon's two-letter tags.
pub fn solution_tag(tag: &str) -> &'static str {
    match tag {
        "main" => "MA",
        "accepted" => "OK",
        "wrong-answer" => "WA",
        "presentation-error" => "PE",
        "time-limit-exceeded" => "TL",
        "time-limit-exceeded-or-accepted" => "TO",
        "time-limit-exceeded-or-memory-limit-exceeded" => "TM",
        "memory-limit-exceeded" => "ML",
        "failed" => "RE",
        _ => "RJ",
    }
}
