//! The collision digest job.
//!
//! Chains fetch -> district assignment -> CSV snapshot -> summary ->
//! email -> summary JSON. Every step runs once, in order. A district
//! assignment failure is logged and the un-annotated batch is written
//! instead; any other failure aborts the run.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, FixedOffset};
use collision_digest_cli_utils::{FetchProgress, JobProgress, MultiProgress};
use collision_digest_collision_models::CollisionTable;
use collision_digest_notify::{
    LogMailer, Mailer, NotifyError, OutboxMailer, render_summary_email,
};
use collision_digest_snapshot::SnapshotError;
use collision_digest_source::{CollisionSource, SocrataCollisionSource, SourceError};
use collision_digest_spatial::{Assignment, DataError, DistrictSet, OverlapPolicy, assign};
use collision_digest_summary::{CollisionSummary, SummaryError, summarize, write_summary};

use crate::config::JobConfig;

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Summary(#[from] SummaryError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

const RUN_STEPS: u64 = 5;

/// Run-time switches not stored in [`JobConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip the summary email.
    pub skip_email: bool,
}

/// What a completed run produced.
#[derive(Debug)]
pub struct RunReport {
    pub snapshot_path: PathBuf,
    pub summary_path: PathBuf,
    pub summary: CollisionSummary,
    /// Whether the snapshot carries district columns.
    pub districts_assigned: bool,
}

/// Runs the full job.
///
/// `now` fixes the fetch window, the email date, and the summary file name.
///
/// # Errors
///
/// Returns [`PipelineError`] if fetching, writing the snapshot, sending the
/// email, or writing the summary fails. District assignment errors are
/// logged, not returned.
pub async fn run(
    config: &JobConfig,
    multi: &MultiProgress,
    now: DateTime<FixedOffset>,
    options: RunOptions,
) -> Result<RunReport, PipelineError> {
    let pipeline_start = Instant::now();
    let steps = JobProgress::new(multi, RUN_STEPS);

    // --- 1. Fetch ---
    steps.begin("Fetching collisions");
    let table = fetch(config, multi, now).await?;
    log_batch(&table);
    steps.complete();

    // --- 2. Districts ---
    steps.begin("Assigning districts");
    let districts = match load_districts(config) {
        Ok(districts) => Some(districts),
        Err(e) => {
            log::error!("Error assigning districts: {e}");
            None
        }
    };
    let assignment = districts.as_ref().and_then(|districts| {
        match assign(&table, districts, config.districts.overlap_policy) {
            Ok(assignment) => {
                log_assignment(&assignment);
                Some(assignment)
            }
            Err(e) => {
                log::error!("Error assigning districts: {e}");
                None
            }
        }
    });
    steps.complete();

    // --- 3. Snapshot ---
    steps.begin("Writing snapshot");
    let snapshot_path = config.snapshot_path();
    let drop_columns = &config.snapshot.drop_columns;
    match &assignment {
        Some(assignment) => {
            collision_digest_snapshot::write_assignment(&snapshot_path, assignment, drop_columns)?;
        }
        None => collision_digest_snapshot::write_table(&snapshot_path, &table, drop_columns)?,
    }
    steps.complete();

    // --- 4. Summary email ---
    steps.begin("Summarizing");
    let summary = summarize(&table, assignment.as_ref());
    if options.skip_email {
        log::info!("Skipping summary email");
    } else {
        send_summary(config, &summary, now)?;
    }
    steps.complete();

    // --- 5. Summary JSON ---
    steps.begin("Saving summary");
    let summary_path = write_summary(&config.summary_dir(), &summary, now.date_naive())?;
    steps.complete();

    steps.finish(format!("Processed {} collisions", summary.record_count));
    log::info!(
        "Pipeline complete in {:.1}s",
        pipeline_start.elapsed().as_secs_f64()
    );

    Ok(RunReport {
        snapshot_path,
        summary_path,
        summary,
        districts_assigned: assignment.is_some(),
    })
}

/// Fetches the configured window and normalizes it.
///
/// # Errors
///
/// Returns [`SourceError`] if the download fails or yields no records.
pub async fn fetch(
    config: &JobConfig,
    multi: &MultiProgress,
    now: DateTime<FixedOffset>,
) -> Result<CollisionTable, SourceError> {
    let source = SocrataCollisionSource::new(config.socrata());
    let options = config.fetch_options(now.date_naive());
    log::info!(
        "Fetching {} since {} (limit {})",
        source.name(),
        options.since,
        config.source.limit
    );

    let progress = FetchProgress::new(multi, source.name());
    source.fetch_table(&options, &progress).await
}

/// Fetches and writes the un-annotated snapshot.
///
/// # Errors
///
/// Returns [`PipelineError`] if the fetch or the write fails.
pub async fn fetch_only(
    config: &JobConfig,
    multi: &MultiProgress,
    now: DateTime<FixedOffset>,
) -> Result<PathBuf, PipelineError> {
    let table = fetch(config, multi, now).await?;
    log_batch(&table);
    let path = config.snapshot_path();
    collision_digest_snapshot::write_table(&path, &table, &config.snapshot.drop_columns)?;
    Ok(path)
}

/// Assigns districts to an existing collision CSV and writes the annotated
/// result to `output`.
///
/// # Errors
///
/// Returns [`PipelineError`] if either file cannot be read, assignment
/// fails, or the output cannot be written.
pub fn assign_file(
    config: &JobConfig,
    collisions: &Path,
    boundaries: &Path,
    output: &Path,
    policy: OverlapPolicy,
) -> Result<(), PipelineError> {
    let table = collision_digest_snapshot::read_table(collisions)?;
    let districts = DistrictSet::from_path(boundaries, &config.boundary_options())?;
    let assignment = assign(&table, &districts, policy)?;
    log_assignment(&assignment);
    collision_digest_snapshot::write_assignment(
        output,
        &assignment,
        &config.snapshot.drop_columns,
    )?;
    Ok(())
}

/// Summarizes an existing collision CSV, with a district breakdown when
/// `boundaries` is given.
///
/// # Errors
///
/// Returns [`PipelineError`] if a file cannot be read or assignment fails.
pub fn summarize_file(
    config: &JobConfig,
    collisions: &Path,
    boundaries: Option<&Path>,
) -> Result<CollisionSummary, PipelineError> {
    let table = collision_digest_snapshot::read_table(collisions)?;
    let Some(boundaries) = boundaries else {
        return Ok(summarize(&table, None));
    };
    let districts = DistrictSet::from_path(boundaries, &config.boundary_options())?;
    let assignment = assign(&table, &districts, config.districts.overlap_policy)?;
    Ok(summarize(&table, Some(&assignment)))
}

fn load_districts(config: &JobConfig) -> Result<DistrictSet, DataError> {
    let districts = DistrictSet::from_path(&config.boundary_path(), &config.boundary_options())?;
    log::info!(
        "Loaded {} districts ({} attribute columns)",
        districts.len(),
        districts.attribute_columns().len()
    );
    Ok(districts)
}

fn send_summary(
    config: &JobConfig,
    summary: &CollisionSummary,
    now: DateTime<FixedOffset>,
) -> Result<(), NotifyError> {
    let email = config.email_config();
    if email.to.is_empty() {
        log::warn!("No email recipients configured; skipping summary email");
        return Ok(());
    }

    let message = render_summary_email(summary, &email, now);
    let mailer: Box<dyn Mailer> = match config.outbox_dir() {
        Some(dir) => Box::new(OutboxMailer::new(dir)),
        None => Box::new(LogMailer),
    };
    log::debug!("Sending summary email via {} mailer", mailer.name());
    mailer.send(&message)
}

fn log_batch(table: &CollisionTable) {
    let summary = summarize(table, None);
    log::info!("Retrieved {} records", summary.record_count);
    if let (Some(earliest), Some(latest)) = (summary.date_range.earliest, summary.date_range.latest)
    {
        log::info!("Date range: {earliest} to {latest}");
    }
    log::info!(
        "Boroughs represented: {}",
        summary
            .boroughs
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
}

fn log_assignment(assignment: &Assignment<'_>) {
    let stats = assignment.stats();
    log::info!(
        "District assignment: {} matched, {} outside all districts, {} without valid coordinates",
        stats.matched,
        stats.unmatched,
        stats.invalid_coordinates
    );
    if stats.ambiguous > 0 {
        log::warn!(
            "{} collisions fell inside more than one district",
            stats.ambiguous
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const BOUNDARIES_CSV: &str = "\
the_geom,CounDist,Shape_Leng,Shape_Area
\"MULTIPOLYGON (((-73.95 40.70, -73.90 40.70, -73.90 40.75, -73.95 40.75, -73.95 40.70)))\",2,1.0,2.0
\"MULTIPOLYGON (((-73.85 40.75, -73.75 40.75, -73.75 40.85, -73.85 40.85, -73.85 40.75)))\",25,1.0,2.0
";

    const RECORDS: &str = r#"[
        {"collision_id": "1", "crash_date": "2024-03-05T00:00:00.000", "borough": "BROOKLYN",
         "number_of_persons_injured": "2", "number_of_persons_killed": "0",
         "latitude": "40.730", "longitude": "-73.935",
         "location": {"type": "Point", "coordinates": [-73.935, 40.73]}},
        {"collision_id": "2", "crash_date": "2024-03-01T00:00:00.000", "borough": "QUEENS",
         "number_of_persons_injured": "1", "number_of_persons_killed": "1",
         "latitude": "40.80", "longitude": "-73.80"},
        {"collision_id": "3", "crash_date": "2024-02-29T00:00:00.000",
         "number_of_persons_injured": "0", "number_of_persons_killed": "0",
         "latitude": "0", "longitude": "0"}
    ]"#;

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 6, 7, 0, 0)
            .unwrap()
    }

    fn config(server: &mockito::Server, data_dir: &Path) -> JobConfig {
        let mut config = JobConfig {
            data_dir: data_dir.to_path_buf(),
            ..JobConfig::default()
        };
        config.source.api_url = format!("{}/resource/h9gi-nx95.json", server.url());
        config.districts.label_column = Some("CounDist".to_string());
        config.email.to = vec!["ops@example.org".to_string()];
        config.email.outbox_dir = Some(PathBuf::from("outbox"));
        config
    }

    async fn serve(server: &mut mockito::Server, body: &str) -> mockito::Mock {
        server
            .mock("GET", "/resource/h9gi-nx95.json")
            .match_query(mockito::Matcher::UrlEncoded(
                "$where".to_string(),
                "crash_date >= '2024-02-28'".to_string(),
            ))
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn run_writes_annotated_snapshot_summary_and_email() {
        let mut server = mockito::Server::new_async().await;
        let mock = serve(&mut server, RECORDS).await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("city_council_boundaries.csv"), BOUNDARIES_CSV).unwrap();
        let config = config(&server, dir.path());

        let report = run(&config, &MultiProgress::new(), now(), RunOptions::default())
            .await
            .unwrap();
        mock.assert_async().await;

        assert!(report.districts_assigned);
        let csv = std::fs::read_to_string(&report.snapshot_path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[0].ends_with(",CounDist"));
        assert!(!lines[0].contains("Shape_Area"));
        assert!(lines[1].ends_with(",2"));
        assert!(lines[2].ends_with(",25"));
        assert!(lines[3].ends_with(','));

        assert_eq!(report.summary.record_count, 3);
        assert_eq!(report.summary.total_injured, 3);
        let districts = report.summary.districts.as_ref().unwrap();
        assert_eq!(districts.get("Unassigned"), Some(&1));

        assert!(report.summary_path.ends_with("summary_2024-03-06.json"));
        assert!(report.summary_path.exists());
        assert_eq!(std::fs::read_dir(dir.path().join("outbox")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn run_falls_back_to_plain_snapshot_on_bad_boundaries() {
        let mut server = mockito::Server::new_async().await;
        serve(&mut server, RECORDS).await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("city_council_boundaries.csv"),
            "the_geom,CounDist\nnot a polygon,2\n",
        )
        .unwrap();
        let config = config(&server, dir.path());

        let report = run(
            &config,
            &MultiProgress::new(),
            now(),
            RunOptions { skip_email: true },
        )
        .await
        .unwrap();

        assert!(!report.districts_assigned);
        assert!(report.summary.districts.is_none());
        let csv = std::fs::read_to_string(&report.snapshot_path).unwrap();
        assert!(!csv.lines().next().unwrap().contains("CounDist"));
        assert_eq!(csv.lines().count(), 4);
        assert!(!dir.path().join("outbox").exists());
    }

    #[tokio::test]
    async fn run_without_boundary_file_still_writes_snapshot() {
        let mut server = mockito::Server::new_async().await;
        serve(&mut server, RECORDS).await;
        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path());

        let report = run(&config, &MultiProgress::new(), now(), RunOptions::default())
            .await
            .unwrap();

        assert!(!report.districts_assigned);
        assert!(report.snapshot_path.exists());
    }

    #[tokio::test]
    async fn run_aborts_without_output_when_no_data() {
        let mut server = mockito::Server::new_async().await;
        serve(&mut server, "[]").await;
        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path());

        let err = run(&config, &MultiProgress::new(), now(), RunOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Source(SourceError::NoData { .. })
        ));
        assert!(!config.snapshot_path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn assign_file_annotates_existing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let collisions = dir.path().join("collisions.csv");
        let boundaries = dir.path().join("boundaries.csv");
        let output = dir.path().join("out.csv");
        std::fs::write(
            &collisions,
            "collision_id,latitude,longitude\n1,40.730,-73.935\n2,,\n",
        )
        .unwrap();
        std::fs::write(&boundaries, BOUNDARIES_CSV).unwrap();

        assign_file(
            &JobConfig::default(),
            &collisions,
            &boundaries,
            &output,
            OverlapPolicy::Reject,
        )
        .unwrap();

        let csv = std::fs::read_to_string(output).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            [
                "collision_id,latitude,longitude,CounDist",
                "1,40.730,-73.935,2",
                "2,,,",
            ]
        );
    }

    #[test]
    fn summarize_file_reads_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let collisions = dir.path().join("collisions.csv");
        std::fs::write(
            &collisions,
            "crash_date,borough,number_of_persons_injured\n\
             2024-03-01T00:00:00.000,BRONX,2\n\
             2024-03-02T00:00:00.000,BRONX,1\n",
        )
        .unwrap();

        let summary = summarize_file(&JobConfig::default(), &collisions, None).unwrap();

        assert_eq!(summary.record_count, 2);
        assert_eq!(summary.total_injured, 3);
        assert_eq!(summary.boroughs.get("BRONX"), Some(&2));
    }
}
