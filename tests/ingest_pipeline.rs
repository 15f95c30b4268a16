//! Library-level tests of the ingestion pipeline against a real SQLite file.

use sqlx::SqlitePool;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

use toolkit_tracker::change_request::{self, ChangeRequestUpdate, NewChangeRequest};
use toolkit_tracker::code_update;
use toolkit_tracker::config::Config;
use toolkit_tracker::db;
use toolkit_tracker::error::ErrorKind;
use toolkit_tracker::ingest::{ingest_file, IngestOutcome};
use toolkit_tracker::migrate;
use toolkit_tracker::models::{BranchName, CrStatus, CrType, FileAction, ToolKitStage};
use toolkit_tracker::report;
use toolkit_tracker::toolkit;

struct Env {
    _tmp: TempDir,
    dir: PathBuf,
    cfg: Config,
    pool: SqlitePool,
}

async fn setup() -> Env {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().to_path_buf();
    let cfg = Config::with_db_path(dir.join("data").join("tkt.sqlite"));
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    Env {
        _tmp: tmp,
        dir,
        cfg,
        pool,
    }
}

/// Register `component` and put it on `branch` in each tool kit.
async fn seed(pool: &SqlitePool, component: &str, tool_kits: &[(&str, &str)]) {
    let mut conn = pool.acquire().await.unwrap();
    if toolkit::component_id(&mut conn, component).await.is_err() {
        toolkit::add_component(&mut conn, component).await.unwrap();
    }
    for (tk, branch) in tool_kits {
        if toolkit::tool_kit_id(&mut conn, tk).await.is_err() {
            toolkit::add_tool_kit(&mut conn, tk, ToolKitStage::Development)
                .await
                .unwrap();
        }
        toolkit::associate(&mut conn, component, tk, branch)
            .await
            .unwrap();
    }
}

fn transcript(cr: &str, changes: &[(&str, &str)]) -> String {
    let mut body = String::from(
        "VERSION | 2.1\n\
REPOSITORY | chipkit\n\
COMPONENT | widget\n",
    );
    body.push_str(&format!("CR | {}\n", cr));
    body.push_str(
        "REVISION | 18342\n\
USER | jdoe\n\
DATE | 2024-03-05\n\
TIME | 14:22:01\n\
<ABSTRACT>\n\
Fix clock gating in the netlist writer.\n\
</ABSTRACT>\n",
    );
    for (code, path) in changes {
        body.push_str(&format!("CHANGED | {} | {}\n", code, path));
    }
    body
}

fn write_transcript(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("commit-18342.dat");
    fs::write(&path, body).unwrap();
    path
}

async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

fn db_id_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| l.starts_with("DB_ID"))
        .map(str::to_string)
        .collect()
}

const TWO_FILES: &[(&str, &str)] = &[("A", "trunk/src/foo.c"), ("U", "trunk/src/bar.c")];

#[tokio::test]
async fn test_two_tool_kits_on_trunk_end_to_end() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk"), ("14.2.0", "trunk")]).await;
    let path = write_transcript(&env.dir, &transcript("N/A", TWO_FILES));

    let outcome = ingest_file(&env.pool, &path, &env.cfg.ingest).await.unwrap();
    let report = match outcome {
        IngestOutcome::Ingested(r) => r,
        other => panic!("expected ingestion, got {:?}", other),
    };

    assert_eq!(report.branch, BranchName::Trunk);
    assert_eq!(report.code_updates.len(), 2);
    let tool_kits: Vec<&str> = report
        .code_updates
        .iter()
        .map(|cu| cu.tool_kit.as_str())
        .collect();
    assert_eq!(tool_kits, vec!["14.1.2", "14.2.0"]);

    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM code_updates").await, 2);
    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM file_versions").await, 4);
    assert_eq!(
        count(&env.pool, "SELECT COUNT(*) FROM code_update_change_requests").await,
        0
    );
    // file names are shared between the two code updates
    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM file_names").await, 2);

    let lines = db_id_lines(&path);
    assert_eq!(
        lines,
        report
            .code_update_ids()
            .iter()
            .map(|id| format!("DB_ID | {} |", id))
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_rerun_is_noop() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk"), ("14.2.0", "trunk")]).await;
    let path = write_transcript(&env.dir, &transcript("N/A", TWO_FILES));

    ingest_file(&env.pool, &path, &env.cfg.ingest).await.unwrap();
    let marked = fs::read_to_string(&path).unwrap();

    for _ in 0..3 {
        match ingest_file(&env.pool, &path, &env.cfg.ingest).await.unwrap() {
            IngestOutcome::AlreadyProcessed { code_update_ids } => {
                assert_eq!(code_update_ids.len(), 2);
            }
            other => panic!("expected already processed, got {:?}", other),
        }
    }

    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM code_updates").await, 2);
    assert_eq!(fs::read_to_string(&path).unwrap(), marked);
}

#[tokio::test]
async fn test_dev_token_creates_request_per_tool_kit() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk"), ("14.2.0", "trunk")]).await;
    let path = write_transcript(&env.dir, &transcript("dev", TWO_FILES));

    ingest_file(&env.pool, &path, &env.cfg.ingest).await.unwrap();

    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM change_requests").await, 2);
    assert_eq!(
        count(
            &env.pool,
            "SELECT COUNT(*) FROM change_requests WHERE status = 'approved' AND cr_type = 'feature' AND severity = 4"
        )
        .await,
        2
    );
    assert_eq!(
        count(&env.pool, "SELECT COUNT(*) FROM code_update_change_requests").await,
        2
    );
    // each request belongs to the tool kit of the code update it is linked to
    assert_eq!(
        count(
            &env.pool,
            r#"SELECT COUNT(*) FROM code_update_change_requests l
               JOIN code_updates cu ON cu.id = l.code_update_id
               JOIN change_requests cr ON cr.id = l.change_request_id
               WHERE cr.tool_kit_id = cu.tool_kit_id"#
        )
        .await,
        2
    );
}

/// Collects formatted log output so tests can inspect warnings.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLog {
    type Writer = CapturedLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_tracked_request_linked_to_every_code_update() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk"), ("14.2.0", "trunk")]).await;
    {
        let mut conn = env.pool.acquire().await.unwrap();
        let req = NewChangeRequest {
            external_id: "CQ00042".into(),
            component: "widget".into(),
            tool_kit: "14.1.2".into(),
            status: CrStatus::Approved,
            cr_type: CrType::Defect,
            severity: 2,
            description: "clock gating".into(),
            user: Some("jdoe".into()),
        };
        change_request::create_change_request(&mut conn, &req, &env.cfg.ingest)
            .await
            .unwrap();
    }
    let path = write_transcript(&env.dir, &transcript("CQ00042", TWO_FILES));

    let log = CapturedLog::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(log.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let outcome = {
        let _guard = tracing::subscriber::set_default(subscriber);
        ingest_file(&env.pool, &path, &env.cfg.ingest).await.unwrap()
    };

    // owned by 14.1.2, still linked to the 14.2.0 code update
    match outcome {
        IngestOutcome::Ingested(r) => {
            assert_eq!(r.code_updates.len(), 2);
            assert!(r.code_updates.iter().all(|cu| cu.change_request_id.is_some()));
        }
        other => panic!("expected ingestion, got {:?}", other),
    }

    let warnings: Vec<String> = log
        .text()
        .lines()
        .filter(|l| l.contains("owned by a different component or tool kit"))
        .map(str::to_string)
        .collect();
    assert_eq!(warnings.len(), 1, "{:?}", warnings);
    assert!(warnings[0].contains("tool_kit=14.2.0"), "{}", warnings[0]);
    assert!(warnings[0].contains("change_request=CQ00042"), "{}", warnings[0]);

    let mut conn = env.pool.acquire().await.unwrap();
    let cr = change_request::get_change_request(&mut conn, "CQ00042")
        .await
        .unwrap();
    assert_eq!(cr.code_update_ids.len(), 2);
    assert_eq!(cr.tool_kit.as_deref(), Some("14.1.2"));
    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM change_requests").await, 1);
}

#[tokio::test]
async fn test_unknown_request_fails_without_writes() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk")]).await;
    let body = transcript("CQ99999", TWO_FILES);
    let path = write_transcript(&env.dir, &body);

    let err = ingest_file(&env.pool, &path, &env.cfg.ingest)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM code_updates").await, 0);
    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM file_names").await, 0);
    assert_eq!(fs::read_to_string(&path).unwrap(), body);
}

#[tokio::test]
async fn test_branch_without_tool_kit_is_format_error() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk")]).await;
    let path = write_transcript(
        &env.dir,
        &transcript("N/A", &[("U", "branches/rel_9/src/foo.c")]),
    );

    let err = ingest_file(&env.pool, &path, &env.cfg.ingest)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Format);
    assert!(err.message.contains("rel_9"), "{}", err);
}

#[tokio::test]
async fn test_unknown_component_is_not_found() {
    let env = setup().await;
    let path = write_transcript(&env.dir, &transcript("N/A", TWO_FILES));
    let err = ingest_file(&env.pool, &path, &env.cfg.ingest)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_released_tool_kit_excluded_from_fan_out() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk"), ("14.2.0", "trunk")]).await;
    {
        let mut conn = env.pool.acquire().await.unwrap();
        toolkit::set_stage(&mut conn, "14.1.2", ToolKitStage::Released)
            .await
            .unwrap();
    }
    let path = write_transcript(&env.dir, &transcript("N/A", TWO_FILES));

    match ingest_file(&env.pool, &path, &env.cfg.ingest).await.unwrap() {
        IngestOutcome::Ingested(r) => {
            assert_eq!(r.code_updates.len(), 1);
            assert_eq!(r.code_updates[0].tool_kit, "14.2.0");
        }
        other => panic!("expected ingestion, got {:?}", other),
    }
    assert_eq!(db_id_lines(&path).len(), 1);
}

#[tokio::test]
async fn test_failure_on_second_tool_kit_rolls_back_everything() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk"), ("14.2.0", "trunk")]).await;

    let second: i64 = sqlx::query_scalar("SELECT id FROM tool_kits WHERE name = '14.2.0'")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    sqlx::query(&format!(
        "CREATE TRIGGER reject_second BEFORE INSERT ON code_updates \
         WHEN NEW.tool_kit_id = {} BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        second
    ))
    .execute(&env.pool)
    .await
    .unwrap();

    let body = transcript("DEV", TWO_FILES);
    let path = write_transcript(&env.dir, &body);

    let err = ingest_file(&env.pool, &path, &env.cfg.ingest)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Persistence);

    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM code_updates").await, 0);
    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM file_versions").await, 0);
    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM file_names").await, 0);
    assert_eq!(count(&env.pool, "SELECT COUNT(*) FROM change_requests").await, 0);
    assert_eq!(fs::read_to_string(&path).unwrap(), body);
}

#[tokio::test]
async fn test_add_then_delete_recorded_as_delete() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "widget")]).await;
    let path = write_transcript(
        &env.dir,
        &transcript(
            "N/A",
            &[
                ("A", "widget/tmp.c"),
                ("D", "widget/tmp.c"),
                ("D", "widget/old.c"),
                ("A", "widget/old.c"),
            ],
        ),
    );

    let id = match ingest_file(&env.pool, &path, &env.cfg.ingest).await.unwrap() {
        IngestOutcome::Ingested(r) => {
            assert_eq!(r.branch, BranchName::Branch("widget".into()));
            r.code_updates[0].id
        }
        other => panic!("expected ingestion, got {:?}", other),
    };

    let mut conn = env.pool.acquire().await.unwrap();
    let cu = code_update::get_code_update(&mut conn, id).await.unwrap();
    let files: Vec<(&str, FileAction)> = cu
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.action))
        .collect();
    assert_eq!(
        files,
        vec![
            ("widget/old.c", FileAction::Add),
            ("widget/tmp.c", FileAction::Delete)
        ]
    );
    assert_eq!(cu.branch, "widget");
    assert_eq!(cu.revision, "18342");
    assert_eq!(cu.description, "Fix clock gating in the netlist writer.");
    assert_eq!(cu.committed_at, "2024-03-05T14:22:01Z");
}

#[tokio::test]
async fn test_linked_request_owner_is_frozen() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk")]).await;
    seed(&env.pool, "gadget", &[("14.1.2", "trunk")]).await;
    {
        let mut conn = env.pool.acquire().await.unwrap();
        let req = NewChangeRequest {
            external_id: "CQ7".into(),
            component: "widget".into(),
            tool_kit: "14.1.2".into(),
            status: CrStatus::Submitted,
            cr_type: CrType::Feature,
            severity: 3,
            description: String::new(),
            user: None,
        };
        change_request::create_change_request(&mut conn, &req, &env.cfg.ingest)
            .await
            .unwrap();

        // unlinked: the owner may still move
        let moved = ChangeRequestUpdate {
            component: Some("gadget".into()),
            ..Default::default()
        };
        change_request::update_change_request(&mut conn, "CQ7", &moved)
            .await
            .unwrap();
        let back = ChangeRequestUpdate {
            component: Some("widget".into()),
            ..Default::default()
        };
        change_request::update_change_request(&mut conn, "CQ7", &back)
            .await
            .unwrap();
    }

    let path = write_transcript(&env.dir, &transcript("CQ7", TWO_FILES));
    ingest_file(&env.pool, &path, &env.cfg.ingest).await.unwrap();

    let mut conn = env.pool.acquire().await.unwrap();
    let err = change_request::update_change_request(
        &mut conn,
        "CQ7",
        &ChangeRequestUpdate {
            component: Some("gadget".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Invalid);

    change_request::update_change_request(
        &mut conn,
        "CQ7",
        &ChangeRequestUpdate {
            status: Some(CrStatus::Complete),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let cr = change_request::get_change_request(&mut conn, "CQ7")
        .await
        .unwrap();
    assert_eq!(cr.status, "complete");
    assert_eq!(cr.component.as_deref(), Some("widget"));
}

#[tokio::test]
async fn test_reserved_tokens_cannot_be_created() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk")]).await;
    let mut conn = env.pool.acquire().await.unwrap();
    for token in ["DEV", "n/a"] {
        let req = NewChangeRequest {
            external_id: token.into(),
            component: "widget".into(),
            tool_kit: "14.1.2".into(),
            status: CrStatus::Submitted,
            cr_type: CrType::Defect,
            severity: 3,
            description: String::new(),
            user: None,
        };
        let err = change_request::create_change_request(&mut conn, &req, &env.cfg.ingest)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
    }
}

#[tokio::test]
async fn test_history_and_summary() {
    let env = setup().await;
    seed(&env.pool, "widget", &[("14.1.2", "trunk")]).await;

    for (rev, cr) in [("100", "N/A"), ("101", "DEV")] {
        let body = transcript(cr, TWO_FILES).replace("REVISION | 18342", &format!("REVISION | {}", rev));
        let path = env.dir.join(format!("commit-{}.dat", rev));
        fs::write(&path, body).unwrap();
        ingest_file(&env.pool, &path, &env.cfg.ingest).await.unwrap();
    }

    let mut conn = env.pool.acquire().await.unwrap();
    let history = code_update::list_history(&mut conn, "14.1.2", None, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    // same commit time, so newest id first
    assert_eq!(history[0].revision, "101");
    assert_eq!(history[0].change_requests.len(), 1);
    assert!(history[1].change_requests.is_empty());
    assert_eq!(history[1].file_count, 2);

    let limited = code_update::list_history(&mut conn, "14.1.2", Some("widget"), Some(1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    let summary = report::build_summary(&mut conn, Some("14.1.2")).await.unwrap();
    let rows = report::rows(&summary);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].code_updates, 2);
    assert_eq!(rows[0].files_added, 2);
    assert_eq!(rows[0].files_updated, 2);
    assert_eq!(rows[0].files_deleted, 0);
    assert_eq!(rows[0].change_requests, 1);
}
