//! End-to-end flows over the ingest engine, the hub and the bus, using
//! the in-memory stores. The WebSocket layer is glue over exactly these
//! pieces.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rt_bus::InProcessBus;
use rt_domain::config::IngestConfig;
use rt_domain::error::{Error, Result};
use rt_domain::run::RunStatus;
use rt_gateway::fanout::hub::FanoutHub;
use rt_gateway::fanout::snapshot_events;
use rt_gateway::ingest::session::{FrameOutcome, IngestSession};
use rt_logstore::{LogStore, MemoryStore};
use rt_protocol::{BusEvent, ClientFrame, LineRecord, LogLevel, ServerFrame};
use rt_store::MetadataStore;

fn ts(sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, sec).unwrap()
}

fn line(sec: u32, level: LogLevel, content: &str) -> ClientFrame {
    ClientFrame::Line {
        timestamp: ts(sec),
        level,
        content: content.into(),
    }
}

struct World {
    store: Arc<MetadataStore>,
    logstore: Arc<MemoryStore>,
    bus: Arc<InProcessBus>,
    hub: Arc<FanoutHub>,
    user_id: Uuid,
    shutdown: CancellationToken,
}

fn world() -> World {
    let store = Arc::new(MetadataStore::open_in_memory().unwrap());
    let user = store.create_user("alice", "pw", false).unwrap();
    let bus = Arc::new(InProcessBus::ephemeral());
    let hub = Arc::new(FanoutHub::new(64));
    let shutdown = CancellationToken::new();
    let _dispatcher = hub.spawn_dispatcher(bus.clone(), shutdown.clone());

    World {
        store,
        logstore: Arc::new(MemoryStore::default()),
        bus,
        hub,
        user_id: user.id,
        shutdown,
    }
}

fn session_with(world: &World, cfg: IngestConfig) -> IngestSession {
    IngestSession::new(
        world.store.clone(),
        world.logstore.clone(),
        world.bus.clone(),
        cfg,
        world.user_id,
    )
}

async fn open(session: &mut IngestSession) -> Uuid {
    let outcome = session
        .handle_frame(ClientFrame::Metadata {
            project_name: Some("myapp".into()),
            group_name: Some("build".into()),
        })
        .await
        .unwrap();
    match outcome {
        FrameOutcome::Reply(ServerFrame::Started { run_id }) => run_id,
        other => panic!("expected Started, got {other:?}"),
    }
}

#[tokio::test]
async fn subscriber_sees_snapshot_then_live_then_run_update() {
    // S5: attach after two lines, observe "a","b" (snapshot), "c" (live),
    // then the completion run_update.
    let w = world();
    let mut session = session_with(
        &w,
        IngestConfig {
            batch_size: 1, // flush every line so the snapshot sees them
            ..Default::default()
        },
    );
    let run_id = open(&mut session).await;

    session
        .handle_frame(line(1, LogLevel::Stdout, "a"))
        .await
        .unwrap();
    session
        .handle_frame(line(2, LogLevel::Stderr, "b"))
        .await
        .unwrap();

    // Let the dispatcher drain the pre-attach events so they cannot
    // bleed into the live tail (overlap is permitted, but the assertions
    // below want the deterministic order).
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Attach: register with the hub first, then snapshot — exactly what
    // the subscriber socket does.
    let (subscriber_id, mut queue) = w.hub.register(run_id);
    let snapshot = snapshot_events(w.logstore.as_ref(), run_id).await.unwrap();

    let snapshot_contents: Vec<_> = snapshot
        .iter()
        .map(|ev| match ev {
            BusEvent::Log { content, .. } => content.clone(),
            other => panic!("snapshot must be log events, got {other:?}"),
        })
        .collect();
    assert_eq!(snapshot_contents, ["a", "b"]);

    // Third line arrives live, then the completion.
    session
        .handle_frame(line(3, LogLevel::Stdout, "c"))
        .await
        .unwrap();
    session
        .handle_frame(ClientFrame::Completion { exit_code: 0 })
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), queue.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, BusEvent::Log { ref content, .. } if content == "c"));

    let second = tokio::time::timeout(Duration::from_secs(1), queue.recv())
        .await
        .unwrap()
        .unwrap();
    match second {
        BusEvent::RunUpdate {
            run_id: id,
            status,
            exit_code,
            ..
        } => {
            assert_eq!(id, run_id);
            assert_eq!(status, Some(RunStatus::Completed));
            assert_eq!(exit_code, Some(0));
        }
        other => panic!("expected run_update, got {other:?}"),
    }

    w.hub.unregister(run_id, subscriber_id);
    w.shutdown.cancel();
}

#[tokio::test]
async fn reattach_replays_the_full_snapshot() {
    // Reconnect is idempotent: each attach repeats snapshot-then-live.
    let w = world();
    let mut session = session_with(
        &w,
        IngestConfig {
            batch_size: 1,
            ..Default::default()
        },
    );
    let run_id = open(&mut session).await;
    session
        .handle_frame(line(1, LogLevel::Stdout, "a"))
        .await
        .unwrap();

    let first = snapshot_events(w.logstore.as_ref(), run_id).await.unwrap();
    let second = snapshot_events(w.logstore.as_ref(), run_id).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);

    w.shutdown.cancel();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Degraded append path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A log store whose appends always fail (transport down).
struct BrokenStore;

#[async_trait::async_trait]
impl LogStore for BrokenStore {
    async fn append(
        &self,
        _run_id: Uuid,
        _user_id: Uuid,
        _project: &str,
        _lines: &[LineRecord],
    ) -> Result<()> {
        Err(Error::LogStore("connection refused".into()))
    }

    async fn query(&self, _run_id: Uuid) -> Result<Vec<LineRecord>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn exhausted_append_retries_abort_the_run_despite_completion() {
    let w = world();
    let mut session = IngestSession::new(
        w.store.clone(),
        Arc::new(BrokenStore),
        w.bus.clone(),
        IngestConfig {
            batch_size: 1,
            append_retries: 1,
            ..Default::default()
        },
        w.user_id,
    );
    let run_id = open(&mut session).await;

    session
        .handle_frame(line(1, LogLevel::Stdout, "lost"))
        .await
        .unwrap();
    let outcome = session
        .handle_frame(ClientFrame::Completion { exit_code: 0 })
        .await
        .unwrap();
    assert!(matches!(outcome, FrameOutcome::Completed));

    // The captured log is incomplete: the run must not claim a clean
    // terminal state even though the client sent exit code 0.
    let detail = w.store.get_run(run_id).unwrap();
    assert_eq!(detail.run.status, RunStatus::Aborted);
    assert_eq!(detail.run.exit_code, None);

    w.shutdown.cancel();
}
