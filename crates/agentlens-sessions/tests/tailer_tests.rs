use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agentlens_sessions::tailer::TAIL_CAPACITY;
use agentlens_sessions::{Event, TailError, TailEvent, Tailer};
use tempfile::TempDir;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_millis(20);
const WAIT: Duration = Duration::from_secs(5);

struct Running {
    tailer: Arc<Tailer>,
    events: Receiver<TailEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), TailError>>,
}

async fn start(root: &Path, project: Option<&str>) -> Running {
    start_with_interval(root, project, POLL).await
}

async fn start_with_interval(root: &Path, project: Option<&str>, poll: Duration) -> Running {
    let tailer = Tailer::new(root, project.map(str::to_string))
        .unwrap()
        .with_poll_interval(poll);
    let tailer = Arc::new(tailer);
    let events = tailer.take_events().unwrap();
    let cancel = CancellationToken::new();

    let handle = {
        let tailer = Arc::clone(&tailer);
        let cancel = cancel.clone();
        tokio::spawn(async move { tailer.start(cancel).await })
    };

    tokio::time::timeout(WAIT, async {
        while !tailer.is_initial_scan_done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("initial scan did not finish");

    Running {
        tailer,
        events,
        cancel,
        handle,
    }
}

async fn next(events: &mut Receiver<TailEvent>) -> TailEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

/// Write the whole file under a temp name, then rename it into place so the
/// tailer never sees it half written.
fn publish(dir: &Path, name: &str, text: &str) {
    let tmp = dir.join(format!("{}.tmp", name));
    fs::write(&tmp, text).unwrap();
    fs::rename(&tmp, dir.join(name)).unwrap();
}

fn tool_name(event: &TailEvent) -> &str {
    match &event.event {
        Event::ToolCall(call) => &call.tool_name,
        other => panic!("expected tool call, got {:?}", other),
    }
}

#[tokio::test]
async fn test_existing_content_is_not_replayed() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("alpha");
    fs::create_dir(&project).unwrap();
    let path = project.join("s1.jsonl");
    fs::write(
        &path,
        "{\"type\":\"tool_call\",\"tool_name\":\"Old1\"}\n{\"type\":\"tool_call\",\"tool_name\":\"Old2\"}\n",
    )
    .unwrap();

    let mut run = start(dir.path(), None).await;
    let initial_size = fs::metadata(&path).unwrap().len();
    assert_eq!(run.tailer.positions().get(&path), Some(&initial_size));

    append(&path, "{\"type\":\"tool_call\",\"tool_name\":\"New\"}\n");

    let event = next(&mut run.events).await;
    assert_eq!(tool_name(&event), "New");
    assert_eq!(event.session_id, "s1");
    assert_eq!(event.path, path);

    let final_size = fs::metadata(&path).unwrap().len();
    assert_eq!(run.tailer.positions().get(&path), Some(&final_size));

    run.cancel.cancel();
    run.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_new_file_is_read_from_start_with_one_synthetic_start() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("alpha");
    fs::create_dir(&project).unwrap();

    let mut run = start(dir.path(), None).await;
    assert!(run.tailer.seen_files().is_empty());

    publish(
        &project,
        "agent-x1.jsonl",
        "{\"type\":\"session_start\",\"id\":\"x1\",\"project\":\"alpha\",\"timestamp\":\"2026-01-20T10:00:00Z\",\"agentType\":\"qa-tester\"}\n{\"type\":\"tool_call\",\"tool_name\":\"Grep\",\"success\":true}\n",
    );

    let first = next(&mut run.events).await;
    match &first.event {
        Event::SessionStart(start) => {
            assert_eq!(start.agent_type.as_deref(), Some("qa-tester"));
            assert_eq!(start.id, "x1");
            assert_eq!(start.project, "alpha");
            assert_eq!(start.status, "active");
        }
        other => panic!("expected synthetic start, got {:?}", other),
    }

    let second = next(&mut run.events).await;
    match &second.event {
        Event::SessionStart(start) => assert!(start.agent_type.is_none()),
        other => panic!("expected parsed session start, got {:?}", other),
    }
    assert_eq!(tool_name(&next(&mut run.events).await), "Grep");

    // More appends never produce a second synthetic start
    let path = project.join("agent-x1.jsonl");
    append(&path, "{\"type\":\"tool_call\",\"tool_name\":\"Read\"}\n");
    assert_eq!(tool_name(&next(&mut run.events).await), "Read");
    assert_eq!(run.tailer.seen_files(), vec![path]);

    run.cancel.cancel();
    run.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_line_split_across_polls_is_parsed_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("s1.jsonl");
    fs::write(&path, "").unwrap();

    let mut run = start(dir.path(), None).await;

    append(&path, "{\"type\":\"tool_call\",\"tool_na");
    tokio::time::sleep(POLL * 5).await;
    assert!(run.events.try_recv().is_err());

    append(&path, "me\":\"Bash\"}\n");
    assert_eq!(tool_name(&next(&mut run.events).await), "Bash");

    run.cancel.cancel();
    run.handle.await.unwrap().unwrap();
    assert!(run.events.recv().await.is_none());
}

#[tokio::test]
async fn test_project_filter_limits_tracked_files() {
    let dir = TempDir::new().unwrap();
    for project in ["-home-me-alpha", "beta"] {
        let p = dir.path().join(project);
        fs::create_dir(&p).unwrap();
        fs::write(p.join("s.jsonl"), "").unwrap();
    }

    let run = start(dir.path(), Some("alpha")).await;
    assert_eq!(
        run.tailer.seen_files(),
        vec![dir.path().join("-home-me-alpha").join("s.jsonl")]
    );

    run.cancel.cancel();
    run.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancellation_closes_channel() {
    let dir = TempDir::new().unwrap();
    let mut run = start(dir.path(), None).await;

    run.cancel.cancel();
    let closed = tokio::time::timeout(WAIT, run.events.recv()).await.unwrap();
    assert!(closed.is_none());
    run.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let dir = TempDir::new().unwrap();
    let run = start(dir.path(), None).await;

    let second = run.tailer.start(CancellationToken::new()).await;
    assert!(matches!(second, Err(TailError::AlreadyStarted)));

    run.cancel.cancel();
    run.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_missing_root_keeps_polling() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("later");
    let mut run = start(&root, None).await;

    fs::create_dir(&root).unwrap();
    publish(&root, "late.jsonl", "{\"type\":\"tool_call\",\"tool_name\":\"Read\"}\n");

    let first = next(&mut run.events).await;
    assert!(matches!(first.event, Event::SessionStart(_)));
    assert_eq!(tool_name(&next(&mut run.events).await), "Read");

    run.cancel.cancel();
    run.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_final_record_without_newline_is_delivered() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("s1.jsonl");
    fs::write(&path, "").unwrap();

    let mut run = start(dir.path(), None).await;

    append(
        &path,
        "{\"type\":\"tool_call\",\"tool_name\":\"Edit\"}\n{\"type\":\"tool_call\",\"tool_name\":\"Last\"}",
    );
    assert_eq!(tool_name(&next(&mut run.events).await), "Edit");
    assert_eq!(tool_name(&next(&mut run.events).await), "Last");

    // The writer finishing the line later does not repeat the record.
    append(&path, "\n{\"type\":\"tool_call\",\"tool_name\":\"After\"}\n");
    assert_eq!(tool_name(&next(&mut run.events).await), "After");

    run.cancel.cancel();
    run.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_with_full_channel_stops_within_a_tick() {
    let poll = Duration::from_millis(200);
    let dir = TempDir::new().unwrap();
    let mut run = start_with_interval(dir.path(), None, poll).await;

    let body: String = (0..TAIL_CAPACITY + 100)
        .map(|i| format!("{{\"type\":\"tool_call\",\"tool_name\":\"T{}\"}}\n", i))
        .collect();
    publish(dir.path(), "big.jsonl", &body);

    // Nobody reads; wait for the tailer to be parked on a full channel.
    tokio::time::timeout(WAIT, async {
        while run.events.len() < TAIL_CAPACITY {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("channel never filled");

    run.cancel.cancel();
    tokio::time::timeout(poll, run.handle)
        .await
        .expect("tailer did not stop within one tick")
        .unwrap()
        .unwrap();

    let mut drained = 0;
    while run.events.recv().await.is_some() {
        drained += 1;
    }
    assert_eq!(drained, TAIL_CAPACITY);
}
