use super::*;
use crate::cache_store::CacheRead;
use std::io::Write;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn line(user: &str, ip: &str) -> String {
    format!(
        "2024/05/01 10:00:00 tcp:{}:40000 accepted tcp:example.com:443 [in >> direct] email: {}\n",
        ip, user
    )
}

fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

fn setup() -> (TempDir, PathBuf, CacheStore) {
    let dir = tempdir().unwrap();
    let log = dir.path().join("access.log");
    let store = CacheStore::new(dir.path().join("cache"));
    (dir, log, store)
}

async fn drain(tailer: &Tailer) -> (Vec<LogEvent>, DrainSummary) {
    let mut session = tailer.open().await.unwrap();
    let mut events = Vec::new();
    while let Some(event) = session.next_event().await.unwrap() {
        events.push(event);
    }
    let summary = session.commit().await.unwrap();
    (events, summary)
}

async fn stored_offset(store: &CacheStore, key: &str) -> u64 {
    match store.get::<Cursor>(key).await {
        CacheRead::Found(cursor) => cursor.offset,
        other => panic!("expected stored cursor, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reads_all_complete_lines_and_persists_offset() {
    let (_dir, log, store) = setup();
    let content = format!("{}{}", line("alice", "1.1.1.1"), line("bob", "2.2.2.2"));
    append(&log, &content);

    let tailer = Tailer::new(&log, "usage-cursor", store.clone());
    let (events, summary) = drain(&tailer).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].user, "alice");
    assert_eq!(events[1].user, "bob");
    assert_eq!(summary.events, 2);
    assert_eq!(summary.bytes, content.len() as u64);
    assert_eq!(
        stored_offset(&store, "usage-cursor").await,
        content.len() as u64
    );
}

#[tokio::test]
async fn test_partial_trailing_line_is_reread_next_run() {
    let (_dir, log, store) = setup();
    let first = line("alice", "1.1.1.1");
    let second = line("bob", "2.2.2.2");
    let (head, tail) = second.split_at(30);
    append(&log, &format!("{}{}", first, head));

    let tailer = Tailer::new(&log, "usage-cursor", store.clone());
    let (events, _) = drain(&tailer).await;
    assert_eq!(events.len(), 1);
    assert_eq!(stored_offset(&store, "usage-cursor").await, first.len() as u64);

    append(&log, tail);
    let (events, _) = drain(&tailer).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].user, "bob");
    assert_eq!(
        stored_offset(&store, "usage-cursor").await,
        (first.len() + second.len()) as u64
    );
}

#[tokio::test]
async fn test_offset_is_monotonic_over_growing_file() {
    let (_dir, log, store) = setup();
    let tailer = Tailer::new(&log, "usage-cursor", store.clone());
    let mut total = 0u64;
    let mut previous = 0u64;

    for i in 0..5 {
        let text = format!(
            "{}garbage line {}\n",
            line(&format!("user{}", i), "1.1.1.1"),
            i
        );
        total += text.len() as u64;
        append(&log, &text);

        let (events, summary) = drain(&tailer).await;
        assert_eq!(events.len(), 1);
        assert_eq!(summary.rejected, 1);

        let offset = stored_offset(&store, "usage-cursor").await;
        assert_eq!(offset, total);
        assert!(offset >= previous);
        previous = offset;
    }
}

#[tokio::test]
async fn test_independent_cursors_do_not_interfere() {
    let (_dir, log, store) = setup();
    append(&log, &line("alice", "1.1.1.1"));

    let usage = Tailer::new(&log, "usage-cursor", store.clone());
    let window = Tailer::new(&log, "window-cursor-10m", store.clone());

    let (events, _) = drain(&usage).await;
    assert_eq!(events.len(), 1);

    append(&log, &line("bob", "2.2.2.2"));
    let (events, _) = drain(&window).await;
    assert_eq!(events.len(), 2);

    let (events, _) = drain(&usage).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].user, "bob");
}

#[tokio::test]
async fn test_missing_file_errors_and_leaves_cursor() {
    let (_dir, log, store) = setup();
    let cursor = Cursor {
        source: log.clone(),
        offset: 17,
    };
    store.set("usage-cursor", &cursor).await.unwrap();

    let tailer = Tailer::new(&log, "usage-cursor", store.clone());
    assert!(tailer.open().await.is_err());
    assert_eq!(stored_offset(&store, "usage-cursor").await, 17);
}

#[tokio::test]
async fn test_truncated_file_restarts_from_beginning() {
    let (_dir, log, store) = setup();
    append(&log, &line("alice", "1.1.1.1"));
    append(&log, &line("alice", "1.1.1.1"));

    let tailer = Tailer::new(&log, "usage-cursor", store.clone());
    drain(&tailer).await;

    std::fs::write(&log, line("carol", "3.3.3.3")).unwrap();
    let (events, _) = drain(&tailer).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].user, "carol");
}

#[tokio::test]
async fn test_cursor_for_other_source_is_ignored() {
    let (dir, log, store) = setup();
    append(&log, &line("alice", "1.1.1.1"));
    let cursor = Cursor {
        source: dir.path().join("old-access.log"),
        offset: 5,
    };
    store.set("usage-cursor", &cursor).await.unwrap();

    let tailer = Tailer::new(&log, "usage-cursor", store.clone());
    let (events, _) = drain(&tailer).await;
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_uncommitted_session_does_not_move_cursor() {
    let (_dir, log, store) = setup();
    append(&log, &line("alice", "1.1.1.1"));

    let tailer = Tailer::new(&log, "usage-cursor", store.clone());
    {
        let mut session = tailer.open().await.unwrap();
        assert!(session.next_event().await.unwrap().is_some());
    }

    let (events, _) = drain(&tailer).await;
    assert_eq!(events.len(), 1);
}
