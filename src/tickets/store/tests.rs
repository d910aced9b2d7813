use super::*;
use crate::tickets::models::TicketStatus;
use tempfile::TempDir;

fn ticket(id: &str, status: TicketStatus) -> Ticket {
    let mut ticket = Ticket::new(id.to_string(), format!("content of {}", id));
    ticket.status = status;
    ticket
}

#[tokio::test]
async fn in_memory_store_round_trip() {
    let store = InMemoryTicketStore::new();
    store.insert(ticket("T1", TicketStatus::Open)).await;
    store.insert(ticket("T2", TicketStatus::Resolved)).await;

    let open = store.fetch_open(10).await.expect("should fetch");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].ticket_id, "T1");

    let fetched = store.get("T2").await.expect("should get");
    assert_eq!(
        fetched.expect("ticket exists").status,
        TicketStatus::Resolved
    );
    assert!(store.get("T9").await.expect("should get").is_none());
}

#[tokio::test]
async fn in_memory_update_replaces() {
    let store = InMemoryTicketStore::new();
    store.insert(ticket("T1", TicketStatus::Open)).await;

    let mut updated = ticket("T1", TicketStatus::Resolved);
    updated.resolution_text = Some("done".to_string());
    store.update(&updated).await.expect("should update");

    let fetched = store
        .get("T1")
        .await
        .expect("should get")
        .expect("ticket exists");
    assert_eq!(fetched.status, TicketStatus::Resolved);
    assert_eq!(fetched.resolution_text.as_deref(), Some("done"));
}

fn write_ticket_file(dir: &TempDir, json: &str) -> std::path::PathBuf {
    let path = dir.path().join("tickets.json");
    std::fs::write(&path, json).expect("should write ticket file");
    path
}

#[tokio::test]
async fn json_store_reads_and_validates_rows() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_ticket_file(
        &temp_dir,
        r#"[
            {"ticket_id": "T1", "content": "screen is cracked", "status": "open"},
            {"ticket_id": "T2", "content": "already handled", "status": "resolved"},
            {"content": "row without an id"}
        ]"#,
    );

    let store = JsonFileTicketStore::new(path);

    // The invalid row is skipped, the resolved row filtered out.
    let open = store.fetch_open(10).await.expect("should fetch");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].ticket_id, "T1");

    let t2 = store.get("T2").await.expect("should get");
    assert_eq!(
        t2.expect("ticket exists").status,
        TicketStatus::Resolved
    );
}

#[tokio::test]
async fn json_store_update_persists() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_ticket_file(
        &temp_dir,
        r#"[{"ticket_id": "T1", "content": "screen is cracked", "status": "open"}]"#,
    );

    let store = JsonFileTicketStore::new(path.clone());

    let mut updated = store
        .get("T1")
        .await
        .expect("should get")
        .expect("ticket exists");
    updated.status = TicketStatus::Resolved;
    updated.category = Some("hardware".to_string());
    updated.resolution_text = Some("replace the screen".to_string());
    store.update(&updated).await.expect("should update");

    // A second store instance sees the persisted change.
    let reread = JsonFileTicketStore::new(path);
    let ticket = reread
        .get("T1")
        .await
        .expect("should get")
        .expect("ticket exists");
    assert_eq!(ticket.status, TicketStatus::Resolved);
    assert_eq!(ticket.resolution_text.as_deref(), Some("replace the screen"));
}

#[tokio::test]
async fn json_store_update_of_unknown_ticket_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_ticket_file(&temp_dir, "[]");

    let store = JsonFileTicketStore::new(path);
    let err = store
        .update(&ticket("T404", TicketStatus::Resolved))
        .await
        .unwrap_err();
    assert!(matches!(err, crate::RagError::Load(_)));
}

#[tokio::test]
async fn json_store_malformed_file_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = write_ticket_file(&temp_dir, "{ not an array");

    let store = JsonFileTicketStore::new(path);
    assert!(store.fetch_open(10).await.is_err());
}
