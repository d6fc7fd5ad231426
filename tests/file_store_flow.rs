use std::sync::Arc;

use chrono::NaiveDate;
use weekboard::changelog::Actor;
use weekboard::config::Config;
use weekboard::store::{encode, DocumentStore, FileStore, WriteBatch};
use weekboard::task::{TaskDraft, TaskStatus};
use weekboard::week::{week_path, LocalStatus, WeekDocument};
use weekboard::{Error, Reconciliation, TaskService};

fn day(raw: &str) -> NaiveDate {
    weekboard::days::parse_day_key(raw).expect("day")
}

fn service(root: &std::path::Path) -> TaskService {
    let store = FileStore::open_default(root).expect("store");
    TaskService::new(Arc::new(store), &Config::default())
}

fn draft() -> TaskDraft {
    TaskDraft {
        description: "Revisar extintores".to_string(),
        status: Some(TaskStatus::Scheduled),
        assignees: vec!["Ana".to_string()],
        start: Some(day("2024-01-04")),
        end: Some(day("2024-01-05")),
        ..TaskDraft::default()
    }
}

#[tokio::test]
async fn board_survives_reopening() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    let id = {
        let service = service(dir.path());
        service.create_week(day("2024-01-01")).await?;
        service.create_task(draft(), &Actor::system()).await?.id
    };

    let service = service(dir.path());
    let week = service.get_week("2024-01-01").await?;
    assert_eq!(week.week.placements_of(&id).count(), 2);

    for raw in ["2024-01-04", "2024-01-05"] {
        let update = service
            .set_placement_status("2024-01-01", day(raw), "Ana", &id, LocalStatus::Done)
            .await?;
        assert!(update.found);
    }
    assert_eq!(service.get_task(&id).await?.status, TaskStatus::Done);
    assert_eq!(
        service.reconcile(&id).await?,
        Reconciliation::Unchanged {
            status: TaskStatus::Done
        }
    );
    Ok(())
}

#[tokio::test]
async fn stale_batches_conflict_across_handles() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let first = FileStore::open_default(dir.path())?;
    let second = FileStore::open_default(dir.path())?;
    let path = week_path("2024-01-01")?;

    let week = WeekDocument::for_day(day("2024-01-01"));
    let revision = first.set(&path, encode(&week)?).await?;
    assert_eq!(revision, 1);

    let seen = second.get(&path).await?.ok_or("missing week")?;
    first.set(&path, encode(&week)?).await?;

    let mut stale = WriteBatch::new();
    stale.set_checked(path.clone(), encode(&week)?, seen.revision);
    match second.commit(stale).await {
        Err(Error::Conflict {
            expected, found, ..
        }) => {
            assert_eq!(expected, 1);
            assert_eq!(found, 2);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn deleted_task_leaves_no_placements_on_disk() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let service = service(dir.path());
    service.create_week(day("2024-01-01")).await?;
    let id = service.create_task(draft(), &Actor::new("ana")).await?.id;

    let removed = service.delete_task(&id, &Actor::new("ana")).await?;
    assert_eq!(removed.placements_removed, 2);

    let reopened = weekboard::task::task_path(&id)?;
    let store = FileStore::open_default(dir.path())?;
    assert!(store.get(&reopened).await?.is_none());
    let week = service.get_week("2024-01-01").await?;
    assert_eq!(week.week.placements_of(&id).count(), 0);
    Ok(())
}

#[tokio::test]
async fn corrupt_week_file_does_not_block_scheduling() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let service = service(dir.path());
    service.create_week(day("2024-01-01")).await?;
    std::fs::write(dir.path().join("weeks").join("2023-12-25.json"), "{")?;

    let created = service.create_task(draft(), &Actor::system()).await?;
    assert_eq!(created.sync.ok_or("not synchronized")?.placements_added, 2);
    assert_eq!(service.list_weeks().await?.len(), 1);

    let removed = service.delete_task(&created.id, &Actor::system()).await?;
    assert_eq!(removed.placements_removed, 2);
    Ok(())
}
