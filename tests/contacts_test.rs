mod common;

use std::{sync::Arc, time::Duration};

use blastwarp_api::contacts::{
    ContactError,
    ContactField,
    ContactQuery,
    ContactService,
    ContactStatus,
    ContactStore,
    ImportRecord,
    ListOptions,
    NewContact,
};
use common::{RecordingStore, job_config};
use tokio::time::Instant;

fn record(index: usize, valid: bool) -> ImportRecord {
    ImportRecord {
        name: format!("Contact {index}"),
        phone: format!("55119{index:08}"),
        school: "Escola Central".to_owned(),
        is_valid: valid,
    }
}

fn service(store: &RecordingStore) -> ContactService {
    ContactService::new(Arc::new(store.clone()), job_config(10, Duration::from_millis(1500)))
}

async fn seed(store: &RecordingStore, user_id: &str, count: usize) -> anyhow::Result<()> {
    for index in 0..count {
        store
            .inner
            .create(NewContact::pending(user_id, &format!("Seed {index}"), &format!("{index}"), ""))
            .await?;
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn import_upserts_valid_records_in_throttled_batches() -> anyhow::Result<()> {
    let store = RecordingStore::new();
    let contacts = service(&store);
    let mut records: Vec<ImportRecord> = (0..25).map(|i| record(i, true)).collect();
    records.extend((25..30).map(|i| record(i, false)));
    let started = Instant::now();
    let mut percents = Vec::new();

    let report = contacts
        .bulk_import("u1", records, |progress| percents.push(progress.percent()))
        .await?;

    assert_eq!(report.succeeded, 25);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped_invalid, 5);
    assert_eq!(percents, vec![40, 80, 100]);
    assert!(started.elapsed() >= Duration::from_millis(3000));

    assert_eq!(RecordingStore::count(&store.creates), 25);
    assert_eq!(RecordingStore::count(&store.updates), 0);
    assert_eq!(store.inner.len().await, 25);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reimport_updates_instead_of_duplicating() -> anyhow::Result<()> {
    let store = RecordingStore::new();
    let contacts = service(&store);
    let records: Vec<ImportRecord> = (0..12).map(|i| record(i, true)).collect();

    contacts.bulk_import("u1", records.clone(), |_| {}).await?;
    let renamed: Vec<ImportRecord> = records
        .into_iter()
        .map(|mut record| {
            record.name.push_str(" (updated)");
            record
        })
        .collect();
    let report = contacts.bulk_import("u1", renamed, |_| {}).await?;

    assert_eq!(report.succeeded, 12);
    assert_eq!(RecordingStore::count(&store.creates), 12);
    assert_eq!(RecordingStore::count(&store.updates), 12);
    assert_eq!(store.inner.len().await, 12);

    let page = store
        .inner
        .list(&ContactQuery::new().equal(ContactField::Phone, record(3, true).phone))
        .await?;
    assert_eq!(page.documents[0].name, "Contact 3 (updated)");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn duplicate_phones_in_one_import_keep_the_last_record() -> anyhow::Result<()> {
    let store = RecordingStore::new();
    let contacts = service(&store);
    let mut later = record(1, true);
    later.name = "Later name".to_owned();

    let report = contacts
        .bulk_import("u1", vec![record(1, true), record(2, true), later], |_| {})
        .await?;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.merged_duplicates, 1);
    assert_eq!(RecordingStore::count(&store.creates), 2);

    let page = store
        .inner
        .list(&ContactQuery::new().equal(ContactField::Phone, record(1, true).phone))
        .await?;
    assert_eq!(page.total, 1);
    assert_eq!(page.documents[0].name, "Later name");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reset_pages_through_contacts_then_deletes_in_batches() -> anyhow::Result<()> {
    let store = RecordingStore::new();
    seed(&store, "u1", 230).await?;
    seed(&store, "u2", 3).await?;
    let contacts = service(&store);
    let mut batches = 0;

    let report = contacts.delete_all("u1", |_| batches += 1).await?;

    assert_eq!(report.deleted_count, 230);
    assert_eq!(report.failed, 0);
    assert_eq!(report.pages, 3);
    assert_eq!(RecordingStore::count(&store.lists), 3);
    assert_eq!(RecordingStore::count(&store.deletes), 230);
    assert_eq!(batches, 46);
    assert_eq!(store.inner.len().await, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reset_of_exact_page_multiple_needs_one_extra_listing() -> anyhow::Result<()> {
    let store = RecordingStore::new();
    seed(&store, "u1", 200).await?;
    let contacts = service(&store);

    let report = contacts.delete_all("u1", |_| {}).await?;

    assert_eq!(report.deleted_count, 200);
    assert_eq!(report.pages, 3);
    assert!(store.inner.is_empty().await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reset_listing_failure_deletes_nothing() -> anyhow::Result<()> {
    let store = RecordingStore::new();
    seed(&store, "u1", 8).await?;
    store.fail_listing().await;
    let contacts = service(&store);

    let error = contacts
        .delete_all("u1", |_| {})
        .await
        .expect_err("listing failure should surface");

    assert!(matches!(error, ContactError::Listing(_)));
    assert_eq!(RecordingStore::count(&store.deletes), 0);
    assert_eq!(store.inner.len().await, 8);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reset_skips_contacts_that_fail_to_delete() -> anyhow::Result<()> {
    let store = RecordingStore::new();
    seed(&store, "u1", 12).await?;
    let stuck = store
        .inner
        .list(&ContactQuery::new().equal(ContactField::Phone, "7"))
        .await?
        .documents
        .remove(0);
    store.fail_delete_of(&stuck.id).await;
    let contacts = service(&store);

    let report = contacts.delete_all("u1", |_| {}).await?;

    assert_eq!(report.deleted_count, 11);
    assert_eq!(report.failed, 1);
    assert_eq!(store.inner.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn list_filters_by_status_and_search() -> anyhow::Result<()> {
    let store = RecordingStore::new();
    let contacts = service(&store);

    let ana = contacts
        .add(NewContact::pending("u1", "Ana", "5511000000001", "Escola Azul"))
        .await?;
    contacts
        .add(NewContact::pending("u1", "Bruno", "5511000000002", "Colegio Verde"))
        .await?;
    contacts
        .add(NewContact::pending("u2", "Azul", "5511000000003", ""))
        .await?;
    contacts.mark_status(&ana.id, ContactStatus::Sent).await?;

    let search = contacts
        .list("u1", ListOptions {
            search: Some("Azul".to_owned()),
            ..ListOptions::default()
        })
        .await?;
    assert_eq!(search.total, 1);
    assert_eq!(search.documents[0].name, "Ana");

    let pending = contacts
        .list("u1", ListOptions {
            status: Some(ContactStatus::Pending),
            ..ListOptions::default()
        })
        .await?;
    assert_eq!(pending.total, 1);
    assert_eq!(pending.documents[0].name, "Bruno");

    let paged = contacts
        .list("u1", ListOptions {
            limit: Some(1),
            offset: Some(1),
            ..ListOptions::default()
        })
        .await?;
    assert_eq!(paged.total, 2);
    assert_eq!(paged.documents.len(), 1);
    Ok(())
}

#[tokio::test]
async fn blank_user_id_is_rejected() {
    let store = RecordingStore::new();
    let contacts = service(&store);

    let result = contacts.bulk_import(" ", vec![record(1, true)], |_| {}).await;
    assert!(matches!(result, Err(ContactError::InvalidUserId)));
    assert_eq!(RecordingStore::count(&store.creates), 0);
}
