use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    config::ContactJobConfig,
    contacts::{
        error::{ContactError, ContactStoreError},
        store::{
            Contact,
            ContactField,
            ContactPage,
            ContactPatch,
            ContactQuery,
            ContactStatus,
            ContactStore,
            Filter,
            NewContact,
        },
    },
    pipeline::{BatchPipeline, BatchProgress},
};

/// One parsed row of an import file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub school: String,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Records dropped because they were flagged invalid.
    pub skipped_invalid: usize,
    /// Valid records folded into a later record with the same phone.
    pub merged_duplicates: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub deleted_count: usize,
    pub failed: usize,
    /// Listing round trips needed to enumerate the contacts.
    pub pages: usize,
}

/// Optional filters for [`ContactService::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    pub status: Option<ContactStatus>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Contact operations for one store, throttled per the job settings.
#[derive(Clone)]
pub struct ContactService {
    store: Arc<dyn ContactStore>,
    jobs: ContactJobConfig,
}

impl ContactService {
    pub fn new(store: Arc<dyn ContactStore>, jobs: ContactJobConfig) -> Self {
        Self { store, jobs }
    }

    pub fn jobs(&self) -> &ContactJobConfig {
        &self.jobs
    }

    /// Upserts every valid record for `user_id`, matching existing contacts by phone.
    ///
    /// Records go out in batches of `import_batch_size` with `import_delay`
    /// between batches; per-record failures are counted, not raised.
    pub async fn bulk_import<P>(
        &self,
        user_id: &str,
        records: Vec<ImportRecord>,
        on_progress: P,
    ) -> Result<ImportReport, ContactError>
    where
        P: FnMut(&BatchProgress),
    {
        let user_id = normalize_user_id(user_id)?;
        let received = records.len();
        let valid: Vec<ImportRecord> = records.into_iter().filter(|record| record.is_valid).collect();
        let skipped_invalid = received - valid.len();
        let valid_count = valid.len();
        let unique = dedupe_by_phone(valid);
        let merged_duplicates = valid_count - unique.len();

        tracing::info!(
            user_id,
            received,
            importing = unique.len(),
            skipped_invalid,
            merged_duplicates,
            "starting contact import"
        );

        let pipeline = BatchPipeline::new(self.jobs.import_batch_size, self.jobs.import_delay);
        let outcome = pipeline
            .run(unique, |record| self.upsert(user_id, record), on_progress)
            .await;

        tracing::info!(
            user_id,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "contact import finished"
        );
        Ok(ImportReport {
            succeeded: outcome.succeeded,
            failed: outcome.failed,
            skipped_invalid,
            merged_duplicates,
        })
    }

    /// Deletes every contact of `user_id`.
    ///
    /// Ids are collected page by page first; deletes then run through the
    /// reset pipeline. A failing delete is skipped.
    pub async fn delete_all<P>(&self, user_id: &str, on_progress: P) -> Result<ResetReport, ContactError>
    where
        P: FnMut(&BatchProgress),
    {
        let user_id = normalize_user_id(user_id)?;
        let page_size = self.jobs.reset_page_size;
        let mut ids = Vec::new();
        let mut pages = 0;

        loop {
            let query = ContactQuery::new()
                .equal(ContactField::UserId, user_id)
                .limit(page_size)
                .offset(ids.len());
            let page = self.store.list(&query).await.map_err(ContactError::Listing)?;
            pages += 1;

            let fetched = page.documents.len();
            ids.extend(page.documents.into_iter().map(|contact| contact.id));
            if fetched < page_size {
                break;
            }
        }

        tracing::info!(user_id, contacts = ids.len(), pages, "starting contact reset");
        let pipeline = BatchPipeline::new(self.jobs.reset_batch_size, self.jobs.reset_delay);
        let store = &self.store;
        let outcome = pipeline
            .run(ids, |id| async move { store.delete(&id).await }, on_progress)
            .await;

        tracing::info!(
            user_id,
            deleted = outcome.succeeded,
            failed = outcome.failed,
            "contact reset finished"
        );
        Ok(ResetReport {
            deleted_count: outcome.succeeded,
            failed: outcome.failed,
            pages,
        })
    }

    /// Lists contacts newest first, optionally filtered by status and a
    /// substring over name, phone or school.
    pub async fn list(&self, user_id: &str, options: ListOptions) -> Result<ContactPage, ContactError> {
        let user_id = normalize_user_id(user_id)?;
        let mut query = ContactQuery::new()
            .equal(ContactField::UserId, user_id)
            .order_desc(ContactField::CreatedAt);

        if let Some(status) = options.status {
            query = query.equal(ContactField::Status, status.as_str());
        }
        if let Some(search) = options.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(Filter::Any(
                [ContactField::Name, ContactField::Phone, ContactField::School]
                    .into_iter()
                    .map(|field| Filter::Contains(field, search.to_owned()))
                    .collect(),
            ));
        }
        if let Some(limit) = options.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = options.offset {
            query = query.offset(offset);
        }

        Ok(self.store.list(&query).await?)
    }

    pub async fn add(&self, contact: NewContact) -> Result<Contact, ContactError> {
        normalize_user_id(&contact.user_id)?;
        Ok(self.store.create(contact).await?)
    }

    pub async fn update(&self, id: &str, patch: ContactPatch) -> Result<Contact, ContactError> {
        Ok(self.store.update(id, patch).await?)
    }

    pub async fn mark_status(&self, id: &str, status: ContactStatus) -> Result<Contact, ContactError> {
        let patch = ContactPatch {
            status: Some(status),
            ..ContactPatch::default()
        };
        self.update(id, patch).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ContactError> {
        Ok(self.store.delete(id).await?)
    }

    async fn upsert(&self, user_id: &str, record: ImportRecord) -> Result<(), ContactStoreError> {
        let query = ContactQuery::new()
            .equal(ContactField::UserId, user_id)
            .equal(ContactField::Phone, record.phone.as_str())
            .limit(1);
        let existing = self.store.list(&query).await?;

        match existing.documents.into_iter().next() {
            Some(contact) => {
                let patch = ContactPatch {
                    name: Some(record.name),
                    school: Some(record.school),
                    ..ContactPatch::default()
                };
                self.store.update(&contact.id, patch).await?;
            }
            None => {
                self.store
                    .create(NewContact::pending(user_id, &record.name, &record.phone, &record.school))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Keeps the last record for each phone, in first-seen order.
fn dedupe_by_phone(records: Vec<ImportRecord>) -> Vec<ImportRecord> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ImportRecord> = Vec::with_capacity(records.len());

    for record in records {
        match slots.get(&record.phone) {
            Some(&index) => unique[index] = record,
            None => {
                slots.insert(record.phone.clone(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

fn normalize_user_id(user_id: &str) -> Result<&str, ContactError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(ContactError::InvalidUserId);
    }
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, phone: &str) -> ImportRecord {
        ImportRecord {
            name: name.to_owned(),
            phone: phone.to_owned(),
            school: String::new(),
            is_valid: true,
        }
    }

    #[test]
    fn dedupe_keeps_last_record_in_first_position() {
        let unique = dedupe_by_phone(vec![
            record("Ana", "1"),
            record("Bia", "2"),
            record("Ana Maria", "1"),
        ]);
        let names: Vec<&str> = unique.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Ana Maria", "Bia"]);
    }

    #[test]
    fn import_record_reads_is_valid_flag() {
        let parsed: ImportRecord =
            serde_json::from_str(r#"{"name":"Ana","phone":"55","isValid":false}"#).expect("parse");
        assert!(!parsed.is_valid);
        assert_eq!(parsed.school, "");
    }
}
