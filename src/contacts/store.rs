use std::{borrow::Cow, sync::Arc};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::contacts::error::ContactStoreError;

/// A contact owned by one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub school: String,
    #[serde(default)]
    pub status: ContactStatus,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    fn field(&self, field: ContactField) -> Cow<'_, str> {
        match field {
            ContactField::UserId => Cow::Borrowed(&self.user_id),
            ContactField::Name => Cow::Borrowed(&self.name),
            ContactField::Phone => Cow::Borrowed(&self.phone),
            ContactField::School => Cow::Borrowed(&self.school),
            ContactField::Status => Cow::Borrowed(self.status.as_str()),
            ContactField::CreatedAt => Cow::Owned(self.created_at.to_rfc3339()),
        }
    }
}

/// Delivery status of a contact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Fields for a contact that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub user_id: String,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub school: String,
    #[serde(default)]
    pub status: ContactStatus,
}

impl NewContact {
    pub fn pending(user_id: &str, name: &str, phone: &str, school: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            name: name.to_owned(),
            phone: phone.to_owned(),
            school: school.to_owned(),
            status: ContactStatus::Pending,
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContactStatus>,
}

impl ContactPatch {
    fn apply(self, contact: &mut Contact) {
        if let Some(name) = self.name {
            contact.name = name;
        }
        if let Some(phone) = self.phone {
            contact.phone = phone;
        }
        if let Some(school) = self.school {
            contact.school = school;
        }
        if let Some(status) = self.status {
            contact.status = status;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactField {
    UserId,
    Name,
    Phone,
    School,
    Status,
    CreatedAt,
}

impl ContactField {
    /// Attribute name as stored in documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserId => "userId",
            Self::Name => "name",
            Self::Phone => "phone",
            Self::School => "school",
            Self::Status => "status",
            Self::CreatedAt => "createdAt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Equal(ContactField, String),
    Contains(ContactField, String),
    /// Matches when any inner filter matches.
    Any(Vec<Filter>),
}

impl Filter {
    pub fn matches(&self, contact: &Contact) -> bool {
        match self {
            Self::Equal(field, value) => contact.field(*field) == value.as_str(),
            Self::Contains(field, value) => contact.field(*field).contains(value.as_str()),
            Self::Any(filters) => filters.iter().any(|filter| filter.matches(contact)),
        }
    }
}

/// Query over a contact collection; every filter must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactQuery {
    pub filters: Vec<Filter>,
    pub order_desc: Option<ContactField>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ContactQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn equal(self, field: ContactField, value: impl Into<String>) -> Self {
        self.filter(Filter::Equal(field, value.into()))
    }

    pub fn order_desc(mut self, field: ContactField) -> Self {
        self.order_desc = Some(field);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn matches(&self, contact: &Contact) -> bool {
        self.filters.iter().all(|filter| filter.matches(contact))
    }
}

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactPage {
    pub total: usize,
    pub documents: Vec<Contact>,
}

/// Remote contact collection.
pub trait ContactStore: Send + Sync {
    fn list<'a>(&'a self, query: &'a ContactQuery) -> BoxFuture<'a, Result<ContactPage, ContactStoreError>>;

    fn create<'a>(&'a self, contact: NewContact) -> BoxFuture<'a, Result<Contact, ContactStoreError>>;

    fn update<'a>(
        &'a self,
        id: &'a str,
        patch: ContactPatch,
    ) -> BoxFuture<'a, Result<Contact, ContactStoreError>>;

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ContactStoreError>>;
}

/// Process-local store used when no remote backend is configured.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContactStore {
    contacts: Arc<RwLock<Vec<Contact>>>,
}

impl InMemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.contacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contacts.read().await.is_empty()
    }
}

impl ContactStore for InMemoryContactStore {
    fn list<'a>(&'a self, query: &'a ContactQuery) -> BoxFuture<'a, Result<ContactPage, ContactStoreError>> {
        Box::pin(async move {
            let contacts = self.contacts.read().await;
            let mut matched: Vec<Contact> = contacts
                .iter()
                .filter(|contact| query.matches(contact))
                .cloned()
                .collect();

            if let Some(field) = query.order_desc {
                match field {
                    ContactField::CreatedAt => {
                        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                    }
                    field => matched.sort_by(|a, b| b.field(field).cmp(&a.field(field))),
                }
            }

            let total = matched.len();
            let documents = matched
                .into_iter()
                .skip(query.offset.unwrap_or(0))
                .take(query.limit.unwrap_or(usize::MAX))
                .collect();
            Ok(ContactPage { total, documents })
        })
    }

    fn create<'a>(&'a self, contact: NewContact) -> BoxFuture<'a, Result<Contact, ContactStoreError>> {
        Box::pin(async move {
            let created = Contact {
                id: Uuid::new_v4().simple().to_string(),
                user_id: contact.user_id,
                name: contact.name,
                phone: contact.phone,
                school: contact.school,
                status: contact.status,
                created_at: Utc::now(),
            };
            self.contacts.write().await.push(created.clone());
            Ok(created)
        })
    }

    fn update<'a>(
        &'a self,
        id: &'a str,
        patch: ContactPatch,
    ) -> BoxFuture<'a, Result<Contact, ContactStoreError>> {
        Box::pin(async move {
            let mut contacts = self.contacts.write().await;
            let contact = contacts
                .iter_mut()
                .find(|contact| contact.id == id)
                .ok_or_else(|| ContactStoreError::NotFound(id.to_owned()))?;
            patch.apply(contact);
            Ok(contact.clone())
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ContactStoreError>> {
        Box::pin(async move {
            let mut contacts = self.contacts.write().await;
            let before = contacts.len();
            contacts.retain(|contact| contact.id != id);
            if contacts.len() == before {
                return Err(ContactStoreError::NotFound(id.to_owned()));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_filters_orders_and_pages() {
        let store = InMemoryContactStore::new();
        for (user, name) in [("u1", "Ana"), ("u2", "Bia"), ("u1", "Caio"), ("u1", "Duda")] {
            store
                .create(NewContact::pending(user, name, "5511", ""))
                .await
                .expect("create");
        }

        let query = ContactQuery::new()
            .equal(ContactField::UserId, "u1")
            .order_desc(ContactField::Name)
            .limit(2)
            .offset(1);
        let page = store.list(&query).await.expect("list");

        assert_eq!(page.total, 3);
        let names: Vec<&str> = page.documents.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Caio", "Ana"]);
    }

    #[tokio::test]
    async fn update_and_delete_unknown_ids_fail() {
        let store = InMemoryContactStore::new();
        let error = store
            .update("missing", ContactPatch::default())
            .await
            .expect_err("update should fail");
        assert!(matches!(error, ContactStoreError::NotFound(_)));
        assert!(store.delete("missing").await.is_err());
    }

    #[test]
    fn any_filter_matches_either_field() {
        let contact = Contact {
            id: "1".to_owned(),
            user_id: "u1".to_owned(),
            name: "Ana".to_owned(),
            phone: "5511988887777".to_owned(),
            school: "Escola Azul".to_owned(),
            status: ContactStatus::Pending,
            created_at: Utc::now(),
        };
        let filter = Filter::Any(vec![
            Filter::Contains(ContactField::Name, "zz".to_owned()),
            Filter::Contains(ContactField::School, "Azul".to_owned()),
        ]);
        assert!(filter.matches(&contact));
        assert!(!Filter::Equal(ContactField::Status, "sent".to_owned()).matches(&contact));
    }
}
