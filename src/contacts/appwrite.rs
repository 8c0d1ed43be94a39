use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    config::AppwriteConfig,
    contacts::{
        error::ContactStoreError,
        store::{
            Contact,
            ContactPage,
            ContactPatch,
            ContactQuery,
            ContactStatus,
            ContactStore,
            Filter,
            NewContact,
        },
    },
};

/// Contact collection hosted in an Appwrite database.
///
/// `ureq` is blocking, so every request runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct AppwriteContactStore {
    config: AppwriteConfig,
}

#[derive(Debug, Deserialize)]
struct DocumentList {
    total: usize,
    documents: Vec<Document>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(rename = "$id")]
    id: String,
    #[serde(rename = "$createdAt", default)]
    system_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    user_id: String,
    name: String,
    phone: String,
    #[serde(default)]
    school: String,
    #[serde(default)]
    status: ContactStatus,
}

impl From<Document> for Contact {
    fn from(document: Document) -> Self {
        let created_at = document
            .created_at
            .or(document.system_created_at)
            .unwrap_or_else(Utc::now);
        Self {
            id: document.id,
            user_id: document.user_id,
            name: document.name,
            phone: document.phone,
            school: document.school,
            status: document.status,
            created_at,
        }
    }
}

impl AppwriteContactStore {
    pub fn new(config: AppwriteConfig) -> Self {
        Self { config }
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/databases/{}/collections/{}/documents",
            self.config.endpoint, self.config.database_id, self.config.collection_id
        )
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/{}", self.documents_url(), id)
    }

    fn request<T, F>(&self, call: F) -> BoxFuture<'static, Result<T, ContactStoreError>>
    where
        T: Send + 'static,
        F: FnOnce(&AppwriteConfig) -> Result<T, ContactStoreError> + Send + 'static,
    {
        let config = self.config.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || call(&config))
                .await
                .map_err(|error| ContactStoreError::Join(error.to_string()))?
        })
    }
}

impl ContactStore for AppwriteContactStore {
    fn list<'a>(&'a self, query: &'a ContactQuery) -> BoxFuture<'a, Result<ContactPage, ContactStoreError>> {
        let url = self.documents_url();
        let queries = encode_query(query);
        self.request(move |config| {
            let mut builder = authorized(ureq::get(&url), config);
            for query in &queries {
                builder = builder.query("queries[]", query);
            }
            let mut response = builder.call().map_err(map_error)?;
            let list: DocumentList = response
                .body_mut()
                .read_json()
                .map_err(|error| ContactStoreError::Decode(error.to_string()))?;
            Ok(ContactPage {
                total: list.total,
                documents: list.documents.into_iter().map(Contact::from).collect(),
            })
        })
    }

    fn create<'a>(&'a self, contact: NewContact) -> BoxFuture<'a, Result<Contact, ContactStoreError>> {
        let url = self.documents_url();
        self.request(move |config| {
            let body = json!({
                "documentId": "unique()",
                "data": {
                    "userId": contact.user_id,
                    "name": contact.name,
                    "phone": contact.phone,
                    "school": contact.school,
                    "status": contact.status,
                    "createdAt": Utc::now().to_rfc3339(),
                },
            });
            let mut response = authorized(ureq::post(&url), config)
                .send_json(&body)
                .map_err(map_error)?;
            read_document(&mut response)
        })
    }

    fn update<'a>(
        &'a self,
        id: &'a str,
        patch: ContactPatch,
    ) -> BoxFuture<'a, Result<Contact, ContactStoreError>> {
        let url = self.document_url(id);
        let id = id.to_owned();
        self.request(move |config| {
            let body = json!({ "data": patch });
            let mut response = authorized(ureq::patch(&url), config)
                .send_json(&body)
                .map_err(|error| match error {
                    ureq::Error::StatusCode(404) => ContactStoreError::NotFound(id.clone()),
                    other => map_error(other),
                })?;
            read_document(&mut response)
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ContactStoreError>> {
        let url = self.document_url(id);
        let id = id.to_owned();
        self.request(move |config| {
            authorized(ureq::delete(&url), config)
                .call()
                .map_err(|error| match error {
                    ureq::Error::StatusCode(404) => ContactStoreError::NotFound(id.clone()),
                    other => map_error(other),
                })?;
            Ok(())
        })
    }
}

fn authorized<B>(builder: ureq::RequestBuilder<B>, config: &AppwriteConfig) -> ureq::RequestBuilder<B> {
    builder
        .header("X-Appwrite-Project", config.project_id.as_str())
        .header("X-Appwrite-Key", config.api_key.as_str())
        .header("Content-Type", "application/json")
}

fn read_document(
    response: &mut ureq::http::Response<ureq::Body>,
) -> Result<Contact, ContactStoreError> {
    response
        .body_mut()
        .read_json::<Document>()
        .map(Contact::from)
        .map_err(|error| ContactStoreError::Decode(error.to_string()))
}

fn map_error(error: ureq::Error) -> ContactStoreError {
    match error {
        ureq::Error::StatusCode(code) => ContactStoreError::Status {
            code,
            body: String::new(),
        },
        other => ContactStoreError::Transport(other.to_string()),
    }
}

/// Encodes a query as Appwrite `queries[]` parameters.
pub(crate) fn encode_query(query: &ContactQuery) -> Vec<String> {
    let mut encoded: Vec<String> = query
        .filters
        .iter()
        .map(|filter| filter_json(filter).to_string())
        .collect();

    if let Some(field) = query.order_desc {
        encoded.push(json!({ "method": "orderDesc", "attribute": field.as_str() }).to_string());
    }
    if let Some(limit) = query.limit {
        encoded.push(json!({ "method": "limit", "values": [limit] }).to_string());
    }
    if let Some(offset) = query.offset {
        encoded.push(json!({ "method": "offset", "values": [offset] }).to_string());
    }
    encoded
}

fn filter_json(filter: &Filter) -> Value {
    match filter {
        Filter::Equal(field, value) => {
            json!({ "method": "equal", "attribute": field.as_str(), "values": [value] })
        }
        Filter::Contains(field, value) => {
            json!({ "method": "contains", "attribute": field.as_str(), "values": [value] })
        }
        Filter::Any(filters) => json!({
            "method": "or",
            "values": filters.iter().map(filter_json).collect::<Vec<_>>(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::store::ContactField;

    #[test]
    fn encodes_filters_ordering_and_paging() {
        let query = ContactQuery::new()
            .equal(ContactField::UserId, "u1")
            .filter(Filter::Any(vec![
                Filter::Contains(ContactField::Name, "an".to_owned()),
                Filter::Contains(ContactField::Phone, "an".to_owned()),
            ]))
            .order_desc(ContactField::CreatedAt)
            .limit(100)
            .offset(200);

        let encoded: Vec<Value> = encode_query(&query)
            .iter()
            .map(|raw| serde_json::from_str(raw).expect("valid json"))
            .collect();

        assert_eq!(
            encoded,
            vec![
                json!({"method": "equal", "attribute": "userId", "values": ["u1"]}),
                json!({"method": "or", "values": [
                    {"method": "contains", "attribute": "name", "values": ["an"]},
                    {"method": "contains", "attribute": "phone", "values": ["an"]},
                ]}),
                json!({"method": "orderDesc", "attribute": "createdAt"}),
                json!({"method": "limit", "values": [100]}),
                json!({"method": "offset", "values": [200]}),
            ]
        );
    }

    #[test]
    fn documents_map_system_fields() {
        let raw = json!({
            "$id": "doc1",
            "$createdAt": "2024-05-01T10:00:00.000+00:00",
            "userId": "u1",
            "name": "Ana",
            "phone": "5511",
            "status": "sent",
        });
        let contact = Contact::from(serde_json::from_value::<Document>(raw).expect("decode"));
        assert_eq!(contact.id, "doc1");
        assert_eq!(contact.status, ContactStatus::Sent);
        assert_eq!(contact.school, "");
        assert_eq!(contact.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }
}
