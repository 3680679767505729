use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Descriptive fields attached to a stored document.
///
/// Known keys are typed; anything else a writer attached is kept in `extra`
/// and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(rename = "projectId", default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A unit of retrievable content, scoped to one project partition.
///
/// Documents are replaced wholesale on upsert; there is no partial update.
///
/// # Example
///
/// ```
/// # use recall_core::rag::KnowledgeDocument;
/// let doc = KnowledgeDocument::new("faq_1", "Refunds take 5 business days")
///     .with_embedding(vec![0.6, 0.8])
///     .with_title("Refund policy")
///     .in_project("store-eu");
/// assert!(doc.has_embedding());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub content: String,
    /// Normalized embedding; absent until the document is vectorized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    pub project_id: String,
}

impl KnowledgeDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            embedding: None,
            metadata: DocumentMetadata::default(),
            project_id: crate::config::GLOBAL_PROJECT.to_string(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = Some(title.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    pub fn in_project(mut self, project_id: impl Into<String>) -> Self {
        let project_id = project_id.into();
        self.metadata.project_id = Some(project_id.clone());
        self.project_id = project_id;
        self
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// Input for ingesting a document. Unset fields receive defaults on upsert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl NewDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A ranked match, produced fresh per query.
///
/// Both the server-side and the fallback search paths yield this shape.
/// Scores are cosine similarities in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: DocumentMetadata,
    pub similarity: f32,
}

/// Which strategy produced a set of search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPath {
    /// Store-side similarity search
    Remote,
    /// Full partition scan scored locally, after the remote path failed
    Fallback,
    /// Served from the search cache
    Cache,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub path: SearchPath,
}

impl SearchOutcome {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        self.path == SearchPath::Fallback
    }
}

/// Listing entry for a stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub has_embedding: bool,
}

impl From<&KnowledgeDocument> for DocumentSummary {
    fn from(document: &KnowledgeDocument) -> Self {
        Self {
            id: document.id.clone(),
            title: document
                .metadata
                .title
                .clone()
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            doc_type: document
                .metadata
                .doc_type
                .clone()
                .unwrap_or_else(|| DEFAULT_DOC_TYPE.to_string()),
            created_at: document.metadata.created_at,
            tags: document.metadata.tags.clone(),
            has_embedding: document.has_embedding(),
        }
    }
}

pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_DOC_TYPE: &str = "text";

/// Parameters for a store-side similarity search.
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'a> {
    pub embedding: &'a [f32],
    /// Exclusive lower bound on similarity
    pub threshold: f32,
    pub top_k: usize,
    pub project_id: &'a str,
}

/// Deserializes JSON `null` as the type's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
