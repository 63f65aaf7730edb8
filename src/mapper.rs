use bson::{Bson, Document};

use crate::errors::Result;

/// Bridge between domain entities and BSON documents. The core never
/// reflects; callers supply an implementation (hand-written, generated, or
/// the identity [`BsonMapper`] for working with raw documents).
pub trait EntityMapper<T>: Send + Sync {
    fn to_document(&self, entity: &T) -> Result<Document>;
    fn from_document(&self, doc: Document) -> Result<T>;
    fn id_of(&self, entity: &T) -> Option<Bson>;
    fn set_id(&self, entity: &mut T, id: Bson);
    fn get_property(&self, entity: &T, name: &str) -> Option<Bson>;
}

/// Identity mapper: the entity type is `bson::Document` itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct BsonMapper;

impl EntityMapper<Document> for BsonMapper {
    fn to_document(&self, entity: &Document) -> Result<Document> {
        Ok(entity.clone())
    }

    fn from_document(&self, doc: Document) -> Result<Document> {
        Ok(doc)
    }

    fn id_of(&self, entity: &Document) -> Option<Bson> {
        entity.get("_id").cloned()
    }

    fn set_id(&self, entity: &mut Document, id: Bson) {
        entity.insert("_id", id);
    }

    fn get_property(&self, entity: &Document, name: &str) -> Option<Bson> {
        entity.get(name).cloned()
    }
}
