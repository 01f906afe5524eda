use crate::Error;
use lopdf::{Document, Object, ObjectId};

pub(crate) trait PdfObjectDeref {
    /// Follow a reference, direct objects are returned as is.
    fn deref<'a>(&'a self, doc: &'a Document) -> Result<&'a Object, Error>;

    fn get_object_id(&self) -> Option<ObjectId>;
}

impl PdfObjectDeref for Object {
    fn deref<'a>(&'a self, doc: &'a Document) -> Result<&'a Object, Error> {
        match *self {
            Object::Reference(oid) => doc
                .objects
                .get(&oid)
                .ok_or_else(|| Error::Other(format!("PDF Error: NoSuchReference({:#?})", oid))),
            _ => Ok(self),
        }
    }

    fn get_object_id(&self) -> Option<ObjectId> {
        match *self {
            Object::Reference(ref id) => Some(*id),
            _ => None,
        }
    }
}

/// Where a dictionary entry lives, so it can be changed after lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryLocation {
    /// Stored directly in the parent dictionary.
    Inline,
    /// Stored as its own indirect object.
    Indirect(ObjectId),
    Missing,
}

/// Locate `key` of the dictionary object `parent_id`.
pub(crate) fn locate_entry(
    doc: &Document,
    parent_id: ObjectId,
    key: &[u8],
) -> Result<EntryLocation, Error> {
    let parent = doc.get_object(parent_id)?.as_dict()?;
    Ok(match parent.get(key) {
        Ok(value) => match value.get_object_id() {
            Some(id) => EntryLocation::Indirect(id),
            None => EntryLocation::Inline,
        },
        Err(_) => EntryLocation::Missing,
    })
}
