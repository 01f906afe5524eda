//! Interfaces to the collaborators the workflow depends on (persistence,
//! object storage, notification) and in-memory implementations of each.
//!
//! Every persistence method is a single-row operation. Implementations
//! backed by a database are expected to map unique-constraint violations
//! to [`Error::DuplicateSignature`] / [`Error::DuplicateSigner`].

use crate::model::{
    Certificate, CertificateId, Participant, ParticipantId, Signature, SignatureId, Signer,
    SignerId, UserId,
};
use crate::Error;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait SignatureStore: Send + Sync {
    /// Insert a new unsigned slot. Must reject an existing
    /// (certificate, signer) pair atomically.
    fn insert(
        &self,
        certificate_id: CertificateId,
        signer_id: SignerId,
        created_by: UserId,
    ) -> Result<Signature, Error>;

    fn get(&self, id: SignatureId) -> Result<Option<Signature>, Error>;

    fn find(
        &self,
        certificate_id: CertificateId,
        signer_id: SignerId,
    ) -> Result<Option<Signature>, Error>;

    fn list_by_certificate(&self, certificate_id: CertificateId) -> Result<Vec<Signature>, Error>;

    fn list_by_signer(&self, signer_id: SignerId) -> Result<Vec<Signature>, Error>;

    /// Apply `change` to one row and commit it. Returns the committed row.
    fn update(
        &self,
        id: SignatureId,
        change: &mut dyn FnMut(&mut Signature),
    ) -> Result<Signature, Error>;

    fn remove_by_certificate(&self, certificate_id: CertificateId) -> Result<usize, Error>;
}

pub trait SignerStore: Send + Sync {
    fn insert(&self, email: &str, name: &str, owner_id: UserId) -> Result<Signer, Error>;

    fn get(&self, id: SignerId) -> Result<Option<Signer>, Error>;

    fn list_by_owner(&self, owner_id: UserId) -> Result<Vec<Signer>, Error>;

    fn rename(&self, id: SignerId, name: &str) -> Result<Signer, Error>;

    fn delete(&self, id: SignerId) -> Result<(), Error>;
}

pub trait CertificateStore: Send + Sync {
    fn get(&self, id: CertificateId) -> Result<Option<Certificate>, Error>;

    fn save(&self, certificate: Certificate) -> Result<(), Error>;

    /// Set `is_signed`. Returns `true` only for the call that flipped it.
    fn mark_signed(&self, id: CertificateId) -> Result<bool, Error>;

    fn set_preview_url(&self, id: CertificateId, url: &str) -> Result<(), Error>;

    fn set_archive_url(&self, id: CertificateId, url: &str) -> Result<(), Error>;

    fn list_unsigned(&self) -> Result<Vec<Certificate>, Error>;
}

pub trait ParticipantStore: Send + Sync {
    fn save(&self, participant: Participant) -> Result<(), Error>;

    fn list_by_certificate(&self, certificate_id: CertificateId)
        -> Result<Vec<Participant>, Error>;

    fn set_certificate_url(&self, id: ParticipantId, url: &str) -> Result<(), Error>;
}

pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` at `path`, returns the public URL.
    fn put(&self, bytes: Vec<u8>, path: &str) -> Result<String, Error>;

    fn get(&self, url: &str) -> Result<Vec<u8>, Error>;

    fn delete(&self, url: &str) -> Result<(), Error>;
}

pub trait Notifier: Send + Sync {
    /// Tell the owner that every signer approved the certificate.
    fn notify(
        &self,
        owner_id: UserId,
        certificate_name: &str,
        certificate_id: CertificateId,
        preview_path: Option<&str>,
    ) -> Result<(), Error>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemorySignatureStore {
    next_id: AtomicU64,
    rows: Mutex<BTreeMap<SignatureId, Signature>>,
}

impl MemorySignatureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignatureStore for MemorySignatureStore {
    fn insert(
        &self,
        certificate_id: CertificateId,
        signer_id: SignerId,
        created_by: UserId,
    ) -> Result<Signature, Error> {
        let mut rows = lock(&self.rows);
        if rows
            .values()
            .any(|row| row.certificate_id == certificate_id && row.signer_id == signer_id)
        {
            return Err(Error::DuplicateSignature {
                certificate_id,
                signer_id,
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let signature = Signature {
            id,
            signer_id,
            certificate_id,
            created_by,
            encrypted_image: Vec::new(),
            is_signed: false,
            is_requested: false,
            last_request_at: None,
        };
        rows.insert(id, signature.clone());
        Ok(signature)
    }

    fn get(&self, id: SignatureId) -> Result<Option<Signature>, Error> {
        Ok(lock(&self.rows).get(&id).cloned())
    }

    fn find(
        &self,
        certificate_id: CertificateId,
        signer_id: SignerId,
    ) -> Result<Option<Signature>, Error> {
        Ok(lock(&self.rows)
            .values()
            .find(|row| row.certificate_id == certificate_id && row.signer_id == signer_id)
            .cloned())
    }

    fn list_by_certificate(&self, certificate_id: CertificateId) -> Result<Vec<Signature>, Error> {
        Ok(lock(&self.rows)
            .values()
            .filter(|row| row.certificate_id == certificate_id)
            .cloned()
            .collect())
    }

    fn list_by_signer(&self, signer_id: SignerId) -> Result<Vec<Signature>, Error> {
        Ok(lock(&self.rows)
            .values()
            .filter(|row| row.signer_id == signer_id)
            .cloned()
            .collect())
    }

    fn update(
        &self,
        id: SignatureId,
        change: &mut dyn FnMut(&mut Signature),
    ) -> Result<Signature, Error> {
        let mut rows = lock(&self.rows);
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("signature `{}`", id)))?;
        change(row);
        Ok(row.clone())
    }

    fn remove_by_certificate(&self, certificate_id: CertificateId) -> Result<usize, Error> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|_, row| row.certificate_id != certificate_id);
        Ok(before - rows.len())
    }
}

#[derive(Debug, Default)]
pub struct MemorySignerStore {
    next_id: AtomicU64,
    rows: Mutex<BTreeMap<SignerId, Signer>>,
}

impl MemorySignerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignerStore for MemorySignerStore {
    fn insert(&self, email: &str, name: &str, owner_id: UserId) -> Result<Signer, Error> {
        let mut rows = lock(&self.rows);
        if rows
            .values()
            .any(|row| row.owner_id == owner_id && row.email.eq_ignore_ascii_case(email))
        {
            return Err(Error::DuplicateSigner {
                email: email.to_owned(),
                owner_id,
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let signer = Signer {
            id,
            email: email.to_owned(),
            name: name.to_owned(),
            owner_id,
            created_at: Utc::now(),
        };
        rows.insert(id, signer.clone());
        Ok(signer)
    }

    fn get(&self, id: SignerId) -> Result<Option<Signer>, Error> {
        Ok(lock(&self.rows).get(&id).cloned())
    }

    fn list_by_owner(&self, owner_id: UserId) -> Result<Vec<Signer>, Error> {
        Ok(lock(&self.rows)
            .values()
            .filter(|row| row.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn rename(&self, id: SignerId, name: &str) -> Result<Signer, Error> {
        let mut rows = lock(&self.rows);
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("signer `{}`", id)))?;
        row.name = name.to_owned();
        Ok(row.clone())
    }

    fn delete(&self, id: SignerId) -> Result<(), Error> {
        lock(&self.rows)
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("signer `{}`", id)))
    }
}

#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    rows: Mutex<BTreeMap<CertificateId, Certificate>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn modify<T>(
        &self,
        id: CertificateId,
        change: impl FnOnce(&mut Certificate) -> T,
    ) -> Result<T, Error> {
        let mut rows = lock(&self.rows);
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("certificate `{}`", id)))?;
        Ok(change(row))
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn get(&self, id: CertificateId) -> Result<Option<Certificate>, Error> {
        Ok(lock(&self.rows).get(&id).cloned())
    }

    fn save(&self, certificate: Certificate) -> Result<(), Error> {
        lock(&self.rows).insert(certificate.id, certificate);
        Ok(())
    }

    fn mark_signed(&self, id: CertificateId) -> Result<bool, Error> {
        self.modify(id, |row| !std::mem::replace(&mut row.is_signed, true))
    }

    fn set_preview_url(&self, id: CertificateId, url: &str) -> Result<(), Error> {
        self.modify(id, |row| row.preview_url = Some(url.to_owned()))
    }

    fn set_archive_url(&self, id: CertificateId, url: &str) -> Result<(), Error> {
        self.modify(id, |row| row.archive_url = Some(url.to_owned()))
    }

    fn list_unsigned(&self) -> Result<Vec<Certificate>, Error> {
        Ok(lock(&self.rows)
            .values()
            .filter(|row| !row.is_signed)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryParticipantStore {
    rows: Mutex<BTreeMap<ParticipantId, Participant>>,
}

impl MemoryParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParticipantStore for MemoryParticipantStore {
    fn save(&self, participant: Participant) -> Result<(), Error> {
        lock(&self.rows).insert(participant.id, participant);
        Ok(())
    }

    fn list_by_certificate(
        &self,
        certificate_id: CertificateId,
    ) -> Result<Vec<Participant>, Error> {
        Ok(lock(&self.rows)
            .values()
            .filter(|row| row.certificate_id == certificate_id)
            .cloned()
            .collect())
    }

    fn set_certificate_url(&self, id: ParticipantId, url: &str) -> Result<(), Error> {
        let mut rows = lock(&self.rows);
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("participant `{}`", id)))?;
        row.certificate_url = Some(url.to_owned());
        Ok(())
    }
}

/// Object storage keeping blobs in memory under `memory://<path>` URLs.
#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStorage {
    const SCHEME: &'static str = "memory://";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    fn path_of(url: &str) -> Result<&str, Error> {
        url.strip_prefix(Self::SCHEME)
            .ok_or_else(|| Error::Storage(format!("Unknown URL `{}`.", url)))
    }
}

impl ObjectStorage for MemoryObjectStorage {
    fn put(&self, bytes: Vec<u8>, path: &str) -> Result<String, Error> {
        lock(&self.objects).insert(path.to_owned(), bytes);
        Ok(format!("{}{}", Self::SCHEME, path))
    }

    fn get(&self, url: &str) -> Result<Vec<u8>, Error> {
        let path = Self::path_of(url)?;
        lock(&self.objects)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("object `{}`", url)))
    }

    fn delete(&self, url: &str) -> Result<(), Error> {
        let path = Self::path_of(url)?;
        lock(&self.objects).remove(path);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub owner_id: UserId,
    pub certificate_name: String,
    pub certificate_id: CertificateId,
    pub preview_path: Option<String>,
}

/// Notifier that only remembers what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        owner_id: UserId,
        certificate_name: &str,
        certificate_id: CertificateId,
        preview_path: Option<&str>,
    ) -> Result<(), Error> {
        lock(&self.sent).push(Notification {
            owner_id,
            certificate_name: certificate_name.to_owned(),
            certificate_id,
            preview_path: preview_path.map(str::to_owned),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_pair_is_unique() {
        let store = MemorySignatureStore::new();
        store.insert(1, 10, 100).unwrap();
        store.insert(2, 10, 100).unwrap();
        assert!(matches!(
            store.insert(1, 10, 100),
            Err(Error::DuplicateSignature {
                certificate_id: 1,
                signer_id: 10
            })
        ));
    }

    #[test]
    fn signer_email_is_unique_per_owner() {
        let store = MemorySignerStore::new();
        store.insert("a@example.com", "A", 1).unwrap();
        store.insert("a@example.com", "A", 2).unwrap();
        assert!(matches!(
            store.insert("A@example.com", "A again", 1),
            Err(Error::DuplicateSigner { owner_id: 1, .. })
        ));
    }

    #[test]
    fn mark_signed_reports_transition_once() {
        let store = MemoryCertificateStore::new();
        store
            .save(Certificate {
                id: 5,
                owner_id: 1,
                name: "Course".to_owned(),
                design: "{}".to_owned(),
                is_distributed: false,
                is_signed: false,
                archive_url: None,
                preview_url: None,
            })
            .unwrap();
        assert!(store.mark_signed(5).unwrap());
        assert!(!store.mark_signed(5).unwrap());
        assert!(store.list_unsigned().unwrap().is_empty());
    }

    #[test]
    fn object_storage_round_trip() {
        let storage = MemoryObjectStorage::new();
        let url = storage.put(vec![1, 2, 3], "a/b.png").unwrap();
        assert_eq!(url, "memory://a/b.png");
        assert_eq!(storage.get(&url).unwrap(), vec![1, 2, 3]);
        storage.delete(&url).unwrap();
        assert!(matches!(storage.get(&url), Err(Error::NotFound(_))));
    }
}
