//! Per (certificate, signer) approval slots and the "fully signed" predicate.
//!
//! The ledger does not check who is calling. Ownership rules live in
//! [`crate::workflow`].

use crate::model::{CertificateId, Signature, SignatureId, SignerId, UserId};
use crate::store::SignatureStore;
use crate::Error;
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct SignatureLedger {
    store: Arc<dyn SignatureStore>,
}

impl SignatureLedger {
    pub fn new(store: Arc<dyn SignatureStore>) -> Self {
        SignatureLedger { store }
    }

    pub fn create(
        &self,
        certificate_id: CertificateId,
        signer_id: SignerId,
        creator_id: UserId,
    ) -> Result<Signature, Error> {
        let signature = self.store.insert(certificate_id, signer_id, creator_id)?;
        log::info!(
            "Signature `{}` created for signer `{}` on certificate `{}`.",
            signature.id,
            signer_id,
            certificate_id
        );
        Ok(signature)
    }

    /// Mark the slot as requested. Sending the request is up to the caller.
    pub fn request(&self, signature_id: SignatureId) -> Result<Signature, Error> {
        let now = Utc::now();
        self.store.update(signature_id, &mut |signature| {
            signature.is_requested = true;
            signature.last_request_at = match signature.last_request_at {
                Some(previous) if previous > now => Some(previous),
                _ => Some(now),
            };
        })
    }

    /// Store the encrypted image and mark the slot signed. A second capture
    /// replaces the image.
    pub fn capture(
        &self,
        signature_id: SignatureId,
        encrypted_image: Vec<u8>,
    ) -> Result<Signature, Error> {
        let mut image = Some(encrypted_image);
        let signature = self.store.update(signature_id, &mut |signature| {
            if let Some(image) = image.take() {
                signature.encrypted_image = image;
            }
            signature.is_signed = true;
        })?;
        log::info!(
            "Signature `{}` captured for certificate `{}`.",
            signature.id,
            signature.certificate_id
        );
        Ok(signature)
    }

    pub fn get(&self, signature_id: SignatureId) -> Result<Option<Signature>, Error> {
        self.store.get(signature_id)
    }

    /// Like [`get`](Self::get) but an unknown id is an error.
    pub fn fetch(&self, signature_id: SignatureId) -> Result<Signature, Error> {
        self.store
            .get(signature_id)?
            .ok_or_else(|| Error::NotFound(format!("signature `{}`", signature_id)))
    }

    pub fn get_by_certificate_and_signer(
        &self,
        certificate_id: CertificateId,
        signer_id: SignerId,
    ) -> Result<Option<Signature>, Error> {
        self.store.find(certificate_id, signer_id)
    }

    pub fn list_by_certificate(
        &self,
        certificate_id: CertificateId,
    ) -> Result<Vec<Signature>, Error> {
        self.store.list_by_certificate(certificate_id)
    }

    pub fn list_by_signer(&self, signer_id: SignerId) -> Result<Vec<Signature>, Error> {
        self.store.list_by_signer(signer_id)
    }

    /// Slots of this certificate that still wait for a signature.
    pub fn pending(&self, certificate_id: CertificateId) -> Result<Vec<Signature>, Error> {
        Ok(self
            .list_by_certificate(certificate_id)?
            .into_iter()
            .filter(|signature| !signature.is_signed)
            .collect())
    }

    /// `true` when the certificate has at least one slot and all are signed.
    /// A certificate without signers is never complete.
    pub fn all_signed(&self, certificate_id: CertificateId) -> Result<bool, Error> {
        let signatures = self.list_by_certificate(certificate_id)?;
        Ok(!signatures.is_empty() && signatures.iter().all(|signature| signature.is_signed))
    }

    /// Certificate teardown.
    pub fn remove_certificate(&self, certificate_id: CertificateId) -> Result<usize, Error> {
        self.store.remove_by_certificate(certificate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SignatureState;
    use crate::store::MemorySignatureStore;

    fn ledger() -> SignatureLedger {
        SignatureLedger::new(Arc::new(MemorySignatureStore::new()))
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let ledger = ledger();
        ledger.create(1, 7, 100).unwrap();
        let err = ledger.create(1, 7, 100).unwrap_err();
        assert!(matches!(err, Error::DuplicateSignature { .. }));
        // Same signer on another certificate is fine.
        ledger.create(2, 7, 100).unwrap();
    }

    #[test]
    fn request_unknown_id_is_not_found() {
        assert!(matches!(ledger().request(42), Err(Error::NotFound(_))));
    }

    #[test]
    fn request_is_reenterable_and_moves_forward() {
        let ledger = ledger();
        let signature = ledger.create(1, 7, 100).unwrap();
        assert_eq!(signature.state(), SignatureState::Unrequested);

        let first = ledger.request(signature.id).unwrap();
        assert_eq!(first.state(), SignatureState::Requested);
        let second = ledger.request(signature.id).unwrap();
        assert!(second.last_request_at >= first.last_request_at);
        assert_eq!(second.state(), SignatureState::Requested);
    }

    #[test]
    fn signed_is_monotonic() {
        let ledger = ledger();
        let signature = ledger.create(1, 7, 100).unwrap();
        ledger.capture(signature.id, vec![1, 2, 3]).unwrap();
        // Neither a resend nor a second capture reopens the slot.
        assert!(ledger.request(signature.id).unwrap().is_signed);
        let recaptured = ledger.capture(signature.id, vec![9]).unwrap();
        assert!(recaptured.is_signed);
        assert_eq!(recaptured.encrypted_image, vec![9]);
        assert_eq!(recaptured.state(), SignatureState::Signed);
    }

    #[test]
    fn all_signed_needs_every_slot() {
        let ledger = ledger();
        assert!(!ledger.all_signed(1).unwrap());

        let s1 = ledger.create(1, 1, 100).unwrap();
        let s2 = ledger.create(1, 2, 100).unwrap();
        assert!(!ledger.all_signed(1).unwrap());

        ledger.capture(s1.id, vec![1]).unwrap();
        assert!(!ledger.all_signed(1).unwrap());
        assert_eq!(ledger.pending(1).unwrap().len(), 1);

        ledger.capture(s2.id, vec![2]).unwrap();
        assert!(ledger.all_signed(1).unwrap());
        assert!(ledger.pending(1).unwrap().is_empty());
    }

    #[test]
    fn lookup_by_pair() {
        let ledger = ledger();
        let signature = ledger.create(3, 4, 100).unwrap();
        assert_eq!(
            ledger.get_by_certificate_and_signer(3, 4).unwrap(),
            Some(signature)
        );
        assert_eq!(ledger.get_by_certificate_and_signer(3, 5).unwrap(), None);
    }
}
