use crate::model::{Signer, SignerId, UserId};
use crate::store::{SignatureStore, SignerStore};
use crate::Error;
use std::sync::Arc;

/// Signers an owner has invited. Only the owner may change them.
#[derive(Clone)]
pub struct SignerRegistry {
    signers: Arc<dyn SignerStore>,
    signatures: Arc<dyn SignatureStore>,
}

impl SignerRegistry {
    pub fn new(signers: Arc<dyn SignerStore>, signatures: Arc<dyn SignatureStore>) -> Self {
        SignerRegistry {
            signers,
            signatures,
        }
    }

    pub fn invite(&self, email: &str, name: &str, owner_id: UserId) -> Result<Signer, Error> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::Other(format!("`{}` is not an email address.", email)));
        }
        self.signers.insert(email, name.trim(), owner_id)
    }

    pub fn list(&self, owner_id: UserId) -> Result<Vec<Signer>, Error> {
        self.signers.list_by_owner(owner_id)
    }

    pub fn rename(&self, id: SignerId, name: &str, caller_id: UserId) -> Result<Signer, Error> {
        self.owned(id, caller_id)?;
        self.signers.rename(id, name.trim())
    }

    /// Remove a signer that is not attached to any certificate.
    pub fn delete(&self, id: SignerId, caller_id: UserId) -> Result<(), Error> {
        self.owned(id, caller_id)?;
        if !self.signatures.list_by_signer(id)?.is_empty() {
            return Err(Error::SignerInUse(id));
        }
        self.signers.delete(id)
    }

    fn owned(&self, id: SignerId, caller_id: UserId) -> Result<Signer, Error> {
        let signer = self
            .signers
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("signer `{}`", id)))?;
        if signer.owner_id != caller_id {
            return Err(Error::Forbidden(format!(
                "signer `{}` belongs to another user",
                id
            )));
        }
        Ok(signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemorySignatureStore, MemorySignerStore};

    fn registry() -> (SignerRegistry, Arc<MemorySignatureStore>) {
        let signatures = Arc::new(MemorySignatureStore::new());
        let registry = SignerRegistry::new(Arc::new(MemorySignerStore::new()), signatures.clone());
        (registry, signatures)
    }

    #[test]
    fn only_owner_renames() {
        let (registry, _) = registry();
        let signer = registry.invite("dean@example.com", "Dean", 1).unwrap();
        assert!(matches!(
            registry.rename(signer.id, "Someone", 2),
            Err(Error::Forbidden(_))
        ));
        assert_eq!(registry.rename(signer.id, " Dr. Dean ", 1).unwrap().name, "Dr. Dean");
    }

    #[test]
    fn attached_signer_cannot_be_deleted() {
        let (registry, signatures) = registry();
        let signer = registry.invite("dean@example.com", "Dean", 1).unwrap();
        signatures.insert(10, signer.id, 1).unwrap();
        assert!(matches!(
            registry.delete(signer.id, 1),
            Err(Error::SignerInUse(_))
        ));
        signatures.remove_by_certificate(10).unwrap();
        registry.delete(signer.id, 1).unwrap();
        assert!(registry.list(1).unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_email() {
        let (registry, _) = registry();
        assert!(registry.invite("not-an-email", "X", 1).is_err());
    }
}
