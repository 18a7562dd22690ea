//! Agent key store
//!
//! Holds the signing keys the router may use without asking the user, and
//! which of them is current.

use std::collections::BTreeMap;
use std::fmt;

use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::address::{checksum_address, is_valid_address, is_valid_private_key};

/// A system-held signing key and the account it controls
#[derive(Clone)]
pub struct AgentSigner {
    label: String,
    private_key: String,
    address: String,
}

impl AgentSigner {
    /// Build a signer from a `0x`-prefixed hex key, deriving its address
    pub fn new(label: impl Into<String>, private_key: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let private_key = private_key.into().trim().to_string();
        if !is_valid_private_key(&private_key) {
            return Err(Error::InvalidPrivateKey(label));
        }

        let signing_key = hex::decode(&private_key[2..])
            .ok()
            .and_then(|bytes| SigningKey::from_slice(&bytes).ok())
            .ok_or_else(|| Error::InvalidPrivateKey(label.clone()))?;

        Ok(Self {
            address: ethereum_address(&signing_key),
            label,
            private_key,
        })
    }

    /// Check that `address` is the account this key controls
    pub fn with_address(self, address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        if !is_valid_address(&address) || !address.trim().eq_ignore_ascii_case(&self.address) {
            return Err(Error::InvalidAddress(format!(
                "{} does not belong to wallet {}",
                address, self.label
            )));
        }
        Ok(self)
    }

    /// Signer with a freshly generated random key
    pub fn generate(label: impl Into<String>) -> Self {
        let signing_key = SigningKey::random(&mut OsRng);

        Self {
            label: label.into(),
            private_key: format!("0x{}", hex::encode(signing_key.to_bytes())),
            address: ethereum_address(&signing_key),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// EIP-55 checksummed account address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Raw key, for the chain client only
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn has_private_key(&self) -> bool {
        is_valid_private_key(&self.private_key)
    }
}

/// Account address: last 20 bytes of Keccak-256 over the uncompressed public key
fn ethereum_address(signing_key: &SigningKey) -> String {
    let point = signing_key.verifying_key().to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);

    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    checksum_address(&address)
}

// Never print the key
impl fmt::Debug for AgentSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSigner")
            .field("label", &self.label)
            .field("address", &self.address)
            .field("private_key", &"***")
            .finish()
    }
}

/// Summary of a stored signer
#[derive(Debug, Clone, PartialEq)]
pub struct SignerEntry {
    pub label: String,
    pub address: String,
    pub is_current: bool,
}

/// Storage for agent signers
pub trait AgentKeyStore: Send + Sync {
    /// The signer used for automatic execution, if any
    fn current_signer(&self) -> Option<AgentSigner>;

    /// Add (or replace) a signer; the first one added becomes current
    fn add_signer(&mut self, signer: AgentSigner);

    /// Make `label` current; false if unknown
    fn set_current(&mut self, label: &str) -> bool;

    /// Remove a signer; false if unknown
    fn remove_signer(&mut self, label: &str) -> bool;

    fn signer(&self, label: &str) -> Option<AgentSigner>;

    fn list(&self) -> Vec<SignerEntry>;
}

/// In-process key store
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    signers: BTreeMap<String, AgentSigner>,
    current: Option<String>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgentKeyStore for InMemoryKeyStore {
    fn current_signer(&self) -> Option<AgentSigner> {
        self.current
            .as_ref()
            .and_then(|label| self.signers.get(label))
            .cloned()
    }

    fn add_signer(&mut self, signer: AgentSigner) {
        let label = signer.label().to_string();
        if self.signers.insert(label.clone(), signer).is_some() {
            warn!(label = %label, "Replaced existing agent signer");
        } else {
            info!(label = %label, "Added agent signer");
        }

        if self.current.is_none() {
            self.current = Some(label);
        }
    }

    fn set_current(&mut self, label: &str) -> bool {
        if self.signers.contains_key(label) {
            self.current = Some(label.to_string());
            info!(label = %label, "Switched current agent signer");
            true
        } else {
            false
        }
    }

    fn remove_signer(&mut self, label: &str) -> bool {
        if self.signers.remove(label).is_none() {
            return false;
        }

        if self.current.as_deref() == Some(label) {
            self.current = self.signers.keys().next().cloned();
        }
        info!(label = %label, "Removed agent signer");
        true
    }

    fn signer(&self, label: &str) -> Option<AgentSigner> {
        self.signers.get(label).cloned()
    }

    fn list(&self) -> Vec<SignerEntry> {
        self.signers
            .values()
            .map(|s| SignerEntry {
                label: s.label().to_string(),
                address: s.address().to_string(),
                is_current: self.current.as_deref() == Some(s.label()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: &str) -> String {
        format!("0x{}", byte.repeat(32))
    }

    #[test]
    fn test_signer_rejects_bad_key() {
        assert!(matches!(
            AgentSigner::new("bad", "0x1234"),
            Err(Error::InvalidPrivateKey(_))
        ));
        assert!(AgentSigner::new("good", key("11")).is_ok());
    }

    #[test]
    fn test_address_derived_from_key() {
        let signer = AgentSigner::new(
            "web3",
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        assert_eq!(signer.address(), "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23");

        let one = AgentSigner::new("one", format!("0x{}1", "0".repeat(63))).unwrap();
        assert_eq!(one.address(), "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf");
    }

    #[test]
    fn test_zero_key_rejected() {
        assert!(matches!(
            AgentSigner::new("zero", key("00")),
            Err(Error::InvalidPrivateKey(_))
        ));
    }

    #[test]
    fn test_with_address_must_match_key() {
        let signer = AgentSigner::new("one", format!("0x{}1", "0".repeat(63))).unwrap();
        assert!(signer
            .clone()
            .with_address("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf")
            .is_ok());
        assert!(matches!(
            signer.with_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_generated_signer_is_valid() {
        let signer = AgentSigner::generate("fresh");
        assert!(signer.has_private_key());
        assert_ne!(
            signer.private_key(),
            AgentSigner::generate("other").private_key()
        );

        let reloaded = AgentSigner::new("fresh", signer.private_key()).unwrap();
        assert_eq!(reloaded.address(), signer.address());
        assert!(is_valid_address(signer.address()));
    }

    #[test]
    fn test_debug_hides_key() {
        let signer = AgentSigner::new("a", key("ab")).unwrap();
        let printed = format!("{:?}", signer);
        assert!(!printed.contains("abab"));
    }

    #[test]
    fn test_first_signer_becomes_current() {
        let mut store = InMemoryKeyStore::new();
        assert!(store.current_signer().is_none());

        store.add_signer(AgentSigner::new("a", key("11")).unwrap());
        store.add_signer(AgentSigner::new("b", key("22")).unwrap());
        assert_eq!(store.current_signer().unwrap().label(), "a");

        assert!(store.set_current("b"));
        assert!(!store.set_current("missing"));
        assert_eq!(store.current_signer().unwrap().label(), "b");
    }

    #[test]
    fn test_removing_current_promotes_another() {
        let mut store = InMemoryKeyStore::new();
        store.add_signer(AgentSigner::new("a", key("11")).unwrap());
        store.add_signer(AgentSigner::new("b", key("22")).unwrap());

        assert!(store.remove_signer("a"));
        assert_eq!(store.current_signer().unwrap().label(), "b");

        assert!(store.remove_signer("b"));
        assert!(store.current_signer().is_none());
        assert!(!store.remove_signer("b"));
    }

    #[test]
    fn test_list_marks_current() {
        let mut store = InMemoryKeyStore::new();
        store.add_signer(AgentSigner::new("a", key("11")).unwrap());
        store.add_signer(AgentSigner::new("b", key("22")).unwrap());

        let list = store.list();
        assert_eq!(list.len(), 2);
        assert!(list[0].is_current);
        assert!(!list[1].is_current);
        assert!(is_valid_address(&list[0].address));
        assert_ne!(list[0].address, list[1].address);
    }
}
