use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message as SecpMessage, PublicKey, SecretKey, SECP256K1};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::types::NodeRecord;
use crate::utils::{base32_decode, base32_encode};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("entry text did not match any known entry kind")]
    UnknownEntryKind,
    #[error("malformed entry: {0}")]
    Malformed(String),
    #[error("root signature did not verify")]
    InvalidSignature,
}

/// A single EIP-1459 style DNS-tree entry, one DNS TXT record's worth of
/// text. `Root` anchors a tree with a signature over its two hash
/// pointers; `Branch` fans out to further subdomains; `Nodes` and `Link`
/// are the two leaf kinds, pointing at a peer record and at another tree
/// respectively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Root(RootRecord),
    Branch(Vec<String>),
    Nodes(NodeRecord),
    Link { public_key: Vec<u8>, domain: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRecord {
    pub enr_root: String,
    pub link_root: String,
    pub seq: u64,
    pub signature: Vec<u8>,
}

const ROOT_PREFIX: &str = "enrtree-root:v1";
const BRANCH_PREFIX: &str = "enrtree-branch:";
const NODES_PREFIX: &str = "enrtree-node:";
const LINK_PREFIX: &str = "enrtree://";

impl RootRecord {
    /// The exact ASCII text signed by the tree's publisher: every field
    /// except the signature itself, in fixed order.
    pub fn signing_text(enr_root: &str, link_root: &str, seq: u64) -> String {
        format!("{ROOT_PREFIX} e={enr_root} l={link_root} seq={seq}")
    }

    pub fn to_text(&self) -> String {
        let signed = Self::signing_text(&self.enr_root, &self.link_root, self.seq);
        let sig_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            &self.signature,
        );
        format!("{signed} sig={sig_b64}")
    }

    pub fn parse(text: &str) -> Result<Self, TreeError> {
        let rest = text
            .strip_prefix(ROOT_PREFIX)
            .ok_or(TreeError::UnknownEntryKind)?;
        let mut enr_root = None;
        let mut link_root = None;
        let mut seq = None;
        let mut sig = None;
        for field in rest.split_whitespace() {
            if let Some(v) = field.strip_prefix("e=") {
                enr_root = Some(v.to_string());
            } else if let Some(v) = field.strip_prefix("l=") {
                link_root = Some(v.to_string());
            } else if let Some(v) = field.strip_prefix("seq=") {
                seq = v
                    .parse::<u64>()
                    .map_err(|e| TreeError::Malformed(e.to_string()))
                    .ok();
            } else if let Some(v) = field.strip_prefix("sig=") {
                sig = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, v)
                    .map_err(|e| TreeError::Malformed(e.to_string()))
                    .ok();
            }
        }
        Ok(Self {
            enr_root: enr_root.ok_or_else(|| TreeError::Malformed("missing e=".into()))?,
            link_root: link_root.ok_or_else(|| TreeError::Malformed("missing l=".into()))?,
            seq: seq.ok_or_else(|| TreeError::Malformed("missing seq=".into()))?,
            signature: sig.ok_or_else(|| TreeError::Malformed("missing sig=".into()))?,
        })
    }

    pub fn sign(enr_root: &str, link_root: &str, seq: u64, secret_key: &SecretKey) -> Self {
        let text = Self::signing_text(enr_root, link_root, seq);
        let digest = Keccak256::digest(text.as_bytes());
        let message = SecpMessage::from_digest_slice(&digest).expect("32-byte digest");
        let (recovery_id, raw) = SECP256K1
            .sign_ecdsa_recoverable(&message, secret_key)
            .serialize_compact();
        let mut signature = raw.to_vec();
        signature.push(recovery_id.to_i32() as u8);
        Self {
            enr_root: enr_root.to_string(),
            link_root: link_root.to_string(),
            seq,
            signature,
        }
    }

    pub fn verify(&self, expected_public_key: &PublicKey) -> Result<(), TreeError> {
        if self.signature.len() != 65 {
            return Err(TreeError::InvalidSignature);
        }
        let text = Self::signing_text(&self.enr_root, &self.link_root, self.seq);
        let digest = Keccak256::digest(text.as_bytes());
        let message = SecpMessage::from_digest_slice(&digest).expect("32-byte digest");
        let recovery_id = RecoveryId::from_i32(self.signature[64] as i32)
            .map_err(|_| TreeError::InvalidSignature)?;
        let recoverable = RecoverableSignature::from_compact(&self.signature[..64], recovery_id)
            .map_err(|_| TreeError::InvalidSignature)?;
        let recovered = SECP256K1
            .recover_ecdsa(&message, &recoverable)
            .map_err(|_| TreeError::InvalidSignature)?;
        if &recovered != expected_public_key {
            return Err(TreeError::InvalidSignature);
        }
        Ok(())
    }
}

impl Entry {
    pub fn parse(text: &str) -> Result<Self, TreeError> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix(BRANCH_PREFIX) {
            let children = rest
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            return Ok(Entry::Branch(children));
        }
        if let Some(rest) = text.strip_prefix(NODES_PREFIX) {
            let decoded = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, rest.trim())
                .map_err(|e| TreeError::Malformed(e.to_string()))?;
            let url = String::from_utf8(decoded).map_err(|e| TreeError::Malformed(e.to_string()))?;
            let record: NodeRecord = url.parse().map_err(|_| TreeError::Malformed(url))?;
            return Ok(Entry::Nodes(record));
        }
        if let Some(rest) = text.strip_prefix(LINK_PREFIX) {
            let (key_part, domain) = rest
                .split_once('@')
                .ok_or_else(|| TreeError::Malformed(text.to_string()))?;
            let public_key =
                base32_decode(key_part).ok_or_else(|| TreeError::Malformed(text.to_string()))?;
            return Ok(Entry::Link {
                public_key,
                domain: domain.to_string(),
            });
        }
        if text.starts_with(ROOT_PREFIX) {
            return Ok(Entry::Root(RootRecord::parse(text)?));
        }
        Err(TreeError::UnknownEntryKind)
    }

    pub fn to_text(&self) -> String {
        match self {
            Entry::Root(root) => root.to_text(),
            Entry::Branch(children) => format!("{BRANCH_PREFIX}{}", children.join(",")),
            Entry::Nodes(record) => {
                let url = record.to_string();
                let b64 = base64::Engine::encode(
                    &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                    url.as_bytes(),
                );
                format!("{NODES_PREFIX}{b64}")
            }
            Entry::Link { public_key, domain } => {
                format!("{LINK_PREFIX}{}@{domain}", base32_encode(public_key))
            }
        }
    }

    /// The DNS label this entry is published under: the first 26
    /// characters of unpadded base32(keccak256(entry_text)[..16]), per the
    /// EIP-1459 subdomain-hash convention.
    pub fn subdomain_label(&self) -> String {
        subdomain_label_for_text(&self.to_text())
    }
}

pub fn subdomain_label_for_text(text: &str) -> String {
    let digest = Keccak256::digest(text.as_bytes());
    let encoded = base32_encode(&digest[..16]);
    encoded.chars().take(26).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn root_record_signs_and_verifies() {
        let mut rng = rand::thread_rng();
        let mut sk_bytes = [0u8; 32];
        rng.fill_bytes(&mut sk_bytes);
        let secret_key = SecretKey::from_slice(&sk_bytes).unwrap();
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);

        let root = RootRecord::sign("ABC", "DEF", 3, &secret_key);
        root.verify(&public_key).unwrap();

        let tampered = RootRecord {
            seq: 4,
            ..root.clone()
        };
        assert!(tampered.verify(&public_key).is_err());
    }

    #[test]
    fn root_record_round_trips_through_text() {
        let mut rng = rand::thread_rng();
        let mut sk_bytes = [0u8; 32];
        rng.fill_bytes(&mut sk_bytes);
        let secret_key = SecretKey::from_slice(&sk_bytes).unwrap();
        let root = RootRecord::sign("ABC", "DEF", 1, &secret_key);
        let text = root.to_text();
        let parsed = RootRecord::parse(&text).unwrap();
        assert_eq!(parsed, root);
    }

    #[test]
    fn branch_entry_round_trips() {
        let entry = Entry::Branch(vec!["AAAA".to_string(), "BBBB".to_string()]);
        let text = entry.to_text();
        let parsed = Entry::parse(&text).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn nodes_entry_round_trips() {
        let record: NodeRecord = "node://0101010101010101010101010101010101010101010101010101010101010101@127.0.0.1:8001?discport=8002"
            .parse()
            .unwrap();
        let entry = Entry::Nodes(record);
        let text = entry.to_text();
        let parsed = Entry::parse(&text).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn link_entry_round_trips() {
        let entry = Entry::Link {
            public_key: vec![1, 2, 3, 4, 5],
            domain: "nodes.example.org".to_string(),
        };
        let text = entry.to_text();
        let parsed = Entry::parse(&text).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn subdomain_label_is_stable_and_bounded() {
        let label_one = subdomain_label_for_text("enrtree-branch:AAAA");
        let label_two = subdomain_label_for_text("enrtree-branch:AAAA");
        assert_eq!(label_one, label_two);
        assert!(label_one.len() <= 26);
    }
}
