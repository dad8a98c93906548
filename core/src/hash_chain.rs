//! Hash-chain tamper evidence for audit records
//!
//! Each link's hash covers the previous link's hash, so rewriting any past link
//! changes every digest after it. Verification walks backward from a chosen
//! head link to a genesis sentinel and reports every fault it meets on the way.
//!
//! # Security Model
//!
//! This is tamper-*detection*, not tamper-*prevention*. Anyone holding the
//! chain can recompute it from scratch. Links may carry an Ed25519 signature
//! over their unsigned hash ([`HashChain::create_signed_link`]), which binds
//! each record to a key the writer holds; a verifier with the public key
//! detects a recomputed chain. Without signatures, the head hash has to be
//! anchored somewhere the writer cannot reach.
//!
//! # Hash Input
//!
//! The digest input is the `:`-joined sequence
//! `previous_hash:payload:timestamp[:signature][:metadata]`, where `timestamp`
//! is decimal milliseconds and `metadata` is compact JSON with sorted keys.
//! The optional fields take part only when present and enabled in
//! [`ChainConfig`]. Changing this layout breaks compatibility with every
//! stored chain.
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::hash_chain::{HashChain, NewLink};
//!
//! let mut chain = HashChain::default();
//! let genesis = chain.genesis_hash("audit-log");
//! let first = chain.create_link(NewLink::new(&genesis, "user created"))?;
//! chain.create_link(NewLink::new(&first.hash, "role granted"))?;
//!
//! assert!(chain.verify_entire_chain(&genesis).valid);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use ed25519_dalek::{SigningKey, VerifyingKey};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::signing;

/// Separator between fields of the hash input.
pub const FIELD_DELIMITER: &str = ":";

/// Key/value metadata attached to a link. Keys serialize in sorted order.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Digest algorithm used to hash links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Return the lowercase name used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Text encoding for digests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestEncoding {
    #[default]
    Hex,
    Base64,
}

impl DigestEncoding {
    /// Return the lowercase name used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestEncoding::Hex => "hex",
            DigestEncoding::Base64 => "base64",
        }
    }

    fn encode(&self, bytes: &[u8]) -> String {
        match self {
            DigestEncoding::Hex => hex::encode(bytes),
            DigestEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// Per-chain hashing configuration.
///
/// Fixed for the lifetime of a chain: links hashed under one configuration
/// do not verify under another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub algorithm: HashAlgorithm,
    pub encoding: DigestEncoding,
    /// Whether a link's signature is part of its hash input
    pub include_signature: bool,
    /// Whether a link's metadata is part of its hash input
    pub include_metadata: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            encoding: DigestEncoding::Hex,
            include_signature: true,
            include_metadata: true,
        }
    }
}

/// One record in a hash chain.
///
/// Serializes as the flat record
/// `{hash, previousHash, payload, timestamp, signature?, metadata?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub hash: String,
    pub previous_hash: String,
    pub payload: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Caller-supplied fields for a link that has not been hashed yet.
#[derive(Debug, Clone, Default)]
pub struct NewLink {
    pub previous_hash: String,
    pub payload: String,
    /// Defaults to the current time when `None`
    pub timestamp: Option<i64>,
    pub signature: Option<String>,
    pub metadata: Option<Metadata>,
}

impl NewLink {
    pub fn new(previous_hash: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            previous_hash: previous_hash.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A structural fault found while walking a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainIssue {
    /// A `previous_hash` that does not resolve to a stored link
    MissingLink { hash: String },
    /// A link whose stored hash does not match its recomputed digest
    IntegrityFailure { hash: String },
    /// A link reached twice during one walk
    CircularReference { hash: String },
}

impl fmt::Display for ChainIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainIssue::MissingLink { hash } => write!(f, "Missing link: {}", hash),
            ChainIssue::IntegrityFailure { hash } => {
                write!(f, "Link integrity verification failed: {}", hash)
            }
            ChainIssue::CircularReference { hash } => {
                write!(f, "Circular reference detected at: {}", hash)
            }
        }
    }
}

/// Result of a backward chain walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Whether the walk reached genesis without any issue
    pub valid: bool,
    /// Hash of the first fault found walking backward from the head
    pub broken_at: Option<String>,
    /// Every fault found, in walk order
    pub issues: Vec<ChainIssue>,
    /// Number of links stored in the chain
    pub total_links: usize,
    /// Number of visited links whose digest checked out
    pub verified_links: usize,
}

impl ChainVerification {
    fn record(&mut self, issue: ChainIssue, at: &str) {
        self.valid = false;
        if self.broken_at.is_none() {
            self.broken_at = Some(at.to_string());
        }
        self.issues.push(issue);
    }
}

/// Summary statistics over a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {
    pub total_links: usize,
    pub earliest_timestamp: Option<i64>,
    pub latest_timestamp: Option<i64>,
    pub has_signatures: bool,
    pub has_metadata: bool,
    /// Mean gap between consecutive links in timestamp order (ms)
    pub average_interval_ms: Option<f64>,
}

/// Several stored links claiming the same predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fork {
    pub previous_hash: String,
    /// Hashes of the competing successors, in insertion order
    pub successors: Vec<String>,
}

/// An append-only, content-addressed chain of links.
///
/// The chain is plain owned data. Appends take `&mut self`, so sharing one
/// chain between writers requires the caller to wrap it in a lock.
#[derive(Debug, Clone, Default)]
pub struct HashChain {
    config: ChainConfig,
    links: HashMap<String, Link>,
    order: Vec<String>,
}

impl HashChain {
    /// Create an empty chain with the given hashing configuration.
    pub fn new(config: ChainConfig) -> Self {
        Self {
            config,
            links: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Rebuild a chain from links, trusting their stored hashes.
    ///
    /// Nothing is re-verified here; call [`HashChain::verify_entire_chain`]
    /// afterward when integrity matters. Duplicate hashes keep the first link.
    pub fn from_links(config: ChainConfig, links: impl IntoIterator<Item = Link>) -> Self {
        let mut chain = Self::new(config);
        for link in links {
            chain.insert(link);
        }
        chain
    }

    /// Union several chains into a new one.
    ///
    /// The first occurrence of a hash wins and insertion order is the
    /// concatenation of the inputs. Divergent branches are kept side by side;
    /// use [`HashChain::find_forks`] to surface them. The result takes the
    /// configuration of the first input.
    pub fn merge(chains: &[&HashChain]) -> Self {
        let config = chains
            .first()
            .map(|chain| chain.config.clone())
            .unwrap_or_default();
        let mut merged = Self::new(config);
        for chain in chains {
            for link in chain.all_links() {
                merged.insert(link.clone());
            }
        }
        merged
    }

    /// Hashing configuration of this chain.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drop every link.
    pub fn clear(&mut self) {
        self.links.clear();
        self.order.clear();
    }

    /// Derive a starting digest from an identifier and the current time.
    pub fn genesis_hash(&self, identifier: &str) -> String {
        self.genesis_hash_at(identifier, now_millis())
    }

    /// Derive a starting digest from an identifier and a fixed timestamp.
    pub fn genesis_hash_at(&self, identifier: &str, timestamp: i64) -> String {
        let input = format!("{}{}{}", identifier, FIELD_DELIMITER, timestamp);
        self.digest(input.as_bytes())
    }

    /// Hash and append one link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLink`] when `previous_hash` is empty.
    pub fn create_link(&mut self, new_link: NewLink) -> Result<Link> {
        let link = self.build_link(new_link)?;
        self.insert(link.clone());
        Ok(link)
    }

    /// Hash and append several links in input order.
    ///
    /// Each element's `previous_hash` is used as given; nothing is chained
    /// automatically. Every element is built before any is stored, so an
    /// error leaves the chain untouched.
    pub fn create_batch(&mut self, batch: Vec<NewLink>) -> Result<Vec<Link>> {
        let links = batch
            .into_iter()
            .map(|new_link| self.build_link(new_link))
            .collect::<Result<Vec<_>>>()?;

        for link in &links {
            self.insert(link.clone());
        }
        debug!("Appended batch of {} links", links.len());
        Ok(links)
    }

    /// Recompute a link's digest and compare it to the stored hash.
    pub fn verify_link(&self, link: &Link) -> bool {
        match self.compute_hash(
            &link.previous_hash,
            &link.payload,
            link.timestamp,
            link.signature.as_deref(),
            link.metadata.as_ref(),
        ) {
            Ok(computed) => computed == link.hash,
            Err(e) => {
                warn!("Failed to recompute hash for {}: {}", format_hash_short(&link.hash), e);
                false
            }
        }
    }

    /// Hash, sign and append one link.
    ///
    /// The signature covers the link's unsigned hash (see
    /// [`HashChain::unsigned_hash`]) and replaces any signature already set
    /// on `new_link`.
    pub fn create_signed_link(&mut self, new_link: NewLink, key: &SigningKey) -> Result<Link> {
        let mut new_link = new_link;
        let timestamp = new_link.timestamp.unwrap_or_else(now_millis);
        let unsigned = self.compute_hash(
            &new_link.previous_hash,
            &new_link.payload,
            timestamp,
            None,
            new_link.metadata.as_ref(),
        )?;

        new_link.timestamp = Some(timestamp);
        new_link.signature = Some(signing::sign_hash(key, &unsigned));
        self.create_link(new_link)
    }

    /// Digest of a link with its signature left out. This is what
    /// [`HashChain::create_signed_link`] signs. Equal to `link.hash` when the
    /// config excludes signatures from hashing.
    pub fn unsigned_hash(&self, link: &Link) -> Result<String> {
        self.compute_hash(
            &link.previous_hash,
            &link.payload,
            link.timestamp,
            None,
            link.metadata.as_ref(),
        )
    }

    /// Check a link's Ed25519 signature against its unsigned hash.
    ///
    /// An unsigned link fails. Any change to the hashed fields invalidates
    /// the signature.
    pub fn verify_link_signature(&self, link: &Link, key: &VerifyingKey) -> bool {
        let Some(signature) = link.signature.as_deref().filter(|sig| !sig.is_empty()) else {
            return false;
        };
        match self.unsigned_hash(link) {
            Ok(unsigned) => signing::verify_hash_signature(key, &unsigned, signature),
            Err(e) => {
                warn!("Failed to recompute hash for {}: {}", format_hash_short(&link.hash), e);
                false
            }
        }
    }

    /// Hashes of stored links, in insertion order, whose signature is
    /// missing or does not verify under `key`.
    pub fn find_unverified_signatures(&self, key: &VerifyingKey) -> Vec<String> {
        let failed: Vec<String> = self
            .all_links()
            .into_iter()
            .filter(|link| !self.verify_link_signature(link, key))
            .map(|link| link.hash.clone())
            .collect();

        if !failed.is_empty() {
            warn!("{} of {} links failed signature verification", failed.len(), self.len());
        }
        failed
    }

    /// Walk backward from `head` until `genesis_hash` is reached.
    ///
    /// A link failing its digest check is recorded and the walk continues
    /// through its predecessor. An unresolvable predecessor or a revisited
    /// hash ends the walk. The walk visits each stored hash at most once.
    pub fn verify_chain(&self, head: &Link, genesis_hash: &str) -> ChainVerification {
        let mut result = ChainVerification {
            valid: true,
            broken_at: None,
            issues: Vec::new(),
            total_links: self.len(),
            verified_links: 0,
        };

        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = head;

        loop {
            if !visited.insert(current.hash.as_str()) {
                result.record(
                    ChainIssue::CircularReference {
                        hash: current.hash.clone(),
                    },
                    &current.hash,
                );
                break;
            }

            if self.verify_link(current) {
                result.verified_links += 1;
            } else {
                result.record(
                    ChainIssue::IntegrityFailure {
                        hash: current.hash.clone(),
                    },
                    &current.hash,
                );
            }

            if current.previous_hash == genesis_hash {
                break;
            }

            match self.links.get(&current.previous_hash) {
                Some(previous) => current = previous,
                None => {
                    result.record(
                        ChainIssue::MissingLink {
                            hash: current.previous_hash.clone(),
                        },
                        &current.previous_hash,
                    );
                    break;
                }
            }
        }

        if !result.valid {
            warn!(
                "Chain verification failed at {} ({} issues)",
                result.broken_at.as_deref().map(format_hash_short).unwrap_or_default(),
                result.issues.len()
            );
        }
        result
    }

    /// Verify from the most recently inserted link.
    ///
    /// An empty chain is trivially valid.
    pub fn verify_entire_chain(&self, genesis_hash: &str) -> ChainVerification {
        match self.latest_link() {
            Some(head) => self.verify_chain(head, genesis_hash),
            None => ChainVerification {
                valid: true,
                broken_at: None,
                issues: Vec::new(),
                total_links: 0,
                verified_links: 0,
            },
        }
    }

    pub fn get_link(&self, hash: &str) -> Option<&Link> {
        self.links.get(hash)
    }

    /// All links in insertion order.
    pub fn all_links(&self) -> Vec<&Link> {
        self.order
            .iter()
            .filter_map(|hash| self.links.get(hash))
            .collect()
    }

    /// All links sorted by timestamp, ties kept in insertion order.
    pub fn chronological_links(&self) -> Vec<&Link> {
        let mut links = self.all_links();
        links.sort_by_key(|link| link.timestamp);
        links
    }

    pub fn latest_link(&self) -> Option<&Link> {
        self.order.last().and_then(|hash| self.links.get(hash))
    }

    pub fn genesis_link(&self) -> Option<&Link> {
        self.order.first().and_then(|hash| self.links.get(hash))
    }

    /// Links whose metadata contains every key of `query` with an equal value.
    ///
    /// Links without metadata never match.
    pub fn find_links_by_metadata(&self, query: &Metadata) -> Vec<&Link> {
        self.all_links()
            .into_iter()
            .filter(|link| match &link.metadata {
                Some(metadata) => query
                    .iter()
                    .all(|(key, value)| metadata.get(key) == Some(value)),
                None => false,
            })
            .collect()
    }

    /// Links with `start <= timestamp <= end`, in insertion order.
    pub fn find_links_in_time_range(&self, start: i64, end: i64) -> Vec<&Link> {
        self.all_links()
            .into_iter()
            .filter(|link| link.timestamp >= start && link.timestamp <= end)
            .collect()
    }

    pub fn stats(&self) -> ChainStats {
        let links = self.chronological_links();

        let average_interval_ms = if links.len() > 1 {
            // Caller-supplied timestamps may span the whole i64 range
            let total_gap: i128 = links
                .windows(2)
                .map(|pair| i128::from(pair[1].timestamp) - i128::from(pair[0].timestamp))
                .sum();
            Some(total_gap as f64 / (links.len() - 1) as f64)
        } else {
            None
        };

        ChainStats {
            total_links: links.len(),
            earliest_timestamp: links.first().map(|link| link.timestamp),
            latest_timestamp: links.last().map(|link| link.timestamp),
            has_signatures: links
                .iter()
                .any(|link| link.signature.as_deref().is_some_and(|sig| !sig.is_empty())),
            has_metadata: links.iter().any(|link| link.metadata.is_some()),
            average_interval_ms,
        }
    }

    /// Predecessor hashes claimed by more than one stored link.
    pub fn find_forks(&self) -> Vec<Fork> {
        let mut successors: HashMap<&str, Vec<String>> = HashMap::new();
        let mut first_seen: Vec<&str> = Vec::new();

        for link in self.all_links() {
            let entry = successors.entry(link.previous_hash.as_str()).or_default();
            if entry.is_empty() {
                first_seen.push(link.previous_hash.as_str());
            }
            entry.push(link.hash.clone());
        }

        first_seen
            .into_iter()
            .filter_map(|previous_hash| {
                let children = successors.remove(previous_hash)?;
                (children.len() > 1).then(|| Fork {
                    previous_hash: previous_hash.to_string(),
                    successors: children,
                })
            })
            .collect()
    }

    /// Export links in insertion order, one JSON record per line.
    pub fn to_json_lines(&self) -> Result<String> {
        let mut out = String::new();
        for link in self.all_links() {
            out.push_str(&serialize_link(link)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Import links written by [`HashChain::to_json_lines`], trusting their hashes.
    pub fn from_json_lines(config: ChainConfig, text: &str) -> Result<Self> {
        let links = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(deserialize_link)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_links(config, links))
    }

    fn build_link(&self, new_link: NewLink) -> Result<Link> {
        if new_link.previous_hash.is_empty() {
            return Err(Error::InvalidLink("previous hash must not be empty".to_string()));
        }

        let timestamp = new_link.timestamp.unwrap_or_else(now_millis);
        let hash = self.compute_hash(
            &new_link.previous_hash,
            &new_link.payload,
            timestamp,
            new_link.signature.as_deref(),
            new_link.metadata.as_ref(),
        )?;

        Ok(Link {
            hash,
            previous_hash: new_link.previous_hash,
            payload: new_link.payload,
            timestamp,
            signature: new_link.signature,
            metadata: new_link.metadata,
        })
    }

    fn insert(&mut self, link: Link) {
        if self.links.contains_key(&link.hash) {
            debug!("Skipping duplicate link {}", format_hash_short(&link.hash));
            return;
        }
        debug!("Appending link {}", format_hash_short(&link.hash));
        self.order.push(link.hash.clone());
        self.links.insert(link.hash.clone(), link);
    }

    fn compute_hash(
        &self,
        previous_hash: &str,
        payload: &str,
        timestamp: i64,
        signature: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> Result<String> {
        let mut parts: Vec<String> = vec![
            previous_hash.to_string(),
            payload.to_string(),
            timestamp.to_string(),
        ];

        // An empty signature is treated as absent
        if self.config.include_signature {
            if let Some(signature) = signature.filter(|sig| !sig.is_empty()) {
                parts.push(signature.to_string());
            }
        }

        if self.config.include_metadata {
            if let Some(metadata) = metadata {
                parts.push(serde_json::to_string(metadata)?);
            }
        }

        Ok(self.digest(parts.join(FIELD_DELIMITER).as_bytes()))
    }

    fn digest(&self, data: &[u8]) -> String {
        self.config
            .encoding
            .encode(&self.config.algorithm.digest(data))
    }
}

/// Serialize a link to its canonical JSON record.
pub fn serialize_link(link: &Link) -> Result<String> {
    Ok(serde_json::to_string(link)?)
}

/// Parse a link from its JSON record.
pub fn deserialize_link(text: &str) -> Result<Link> {
    Ok(serde_json::from_str(text)?)
}

/// Format a digest as a truncated string for compact display.
pub fn format_hash_short(hash: &str) -> String {
    let prefix: String = hash.chars().take(8).collect();
    format!("{}...", prefix)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
