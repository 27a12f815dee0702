//! Chain archive reader (§4.2): loads and incrementally refreshes the
//! node's immutable and volatile block archives, builds a lazy
//! hash-indexed lookup, and resolves a block's transactions.
//!
//! Grounded on `pallas-hardano`'s `storage::immutable` reader for the
//! secondary-index layout (`binary_layout::define_layout!`) and on
//! `pallas::ledger::traverse::MultiEraBlock` conventions for era-tagged
//! block decoding; the incremental refresh logic itself has no
//! `pallas-hardano` counterpart (that reader is one-shot) and is
//! written directly against `std::fs` metadata.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use binary_layout::prelude::*;
use tokio::sync::RwLock;

use crate::codec::{Decoder, DecodedValue};
use crate::error::ChainError;
use crate::model::BlockPtr;

define_layout!(secondary_entry_layout, BigEndian, {
    block_offset: u64,
    header_offset: u16,
    header_size: u16,
    checksum: u32,
    block_id: [u8; 32],
    slot_or_epoch: u64,
});

const ENTRY_SIZE: usize = 8 + 2 + 2 + 4 + 32 + 8;

#[derive(Debug, Clone, Copy)]
pub struct SecondaryIndexEntry {
    pub block_offset: u64,
    pub header_offset: u16,
    pub header_size: u16,
    pub checksum: u32,
    pub block_id: [u8; 32],
    pub slot_or_epoch: u64,
}

impl SecondaryIndexEntry {
    fn from_bytes(buf: &[u8]) -> Self {
        let view = secondary_entry_layout::View::new(buf);
        Self {
            block_offset: view.block_offset().read(),
            header_offset: view.header_offset().read(),
            header_size: view.header_size().read(),
            checksum: view.checksum().read(),
            block_id: *view.block_id(),
            slot_or_epoch: view.slot_or_epoch().read(),
        }
    }

    pub fn block_id_hex(&self) -> String {
        hex::encode(self.block_id)
    }
}

pub struct DecodedBlock {
    pub era: u8,
    pub raw_cbor: Vec<u8>,
    pub value: DecodedValue,
}

pub struct ImmChunk {
    pub mod_time: SystemTime,
    pub entries: Vec<SecondaryIndexEntry>,
}

impl ImmChunk {
    pub fn tip(&self) -> Option<[u8; 32]> {
        self.entries.last().map(|e| e.block_id)
    }
}

pub struct VolChunk {
    pub mod_time: SystemTime,
    pub blocks: Vec<DecodedBlock>,
}

/// Filename without directory and extension; if it contains `-`, take
/// the suffix; parse as decimal (§4.2 "Chunk IDs").
pub fn parse_chunk_id(path: &Path) -> Result<u32, ChainError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ChainError::UnparseableChunkId(path.display().to_string()))?;
    let numeric = match stem.rsplit_once('-') {
        Some((_, suffix)) => suffix,
        None => stem,
    };
    numeric
        .parse::<u32>()
        .map_err(|_| ChainError::UnparseableChunkId(path.display().to_string()))
}

fn read_secondary_entries(path: &Path) -> Result<Vec<SecondaryIndexEntry>, ChainError> {
    let bytes = fs::read(path)?;
    let mut entries = Vec::with_capacity(bytes.len() / ENTRY_SIZE);
    for chunk in bytes.chunks(ENTRY_SIZE) {
        if chunk.len() < ENTRY_SIZE {
            break;
        }
        entries.push(SecondaryIndexEntry::from_bytes(chunk));
    }
    Ok(entries)
}

/// Decodes one `[blockType, block]`-wrapped item from the current
/// decoder position, advancing it past the item. The era tag must be
/// one of `0..=7` (Byron-EBB through Conway). `raw_cbor` retains the
/// *whole* wrapped envelope (trusting the codec's mode-preserving
/// roundtrip, §8 P1) so it can be handed directly to
/// `pallas::ledger::traverse::MultiEraBlock::decode`, which itself
/// expects the `(era, block)` tuple shape.
pub fn decode_wrapped_block(dec: &mut Decoder) -> Result<DecodedBlock, ChainError> {
    let top = dec.decode()?;
    let DecodedValue::List(_, items) = &top else {
        return Err(ChainError::InvalidEnvelope);
    };
    if items.len() != 2 {
        return Err(ChainError::InvalidEnvelope);
    }
    let era = items[0]
        .as_int()
        .and_then(|n| {
            let (sign, bytes) = n.to_bytes_be();
            if sign == num_bigint::Sign::Minus || bytes.len() > 1 {
                None
            } else {
                Some(bytes.first().copied().unwrap_or(0))
            }
        })
        .ok_or(ChainError::InvalidEnvelope)?;
    if era > 7 {
        return Err(ChainError::UnrecognizedEra(era));
    }
    let block_value = items[1].clone();
    let raw_cbor = top.to_cbor_bytes();
    Ok(DecodedBlock { era, raw_cbor, value: block_value })
}

struct ImmutableStore {
    dir: PathBuf,
    chunks: Vec<Option<ImmChunk>>,
    block_index: HashMap<String, BlockPtr>,
    index_built: bool,
}

impl ImmutableStore {
    fn load(dir: PathBuf) -> Result<Self, ChainError> {
        let mut chunks: Vec<Option<ImmChunk>> = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("secondary") {
                    continue;
                }
                let idx = parse_chunk_id(&path)? as usize;
                let mod_time = entry.metadata()?.modified()?;
                let entries = read_secondary_entries(&path)?;
                if chunks.len() <= idx {
                    chunks.resize_with(idx + 1, || None);
                }
                chunks[idx] = Some(ImmChunk { mod_time, entries });
            }
        }
        Ok(Self { dir, chunks, block_index: HashMap::new(), index_built: false })
    }

    fn chunk_path(&self, idx: u32, ext: &str) -> PathBuf {
        self.dir.join(format!("{idx:05}.{ext}"))
    }

    fn ensure_index(&mut self) {
        if self.index_built {
            return;
        }
        for (ci, chunk) in self.chunks.iter().enumerate() {
            if let Some(c) = chunk {
                for (ei, e) in c.entries.iter().enumerate() {
                    self.block_index
                        .insert(e.block_id_hex(), BlockPtr { chunk_index: ci as u32, entry_index: ei as u32 });
                }
            }
        }
        self.index_built = true;
    }

    fn reindex_chunk(&mut self, idx: u32) {
        self.block_index.retain(|_, p| p.chunk_index != idx);
        if let Some(Some(c)) = self.chunks.get(idx as usize) {
            for (ei, e) in c.entries.iter().enumerate() {
                self.block_index
                    .insert(e.block_id_hex(), BlockPtr { chunk_index: idx, entry_index: ei as u32 });
            }
        }
    }

    fn sync(&mut self) -> Result<(), ChainError> {
        if let Some(highest) = self.chunks.iter().rposition(Option::is_some) {
            let path = self.chunk_path(highest as u32, "secondary");
            let mod_time = fs::metadata(&path)?.modified()?;
            let stale = self.chunks[highest].as_ref().is_some_and(|c| c.mod_time != mod_time);
            if stale {
                let entries = read_secondary_entries(&path)?;
                self.chunks[highest] = Some(ImmChunk { mod_time, entries });
                if self.index_built {
                    self.reindex_chunk(highest as u32);
                }
            }
        }

        let mut next = self.chunks.len() as u32;
        loop {
            let path = self.chunk_path(next, "secondary");
            if !path.exists() {
                break;
            }
            let mod_time = fs::metadata(&path)?.modified()?;
            let entries = read_secondary_entries(&path)?;
            self.chunks.resize_with((next + 1) as usize, || None);
            self.chunks[next as usize] = Some(ImmChunk { mod_time, entries });
            if self.index_built {
                self.reindex_chunk(next);
            }
            next += 1;
        }
        Ok(())
    }

    fn find(&self, block_id: &str) -> Option<BlockPtr> {
        self.block_index.get(block_id).copied()
    }

    fn read_block(&self, ptr: BlockPtr) -> Result<DecodedBlock, ChainError> {
        let chunk = self.chunks.get(ptr.chunk_index as usize).and_then(Option::as_ref).ok_or(ChainError::BlockNotFound)?;
        let entry = chunk.entries.get(ptr.entry_index as usize).ok_or(ChainError::BlockNotFound)?;
        let next_offset = chunk.entries.get(ptr.entry_index as usize + 1).map(|e| e.block_offset);

        let path = self.chunk_path(ptr.chunk_index, "chunk");
        let mut file = fs::File::open(&path)?;
        let file_len = file.metadata()?.len();
        let end = next_offset.unwrap_or(file_len);
        let len = (end - entry.block_offset) as usize;

        file.seek(SeekFrom::Start(entry.block_offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;

        let mut dec = Decoder::new(&buf);
        decode_wrapped_block(&mut dec)
    }
}

struct VolatileStore {
    dir: PathBuf,
    chunks: HashMap<u32, VolChunk>,
    latest_chunk_id: Option<u32>,
    block_index: HashMap<String, BlockPtr>,
    index_built: bool,
}

impl VolatileStore {
    fn load(dir: PathBuf) -> Result<Self, ChainError> {
        let mut chunks = HashMap::new();
        let mut latest_chunk_id = None;
        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("dat") {
                    continue;
                }
                let idx = parse_chunk_id(&path)?;
                let mod_time = entry.metadata()?.modified()?;
                let blocks = Self::load_chunk_blocks(&path);
                latest_chunk_id = Some(latest_chunk_id.map_or(idx, |cur: u32| cur.max(idx)));
                chunks.insert(idx, VolChunk { mod_time, blocks });
            }
        }
        Ok(Self { dir, chunks, latest_chunk_id, block_index: HashMap::new(), index_built: false })
    }

    /// Builds the hash index over every chunk loaded so far, the
    /// volatile-store counterpart to `ImmutableStore::ensure_index`.
    /// Without this, chunks loaded at startup (as opposed to ones
    /// `sync()` later reindexes) never appear in `block_index`.
    fn ensure_index(&mut self) {
        if self.index_built {
            return;
        }
        let indices: Vec<u32> = self.chunks.keys().copied().collect();
        for idx in indices {
            self.reindex_chunk(idx);
        }
        self.index_built = true;
    }

    /// Decodes successive wrapped blocks until exhausted. A
    /// block-decode error logs and stops the current file but does
    /// not abort startup (§4.2 "Initial load").
    fn load_chunk_blocks(path: &Path) -> Vec<DecodedBlock> {
        let mut blocks = Vec::new();
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read volatile chunk");
                return blocks;
            }
        };
        let mut dec = Decoder::new(&bytes);
        while !dec.is_empty() {
            match decode_wrapped_block(&mut dec) {
                Ok(b) => blocks.push(b),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "stopping volatile chunk decode");
                    break;
                }
            }
        }
        blocks
    }

    fn chunk_path(&self, idx: u32) -> PathBuf {
        self.dir.join(format!("blocks-{idx:04}.dat"))
    }

    fn reindex_chunk(&mut self, idx: u32) {
        self.block_index.retain(|_, p| p.chunk_index != idx);
        if let Some(chunk) = self.chunks.get(&idx) {
            for (ei, b) in chunk.blocks.iter().enumerate() {
                if let Some(id) = block_id_of(b) {
                    self.block_index.insert(id, BlockPtr { chunk_index: idx, entry_index: ei as u32 });
                }
            }
        }
    }

    fn sync(&mut self) -> Result<(), ChainError> {
        if let Some(highest) = self.latest_chunk_id {
            let path = self.chunk_path(highest);
            if path.exists() {
                let mod_time = fs::metadata(&path)?.modified()?;
                let stale = self.chunks.get(&highest).is_some_and(|c| c.mod_time != mod_time);
                if stale {
                    let blocks = Self::load_chunk_blocks(&path);
                    self.chunks.insert(highest, VolChunk { mod_time, blocks });
                    if self.index_built {
                        self.reindex_chunk(highest);
                    }
                }
            }
        }

        let mut next = self.latest_chunk_id.map(|n| n + 1).unwrap_or(0);
        loop {
            let path = self.chunk_path(next);
            if !path.exists() {
                break;
            }
            let mod_time = fs::metadata(&path)?.modified()?;
            let blocks = Self::load_chunk_blocks(&path);
            self.chunks.insert(next, VolChunk { mod_time, blocks });
            if self.index_built {
                self.reindex_chunk(next);
            }
            self.latest_chunk_id = Some(next);
            next += 1;
        }
        Ok(())
    }

    /// Removes entries in the block index whose backing chunk file no
    /// longer exists on disk (§4.2 "Tip refresh" step 3, volatile only).
    fn prune_missing_chunks(&mut self) {
        let missing: Vec<u32> = self
            .chunks
            .keys()
            .copied()
            .filter(|idx| !self.chunk_path(*idx).exists())
            .collect();
        for idx in missing {
            self.chunks.remove(&idx);
            self.block_index.retain(|_, p| p.chunk_index != idx);
        }
    }

    fn find(&self, block_id: &str) -> Option<BlockPtr> {
        self.block_index.get(block_id).copied()
    }

    fn read_block(&self, ptr: BlockPtr) -> Result<&DecodedBlock, ChainError> {
        self.chunks
            .get(&ptr.chunk_index)
            .and_then(|c| c.blocks.get(ptr.entry_index as usize))
            .ok_or(ChainError::BlockNotFound)
    }
}

fn block_id_of(block: &DecodedBlock) -> Option<String> {
    let parsed = pallas::ledger::traverse::MultiEraBlock::decode(&block.raw_cbor).ok()?;
    Some(hex::encode(parsed.hash()))
}

pub struct ChainStore {
    immutable: RwLock<ImmutableStore>,
    volatile: RwLock<VolatileStore>,
    loaded_tip: RwLock<Option<String>>,
}

impl ChainStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ChainError> {
        let root = root.as_ref();
        let immutable = ImmutableStore::load(root.join("immutable"))?;
        let volatile = VolatileStore::load(root.join("volatile"))?;
        Ok(Self {
            immutable: RwLock::new(immutable),
            volatile: RwLock::new(volatile),
            loaded_tip: RwLock::new(None),
        })
    }

    /// §4.2 "Tip refresh": a no-op if the tip hasn't moved, a cheap
    /// pointer update if the new tip is already indexed, otherwise a
    /// full incremental resync of both stores.
    pub async fn notify_tip(&self, tip: &str) -> Result<(), ChainError> {
        if self.loaded_tip.read().await.as_deref() == Some(tip) {
            return Ok(());
        }

        if self.volatile.read().await.find(tip).is_some() {
            *self.loaded_tip.write().await = Some(tip.to_string());
            return Ok(());
        }

        self.immutable.write().await.sync()?;
        {
            let mut vol = self.volatile.write().await;
            vol.sync()?;
            vol.prune_missing_chunks();
        }
        *self.loaded_tip.write().await = Some(tip.to_string());
        Ok(())
    }

    /// Consults the immutable index first (hotter), then volatile.
    pub async fn block(&self, block_id: &str) -> Result<DecodedBlock, ChainError> {
        let ptr = {
            let mut imm = self.immutable.write().await;
            imm.ensure_index();
            imm.find(block_id)
        };
        if let Some(ptr) = ptr {
            let imm = self.immutable.read().await;
            return imm.read_block(ptr);
        }

        let ptr = {
            let mut vol = self.volatile.write().await;
            vol.ensure_index();
            vol.find(block_id)
        };
        let vol = self.volatile.read().await;
        let ptr = ptr.ok_or(ChainError::BlockNotFound)?;
        vol.read_block(ptr).map(|b| DecodedBlock { era: b.era, raw_cbor: b.raw_cbor.clone(), value: b.value.clone() })
    }

    /// `BlockTx(blockID, txIndex)`: resolves the block, then the
    /// transaction at `txIndex` within it, returned as its own
    /// canonical tx-envelope bytes via `pallas`'s multi-era traversal.
    pub async fn block_tx(&self, block_id: &str, tx_index: i64) -> Result<Vec<u8>, ChainError> {
        if tx_index < 0 {
            return Err(ChainError::InvalidArgument("negative transaction index".into()));
        }
        let block = self.block(block_id).await?;
        let parsed = pallas::ledger::traverse::MultiEraBlock::decode(&block.raw_cbor)
            .map_err(|_| ChainError::InvalidEnvelope)?;
        let txs = parsed.txs();
        let tx = txs.get(tx_index as usize).ok_or(ChainError::BlockNotFound)?;
        tx.encode().map_err(|_| ChainError::InvalidEnvelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn s3_chunk_id_parsing() {
        assert_eq!(parse_chunk_id(Path::new("00001.secondary")).unwrap(), 1);
        assert_eq!(parse_chunk_id(Path::new("/var/db/00001.secondary")).unwrap(), 1);
        assert_eq!(parse_chunk_id(Path::new("blocks-0002.dat")).unwrap(), 2);
        assert_eq!(parse_chunk_id(Path::new("/files/blocks-0010.other")).unwrap(), 10);
        assert!(parse_chunk_id(Path::new("bad")).is_err());
        assert!(parse_chunk_id(Path::new("blocks-xyz.dat")).is_err());
    }

    /// Packs one fixed-width entry by hand (BigEndian, matching
    /// `secondary_entry_layout`) rather than through `binary_layout`'s
    /// mutable view API, which this codebase only ever uses read-only.
    fn write_secondary_entry(buf: &mut Vec<u8>, block_offset: u64, block_id: u8, slot: u64) {
        buf.extend_from_slice(&block_offset.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // header_offset
        buf.extend_from_slice(&0u16.to_be_bytes()); // header_size
        buf.extend_from_slice(&0u32.to_be_bytes()); // checksum
        buf.extend_from_slice(&[block_id; 32]);
        buf.extend_from_slice(&slot.to_be_bytes());
    }

    #[tokio::test]
    async fn p4_block_resolution_by_id() {
        let dir = tempdir().unwrap();
        let imm_dir = dir.path().join("immutable");
        fs::create_dir_all(&imm_dir).unwrap();

        let era = DecodedValue::int(6);
        let body = DecodedValue::list_pref(vec![]);
        let block = DecodedValue::tuple(vec![body]);
        let wrapped = DecodedValue::tuple(vec![era, block]).to_cbor_bytes();

        fs::write(imm_dir.join("00000.chunk"), &wrapped).unwrap();
        let mut secondary = Vec::new();
        write_secondary_entry(&mut secondary, 0, 0xAB, 100);
        fs::write(imm_dir.join("00000.secondary"), &secondary).unwrap();

        let store = ChainStore::open(dir.path()).unwrap();
        let block_id = hex::encode([0xABu8; 32]);
        let resolved = store.block(&block_id).await.unwrap();
        assert_eq!(resolved.era, 6);
    }

    /// Regression for the volatile counterpart of P4: a block loaded at
    /// `ChainStore::open()` time (not via a later `sync()`) must still be
    /// reachable through `block()`. Before `VolatileStore::ensure_index`
    /// existed, `block_index` stayed empty until `sync()` happened to
    /// reindex a chunk, so every volatile lookup at startup missed.
    #[tokio::test]
    async fn p4_volatile_index_builds_lazily_at_startup() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("immutable")).unwrap();
        let vol_dir = dir.path().join("volatile");
        fs::create_dir_all(&vol_dir).unwrap();

        let era = DecodedValue::int(6);
        let body = DecodedValue::list_pref(vec![]);
        let block = DecodedValue::tuple(vec![body]);
        let wrapped = DecodedValue::tuple(vec![era, block]).to_cbor_bytes();
        fs::write(vol_dir.join("blocks-0000.dat"), &wrapped).unwrap();

        let store = ChainStore::open(dir.path()).unwrap();
        assert!(!store.volatile.read().await.index_built);

        let _ = store.block(&hex::encode([0u8; 32])).await;

        assert!(
            store.volatile.read().await.index_built,
            "block() must build the volatile index on first lookup, not only after sync()"
        );
    }

    #[tokio::test]
    async fn block_not_found_is_an_error() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("immutable")).unwrap();
        fs::create_dir_all(dir.path().join("volatile")).unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let err = store.block(&"00".repeat(32)).await.unwrap_err();
        assert!(matches!(err, ChainError::BlockNotFound));
    }

    #[tokio::test]
    async fn notify_tip_is_noop_when_unchanged() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("immutable")).unwrap();
        fs::create_dir_all(dir.path().join("volatile")).unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        store.notify_tip("deadbeef").await.unwrap();
        store.notify_tip("deadbeef").await.unwrap();
        assert_eq!(store.loaded_tip.read().await.as_deref(), Some("deadbeef"));
    }
}
