//! End-to-end flows across the trees, the storage seam and the cache
//! tiers: known-answer root composition, weight-indexed proofs, path
//! proofs over large key sets, chunked verkle values and deep ancestor
//! reads.

use state_store::domain::cache::{new_block_txn_caches, Block};
use state_store::domain::hashing::{empty_state_hash, raw_hash, Hash};
use state_store::domain::verkle::proof::verify_proof_presence_file_meta;
use state_store::domain::verkle::tree_key::HEADER_STORAGE_CAP_BYTES;
use state_store::{
    CancelToken, MemoryDb, StateCache, StorageAdapter, TrieError, VerkleTrie, WeightedMerkleTrie,
};
use std::sync::Arc;

fn nib(s: &str) -> Vec<u8> {
    s.bytes().map(|b| b - b'0').collect()
}

fn new_wmpt() -> WeightedMerkleTrie {
    WeightedMerkleTrie::new(None, Arc::new(MemoryDb::new()))
}

// Hash-composition helpers mirroring the canonical node forms.
fn leaf_hash(weight: u64, value: &[u8]) -> Hash {
    let mut m = weight.to_be_bytes().to_vec();
    m.extend_from_slice(value);
    raw_hash(&m)
}

fn short_hash(key: &[u8], child: Hash) -> Hash {
    let mut m = key.to_vec();
    m.extend_from_slice(&child);
    raw_hash(&m)
}

fn branch_hash(weight: u64, children: &[(usize, Hash)]) -> Hash {
    let mut slots = [empty_state_hash(); 16];
    for (slot, hash) in children {
        slots[*slot] = *hash;
    }
    let mut m = weight.to_be_bytes().to_vec();
    for slot in slots {
        m.extend_from_slice(&slot);
    }
    raw_hash(&m)
}

#[test]
fn wmpt_round_trip_matches_known_composition() {
    let mut trie = new_wmpt();
    trie.put(&nib("00000"), b"hello".to_vec(), 10).unwrap();
    trie.put(&nib("00200"), b"hi".to_vec(), 9).unwrap();
    trie.put(&nib("00300"), b"hello".to_vec(), 8).unwrap();
    trie.put(&nib("00220"), b"hello".to_vec(), 7).unwrap();
    trie.put(&nib("00000"), b"hi".to_vec(), 6).unwrap();
    assert_eq!(trie.weight(), 30);

    // Bottom-up: a branch at prefix 002 over children 0 and 2 (weights 9
    // and 7), nested inside the top branch under the shared 00 prefix.
    let inner = branch_hash(
        16,
        &[
            (0, short_hash(&[0], leaf_hash(9, b"hi"))),
            (2, short_hash(&[0], leaf_hash(7, b"hello"))),
        ],
    );
    let top = branch_hash(
        30,
        &[
            (0, short_hash(&nib("00"), leaf_hash(6, b"hi"))),
            (2, inner),
            (3, short_hash(&nib("00"), leaf_hash(8, b"hello"))),
        ],
    );
    let expected_root = short_hash(&nib("00"), top);
    assert_eq!(trie.root(), expected_root);
}

#[test]
fn wmpt_weight_indexed_proof_end_to_end() {
    let mut trie = new_wmpt();
    trie.put(&nib("00000"), b"hello".to_vec(), 10).unwrap();
    trie.put(&nib("00200"), b"hi".to_vec(), 9).unwrap();
    trie.put(&nib("00300"), b"hello".to_vec(), 8).unwrap();
    trie.put(&nib("00220"), b"hello".to_vec(), 7).unwrap();
    trie.put(&nib("00000"), b"hi".to_vec(), 6).unwrap();

    let (key, proof) = trie.get_block_proof(22).unwrap();
    assert_eq!(key, nib("00220"));

    let (root, value) = WeightedMerkleTrie::verify_block_proof(22, &proof).unwrap();
    assert_eq!(root, trie.root());
    assert_eq!(value, b"hello");
}

#[test]
fn wmpt_path_proof_supports_detached_delete() {
    let keys: Vec<Vec<u8>> = (0..100)
        .map(|i| raw_hash(i.to_string().as_bytes()).to_vec())
        .collect();
    let mut trie = new_wmpt();
    for (i, key) in keys.iter().enumerate() {
        trie.update(key, &[i as u8], i as u64).unwrap();
    }
    let original_root = trie.root();

    let proof = trie
        .get_path(std::slice::from_ref(&keys[50]), &CancelToken::new())
        .unwrap();

    let mut partial = new_wmpt();
    partial.deserialize(&proof).unwrap();
    assert_eq!(partial.root(), original_root);
    assert_eq!(partial.get(&keys[50]).unwrap(), vec![50u8]);

    // Deleting the proven key succeeds on the partial tree and moves the
    // root away from the original by exactly that subtree.
    partial.update(&keys[50], &[], 0).unwrap();
    assert_ne!(partial.root(), original_root);
    assert_eq!(partial.get(&keys[50]), Err(TrieError::KeyNotFound));
    assert_eq!(partial.weight(), trie.weight() - 50);
}

#[test]
fn wmpt_persists_and_survives_process_restart() {
    let db = Arc::new(MemoryDb::new());
    let keys: Vec<Vec<u8>> = (0..50)
        .map(|i| raw_hash(format!("account-{i}").as_bytes()).to_vec())
        .collect();

    let (root, weight) = {
        let mut trie = WeightedMerkleTrie::new(None, db.clone());
        for (i, key) in keys.iter().enumerate() {
            trie.update(key, format!("balance-{i}").as_bytes(), i as u64 + 1)
                .unwrap();
        }
        trie.save_root();
        let root = trie.root();
        let weight = trie.weight();
        trie.commit(1).unwrap().commit(true).unwrap();
        (root, weight)
    };

    // "Restart": a new trie over the same adapter, pointed at the root.
    let mut trie = WeightedMerkleTrie::new(None, db.clone());
    trie.set_root(root, weight);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(trie.get(key).unwrap(), format!("balance-{i}").as_bytes());
    }

    // Weight proofs keep working against persisted subtrees.
    let (_, proof) = trie.get_block_proof(weight - 1).unwrap();
    let (computed, _) = WeightedMerkleTrie::verify_block_proof(weight - 1, &proof).unwrap();
    assert_eq!(computed, root);
    assert!(db.has(&root));
}

#[test]
fn verkle_value_spans_header_and_main_storage() {
    let db = Arc::new(MemoryDb::new());
    let mut trie = VerkleTrie::new(b"allocation-9", db.clone());
    let path_hash = raw_hash(b"files/movie.mkv");

    // Header exhausted plus exactly one main-storage chunk.
    let len = HEADER_STORAGE_CAP_BYTES as usize + 32;
    let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
    let content_root = raw_hash(&data);

    trie.insert_file_meta(&path_hash, &content_root, &data).unwrap();
    let root = trie.commit_and_flush().unwrap();

    let reopened = VerkleTrie::new(b"allocation-9", db);
    assert_eq!(reopened.get_file_meta(&path_hash).unwrap(), Some(data));
    assert_eq!(
        reopened.get_file_meta_root_hash(&path_hash).unwrap(),
        Some(content_root)
    );

    let mut prover = reopened;
    let (proof, diff) = prover.make_proof_file_meta(&[path_hash.to_vec()]).unwrap();
    verify_proof_presence_file_meta(&proof, &diff, &root, &[path_hash.to_vec()]).unwrap();

    prover.delete_file_meta(&path_hash).unwrap();
    assert!(prover.get_file_meta(&path_hash).unwrap().is_none());
    assert!(prover.get_file_meta_root_hash(&path_hash).unwrap().is_none());
}

#[test]
fn state_cache_deep_ancestor_walk() {
    let sc = Arc::new(StateCache::<String>::new());

    let commit_block = |hash: &str, prev: &str, round: i64, write: Option<(&str, &str)>| {
        let (bc, tc) = new_block_txn_caches(
            Arc::clone(&sc),
            Block {
                round,
                hash: hash.into(),
                prev_hash: prev.into(),
            },
        );
        if let Some((key, value)) = write {
            tc.set(key, &value.to_string());
            tc.commit();
        }
        bc.commit();
    };

    commit_block("hash1", "", 1, Some(("k1", "v1")));
    for i in 2..=49 {
        commit_block(&format!("hash{i}"), &format!("hash{}", i - 1), i, None);
    }
    commit_block("hash50", "hash49", 50, Some(("k1", "v50")));
    for i in 51..=101 {
        commit_block(&format!("hash{i}"), &format!("hash{}", i - 1), i, None);
    }

    // 51 hops back lands on the hash50 write, well inside the depth bound.
    assert_eq!(sc.get("k1", "hash101"), Some("v50".into()));
    // A key that was never written within reach stays absent.
    assert!(sc.get("k0", "hash101").is_none());
    // Earlier blocks resolve to the earlier write.
    assert_eq!(sc.get("k1", "hash49"), Some("v1".into()));
}

#[test]
fn trie_and_cache_compose_per_block() {
    // One block's worth of state flows: transaction writes go through the
    // cache tiers while the authoritative trie ingests the same updates.
    let db = Arc::new(MemoryDb::new());
    let mut trie = WeightedMerkleTrie::new(None, db);
    let sc = Arc::new(StateCache::<Vec<u8>>::new());
    let (bc, tc) = new_block_txn_caches(
        Arc::clone(&sc),
        Block {
            round: 7,
            hash: "block-7".into(),
            prev_hash: "block-6".into(),
        },
    );

    for i in 0u8..8 {
        let key = raw_hash(&[i]);
        let value = vec![i; 4];
        trie.update(&key, &value, u64::from(i) + 1).unwrap();
        tc.set(&hex::encode(key), &value);
    }
    tc.commit();
    bc.commit();
    trie.commit(1).unwrap().commit(false).unwrap();

    let root = trie.root();
    for i in 0u8..8 {
        let key = raw_hash(&[i]);
        assert_eq!(sc.get(&hex::encode(key), "block-7"), Some(vec![i; 4]));
        assert_eq!(trie.get(&key).unwrap(), vec![i; 4]);
    }
    assert_eq!(trie.root(), root);
}
