//! End-to-end ledger tests: mining, persistence, spending, the UTXO index
//! and block-level synchronization between independent chains.

use tempfile::tempdir;
use tinycoin::core::{Block, Blockchain, ProofOfWork, Transaction};
use tinycoin::error::LedgerError;
use tinycoin::storage::UTXOSet;
use tinycoin::wallet::Wallet;
use tinycoin::{utils, ADDRESS_CHECK_SUM_LEN, SUBSIDY};

const TEST_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

fn get_balance(utxo_set: &UTXOSet, address: &str) -> u64 {
    let payload = utils::base58_decode(address).unwrap();
    let pub_key_hash = &payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN];
    let utxos = utxo_set.find_utxo(pub_key_hash).unwrap();
    utxos.iter().map(|utxo| utxo.get_value()).sum()
}

fn create_chain(dir: &std::path::Path, name: &str, address: &str) -> Blockchain {
    let db_path = dir.join(name);
    Blockchain::create_blockchain_with_path(address, db_path.to_str().unwrap()).unwrap()
}

#[test]
fn test_proof_of_work_validation() {
    let coinbase_tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
    let block = Block::new_block("prev_hash".to_string(), &[coinbase_tx], 1).unwrap();

    assert!(ProofOfWork::validate(&block));
}

#[test]
fn test_blockchain_creation_and_mining() {
    let temp_dir = tempdir().unwrap();
    let blockchain = create_chain(temp_dir.path(), "chain", TEST_ADDRESS);

    assert_eq!(blockchain.get_best_height().unwrap(), 0);

    let coinbase_tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
    let block = blockchain.mine_block(&[coinbase_tx]).unwrap();

    assert_eq!(block.get_height(), 1);
    assert_eq!(blockchain.get_best_height().unwrap(), 1);
    assert_eq!(blockchain.get_tip_hash(), block.get_hash());
    assert!(ProofOfWork::validate(&block));
}

#[test]
fn test_creating_over_existing_chain_fails() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("chain");
    let db_path = db_path.to_str().unwrap();

    let blockchain = Blockchain::create_blockchain_with_path(TEST_ADDRESS, db_path).unwrap();
    drop(blockchain);

    assert!(Blockchain::create_blockchain_with_path(TEST_ADDRESS, db_path).is_err());
}

#[test]
fn test_blockchain_persistence() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("persistent_chain");
    let db_path = db_path.to_str().unwrap();

    {
        let blockchain = Blockchain::create_blockchain_with_path(TEST_ADDRESS, db_path).unwrap();
        for _ in 0..3 {
            let coinbase_tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
            blockchain.mine_block(&[coinbase_tx]).unwrap();
        }
        assert_eq!(blockchain.get_best_height().unwrap(), 3);
    }

    {
        let blockchain = Blockchain::open_blockchain_with_path(db_path).unwrap();
        assert_eq!(blockchain.get_best_height().unwrap(), 3);

        let coinbase_tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
        blockchain.mine_block(&[coinbase_tx]).unwrap();
        assert_eq!(blockchain.get_best_height().unwrap(), 4);
    }
}

#[test]
fn test_open_missing_chain_fails() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("no_chain_here");
    assert!(Blockchain::open_blockchain_with_path(db_path.to_str().unwrap()).is_err());
}

#[test]
fn test_iterator_terminates_at_genesis() {
    let temp_dir = tempdir().unwrap();
    let blockchain = create_chain(temp_dir.path(), "chain", TEST_ADDRESS);

    for _ in 0..2 {
        let coinbase_tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
        blockchain.mine_block(&[coinbase_tx]).unwrap();
    }

    let blocks: Vec<Block> = blockchain.iterator().collect();
    assert_eq!(blocks.len(), 3);
    // Tip first, genesis last, with an empty previous hash closing the walk.
    assert_eq!(blocks[0].get_hash(), blockchain.get_tip_hash());
    assert!(blocks[2].get_pre_block_hash().is_empty());
}

#[test]
fn test_add_block_is_idempotent_and_height_gated() {
    let temp_dir = tempdir().unwrap();
    let blockchain = create_chain(temp_dir.path(), "chain", TEST_ADDRESS);

    let coinbase_tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
    let block = blockchain.mine_block(&[coinbase_tx]).unwrap();
    let tip = blockchain.get_tip_hash();

    // Re-adding the tip block changes nothing.
    blockchain.add_block(&block).unwrap();
    assert_eq!(blockchain.get_tip_hash(), tip);
    assert_eq!(blockchain.get_best_height().unwrap(), 1);

    // A block no higher than the tip is stored but does not move the tip.
    let coinbase_tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
    let side_block = Block::new_block("elsewhere".to_string(), &[coinbase_tx], 1).unwrap();
    blockchain.add_block(&side_block).unwrap();
    assert_eq!(blockchain.get_tip_hash(), tip);
    assert!(blockchain.block_exists(side_block.get_hash()).unwrap());

    // A higher block does.
    let coinbase_tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
    let higher_block = Block::new_block(tip.clone(), &[coinbase_tx], 2).unwrap();
    blockchain.add_block(&higher_block).unwrap();
    assert_eq!(blockchain.get_tip_hash(), higher_block.get_hash());
    assert_eq!(blockchain.get_best_height().unwrap(), 2);
}

#[test]
fn test_genesis_reward_is_spendable_balance() {
    let temp_dir = tempdir().unwrap();
    let sender = Wallet::new().unwrap();
    let blockchain = create_chain(temp_dir.path(), "chain", &sender.get_address());

    let utxo_set = UTXOSet::new(blockchain);
    utxo_set.reindex().unwrap();

    assert_eq!(get_balance(&utxo_set, &sender.get_address()), SUBSIDY);
}

#[test]
fn test_spend_produces_payment_and_change() {
    let temp_dir = tempdir().unwrap();
    let sender = Wallet::new().unwrap();
    let recipient = Wallet::new().unwrap();
    let blockchain = create_chain(temp_dir.path(), "chain", &sender.get_address());

    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    let tx =
        Transaction::new_utxo_transaction(&sender, &recipient.get_address(), 4, &utxo_set).unwrap();
    assert!(!tx.is_coinbase());
    assert!(tx.verify(&blockchain));

    let values: Vec<u64> = tx.get_vout().iter().map(|out| out.get_value()).collect();
    assert_eq!(values.iter().sum::<u64>(), SUBSIDY);
    assert!(values.contains(&4));
    assert!(values.contains(&(SUBSIDY - 4)));

    let block = blockchain.mine_block(&[tx]).unwrap();
    utxo_set.update(&block).unwrap();

    assert_eq!(get_balance(&utxo_set, &sender.get_address()), SUBSIDY - 4);
    assert_eq!(get_balance(&utxo_set, &recipient.get_address()), 4);
}

#[test]
fn test_insufficient_funds_is_reported() {
    let temp_dir = tempdir().unwrap();
    let sender = Wallet::new().unwrap();
    let recipient = Wallet::new().unwrap();
    let blockchain = create_chain(temp_dir.path(), "chain", &sender.get_address());

    let utxo_set = UTXOSet::new(blockchain);
    utxo_set.reindex().unwrap();

    let result =
        Transaction::new_utxo_transaction(&sender, &recipient.get_address(), 1000, &utxo_set);
    match result {
        Err(LedgerError::InsufficientFunds {
            required,
            available,
        }) => {
            assert_eq!(required, 1000);
            assert_eq!(available, SUBSIDY);
        }
        other => panic!("Expected InsufficientFunds, got {other:?}"),
    }
}

#[test]
fn test_update_matches_full_reindex() {
    let temp_dir = tempdir().unwrap();
    let sender = Wallet::new().unwrap();
    let recipient = Wallet::new().unwrap();
    let blockchain = create_chain(temp_dir.path(), "chain", &sender.get_address());

    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    let tx =
        Transaction::new_utxo_transaction(&sender, &recipient.get_address(), 7, &utxo_set).unwrap();
    let block = blockchain.mine_block(&[tx]).unwrap();
    utxo_set.update(&block).unwrap();

    let sender_after_update = get_balance(&utxo_set, &sender.get_address());
    let recipient_after_update = get_balance(&utxo_set, &recipient.get_address());

    utxo_set.reindex().unwrap();

    assert_eq!(get_balance(&utxo_set, &sender.get_address()), sender_after_update);
    assert_eq!(
        get_balance(&utxo_set, &recipient.get_address()),
        recipient_after_update
    );
    assert_eq!(sender_after_update, SUBSIDY - 7);
    assert_eq!(recipient_after_update, 7);
}

// Block-level analog of chain sync: every block of one chain is replayed
// into a fresh chain through the same entry point the network handler uses.
#[test]
fn test_chains_converge_by_replaying_blocks() {
    let temp_dir = tempdir().unwrap();
    let chain_a = create_chain(temp_dir.path(), "node_a", TEST_ADDRESS);

    for _ in 0..3 {
        let coinbase_tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
        chain_a.mine_block(&[coinbase_tx]).unwrap();
    }
    assert_eq!(chain_a.get_best_height().unwrap(), 3);

    let chain_b = create_chain(temp_dir.path(), "node_b", TEST_ADDRESS);
    assert_eq!(chain_b.get_best_height().unwrap(), 0);

    // Replay oldest-first, the order a syncing node downloads them in.
    let mut blocks: Vec<Block> = chain_a.iterator().collect();
    blocks.reverse();
    for block in &blocks {
        assert!(ProofOfWork::validate(block));
        chain_b.add_block(block).unwrap();
    }

    assert_eq!(chain_b.get_best_height().unwrap(), 3);
    assert_eq!(chain_b.get_tip_hash(), chain_a.get_tip_hash());

    // The replayed chain walks back to chain A's genesis.
    let replayed: Vec<String> = chain_b.iterator().map(|b| b.get_hash().to_string()).collect();
    let original: Vec<String> = chain_a.iterator().map(|b| b.get_hash().to_string()).collect();
    assert_eq!(replayed, original);

    // And it yields the same balances once indexed.
    let utxo_b = UTXOSet::new(chain_b);
    utxo_b.reindex().unwrap();
    assert_eq!(get_balance(&utxo_b, TEST_ADDRESS), 4 * SUBSIDY);
}
