// The transaction engine: value moves by consuming previous unspent outputs
// and creating new ones, with each input signed against the output it spends.

use crate::core::Blockchain;
use crate::error::{LedgerError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    base58_decode, deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    serialize, sha256_digest,
};
use crate::wallet::{hash_pub_key, validate_address, Wallet};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed minting reward for a coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// Output index a coinbase input carries instead of a real reference
/// (stand-in for the conventional -1).
pub const COINBASE_OUTPUT_INDEX: usize = usize::MAX;

/// A reference to a previous transaction output, plus the signature and
/// public key proving the right to spend it. Purely referential: it names
/// the output, it does not own it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: usize,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: usize) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> usize {
        self.vout
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }
}

/// A spendable amount locked to a public-key hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        if value == 0 {
            return Err(LedgerError::Transaction(
                "Transaction value must be positive".to_string(),
            ));
        }

        let mut output = TXOutput {
            value,
            pub_key_hash: vec![],
        };
        output.lock(address)?;
        Ok(output)
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    fn lock(&mut self, address: &str) -> Result<()> {
        if !validate_address(address) {
            return Err(LedgerError::InvalidAddress(address.to_string()));
        }

        let payload = base58_decode(address)?;
        if payload.len() < crate::wallet::ADDRESS_CHECK_SUM_LEN + 1 {
            return Err(LedgerError::InvalidAddress("Address too short".to_string()));
        }

        let pub_key_hash =
            payload[1..payload.len() - crate::wallet::ADDRESS_CHECK_SUM_LEN].to_vec();
        self.pub_key_hash = pub_key_hash;
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// A transfer of value: inputs naming previous outputs, new outputs, and an
/// id that is the hash of the transaction with the id field cleared.
#[derive(Debug, Clone, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Coinbase with a random memo, so two rewards to the same address
    /// still get distinct ids.
    pub fn new_coinbase_tx(to: &str) -> Result<Transaction> {
        Self::new_coinbase_tx_with_memo(to, &[])
    }

    /// The minting transaction paying the block reward. Its single input
    /// references nothing; the memo rides in the signature field.
    pub fn new_coinbase_tx_with_memo(to: &str, memo: &[u8]) -> Result<Transaction> {
        let txout = TXOutput::new(SUBSIDY, to)?;
        let memo = if memo.is_empty() {
            Uuid::new_v4().as_bytes().to_vec()
        } else {
            memo.to_vec()
        };
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_OUTPUT_INDEX,
            signature: memo,
            pub_key: vec![],
        };

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![txout],
        };

        tx.id = tx.hash();
        Ok(tx)
    }

    /// Build and sign a spend from `wallet` to `to`. Inputs are selected
    /// greedily from the UTXO index; any excess over `amount` comes back to
    /// the sender as change.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(LedgerError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }

        if !validate_address(to) {
            return Err(LedgerError::InvalidAddress(format!(
                "Invalid to address: {to}"
            )));
        }

        let public_key_hash = hash_pub_key(wallet.get_public_key());
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;

        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER
                .decode(txid_hex.as_bytes())
                .map_err(|e| LedgerError::Transaction(format!("Invalid transaction ID: {e}")))?;
            for out in outs {
                let input = TXInput {
                    txid: txid.clone(),
                    vout: out,
                    signature: vec![],
                    pub_key: wallet.get_public_key().to_vec(),
                };
                inputs.push(input);
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];

        let change = accumulated - amount;
        if change > 0 {
            let from = wallet.get_address();
            outputs.push(TXOutput::new(change, &from)?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };

        tx.id = tx.hash();
        tx.sign(utxo_set.get_blockchain(), wallet.get_pkcs8())?;
        Ok(tx)
    }

    /// A copy with all input signatures and public keys cleared: the base
    /// object both signing and verification derive their digests from.
    fn trimmed_copy(&self) -> Transaction {
        let mut inputs = vec![];
        let mut outputs = vec![];
        for input in &self.vin {
            let txinput = TXInput::new(input.get_txid(), input.get_vout());
            inputs.push(txinput);
        }
        for output in &self.vout {
            outputs.push(output.clone());
        }
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: outputs,
        }
    }

    /// Sign each input against the output it spends. The per-input digest
    /// carries only that input's referenced lock hash, so inputs can be
    /// signed in any order.
    pub fn sign(&mut self, blockchain: &Blockchain, pkcs8: &[u8]) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut tx_copy = self.trimmed_copy();

        for (idx, vin) in self.vin.iter_mut().enumerate() {
            let prev_tx = blockchain.find_transaction(vin.get_txid()).ok_or_else(|| {
                LedgerError::TransactionNotFound(HEXLOWER.encode(vin.get_txid()))
            })?;

            if vin.vout >= prev_tx.vout.len() {
                return Err(LedgerError::Transaction("Invalid output index".to_string()));
            }

            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = prev_tx.vout[vin.vout].pub_key_hash.clone();
            tx_copy.id = tx_copy.hash();
            tx_copy.vin[idx].pub_key = vec![];

            let signature = ecdsa_p256_sha256_sign_digest(pkcs8, tx_copy.get_id())?;
            vin.signature = signature;
        }
        Ok(())
    }

    /// Verify a transaction against the chain: referenced outputs must
    /// exist and be unspent, no value may be minted, and every input
    /// signature must check out. Coinbase transactions only need the right
    /// shape.
    pub fn verify(&self, blockchain: &Blockchain) -> bool {
        if self.is_coinbase() {
            return self.verify_coinbase();
        }

        if let Err(e) = blockchain.validate_transaction_inputs(self) {
            log::error!("Transaction input validation failed: {e}");
            return false;
        }

        if !self.verify_conservation(blockchain) {
            log::error!("Transaction creates value out of nothing, rejecting");
            return false;
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_tx = match blockchain.find_transaction(vin.get_txid()) {
                Some(tx) => tx,
                None => {
                    log::error!("Previous transaction not found during verification");
                    return false;
                }
            };

            if vin.vout >= prev_tx.vout.len() {
                log::error!("Invalid output index during verification");
                return false;
            }

            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = prev_tx.vout[vin.vout].pub_key_hash.clone();
            tx_copy.id = tx_copy.hash();
            tx_copy.vin[idx].pub_key = vec![];

            let verify = ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                tx_copy.get_id(),
            );
            if !verify {
                return false;
            }
        }
        true
    }

    fn verify_coinbase(&self) -> bool {
        if self.vin.len() != 1 {
            log::error!("Coinbase transaction must have exactly one input");
            return false;
        }

        if self.vout.is_empty() {
            log::error!("Coinbase transaction must have at least one output");
            return false;
        }

        // A coinbase mints exactly the subsidy, no more.
        match self.get_output_value() {
            Ok(total) if total == SUBSIDY => true,
            Ok(total) => {
                log::error!("Coinbase mints {total}, expected {SUBSIDY}");
                false
            }
            Err(e) => {
                log::error!("Could not compute coinbase output value: {e}");
                false
            }
        }
    }

    // Conservation: the outputs may not exceed the referenced input values.
    fn verify_conservation(&self, blockchain: &Blockchain) -> bool {
        let input_value = match self.get_input_value(blockchain) {
            Ok(v) => v,
            Err(e) => {
                log::error!("Could not compute input value: {e}");
                return false;
            }
        };
        let output_value = match self.get_output_value() {
            Ok(v) => v,
            Err(e) => {
                log::error!("Could not compute output value: {e}");
                return false;
            }
        };

        output_value <= input_value
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1
            && self.vin[0].txid.is_empty()
            && self.vin[0].vout == COINBASE_OUTPUT_INDEX
    }

    fn hash(&mut self) -> Vec<u8> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        match tx_copy.serialize() {
            Ok(serialized) => sha256_digest(&serialized),
            Err(_) => {
                log::error!("Transaction serialization failed during hash calculation");
                sha256_digest(b"transaction_serialization_error")
            }
        }
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_bytes(&self) -> Vec<u8> {
        self.id.clone()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    /// Total value of the referenced previous outputs. Zero for coinbase.
    pub fn get_input_value(&self, blockchain: &Blockchain) -> Result<u64> {
        if self.is_coinbase() {
            return Ok(0);
        }

        let mut total = 0u64;
        for vin in &self.vin {
            let prev_tx = blockchain.find_transaction(vin.get_txid()).ok_or_else(|| {
                LedgerError::TransactionNotFound(HEXLOWER.encode(vin.get_txid()))
            })?;

            if vin.vout >= prev_tx.vout.len() {
                return Err(LedgerError::Transaction("Invalid output index".to_string()));
            }

            let prev_output = &prev_tx.vout[vin.vout];
            total = total
                .checked_add(prev_output.get_value())
                .ok_or_else(|| LedgerError::Transaction("Input value overflow".to_string()))?;
        }
        Ok(total)
    }

    pub fn get_output_value(&self) -> Result<u64> {
        let mut total = 0u64;
        for vout in &self.vout {
            total = total
                .checked_add(vout.get_value())
                .ok_or_else(|| LedgerError::Transaction("Output value overflow".to_string()))?;
        }
        Ok(total)
    }

    #[cfg(test)]
    pub(crate) fn corrupt_input_signature_for_test(&mut self, input_idx: usize, byte_idx: usize) {
        self.vin[input_idx].signature[byte_idx] ^= 0x01;
    }
}
