use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, LevelFilter};
use std::process;
use tinycoin::{
    convert_address, hash_pub_key, send_tx, utils, validate_address, Blockchain, Command, Opt,
    Server, Transaction, UTXOSet, Wallets, ADDRESS_CHECK_SUM_LEN, CENTRAL_NODE, GLOBAL_CONFIG,
};

const MINE_TRUE: usize = 1;

// Every command works against the chain of the configured node id, so a
// chain created here is the one `startnode` serves for the same NODE_ID.
fn open_node_blockchain() -> Result<Blockchain, Box<dyn std::error::Error>> {
    let node_id = GLOBAL_CONFIG.extract_node_id_from_addr();
    Ok(Blockchain::open_blockchain_with_node_id(&node_id)?)
}

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let node_id = GLOBAL_CONFIG.extract_node_id_from_addr();
            let blockchain = Blockchain::create_blockchain_with_node_id(&address, &node_id)?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::new();
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }

            let payload = utils::base58_decode(&address)?;
            if payload.len() < ADDRESS_CHECK_SUM_LEN + 1 {
                return Err("Address too short".into());
            }
            let pub_key_hash = &payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN];

            let blockchain = open_node_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain);
            let utxos = utxo_set.find_utxo(pub_key_hash)?;
            let balance: u64 = utxos.iter().map(|utxo| utxo.get_value()).sum();
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::new();
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }

            let wallets = Wallets::new();
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("No wallet found for address: {from}"))?;

            let blockchain = open_node_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            if mine == MINE_TRUE {
                // Mine on the spot: sender also collects the block reward.
                let coinbase_tx = Transaction::new_coinbase_tx(&from)?;
                let block = blockchain.mine_block(&[transaction, coinbase_tx])?;
                utxo_set.update(&block)?;
            } else {
                send_tx(CENTRAL_NODE, &transaction);
            }
            println!("Success!")
        }
        Command::Printchain => {
            let blockchain = open_node_blockchain()?;
            for block in blockchain.iterator() {
                println!("Pre block hash: {}", block.get_pre_block_hash());
                println!("Cur block hash: {}", block.get_hash());
                println!("Cur block timestamp: {}", block.get_timestamp());
                println!("Height: {}", block.get_height());

                for tx in block.get_transactions() {
                    let cur_txid_hex = HEXLOWER.encode(tx.get_id());
                    println!("- Transaction txid_hex: {cur_txid_hex}");

                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let txid_hex = HEXLOWER.encode(input.get_txid());
                            let pub_key_hash = hash_pub_key(input.get_pub_key());
                            let address = convert_address(pub_key_hash.as_slice());
                            println!(
                                "-- Input txid = {}, vout = {}, from = {}",
                                txid_hex,
                                input.get_vout(),
                                address,
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        let pub_key_hash = output.get_pub_key_hash();
                        let address = convert_address(pub_key_hash);
                        println!("-- Output value = {}, to = {}", output.get_value(), address,)
                    }
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let blockchain = open_node_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartNode { miner } => {
            let node_id = GLOBAL_CONFIG.extract_node_id_from_addr();

            if let Some(addr) = miner {
                if !validate_address(&addr) {
                    return Err(format!("Invalid miner address: {addr}").into());
                }
                println!("Mining is on. Address to receive rewards: {addr}");
                GLOBAL_CONFIG.set_mining_addr(addr);
            }

            let blockchain = Blockchain::open_blockchain_with_node_id(&node_id).map_err(|_| {
                format!("No blockchain found for node {node_id}. Use 'createblockchain' first or sync from the network.")
            })?;

            let server = Server::new(blockchain);
            server.run().map_err(|e| format!("Server error: {e}"))?
        }
    }
    Ok(())
}
