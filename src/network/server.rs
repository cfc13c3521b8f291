use crate::config::GLOBAL_CONFIG;
use crate::core::{Block, Blockchain, ProofOfWork, Transaction};
use crate::error::{LedgerError, Result};
use crate::network::node::Nodes;
use crate::network::protocol::{
    build_request, bytes_to_command, parse_payload, AddrPayload, BlockPayload, GetBlocksPayload,
    GetDataPayload, InvKind, InvPayload, TxPayload, VersionPayload, CMD_ADDR, CMD_BLOCK,
    CMD_GET_BLOCKS, CMD_GET_DATA, CMD_INV, CMD_TX, CMD_VERSION, COMMAND_LENGTH,
};
use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
use data_encoding::HEXLOWER;
use log::{error, info, warn};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const NODE_VERSION: usize = 1;

/// Well-known seed node every fresh node dials first.
pub const CENTRAL_NODE: &str = "127.0.0.1:2001";

/// Pool size at which a mining node attempts to assemble a block.
pub const TRANSACTION_THRESHOLD: usize = 2;

// Upper bound on consecutive blocks mined from one trigger, so a flood of
// incoming transactions cannot keep the handler thread mining forever.
const MAX_MINING_ROUNDS: usize = 8;

const TCP_WRITE_TIMEOUT: u64 = 5000;

/// Shared mutable state of a running node: the peers it knows, the
/// transactions waiting to be mined, and the block hashes announced but not
/// yet downloaded.
pub struct NodeState {
    known_nodes: Nodes,
    memory_pool: MemoryPool,
    blocks_in_transit: BlockInTransit,
}

impl NodeState {
    fn new() -> NodeState {
        let known_nodes = Nodes::new();
        known_nodes.add_node(String::from(CENTRAL_NODE));
        NodeState {
            known_nodes,
            memory_pool: MemoryPool::new(),
            blocks_in_transit: BlockInTransit::new(),
        }
    }

    pub fn known_nodes(&self) -> &Nodes {
        &self.known_nodes
    }

    pub fn memory_pool(&self) -> &MemoryPool {
        &self.memory_pool
    }
}

/// TCP server driving chain synchronization and transaction relay. Each
/// instance owns its listening address, so messages it sends carry the
/// right reply-to peer.
#[derive(Clone)]
pub struct Server {
    blockchain: Blockchain,
    node_addr: String,
    state: Arc<NodeState>,
}

impl Server {
    pub fn new(blockchain: Blockchain) -> Server {
        let node_addr = GLOBAL_CONFIG.get_node_addr();
        Self::new_with_addr(blockchain, &node_addr)
    }

    pub fn new_with_addr(blockchain: Blockchain, node_addr: &str) -> Server {
        Server {
            blockchain,
            node_addr: node_addr.to_string(),
            state: Arc::new(NodeState::new()),
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    /// Bind the node's address and serve until the process exits.
    /// Non-central nodes announce themselves to the central node first.
    pub fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.node_addr).map_err(|e| {
            LedgerError::Network(format!("Failed to bind to {}: {e}", self.node_addr))
        })?;

        info!("Node listening on {}", self.node_addr);

        if !self.node_addr.eq(CENTRAL_NODE) {
            let best_height = self.blockchain.get_best_height()?;
            self.send_version(CENTRAL_NODE, best_height);
        }

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    thread::spawn(move || {
                        if let Err(e) = server.handle_connection(stream) {
                            error!("Connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        stream
            .set_read_timeout(Some(Duration::from_secs(60)))
            .map_err(|e| LedgerError::Network(format!("Failed to set read timeout: {e}")))?;

        let mut request = vec![];
        stream
            .read_to_end(&mut request)
            .map_err(|e| LedgerError::Network(format!("Failed to read request: {e}")))?;
        let _ = stream.shutdown(Shutdown::Both);

        if request.len() < COMMAND_LENGTH {
            return Err(LedgerError::Network(format!(
                "Request too short: {} bytes",
                request.len()
            )));
        }

        let command = bytes_to_command(&request[..COMMAND_LENGTH]);
        info!("Received {command} command");

        match command.as_str() {
            CMD_VERSION => self.handle_version(&request),
            CMD_GET_BLOCKS => self.handle_get_blocks(&request),
            CMD_INV => self.handle_inv(&request),
            CMD_GET_DATA => self.handle_get_data(&request),
            CMD_BLOCK => self.handle_block(&request),
            CMD_TX => self.handle_tx(&request),
            CMD_ADDR => self.handle_addr(&request),
            _ => Err(LedgerError::Network(format!("Unknown command: {command}"))),
        }
    }

    // Handshake: learn the peer, then either pull its longer chain or
    // announce ours back.
    fn handle_version(&self, request: &[u8]) -> Result<()> {
        let payload: VersionPayload = parse_payload(request)?;
        info!(
            "Version from {}: version={}, best_height={}",
            payload.addr_from, payload.version, payload.best_height
        );

        let local_best_height = self.blockchain.get_best_height()?;
        if local_best_height < payload.best_height {
            self.send_get_blocks(&payload.addr_from);
        }
        if local_best_height > payload.best_height {
            self.send_version(&payload.addr_from, local_best_height);
        }

        if !self.state.known_nodes.node_is_known(&payload.addr_from) {
            self.state.known_nodes.add_node(payload.addr_from);
        }
        Ok(())
    }

    fn handle_get_blocks(&self, request: &[u8]) -> Result<()> {
        let payload: GetBlocksPayload = parse_payload(request)?;
        let blocks = self.blockchain.get_block_hashes();
        self.send_inv(&payload.addr_from, InvKind::Block, &blocks);
        Ok(())
    }

    // Inventory: queue announced blocks and request them one at a time;
    // request an announced transaction only if the pool lacks it.
    fn handle_inv(&self, request: &[u8]) -> Result<()> {
        let payload: InvPayload = parse_payload(request)?;
        match payload.kind {
            InvKind::Block => {
                self.state.blocks_in_transit.add_blocks(&payload.items);

                if let Some(block_hash) = payload.items.first() {
                    self.send_get_data(&payload.addr_from, InvKind::Block, block_hash);
                    self.state.blocks_in_transit.remove(block_hash);
                }
            }
            InvKind::Tx => {
                if let Some(txid) = payload.items.first() {
                    let txid_hex = HEXLOWER.encode(txid);
                    if !self.state.memory_pool.contains(&txid_hex) {
                        self.send_get_data(&payload.addr_from, InvKind::Tx, txid);
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_get_data(&self, request: &[u8]) -> Result<()> {
        let payload: GetDataPayload = parse_payload(request)?;
        match payload.kind {
            InvKind::Block => match self.blockchain.get_block_by_bytes(&payload.id) {
                Ok(block) => self.send_block(&payload.addr_from, &block),
                Err(LedgerError::BlockNotFound(hash)) => {
                    info!("Requested block not found: {hash}");
                }
                Err(e) => return Err(e),
            },
            InvKind::Tx => {
                let txid_hex = HEXLOWER.encode(&payload.id);
                if let Some(tx) = self.state.memory_pool.get(&txid_hex) {
                    self.send_tx_message(&payload.addr_from, &tx);
                }
            }
        }
        Ok(())
    }

    // A downloaded block: verify its proof of work, store it, then either
    // pull the next queued block or rebuild the chainstate.
    fn handle_block(&self, request: &[u8]) -> Result<()> {
        let payload: BlockPayload = parse_payload(request)?;
        let block = Block::deserialize(&payload.block)?;

        if !ProofOfWork::validate(&block) {
            warn!(
                "Rejecting block {} from {}: invalid proof of work",
                block.get_hash(),
                payload.addr_from
            );
            return Ok(());
        }

        self.blockchain.add_block(&block)?;
        info!("Added block {} from {}", block.get_hash(), payload.addr_from);

        if let Some(block_hash) = self.state.blocks_in_transit.first() {
            self.send_get_data(&payload.addr_from, InvKind::Block, &block_hash);
            self.state.blocks_in_transit.remove(&block_hash);
        } else {
            let utxo_set = UTXOSet::new(self.blockchain.clone());
            utxo_set.reindex()?;
            info!("Chainstate rebuilt after sync");
        }
        Ok(())
    }

    // A relayed transaction enters the pool. The central node fans it out;
    // a non-central miner assembles blocks once the pool is full enough.
    fn handle_tx(&self, request: &[u8]) -> Result<()> {
        let payload: TxPayload = parse_payload(request)?;
        let tx = Transaction::deserialize(&payload.transaction)?;
        let txid_hex = HEXLOWER.encode(tx.get_id());
        info!("Pooled transaction {txid_hex} from {}", payload.addr_from);

        self.state.memory_pool.add(tx.clone());

        if self.node_addr.eq(CENTRAL_NODE) {
            for node in self.state.known_nodes.get_nodes() {
                let addr = node.get_addr();
                if addr.eq(&self.node_addr) || addr.eq(&payload.addr_from) {
                    continue;
                }
                self.send_inv(&addr, InvKind::Tx, &[tx.get_id_bytes()]);
            }
        }

        if self.should_mine() {
            self.mine_pooled_transactions()?;
        }
        Ok(())
    }

    fn handle_addr(&self, request: &[u8]) -> Result<()> {
        let payload: AddrPayload = parse_payload(request)?;
        for addr in payload.addr_list {
            self.state.known_nodes.add_node(addr);
        }
        info!("There are {} known nodes now", self.state.known_nodes.len());

        for node in self.state.known_nodes.get_nodes() {
            if node.get_addr().eq(&self.node_addr) {
                continue;
            }
            self.send_get_blocks(&node.get_addr());
        }
        Ok(())
    }

    // The central node only relays; mining stays on worker nodes with a
    // configured reward address and a full enough pool.
    fn should_mine(&self) -> bool {
        !self.node_addr.eq(CENTRAL_NODE)
            && GLOBAL_CONFIG.is_miner()
            && self.state.memory_pool.len() >= TRANSACTION_THRESHOLD
    }

    /// Drain the pool into mined blocks: discard transactions that fail
    /// verification, add a coinbase for the configured mining address, and
    /// announce each new block to every known peer.
    fn mine_pooled_transactions(&self) -> Result<()> {
        let mining_address = GLOBAL_CONFIG
            .get_mining_addr()
            .ok_or_else(|| LedgerError::Network("Mining address not configured".to_string()))?;

        for _ in 0..MAX_MINING_ROUNDS {
            let pooled = self.state.memory_pool.get_all();
            if pooled.is_empty() {
                return Ok(());
            }

            let mut txs = vec![];
            for tx in pooled {
                let txid_hex = HEXLOWER.encode(tx.get_id());
                self.state.memory_pool.remove(&txid_hex);
                if tx.verify(&self.blockchain) {
                    txs.push(tx);
                } else {
                    warn!("Discarding invalid pooled transaction {txid_hex}");
                }
            }
            if txs.is_empty() {
                info!("All pooled transactions were invalid, nothing to mine");
                return Ok(());
            }

            let coinbase_tx = Transaction::new_coinbase_tx(&mining_address)?;
            txs.push(coinbase_tx);

            let new_block = self.blockchain.mine_block(&txs)?;
            let utxo_set = UTXOSet::new(self.blockchain.clone());
            utxo_set.reindex()?;
            info!("New block {} is mined!", new_block.get_hash());

            for node in self.state.known_nodes.get_nodes() {
                if node.get_addr().eq(&self.node_addr) {
                    continue;
                }
                self.send_inv(
                    &node.get_addr(),
                    InvKind::Block,
                    &[new_block.get_hash_bytes()],
                );
            }

            if self.state.memory_pool.is_empty() {
                return Ok(());
            }
        }

        warn!(
            "Mining round limit reached with {} transactions still pooled",
            self.state.memory_pool.len()
        );
        Ok(())
    }

    fn send_version(&self, addr: &str, best_height: usize) {
        let payload = VersionPayload {
            version: NODE_VERSION,
            best_height,
            addr_from: self.node_addr.clone(),
        };
        self.send_request(addr, CMD_VERSION, &payload);
    }

    fn send_get_blocks(&self, addr: &str) {
        let payload = GetBlocksPayload {
            addr_from: self.node_addr.clone(),
        };
        self.send_request(addr, CMD_GET_BLOCKS, &payload);
    }

    fn send_inv(&self, addr: &str, kind: InvKind, items: &[Vec<u8>]) {
        let payload = InvPayload {
            addr_from: self.node_addr.clone(),
            kind,
            items: items.to_vec(),
        };
        self.send_request(addr, CMD_INV, &payload);
    }

    fn send_get_data(&self, addr: &str, kind: InvKind, id: &[u8]) {
        let payload = GetDataPayload {
            addr_from: self.node_addr.clone(),
            kind,
            id: id.to_vec(),
        };
        self.send_request(addr, CMD_GET_DATA, &payload);
    }

    fn send_block(&self, addr: &str, block: &Block) {
        let block_data = match block.serialize() {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to serialize block: {e}");
                return;
            }
        };
        let payload = BlockPayload {
            addr_from: self.node_addr.clone(),
            block: block_data,
        };
        self.send_request(addr, CMD_BLOCK, &payload);
    }

    fn send_tx_message(&self, addr: &str, tx: &Transaction) {
        let tx_data = match tx.serialize() {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to serialize transaction: {e}");
                return;
            }
        };
        let payload = TxPayload {
            addr_from: self.node_addr.clone(),
            transaction: tx_data,
        };
        self.send_request(addr, CMD_TX, &payload);
    }

    fn send_request<T: serde::Serialize + bincode::Encode>(
        &self,
        addr: &str,
        command: &str,
        payload: &T,
    ) {
        let request = match build_request(command, payload) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to build {command} request: {e}");
                return;
            }
        };
        if let Err(e) = send_data(addr, &request) {
            warn!("Dropping unreachable peer {addr}: {e}");
            self.state.known_nodes.evict_node(addr);
        }
    }
}

// One message per connection: dial, write, close.
fn send_data(addr: &str, request: &[u8]) -> Result<()> {
    let socket_addr = addr
        .parse::<SocketAddr>()
        .map_err(|e| LedgerError::Network(format!("Invalid address {addr}: {e}")))?;

    let mut stream =
        TcpStream::connect_timeout(&socket_addr, Duration::from_millis(TCP_WRITE_TIMEOUT))
            .map_err(|e| LedgerError::Network(format!("Failed to connect to {addr}: {e}")))?;

    stream
        .set_write_timeout(Some(Duration::from_millis(TCP_WRITE_TIMEOUT)))
        .map_err(|e| LedgerError::Network(format!("Failed to set write timeout: {e}")))?;

    stream
        .write_all(request)
        .map_err(|e| LedgerError::Network(format!("Failed to send data to {addr}: {e}")))?;
    let _ = stream.flush();
    Ok(())
}

/// Hand a freshly signed transaction to a node, normally the central one.
/// Used by the CLI when the sender is not mining its own blocks.
pub fn send_tx(addr: &str, tx: &Transaction) {
    let tx_data = match tx.serialize() {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to serialize transaction: {e}");
            return;
        }
    };
    let payload = TxPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        transaction: tx_data,
    };
    let request = match build_request(CMD_TX, &payload) {
        Ok(request) => request,
        Err(e) => {
            error!("Failed to build tx request: {e}");
            return;
        }
    };
    if let Err(e) = send_data(addr, &request) {
        error!("Failed to send transaction to {addr}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::{create_temp_dir, create_test_blockchain, TEST_ADDRESS};
    use std::time::Instant;

    // Two distinct loopback ports, reserved while both listeners are alive
    // so the OS cannot hand out the same one twice.
    fn reserve_two_addrs() -> (String, String) {
        let first = TcpListener::bind("127.0.0.1:0").unwrap();
        let second = TcpListener::bind("127.0.0.1:0").unwrap();
        (
            first.local_addr().unwrap().to_string(),
            second.local_addr().unwrap().to_string(),
        )
    }

    #[test]
    fn test_server_seeds_central_node() {
        let (blockchain, _temp_dir) = create_test_blockchain().unwrap();
        let server = Server::new(blockchain);
        assert!(server.state().known_nodes().node_is_known(CENTRAL_NODE));
    }

    #[test]
    fn test_central_node_never_mines() {
        let (blockchain, _temp_dir) = create_test_blockchain().unwrap();
        let central = Server::new_with_addr(blockchain.clone(), CENTRAL_NODE);
        let worker = Server::new_with_addr(blockchain, "127.0.0.1:2002");

        GLOBAL_CONFIG.set_mining_addr(TEST_ADDRESS.to_string());
        for _ in 0..TRANSACTION_THRESHOLD {
            let tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
            central.state().memory_pool().add(tx.clone());
            worker.state().memory_pool().add(tx);
        }

        assert!(!central.should_mine());
        assert!(worker.should_mine());
    }

    #[test]
    fn test_mining_waits_for_full_pool() {
        let (blockchain, _temp_dir) = create_test_blockchain().unwrap();
        let worker = Server::new_with_addr(blockchain, "127.0.0.1:2003");

        GLOBAL_CONFIG.set_mining_addr(TEST_ADDRESS.to_string());
        let tx = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
        worker.state().memory_pool().add(tx);

        assert!(worker.state().memory_pool().len() < TRANSACTION_THRESHOLD);
        assert!(!worker.should_mine());
    }

    // Full wire-level sync: a fresh node behind by three blocks catches up
    // through the version / getblocks / inv / getdata / block exchange.
    #[test]
    fn test_block_sync_between_two_nodes() {
        let temp_dir = create_temp_dir().unwrap();
        let chain_a = Blockchain::create_blockchain_with_path(
            TEST_ADDRESS,
            temp_dir.path().join("node_a").to_str().unwrap(),
        )
        .unwrap();
        for _ in 0..3 {
            let coinbase = Transaction::new_coinbase_tx(TEST_ADDRESS).unwrap();
            chain_a.mine_block(&[coinbase]).unwrap();
        }

        let chain_b = Blockchain::create_blockchain_with_path(
            TEST_ADDRESS,
            temp_dir.path().join("node_b").to_str().unwrap(),
        )
        .unwrap();
        assert_eq!(chain_b.get_best_height().unwrap(), 0);

        let (addr_a, addr_b) = reserve_two_addrs();
        let server_a = Server::new_with_addr(chain_a.clone(), &addr_a);
        let server_b = Server::new_with_addr(chain_b.clone(), &addr_b);

        let runner = server_a.clone();
        thread::spawn(move || {
            let _ = runner.run();
        });
        let runner = server_b.clone();
        thread::spawn(move || {
            let _ = runner.run();
        });
        thread::sleep(Duration::from_millis(200));

        // B introduces itself as the shorter chain; A answers with its own
        // version and the block download sequence takes over.
        server_b.send_version(&addr_a, chain_b.get_best_height().unwrap());

        let utxo_b = UTXOSet::new(chain_b.clone());
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            if chain_b.get_best_height().unwrap() == 3
                && utxo_b.count_transactions().unwrap_or(0) == 4
            {
                break;
            }
            assert!(
                Instant::now() < deadline,
                "nodes did not converge within the deadline"
            );
            thread::sleep(Duration::from_millis(100));
        }

        assert_eq!(chain_b.get_tip_hash(), chain_a.get_tip_hash());
        assert!(server_a.state().known_nodes().node_is_known(&addr_b));

        let utxo_a = UTXOSet::new(chain_a);
        utxo_a.reindex().unwrap();
        assert_eq!(
            utxo_b.count_transactions().unwrap(),
            utxo_a.count_transactions().unwrap()
        );
    }
}
