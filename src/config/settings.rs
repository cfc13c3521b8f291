use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

static DEFAULT_NODE_ADDR: &str = "127.0.0.1:2001";

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const NODE_ID_KEY: &str = "NODE_ID";

/// Runtime node settings. The node id doubles as the listening port and
/// namespaces the on-disk chain database.
pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let mut map = HashMap::new();

        if let Ok(node_id) = env::var(NODE_ID_KEY) {
            map.insert(
                String::from(NODE_ADDRESS_KEY),
                format!("127.0.0.1:{node_id}"),
            );
        } else {
            map.insert(
                String::from(NODE_ADDRESS_KEY),
                String::from(DEFAULT_NODE_ADDR),
            );
        }

        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            map.insert(String::from(NODE_ADDRESS_KEY), addr);
        }

        Config {
            inner: RwLock::new(map),
        }
    }

    pub fn get_node_addr(&self) -> String {
        let inner = self.inner.read().expect("config lock poisoned");
        inner
            .get(NODE_ADDRESS_KEY)
            .expect("Node address should always be present in config")
            .clone()
    }

    pub fn set_mining_addr(&self, addr: String) {
        let mut inner = self.inner.write().expect("config lock poisoned");
        let _ = inner.insert(String::from(MINING_ADDRESS_KEY), addr);
    }

    pub fn get_mining_addr(&self) -> Option<String> {
        let inner = self.inner.read().expect("config lock poisoned");
        inner.get(MINING_ADDRESS_KEY).cloned()
    }

    pub fn is_miner(&self) -> bool {
        let inner = self.inner.read().expect("config lock poisoned");
        inner.contains_key(MINING_ADDRESS_KEY)
    }

    /// Node id derived from the listening address port
    /// (e.g. "127.0.0.1:2001" -> "2001").
    pub fn extract_node_id_from_addr(&self) -> String {
        let addr = self.get_node_addr();
        if let Some(port) = addr.split(':').next_back() {
            port.to_string()
        } else {
            "default".to_string()
        }
    }
}
